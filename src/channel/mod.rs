//! Channels.
//!
//! A [`Channel`] is an ordered pipeline of [`ChannelSlot`]s bound to one
//! event loop. The leftmost slot owns the transport (the socket handler),
//! later slots hold protocol handlers such as TLS and the ALPN dispatcher.
//!
//! Lifecycle: `new` schedules setup on the loop and the setup callback fires
//! there; `shutdown` runs every handler's `on_shutdown` right to left, then
//! fires the shutdown callback; `destroy` releases the pipeline.

mod handler;
mod slot;

pub use handler::ChannelHandler;
pub use slot::ChannelSlot;

use crate::base::context::socket_error;
use crate::base::lock;
use crate::base::neterror::NetError;
use crate::eventloop::EventLoop;
use crate::socket::BoxedSocket;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

const READ_FRAGMENT_SIZE: usize = 16 * 1024;
const TRANSPORT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

type SetupCompletedFn = Box<dyn FnOnce(&Channel, Result<(), NetError>) + Send>;
type ShutdownCompletedFn = Box<dyn FnOnce(&Channel, Result<(), NetError>) + Send>;

/// Channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    SettingUp,
    Active,
    ShuttingDown,
    ShutDown,
    Destroyed,
}

/// Completion callbacks for a channel, both invoked on its event loop.
pub struct ChannelCallbacks {
    on_setup_completed: SetupCompletedFn,
    on_shutdown_completed: ShutdownCompletedFn,
}

impl ChannelCallbacks {
    pub fn new<S, D>(on_setup_completed: S, on_shutdown_completed: D) -> Self
    where
        S: FnOnce(&Channel, Result<(), NetError>) + Send + 'static,
        D: FnOnce(&Channel, Result<(), NetError>) + Send + 'static,
    {
        Self {
            on_setup_completed: Box::new(on_setup_completed),
            on_shutdown_completed: Box::new(on_shutdown_completed),
        }
    }
}

struct SlotEntry {
    id: u64,
    name: Option<&'static str>,
    handler: Option<Box<dyn ChannelHandler>>,
}

#[derive(Default)]
struct SlotTable {
    next_id: u64,
    attached: Vec<SlotEntry>,
    detached: Vec<u64>,
}

impl SlotTable {
    fn position(&self, id: u64) -> Option<usize> {
        self.attached.iter().position(|entry| entry.id == id)
    }

    fn take_detached(&mut self, id: u64) -> Result<(), NetError> {
        let index = self
            .detached
            .iter()
            .position(|detached| *detached == id)
            .ok_or(NetError::InvalidChannelSlot)?;
        self.detached.swap_remove(index);
        Ok(())
    }
}

struct ChannelInner {
    id: u64,
    event_loop: EventLoop,
    state: Mutex<ChannelState>,
    slots: Mutex<SlotTable>,
    transport: Mutex<Option<BoxedSocket>>,
    write_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    write_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    closing: watch::Sender<bool>,
    on_setup_completed: Mutex<Option<SetupCompletedFn>>,
    on_shutdown_completed: Mutex<Option<ShutdownCompletedFn>>,
}

/// Handle to a channel. Cheap to clone; all clones refer to one pipeline.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Creates a channel on `event_loop`.
    ///
    /// Setup completes asynchronously: the setup callback runs on the loop
    /// once the channel is ready for slots.
    pub fn new(event_loop: &EventLoop, callbacks: ChannelCallbacks) -> Result<Channel, NetError> {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (closing, _) = watch::channel(false);
        let channel = Channel {
            inner: Arc::new(ChannelInner {
                id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
                event_loop: event_loop.clone(),
                state: Mutex::new(ChannelState::SettingUp),
                slots: Mutex::new(SlotTable::default()),
                transport: Mutex::new(None),
                write_tx: Mutex::new(Some(write_tx)),
                write_rx: Mutex::new(Some(write_rx)),
                closing,
                on_setup_completed: Mutex::new(Some(callbacks.on_setup_completed)),
                on_shutdown_completed: Mutex::new(Some(callbacks.on_shutdown_completed)),
            }),
        };

        let setup = channel.clone();
        event_loop.schedule_task_now(move || setup.complete_setup())?;
        tracing::trace!(channel = channel.id(), loop_index = event_loop.index(), "channel created");
        Ok(channel)
    }

    fn complete_setup(&self) {
        let result = {
            let mut state = lock(&self.inner.state);
            if *state == ChannelState::SettingUp {
                *state = ChannelState::Active;
                Ok(())
            } else {
                Err(NetError::ChannelCantAcceptInput)
            }
        };
        let callback = lock(&self.inner.on_setup_completed).take();
        if let Some(callback) = callback {
            callback(self, result);
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.event_loop
    }

    pub fn state(&self) -> ChannelState {
        *lock(&self.inner.state)
    }

    pub fn is_active(&self) -> bool {
        self.state() == ChannelState::Active
    }

    pub fn ptr_eq(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- slots ----

    /// Allocates a slot. The first slot of a channel is attached as the
    /// head of the pipeline; later slots start detached.
    pub fn slot_new(&self) -> Result<ChannelSlot, NetError> {
        if self.state() == ChannelState::Destroyed {
            return Err(NetError::ChannelCantAcceptInput);
        }
        let mut slots = lock(&self.inner.slots);
        slots.next_id += 1;
        let id = slots.next_id;
        if slots.attached.is_empty() && slots.detached.is_empty() {
            slots.attached.push(SlotEntry {
                id,
                name: None,
                handler: None,
            });
        } else {
            slots.detached.push(id);
        }
        Ok(ChannelSlot::new(self.clone(), id))
    }

    /// Attaches a detached slot at the right end of the pipeline.
    pub fn slot_insert_end(&self, slot: &ChannelSlot) -> Result<(), NetError> {
        if !self.ptr_eq(slot.channel()) {
            return Err(NetError::InvalidChannelSlot);
        }
        let mut slots = lock(&self.inner.slots);
        slots.take_detached(slot.id())?;
        slots.attached.push(SlotEntry {
            id: slot.id(),
            name: None,
            handler: None,
        });
        Ok(())
    }

    pub(crate) fn insert_right_of(&self, left: u64, right: u64) -> Result<(), NetError> {
        let mut slots = lock(&self.inner.slots);
        let index = slots.position(left).ok_or(NetError::InvalidChannelSlot)?;
        slots.take_detached(right)?;
        slots.attached.insert(
            index + 1,
            SlotEntry {
                id: right,
                name: None,
                handler: None,
            },
        );
        Ok(())
    }

    pub(crate) fn set_slot_handler(&self, id: u64, handler: Box<dyn ChannelHandler>) -> Result<(), NetError> {
        let previous = {
            let mut slots = lock(&self.inner.slots);
            let index = slots.position(id).ok_or(NetError::InvalidChannelSlot)?;
            let entry = &mut slots.attached[index];
            entry.name = Some(handler.name());
            entry.handler.replace(handler)
        };
        drop(previous);
        Ok(())
    }

    pub(crate) fn slot_attached(&self, id: u64) -> bool {
        lock(&self.inner.slots).position(id).is_some()
    }

    /// Handler names in pipeline order, left to right.
    pub fn handler_names(&self) -> Vec<&'static str> {
        lock(&self.inner.slots)
            .attached
            .iter()
            .filter_map(|entry| entry.name)
            .collect()
    }

    fn slot_ids(&self) -> Vec<u64> {
        lock(&self.inner.slots).attached.iter().map(|entry| entry.id).collect()
    }

    // Handlers are moved out of their slot while called so they may call
    // back into the channel.
    fn take_handler(&self, id: u64) -> Option<Box<dyn ChannelHandler>> {
        let mut slots = lock(&self.inner.slots);
        let index = slots.position(id)?;
        slots.attached[index].handler.take()
    }

    fn restore_handler(&self, id: u64, handler: Box<dyn ChannelHandler>) {
        let leftover = {
            let mut slots = lock(&self.inner.slots);
            match slots.position(id) {
                Some(index) if slots.attached[index].handler.is_none() => {
                    slots.attached[index].handler = Some(handler);
                    None
                }
                _ => Some(handler),
            }
        };
        drop(leftover);
    }

    fn dispatch_read(&self, mut data: Bytes) {
        for id in self.slot_ids() {
            let Some(mut handler) = self.take_handler(id) else {
                continue;
            };
            let next = handler.on_read(self, data);
            self.restore_handler(id, handler);
            match next {
                Some(next) => data = next,
                None => return,
            }
        }
        tracing::trace!(channel = self.id(), len = data.len(), "read reached end of pipeline");
    }

    /// Tells the handler to the right of `from_slot` which application
    /// protocol was negotiated.
    ///
    /// A handler may answer with a replacement for itself, which takes over
    /// its slot.
    pub fn notify_protocol_negotiated(&self, from_slot: u64, protocol: &str) -> Result<(), NetError> {
        let right = {
            let slots = lock(&self.inner.slots);
            let index = slots.position(from_slot).ok_or(NetError::InvalidChannelSlot)?;
            slots.attached.get(index + 1).map(|entry| entry.id)
        };
        let Some(right) = right else {
            return Ok(());
        };
        let Some(mut handler) = self.take_handler(right) else {
            return Ok(());
        };

        match handler.on_protocol_negotiated(self, protocol) {
            Ok(Some(replacement)) => {
                tracing::debug!(
                    channel = self.id(),
                    protocol,
                    from = handler.name(),
                    to = replacement.name(),
                    "handler replaced after protocol negotiation"
                );
                drop(handler);
                self.set_slot_handler(right, replacement)
            }
            Ok(None) => {
                self.restore_handler(right, handler);
                Ok(())
            }
            Err(e) => {
                self.restore_handler(right, handler);
                Err(e)
            }
        }
    }

    // ---- transport ----

    /// Installs the byte stream the pipeline reads from and writes to.
    pub fn set_transport(&self, transport: BoxedSocket) -> Result<(), NetError> {
        match self.state() {
            ChannelState::SettingUp | ChannelState::Active => {
                *lock(&self.inner.transport) = Some(transport);
                Ok(())
            }
            _ => Err(NetError::ChannelCantAcceptInput),
        }
    }

    /// Removes the transport, e.g. so TLS can wrap it.
    pub fn take_transport(&self) -> Option<BoxedSocket> {
        lock(&self.inner.transport).take()
    }

    pub fn has_transport(&self) -> bool {
        lock(&self.inner.transport).is_some()
    }

    /// Starts pumping data between the transport and the pipeline.
    pub fn start_io(&self) -> Result<(), NetError> {
        if !self.is_active() {
            return Err(NetError::ChannelCantAcceptInput);
        }
        let writes = lock(&self.inner.write_rx)
            .take()
            .ok_or(NetError::SocketIllegalOperationForState)?;
        let Some(transport) = self.take_transport() else {
            *lock(&self.inner.write_rx) = Some(writes);
            return Err(NetError::SocketNotConnected);
        };

        let closing = self.inner.closing.subscribe();
        self.inner
            .event_loop
            .spawn(drive_io(self.clone(), transport, writes, closing))
    }

    /// Queues `data` for the transport.
    pub fn write(&self, data: Bytes) -> Result<(), NetError> {
        if !self.is_active() {
            return Err(NetError::ChannelCantAcceptInput);
        }
        let sender = lock(&self.inner.write_tx);
        sender
            .as_ref()
            .ok_or(NetError::ChannelCantAcceptInput)?
            .send(data)
            .map_err(|_| NetError::ChannelCantAcceptInput)
    }

    /// Signal that flips to `true` once shutdown starts.
    pub(crate) fn closing_signal(&self) -> watch::Receiver<bool> {
        self.inner.closing.subscribe()
    }

    // ---- lifecycle ----

    /// Starts shutting the channel down with `result` as the reason.
    ///
    /// Completion runs on the event loop. Repeated calls are no-ops.
    pub fn shutdown(&self, result: Result<(), NetError>) {
        {
            let mut state = lock(&self.inner.state);
            match *state {
                ChannelState::SettingUp | ChannelState::Active => *state = ChannelState::ShuttingDown,
                _ => return,
            }
        }
        self.inner.closing.send_replace(true);
        tracing::debug!(channel = self.id(), result = ?result, "channel shutting down");

        let channel = self.clone();
        if let Err(e) = self
            .inner
            .event_loop
            .schedule_task_now(move || channel.complete_shutdown(result))
        {
            tracing::warn!(channel = self.id(), error = %e, "event loop gone, finishing shutdown inline");
            self.complete_shutdown(result);
        }
    }

    fn complete_shutdown(&self, result: Result<(), NetError>) {
        for id in self.slot_ids().into_iter().rev() {
            if let Some(mut handler) = self.take_handler(id) {
                handler.on_shutdown(self, result);
                self.restore_handler(id, handler);
            }
        }
        drop(self.take_transport());
        drop(lock(&self.inner.write_tx).take());

        {
            let mut state = lock(&self.inner.state);
            if *state != ChannelState::Destroyed {
                *state = ChannelState::ShutDown;
            }
        }
        tracing::trace!(channel = self.id(), "channel shutdown complete");

        let callback = lock(&self.inner.on_shutdown_completed).take();
        if let Some(callback) = callback {
            callback(self, result);
        }
    }

    /// Releases the pipeline. Call once shutdown has completed.
    pub fn destroy(&self) {
        *lock(&self.inner.state) = ChannelState::Destroyed;
        self.inner.closing.send_replace(true);

        let slots = std::mem::take(&mut *lock(&self.inner.slots));
        let transport = self.take_transport();
        let write_tx = lock(&self.inner.write_tx).take();
        let write_rx = lock(&self.inner.write_rx).take();
        let on_setup = lock(&self.inner.on_setup_completed).take();
        let on_shutdown = lock(&self.inner.on_shutdown_completed).take();
        drop((slots, transport, write_tx, write_rx, on_setup, on_shutdown));
        tracing::trace!(channel = self.id(), "channel destroyed");
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("loop", &self.inner.event_loop.index())
            .field("state", &self.state())
            .field("handlers", &self.handler_names())
            .finish()
    }
}

enum IoEvent {
    Closing,
    Write(Option<Bytes>),
    Read(std::io::Result<usize>),
}

async fn drive_io(
    channel: Channel,
    mut transport: BoxedSocket,
    mut writes: mpsc::UnboundedReceiver<Bytes>,
    mut closing: watch::Receiver<bool>,
) {
    let mut buf = BytesMut::with_capacity(READ_FRAGMENT_SIZE);
    let mut writes_open = true;

    let failure = loop {
        if buf.capacity() < READ_FRAGMENT_SIZE {
            buf.reserve(READ_FRAGMENT_SIZE);
        }

        // Queued writes go out before a pending close is noticed.
        let event = tokio::select! {
            biased;
            data = writes.recv(), if writes_open => IoEvent::Write(data),
            _ = closing.wait_for(|closing| *closing) => IoEvent::Closing,
            read = transport.read_buf(&mut buf) => IoEvent::Read(read),
        };

        match event {
            IoEvent::Closing => break None,
            IoEvent::Write(Some(data)) => {
                if let Err(e) = transport.write_all(&data).await {
                    break Some(socket_error(&e));
                }
            }
            IoEvent::Write(None) => writes_open = false,
            IoEvent::Read(Ok(0)) => break Some(NetError::SocketClosed),
            IoEvent::Read(Ok(_)) => {
                let data = buf.split().freeze();
                channel.dispatch_read(data);
            }
            IoEvent::Read(Err(e)) => break Some(socket_error(&e)),
        }
    };

    match failure {
        Some(err) => {
            tracing::debug!(channel = channel.id(), error = %err, "channel transport failed");
            drop(transport);
            channel.shutdown(Err(err));
        }
        None => {
            let flush = async {
                while let Ok(data) = writes.try_recv() {
                    transport.write_all(&data).await?;
                }
                transport.shutdown().await
            };
            match tokio::time::timeout(TRANSPORT_SHUTDOWN_TIMEOUT, flush).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(channel = channel.id(), error = %e, "transport flush failed"),
                Err(_) => tracing::debug!(channel = channel.id(), "transport flush timed out"),
            }
        }
    }
}
