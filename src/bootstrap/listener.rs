//! Listening sockets and accepted connections.
//!
//! Accepting runs on one loop; each accepted socket is handed to the next
//! loop of the group and wrapped in a channel there:
//!
//! ```text
//! Accepted ─► ChannelBuilding ─► [TlsNegotiating] ─► Established
//!                   │                   │
//!                   └───────────────────┴──────────► Failed
//! ```

use super::server::{ServerBootstrap, ServerBootstrapInner};
use super::{install_tls_pipeline, AtomicJobState, JobState, NegotiationObserver, NegotiationSink};
use crate::base::neterror::NetError;
use crate::base::refcount::WeakRef;
use crate::channel::{Channel, ChannelCallbacks};
use crate::eventloop::EventLoopGroup;
use crate::socket::{Socket, SocketEndpoint, SocketHandler, SocketKind, SocketOptions};
use crate::tls::{AlpnCallback, TlsConnectionOptions, TlsHandler};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Listen queue length for bootstrap listeners.
pub const DEFAULT_LISTENER_BACKLOG: u32 = 1024;

pub(crate) type IncomingCallback = Arc<dyn Fn(&ServerBootstrap, Result<Channel, NetError>) + Send + Sync>;
pub(crate) type ListenerShutdownCallback =
    Arc<dyn Fn(&ServerBootstrap, Result<(), NetError>, &Channel) + Send + Sync>;

struct ListenerConfig {
    bootstrap: WeakRef<ServerBootstrapInner>,
    group: EventLoopGroup,
    tls_options: Option<TlsConnectionOptions>,
    alpn_callback: Option<AlpnCallback>,
    on_incoming: IncomingCallback,
    on_shutdown: ListenerShutdownCallback,
}

/// A listening socket created by a [`ServerBootstrap`].
///
/// Holds a reference on its bootstrap until handed back to
/// [`ServerBootstrap::destroy_socket_listener`]. An accept failure stops
/// the listener (`on_incoming` gets the error and [`is_listening`] turns
/// false) but the reference is only dropped by that call.
///
/// [`is_listening`]: SocketListener::is_listening
pub struct SocketListener {
    bootstrap: ServerBootstrap,
    socket: Socket,
    config: Arc<ListenerConfig>,
}

impl SocketListener {
    pub(crate) fn start(
        bootstrap: &ServerBootstrap,
        endpoint: &SocketEndpoint,
        options: &SocketOptions,
        tls_options: Option<&TlsConnectionOptions>,
        on_incoming: IncomingCallback,
        on_shutdown: ListenerShutdownCallback,
    ) -> Result<Self, NetError> {
        if tls_options.is_some() && options.kind != SocketKind::Stream {
            tracing::error!(endpoint = %endpoint, kind = ?options.kind, "tls requested on a non-stream listener");
            return Err(NetError::SocketInvalidOptions);
        }

        let alpn_callback = bootstrap.alpn_callback();
        let tls_options = tls_options.map(|tls| {
            tls.clone()
                .with_advertise_alpn_message(alpn_callback.is_some())
        });
        let config = Arc::new(ListenerConfig {
            bootstrap: bootstrap.downgrade(),
            group: bootstrap.event_loop_group().clone(),
            tls_options,
            alpn_callback,
            on_incoming,
            on_shutdown,
        });

        let mut socket = Socket::new(options.clone())?;
        socket.bind(endpoint)?;
        socket.listen(DEFAULT_LISTENER_BACKLOG)?;
        let accept_config = Arc::clone(&config);
        socket.start_accept(bootstrap.event_loop_group().get_next_loop(), move |result| {
            on_accept(&accept_config, result);
        })?;

        tracing::info!(
            endpoint = ?socket.local_endpoint(),
            tls = config.tls_options.is_some(),
            backlog = DEFAULT_LISTENER_BACKLOG,
            "listener started"
        );
        Ok(Self {
            bootstrap: bootstrap.clone(),
            socket,
            config,
        })
    }

    /// Address actually bound, with the real port when bound to port 0.
    pub fn local_endpoint(&self) -> Option<&SocketEndpoint> {
        self.socket.local_endpoint()
    }

    pub fn is_listening(&self) -> bool {
        self.socket.is_listening()
    }

    pub(crate) fn shutdown(mut self) {
        self.socket.close();
        tracing::info!(
            endpoint = ?self.socket.local_endpoint(),
            tls = self.config.tls_options.is_some(),
            "listener destroyed"
        );
        drop(self.bootstrap);
    }
}

impl fmt::Debug for SocketListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketListener")
            .field("socket", &self.socket)
            .field("tls", &self.config.tls_options.is_some())
            .finish()
    }
}

fn on_accept(config: &Arc<ListenerConfig>, result: Result<Socket, NetError>) {
    let Some(bootstrap) = config.bootstrap.upgrade().map(ServerBootstrap::from_ref) else {
        tracing::trace!("bootstrap gone, dropping accepted connection");
        return;
    };

    match result {
        Ok(socket) => AcceptJob::start(bootstrap, Arc::clone(config), socket),
        Err(e) => {
            tracing::error!(error = %e, code = e.as_i32(), "listener stopped accepting");
            (config.on_incoming)(&bootstrap, Err(e));
        }
    }
}

/// One accepted connection on its way to becoming a channel.
struct AcceptJob {
    bootstrap: ServerBootstrap,
    config: Arc<ListenerConfig>,
    state: AtomicJobState,
    incoming_reported: AtomicBool,
}

impl AcceptJob {
    fn start(bootstrap: ServerBootstrap, config: Arc<ListenerConfig>, mut socket: Socket) {
        let event_loop = config.group.get_next_loop().clone();
        let job = Arc::new(AcceptJob {
            bootstrap,
            config,
            state: AtomicJobState::new(JobState::ChannelBuilding),
            incoming_reported: AtomicBool::new(false),
        });

        if let Err(e) = socket.assign_to_event_loop(&event_loop) {
            job.fail(e);
            return;
        }
        tracing::trace!(remote = ?socket.remote_endpoint(), loop_index = event_loop.index(), "accepted socket assigned");

        let setup_job = Arc::clone(&job);
        let shutdown_job = Arc::clone(&job);
        let callbacks = ChannelCallbacks::new(
            move |channel, result| setup_job.on_channel_setup(channel, result, socket),
            move |channel, result| shutdown_job.on_channel_shutdown(channel, result),
        );
        if let Err(e) = Channel::new(&event_loop, callbacks) {
            job.fail(e);
        }
    }

    fn on_channel_setup(self: &Arc<Self>, channel: &Channel, result: Result<(), NetError>, socket: Socket) {
        if let Err(e) = result.and_then(|()| self.build_pipeline(channel, socket)) {
            self.fail(e);
            channel.destroy();
        }
    }

    fn build_pipeline(self: &Arc<Self>, channel: &Channel, socket: Socket) -> Result<(), NetError> {
        let socket_slot = channel.slot_new()?;
        let socket_handler = SocketHandler::new(socket, &socket_slot)?;
        socket_slot.set_handler(Box::new(socket_handler))?;
        tracing::trace!(channel = channel.id(), slot = socket_slot.id(), "socket handler installed");

        let Some(tls_options) = &self.config.tls_options else {
            self.state.set(JobState::Established);
            channel.start_io()?;
            self.report_incoming(Ok(channel.clone()));
            return Ok(());
        };

        self.state.set(JobState::TlsNegotiating);
        let observer = NegotiationObserver::new(Arc::clone(self), tls_options.callbacks().cloned());
        let tls_options = tls_options.clone().with_callbacks(Arc::new(observer));
        let negotiator = install_tls_pipeline(
            channel,
            &socket_slot,
            |slot| TlsHandler::new_server(tls_options, slot),
            self.config.alpn_callback.clone(),
        )?;
        negotiator.start(channel)
    }

    fn on_channel_shutdown(&self, channel: &Channel, result: Result<(), NetError>) {
        match self.state.get() {
            JobState::Established => {
                tracing::debug!(channel = channel.id(), result = ?result, "accepted channel shut down");
                (self.config.on_shutdown)(&self.bootstrap, result, channel);
            }
            JobState::TlsNegotiating => self.fail(result.err().unwrap_or(NetError::TlsNegotiationFailure)),
            JobState::Failed => {}
            _ => self.fail(result.err().unwrap_or(NetError::SocketNotConnected)),
        }
        channel.destroy();
    }

    fn fail(&self, error: NetError) {
        self.state.set(JobState::Failed);
        self.report_incoming(Err(error));
    }

    fn report_incoming(&self, result: Result<Channel, NetError>) {
        if self.incoming_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        match &result {
            Ok(channel) => tracing::debug!(channel = channel.id(), "incoming channel established"),
            Err(e) => tracing::error!(error = %e, code = e.as_i32(), "incoming connection failed"),
        }
        (self.config.on_incoming)(&self.bootstrap, result);
    }
}

impl NegotiationSink for AcceptJob {
    fn on_tls_negotiated(&self, channel: &Channel, result: Result<(), NetError>) {
        match result {
            Ok(()) => {
                if self.state.transition(JobState::TlsNegotiating, JobState::Established) {
                    self.report_incoming(Ok(channel.clone()));
                }
            }
            Err(e) => {
                if self.state.transition(JobState::TlsNegotiating, JobState::Failed) {
                    self.report_incoming(Err(e));
                }
            }
        }
    }
}

impl Drop for AcceptJob {
    fn drop(&mut self) {
        // Only a task dropped by a stopping event loop gets here unreported.
        if !self.incoming_reported.load(Ordering::Acquire) {
            tracing::warn!(state = ?self.state.get(), "accepted connection dropped before completing");
            self.fail(NetError::EventLoopShutdown);
        }
    }
}
