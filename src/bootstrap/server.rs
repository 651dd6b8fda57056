use super::cleanup::clean_up_thread_local_state;
use super::listener::SocketListener;
use crate::base::lock;
use crate::base::neterror::{load_error_strings, NetError};
use crate::base::refcount::{RefCounted, WeakRef};
use crate::channel::{Channel, ChannelHandler};
use crate::eventloop::EventLoopGroup;
use crate::socket::{SocketEndpoint, SocketOptions};
use crate::tls::{AlpnCallback, TlsConnectionOptions};
use std::fmt;
use std::sync::{Arc, Mutex};

pub(crate) struct ServerBootstrapInner {
    group: EventLoopGroup,
    alpn_callback: Mutex<Option<AlpnCallback>>,
}

impl Drop for ServerBootstrapInner {
    fn drop(&mut self) {
        tracing::debug!(loops = self.group.get_loop_count(), "server bootstrap destroyed");
    }
}

/// Creates listeners whose accepted connections arrive as ready channels.
///
/// Cloning takes another reference; every live listener holds one too.
pub struct ServerBootstrap {
    inner: RefCounted<ServerBootstrapInner>,
}

impl ServerBootstrap {
    pub fn new(event_loop_group: &EventLoopGroup) -> Result<Self, NetError> {
        load_error_strings();
        tracing::info!(loops = event_loop_group.get_loop_count(), "server bootstrap created");
        Ok(Self {
            inner: RefCounted::new(ServerBootstrapInner {
                group: event_loop_group.clone(),
                alpn_callback: Mutex::new(None),
            }),
        })
    }

    pub(crate) fn from_ref(inner: RefCounted<ServerBootstrapInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> WeakRef<ServerBootstrapInner> {
        self.inner.downgrade()
    }

    /// Installs the handler factory used after ALPN negotiation on
    /// listeners created from now on.
    pub fn set_alpn_callback<F>(&self, callback: F)
    where
        F: Fn(&Channel, &str) -> Option<Box<dyn ChannelHandler>> + Send + Sync + 'static,
    {
        *lock(&self.inner.alpn_callback) = Some(Arc::new(callback));
    }

    /// Binds, listens and starts accepting plain connections.
    ///
    /// `on_incoming` runs once per accepted connection with the channel or
    /// the reason it could not be set up, and once more if accepting itself
    /// fails. `on_shutdown` runs once per established channel.
    pub fn new_socket_listener<I, D>(
        &self,
        endpoint: &SocketEndpoint,
        options: &SocketOptions,
        on_incoming: I,
        on_shutdown: D,
    ) -> Result<SocketListener, NetError>
    where
        I: Fn(&ServerBootstrap, Result<Channel, NetError>) + Send + Sync + 'static,
        D: Fn(&ServerBootstrap, Result<(), NetError>, &Channel) + Send + Sync + 'static,
    {
        SocketListener::start(self, endpoint, options, None, Arc::new(on_incoming), Arc::new(on_shutdown))
    }

    /// Like [`new_socket_listener`](Self::new_socket_listener) with TLS on
    /// every accepted connection. Only stream sockets can carry TLS.
    pub fn new_tls_socket_listener<I, D>(
        &self,
        endpoint: &SocketEndpoint,
        options: &SocketOptions,
        tls_options: &TlsConnectionOptions,
        on_incoming: I,
        on_shutdown: D,
    ) -> Result<SocketListener, NetError>
    where
        I: Fn(&ServerBootstrap, Result<Channel, NetError>) + Send + Sync + 'static,
        D: Fn(&ServerBootstrap, Result<(), NetError>, &Channel) + Send + Sync + 'static,
    {
        SocketListener::start(
            self,
            endpoint,
            options,
            Some(tls_options),
            Arc::new(on_incoming),
            Arc::new(on_shutdown),
        )
    }

    /// Stops accepting, closes the listening socket and releases the
    /// listener's reference on this bootstrap. Established channels are
    /// left running.
    ///
    /// Still required after an accept failure has stopped the listener.
    pub fn destroy_socket_listener(&self, listener: SocketListener) {
        listener.shutdown();
    }

    /// Flushes thread-local TLS state on every loop, then drops this
    /// reference. Returns true if it was the last one.
    pub fn release(self) -> bool {
        clean_up_thread_local_state(&self.inner.group);
        self.inner.release()
    }

    pub fn ref_count(&self) -> usize {
        self.inner.ref_count()
    }

    pub fn event_loop_group(&self) -> &EventLoopGroup {
        &self.inner.group
    }

    pub fn ptr_eq(&self, other: &ServerBootstrap) -> bool {
        self.inner.ptr_eq(&other.inner)
    }

    pub(crate) fn alpn_callback(&self) -> Option<AlpnCallback> {
        lock(&self.inner.alpn_callback).clone()
    }
}

impl Clone for ServerBootstrap {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.acquire(),
        }
    }
}

impl fmt::Debug for ServerBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBootstrap")
            .field("group", &self.inner.group)
            .field("ref_count", &self.ref_count())
            .field("alpn", &self.alpn_callback().is_some())
            .finish()
    }
}
