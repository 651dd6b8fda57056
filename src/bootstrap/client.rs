use super::cleanup::clean_up_thread_local_state;
use super::connectjob;
use crate::base::lock;
use crate::base::neterror::{load_error_strings, NetError};
use crate::base::refcount::RefCounted;
use crate::channel::{Channel, ChannelHandler};
use crate::dns::{HostResolutionConfig, HostResolver};
use crate::eventloop::EventLoopGroup;
use crate::socket::SocketOptions;
use crate::tls::{AlpnCallback, TlsConnectionOptions};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Called once per connect call with the ready channel or the failure.
pub type ClientSetupCallback = Box<dyn FnOnce(&ClientBootstrap, Result<Channel, NetError>) + Send>;

/// Called once when an established channel shuts down.
pub type ClientShutdownCallback =
    Box<dyn FnOnce(&ClientBootstrap, Result<(), NetError>, &Channel) + Send>;

pub(crate) struct ClientBootstrapInner {
    group: EventLoopGroup,
    host_resolver: Arc<dyn HostResolver>,
    resolution_config: HostResolutionConfig,
    alpn_callback: Mutex<Option<AlpnCallback>>,
    active_connect_jobs: AtomicUsize,
}

impl Drop for ClientBootstrapInner {
    fn drop(&mut self) {
        tracing::debug!(loops = self.group.get_loop_count(), "client bootstrap destroyed");
    }
}

/// Creates client channels: resolves, races every address, then builds the
/// channel pipeline on the winning connection.
///
/// Cloning takes another reference; every pending connection attempt holds
/// one too, so the bootstrap outlives its attempts.
///
/// ```rust,ignore
/// let bootstrap = ClientBootstrap::new(&group, Arc::new(DefaultHostResolver::new()), None)?;
/// bootstrap.new_socket_channel(
///     "example.com",
///     80,
///     &SocketOptions::default(),
///     |_, result| println!("setup: {result:?}"),
///     |_, result, _| println!("shutdown: {result:?}"),
/// )?;
/// ```
pub struct ClientBootstrap {
    inner: RefCounted<ClientBootstrapInner>,
}

impl ClientBootstrap {
    /// Creates a bootstrap with a reference count of one.
    ///
    /// Without a `resolution_config` the system resolver is used with a
    /// 30 second TTL cap.
    pub fn new(
        event_loop_group: &EventLoopGroup,
        host_resolver: Arc<dyn HostResolver>,
        resolution_config: Option<HostResolutionConfig>,
    ) -> Result<Self, NetError> {
        load_error_strings();
        let resolution_config = resolution_config.unwrap_or_default();
        tracing::info!(
            loops = event_loop_group.get_loop_count(),
            max_ttl = ?resolution_config.max_ttl,
            "client bootstrap created"
        );
        Ok(Self {
            inner: RefCounted::new(ClientBootstrapInner {
                group: event_loop_group.clone(),
                host_resolver,
                resolution_config,
                alpn_callback: Mutex::new(None),
                active_connect_jobs: AtomicUsize::new(0),
            }),
        })
    }

    /// Installs the handler factory used after ALPN negotiation on every
    /// future TLS connection.
    pub fn set_alpn_callback<F>(&self, callback: F)
    where
        F: Fn(&Channel, &str) -> Option<Box<dyn ChannelHandler>> + Send + Sync + 'static,
    {
        *lock(&self.inner.alpn_callback) = Some(Arc::new(callback));
    }

    /// Connects to `host:port` and builds a plain channel.
    ///
    /// Errors that prevent the attempt from starting are returned and no
    /// callback runs. Otherwise `on_setup` runs exactly once, and
    /// `on_shutdown` runs once if the channel was established.
    pub fn new_socket_channel<S, D>(
        &self,
        host: &str,
        port: u16,
        options: &SocketOptions,
        on_setup: S,
        on_shutdown: D,
    ) -> Result<(), NetError>
    where
        S: FnOnce(&ClientBootstrap, Result<Channel, NetError>) + Send + 'static,
        D: FnOnce(&ClientBootstrap, Result<(), NetError>, &Channel) + Send + 'static,
    {
        connectjob::connect(self, host, port, options, None, Box::new(on_setup), Box::new(on_shutdown))
    }

    /// Like [`new_socket_channel`](Self::new_socket_channel) with TLS on top.
    ///
    /// Only stream sockets can carry TLS.
    pub fn new_tls_socket_channel<S, D>(
        &self,
        host: &str,
        port: u16,
        options: &SocketOptions,
        tls_options: &TlsConnectionOptions,
        on_setup: S,
        on_shutdown: D,
    ) -> Result<(), NetError>
    where
        S: FnOnce(&ClientBootstrap, Result<Channel, NetError>) + Send + 'static,
        D: FnOnce(&ClientBootstrap, Result<(), NetError>, &Channel) + Send + 'static,
    {
        connectjob::connect(
            self,
            host,
            port,
            options,
            Some(tls_options),
            Box::new(on_setup),
            Box::new(on_shutdown),
        )
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

    /// Connection attempts that have not finished yet.
    pub fn active_connect_jobs(&self) -> usize {
        self.inner.active_connect_jobs.load(Ordering::Acquire)
    }

    pub fn event_loop_group(&self) -> &EventLoopGroup {
        &self.inner.group
    }

    pub fn ptr_eq(&self, other: &ClientBootstrap) -> bool {
        self.inner.ptr_eq(&other.inner)
    }

    pub(crate) fn host_resolver(&self) -> &Arc<dyn HostResolver> {
        &self.inner.host_resolver
    }

    pub(crate) fn resolution_config(&self) -> &HostResolutionConfig {
        &self.inner.resolution_config
    }

    pub(crate) fn alpn_callback(&self) -> Option<AlpnCallback> {
        lock(&self.inner.alpn_callback).clone()
    }

    pub(crate) fn job_started(&self) {
        self.inner.active_connect_jobs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn job_finished(&self) {
        self.inner.active_connect_jobs.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Clone for ClientBootstrap {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.acquire(),
        }
    }
}

impl fmt::Debug for ClientBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBootstrap")
            .field("group", &self.inner.group)
            .field("ref_count", &self.ref_count())
            .field("active_connect_jobs", &self.active_connect_jobs())
            .field("alpn", &self.alpn_callback().is_some())
            .finish()
    }
}
