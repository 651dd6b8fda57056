//! One client connection attempt.
//!
//! ```text
//! Resolving ─► Racing ─► ChannelBuilding ─► [TlsNegotiating] ─► Established
//!     │           │             │                  │
//!     └───────────┴─────────────┴──────────────────┴──────────► Failed
//! ```
//!
//! Every resolved address gets its own socket, all connecting on one loop.
//! The first socket to connect wins; later winners are closed. The attempt
//! fails only when every address has failed. Counters and the winner flag
//! are atomics; the setup callback sits behind a take-once lock so it runs
//! exactly once however the failures interleave.

use super::client::{ClientBootstrap, ClientSetupCallback, ClientShutdownCallback};
use super::{install_tls_pipeline, AtomicJobState, JobState, NegotiationObserver, NegotiationSink};
use crate::base::lock;
use crate::base::neterror::NetError;
use crate::channel::{Channel, ChannelCallbacks};
use crate::dns::{HostAddress, HostResolving, Name};
use crate::socket::{Socket, SocketDomain, SocketEndpoint, SocketHandler, SocketKind, SocketOptions};
use crate::tls::{TlsConnectionOptions, TlsHandler};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) struct ConnectJob {
    bootstrap: ClientBootstrap,
    host: Name,
    port: u16,
    options: SocketOptions,
    tls_options: Option<TlsConnectionOptions>,
    state: AtomicJobState,
    addresses_total: AtomicUsize,
    addresses_failed: AtomicUsize,
    connection_chosen: AtomicBool,
    on_setup: Mutex<Option<ClientSetupCallback>>,
    on_shutdown: Mutex<Option<ClientShutdownCallback>>,
}

/// Starts a connection attempt.
///
/// Returns an error, without invoking any callback, when the attempt cannot
/// start: TLS over a datagram socket, an invalid local endpoint, a
/// resolver that refuses the name, or a stopped event loop.
pub(crate) fn connect(
    bootstrap: &ClientBootstrap,
    host: &str,
    port: u16,
    options: &SocketOptions,
    tls_options: Option<&TlsConnectionOptions>,
    on_setup: ClientSetupCallback,
    on_shutdown: ClientShutdownCallback,
) -> Result<(), NetError> {
    if tls_options.is_some() && options.kind != SocketKind::Stream {
        tracing::error!(host, kind = ?options.kind, "tls requested on a non-stream socket");
        return Err(NetError::SocketInvalidOptions);
    }

    let advertise_alpn = bootstrap.alpn_callback().is_some();
    let tls_options = tls_options.map(|tls| {
        let mut tls = tls.clone();
        if tls.server_name().is_none() && options.domain != SocketDomain::Local {
            tls = tls.with_server_name(host);
        }
        if advertise_alpn {
            tls = tls.with_advertise_alpn_message(true);
        }
        tls
    });

    let job = Arc::new(ConnectJob::new(
        bootstrap,
        host,
        port,
        options.clone(),
        tls_options,
        on_setup,
        on_shutdown,
    ));
    tracing::debug!(host, port, tls = job.tls_options.is_some(), domain = ?options.domain, "connection attempt started");

    let started = if options.domain == SocketDomain::Local {
        job.connect_local()
    } else {
        job.resolve()
    };
    // Errors returned here are the caller's to handle; no callback follows.
    started.inspect_err(|_| job.disarm())
}

impl ConnectJob {
    fn new(
        bootstrap: &ClientBootstrap,
        host: &str,
        port: u16,
        options: SocketOptions,
        tls_options: Option<TlsConnectionOptions>,
        on_setup: ClientSetupCallback,
        on_shutdown: ClientShutdownCallback,
    ) -> Self {
        bootstrap.job_started();
        Self {
            bootstrap: bootstrap.clone(),
            host: Name::new(host),
            port,
            options,
            tls_options,
            state: AtomicJobState::new(JobState::Resolving),
            addresses_total: AtomicUsize::new(0),
            addresses_failed: AtomicUsize::new(0),
            connection_chosen: AtomicBool::new(false),
            on_setup: Mutex::new(Some(on_setup)),
            on_shutdown: Mutex::new(Some(on_shutdown)),
        }
    }

    // Unix sockets skip resolution: one "address", the path itself.
    fn connect_local(self: &Arc<Self>) -> Result<(), NetError> {
        self.addresses_total.store(1, Ordering::Release);
        self.state.set(JobState::Racing);

        let socket = Socket::new(self.options.clone())?;
        let endpoint = SocketEndpoint::new(self.host.as_str(), self.port);
        let event_loop = self.bootstrap.event_loop_group().get_next_loop();
        let job = Arc::clone(self);
        socket.connect(&endpoint, event_loop, move |socket, result| {
            job.on_socket_connected(socket, result, None);
        })
    }

    fn resolve(self: &Arc<Self>) -> Result<(), NetError> {
        let resolving = self
            .bootstrap
            .host_resolver()
            .resolve_host(&self.host, self.bootstrap.resolution_config())?;
        let event_loop = self.bootstrap.event_loop_group().get_next_loop();
        let job = Arc::clone(self);
        event_loop.spawn(async move {
            job.on_host_resolved(resolving).await;
        })
    }

    fn disarm(&self) {
        drop(lock(&self.on_setup).take());
        drop(lock(&self.on_shutdown).take());
    }

    async fn on_host_resolved(self: Arc<Self>, resolving: HostResolving) {
        let addresses = match resolving.await {
            Ok(addresses) if addresses.is_empty() => {
                self.fail(NetError::DnsNoAddressForHost);
                return;
            }
            Ok(addresses) => addresses,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        tracing::debug!(host = %self.host, count = addresses.len(), "host resolved, racing addresses");
        self.addresses_total.store(addresses.len(), Ordering::Release);
        self.state.transition(JobState::Resolving, JobState::Racing);

        let connect_loop = self.bootstrap.event_loop_group().get_next_loop();
        for address in addresses {
            let endpoint = SocketEndpoint::new(address.address.to_string(), self.port);
            let options = self.options.for_address(&address.address);
            let job = Arc::clone(&self);
            let reported = address.clone();

            let started = Socket::new(options).and_then(|socket| {
                socket.connect(&endpoint, connect_loop, move |socket, result| {
                    job.on_socket_connected(socket, result, Some(address));
                })
            });
            if let Err(e) = started {
                tracing::debug!(host = %self.host, endpoint = %endpoint, error = %e, "socket connect could not start");
                self.bootstrap.host_resolver().record_connection_failure(&reported);
                self.record_address_failure(e);
            }
        }
    }

    fn on_socket_connected(
        self: &Arc<Self>,
        mut socket: Socket,
        result: Result<(), NetError>,
        address: Option<HostAddress>,
    ) {
        if let Err(e) = result {
            if let Some(address) = &address {
                self.bootstrap.host_resolver().record_connection_failure(address);
            }
            socket.close();
            self.record_address_failure(e);
            return;
        }

        if self
            .connection_chosen
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!(host = %self.host, remote = ?socket.remote_endpoint(), "connection lost the race");
            socket.close();
            return;
        }

        self.state.transition(JobState::Racing, JobState::ChannelBuilding);
        tracing::debug!(host = %self.host, remote = ?socket.remote_endpoint(), "connection won the race");

        let Some(event_loop) = socket.event_loop().cloned() else {
            self.fail_after_win(NetError::SocketNotConnected);
            return;
        };
        let setup_job = Arc::clone(self);
        let shutdown_job = Arc::clone(self);
        let callbacks = ChannelCallbacks::new(
            move |channel, result| setup_job.on_channel_setup(channel, result, socket),
            move |channel, result| shutdown_job.on_channel_shutdown(channel, result),
        );
        if let Err(e) = Channel::new(&event_loop, callbacks) {
            self.fail_after_win(e);
        }
    }

    fn record_address_failure(&self, error: NetError) {
        let failed = self.addresses_failed.fetch_add(1, Ordering::AcqRel) + 1;
        let total = self.addresses_total.load(Ordering::Acquire);
        tracing::trace!(host = %self.host, failed, total, error = %error, "address failed");
        if failed == total && self.state.transition(JobState::Racing, JobState::Failed) {
            self.invoke_setup(Err(error));
        }
    }

    // The race is decided, so nothing else will report.
    fn fail_after_win(&self, error: NetError) {
        self.addresses_failed.fetch_add(1, Ordering::AcqRel);
        self.fail(error);
    }

    fn fail(&self, error: NetError) {
        self.state.set(JobState::Failed);
        self.invoke_setup(Err(error));
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

        let Some(tls_options) = &self.tls_options else {
            self.state.set(JobState::Established);
            channel.start_io()?;
            self.invoke_setup(Ok(channel.clone()));
            return Ok(());
        };

        self.state.set(JobState::TlsNegotiating);
        let observer = NegotiationObserver::new(Arc::clone(self), tls_options.callbacks().cloned());
        let tls_options = tls_options.clone().with_callbacks(Arc::new(observer));
        let negotiator = install_tls_pipeline(
            channel,
            &socket_slot,
            |slot| TlsHandler::new_client(tls_options, slot),
            self.bootstrap.alpn_callback(),
        )?;
        negotiator.start(channel)
    }

    fn on_channel_shutdown(&self, channel: &Channel, result: Result<(), NetError>) {
        match self.state.get() {
            JobState::Established => {
                tracing::debug!(host = %self.host, channel = channel.id(), result = ?result, "channel shut down");
                let callback = lock(&self.on_shutdown).take();
                if let Some(callback) = callback {
                    callback(&self.bootstrap, result, channel);
                }
            }
            JobState::TlsNegotiating => {
                self.fail(result.err().unwrap_or(NetError::TlsNegotiationFailure));
            }
            JobState::Resolving | JobState::Racing | JobState::ChannelBuilding => {
                self.fail(result.err().unwrap_or(NetError::SocketNotConnected));
            }
            JobState::Failed => {}
        }
        channel.destroy();
    }

    fn invoke_setup(&self, result: Result<Channel, NetError>) {
        let callback = lock(&self.on_setup).take();
        let Some(callback) = callback else {
            return;
        };
        match &result {
            Ok(channel) => {
                tracing::debug!(host = %self.host, channel = channel.id(), "client channel established");
            }
            Err(e) => {
                tracing::error!(host = %self.host, port = self.port, error = %e, code = e.as_i32(), "client connection failed");
                // A channel that never came up never shuts down.
                drop(lock(&self.on_shutdown).take());
            }
        }
        callback(&self.bootstrap, result);
    }
}

impl NegotiationSink for ConnectJob {
    fn on_tls_negotiated(&self, channel: &Channel, result: Result<(), NetError>) {
        match result {
            Ok(()) => {
                if self.state.transition(JobState::TlsNegotiating, JobState::Established) {
                    self.invoke_setup(Ok(channel.clone()));
                }
            }
            Err(e) => {
                if self.state.transition(JobState::TlsNegotiating, JobState::Failed) {
                    self.invoke_setup(Err(e));
                }
            }
        }
    }
}

impl Drop for ConnectJob {
    fn drop(&mut self) {
        // Only a task dropped by a stopping event loop gets here unreported.
        if lock(&self.on_setup).is_some() {
            tracing::warn!(host = %self.host, state = ?self.state.get(), "connection attempt dropped before completing");
            self.invoke_setup(Err(NetError::EventLoopShutdown));
        }
        self.bootstrap.job_finished();
        tracing::trace!(host = %self.host, "connection attempt released");
    }
}
