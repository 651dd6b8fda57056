use super::context::TlsContext;
use crate::base::neterror::NetError;
use crate::channel::Channel;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default handshake timeout.
pub const DEFAULT_TLS_TIMEOUT: Duration = Duration::from_secs(10);

/// Observer for one TLS connection. Every method runs on the channel's
/// event loop.
pub trait TlsCallbacks: Send + Sync {
    /// The handshake finished, successfully or not.
    fn on_negotiation_result(&self, _channel: &Channel, _result: Result<(), NetError>) {}

    /// Decrypted application data arrived at the TLS handler.
    fn on_data_read(&self, _channel: &Channel, _data: &[u8]) {}

    /// A TLS-level failure, with a human readable detail.
    fn on_error(&self, _channel: &Channel, _error: NetError, _detail: &str) {}
}

/// Per-connection TLS settings.
#[derive(Clone)]
pub struct TlsConnectionOptions {
    ctx: TlsContext,
    server_name: Option<String>,
    alpn_list: Option<Vec<String>>,
    advertise_alpn_message: bool,
    timeout: Duration,
    callbacks: Option<Arc<dyn TlsCallbacks>>,
}

impl TlsConnectionOptions {
    pub fn new(ctx: TlsContext) -> Self {
        Self {
            ctx,
            server_name: None,
            alpn_list: None,
            advertise_alpn_message: false,
            timeout: DEFAULT_TLS_TIMEOUT,
            callbacks: None,
        }
    }

    /// Name sent as SNI and verified against the peer certificate.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Overrides the context's ALPN list for this connection.
    pub fn with_alpn_list(mut self, protocols: &[&str]) -> Self {
        self.alpn_list = Some(protocols.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Makes the TLS handler tell the slot to its right which protocol was
    /// negotiated.
    pub fn with_advertise_alpn_message(mut self, advertise: bool) -> Self {
        self.advertise_alpn_message = advertise;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn TlsCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn ctx(&self) -> &TlsContext {
        &self.ctx
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn alpn_list(&self) -> Option<&[String]> {
        self.alpn_list.as_deref()
    }

    pub fn advertise_alpn_message(&self) -> bool {
        self.advertise_alpn_message
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn callbacks(&self) -> Option<&Arc<dyn TlsCallbacks>> {
        self.callbacks.as_ref()
    }
}

impl fmt::Debug for TlsConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConnectionOptions")
            .field("ctx", &self.ctx)
            .field("server_name", &self.server_name)
            .field("alpn_list", &self.alpn_list)
            .field("advertise_alpn_message", &self.advertise_alpn_message)
            .field("timeout", &self.timeout)
            .field("callbacks", &self.callbacks.is_some())
            .finish()
    }
}
