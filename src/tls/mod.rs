//! TLS over channels, backed by BoringSSL.
//!
//! - [`context`]: shared client/server configuration
//! - [`options`]: per-connection settings and observer callbacks
//! - [`handler`]: the channel handler and its handshake driver
//! - [`alpn`]: dispatch to a protocol handler after negotiation

pub mod alpn;
pub mod context;
pub mod handler;
pub mod options;

pub use alpn::{encode_alpn_protocols, AlpnCallback, AlpnHandler};
pub use context::{TlsContext, TlsContextOptions, TlsContextOptionsBuilder, TlsVersion};
pub use handler::{TlsHandler, TlsNegotiator};
pub use options::{TlsCallbacks, TlsConnectionOptions, DEFAULT_TLS_TIMEOUT};

/// Releases TLS state cached on the calling thread.
///
/// BoringSSL keeps a per-thread error queue; draining it before a loop
/// thread exits keeps stale errors from leaking into later handshakes.
pub fn clean_up_thread_local_state() {
    let stale = boring::error::ErrorStack::get();
    if !stale.errors().is_empty() {
        tracing::trace!(errors = stale.errors().len(), "dropped stale tls errors");
    }
}
