//! TLS contexts.
//!
//! A [`TlsContext`] is built once from [`TlsContextOptions`] and shared by
//! every connection a bootstrap makes or accepts. Client contexts wrap a
//! BoringSSL `SslConnector`, server contexts an `SslAcceptor`.

use super::alpn::encode_alpn_protocols;
use crate::base::neterror::NetError;
use boring::error::ErrorStack;
use boring::pkey::PKey;
use boring::ssl::{
    select_next_proto, AlpnError, SslAcceptor, SslConnector, SslMethod, SslVerifyMode, SslVersion,
};
use boring::x509::X509;
use std::fmt;
use std::sync::Arc;

/// Protocol version bound for a TLS context.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TlsVersion(SslVersion);

impl TlsVersion {
    pub const TLS_1_0: TlsVersion = TlsVersion(SslVersion::TLS1);
    pub const TLS_1_1: TlsVersion = TlsVersion(SslVersion::TLS1_1);
    pub const TLS_1_2: TlsVersion = TlsVersion(SslVersion::TLS1_2);
    pub const TLS_1_3: TlsVersion = TlsVersion(SslVersion::TLS1_3);

    fn name(&self) -> &'static str {
        [
            (Self::TLS_1_0, "TLSv1"),
            (Self::TLS_1_1, "TLSv1.1"),
            (Self::TLS_1_2, "TLSv1.2"),
            (Self::TLS_1_3, "TLSv1.3"),
        ]
        .into_iter()
        .find(|(version, _)| version == self)
        .map_or("unknown", |(_, name)| name)
    }
}

impl fmt::Debug for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Builder for `TlsContextOptions`.
#[must_use]
#[derive(Debug, Clone)]
pub struct TlsContextOptionsBuilder {
    config: TlsContextOptions,
}

/// TLS context configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsContextOptions {
    /// Minimum TLS version.
    pub min_tls_version: Option<TlsVersion>,

    /// Maximum TLS version.
    pub max_tls_version: Option<TlsVersion>,

    /// ALPN protocols, most preferred first.
    pub alpn_protocols: Vec<String>,

    /// Verify the peer certificate. Clients only.
    pub verify_peer: bool,

    /// Extra trust anchors (PEM).
    pub ca_pem: Option<Vec<u8>>,

    /// Certificate chain (PEM). Required for servers.
    pub certificate_pem: Option<Vec<u8>>,

    /// Private key (PEM). Required for servers.
    pub private_key_pem: Option<Vec<u8>>,

    /// Cipher suite configuration string.
    pub cipher_list: Option<String>,
}

impl Default for TlsContextOptions {
    fn default() -> Self {
        Self {
            min_tls_version: Some(TlsVersion::TLS_1_2),
            max_tls_version: Some(TlsVersion::TLS_1_3),
            alpn_protocols: Vec::new(),
            verify_peer: true,
            ca_pem: None,
            certificate_pem: None,
            private_key_pem: None,
            cipher_list: None,
        }
    }
}

impl TlsContextOptionsBuilder {
    pub fn new() -> Self {
        Self {
            config: TlsContextOptions::default(),
        }
    }

    pub fn min_tls_version(mut self, version: TlsVersion) -> Self {
        self.config.min_tls_version = Some(version);
        self
    }

    pub fn max_tls_version(mut self, version: TlsVersion) -> Self {
        self.config.max_tls_version = Some(version);
        self
    }

    pub fn alpn_protocols(mut self, alpn: &[&str]) -> Self {
        self.config.alpn_protocols = alpn.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.config.verify_peer = verify;
        self
    }

    pub fn ca_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.config.ca_pem = Some(pem.into());
        self
    }

    pub fn certificate_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.config.certificate_pem = Some(pem.into());
        self
    }

    pub fn private_key_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.config.private_key_pem = Some(pem.into());
        self
    }

    pub fn cipher_list(mut self, ciphers: &str) -> Self {
        self.config.cipher_list = Some(ciphers.to_string());
        self
    }

    pub fn build(self) -> TlsContextOptions {
        self.config
    }
}

impl Default for TlsContextOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TlsContextOptions {
    pub fn builder() -> TlsContextOptionsBuilder {
        TlsContextOptionsBuilder::new()
    }
}

enum ContextKind {
    Client(SslConnector),
    Server(SslAcceptor),
}

/// Shared TLS configuration. Cheap to clone.
#[derive(Clone)]
pub struct TlsContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    kind: ContextKind,
    options: TlsContextOptions,
}

fn ctx_error(what: &'static str) -> impl FnOnce(ErrorStack) -> NetError {
    move |e| {
        tracing::error!(error = %e, what, "failed to build TLS context");
        NetError::TlsCtxError
    }
}

impl TlsContext {
    /// Builds a client context.
    pub fn new_client(options: TlsContextOptions) -> Result<Self, NetError> {
        let mut builder = SslConnector::builder(SslMethod::tls()).map_err(ctx_error("connector"))?;

        builder
            .set_min_proto_version(options.min_tls_version.map(|v| v.0))
            .map_err(ctx_error("min version"))?;
        builder
            .set_max_proto_version(options.max_tls_version.map(|v| v.0))
            .map_err(ctx_error("max version"))?;
        if let Some(ciphers) = &options.cipher_list {
            builder.set_cipher_list(ciphers).map_err(ctx_error("cipher list"))?;
        }
        if !options.alpn_protocols.is_empty() {
            let wire = encode_alpn_protocols(&options.alpn_protocols)?;
            builder.set_alpn_protos(&wire).map_err(ctx_error("alpn"))?;
        }
        if let Some(pem) = &options.ca_pem {
            for cert in X509::stack_from_pem(pem).map_err(ctx_error("ca pem"))? {
                builder.cert_store_mut().add_cert(cert).map_err(ctx_error("ca store"))?;
            }
        }
        builder.set_verify(if options.verify_peer {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });

        Ok(Self {
            inner: Arc::new(ContextInner {
                kind: ContextKind::Client(builder.build()),
                options,
            }),
        })
    }

    /// Builds a server context. A certificate and private key are required.
    pub fn new_server(options: TlsContextOptions) -> Result<Self, NetError> {
        let (Some(cert_pem), Some(key_pem)) = (&options.certificate_pem, &options.private_key_pem) else {
            return Err(NetError::TlsCtxError);
        };

        let mut builder =
            SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).map_err(ctx_error("acceptor"))?;
        builder
            .set_min_proto_version(options.min_tls_version.map(|v| v.0))
            .map_err(ctx_error("min version"))?;
        builder
            .set_max_proto_version(options.max_tls_version.map(|v| v.0))
            .map_err(ctx_error("max version"))?;
        if let Some(ciphers) = &options.cipher_list {
            builder.set_cipher_list(ciphers).map_err(ctx_error("cipher list"))?;
        }

        let mut chain = X509::stack_from_pem(cert_pem).map_err(ctx_error("certificate pem"))?.into_iter();
        let leaf = chain.next().ok_or(NetError::TlsCtxError)?;
        builder.set_certificate(&leaf).map_err(ctx_error("certificate"))?;
        for extra in chain {
            builder.add_extra_chain_cert(extra).map_err(ctx_error("certificate chain"))?;
        }
        let key = PKey::private_key_from_pem(key_pem).map_err(ctx_error("private key pem"))?;
        builder.set_private_key(&key).map_err(ctx_error("private key"))?;
        builder.check_private_key().map_err(ctx_error("key mismatch"))?;

        if !options.alpn_protocols.is_empty() {
            let server_protos = encode_alpn_protocols(&options.alpn_protocols)?;
            builder.set_alpn_select_callback(move |_, client_protos| {
                select_next_proto(&server_protos, client_protos).ok_or(AlpnError::NOACK)
            });
        }

        Ok(Self {
            inner: Arc::new(ContextInner {
                kind: ContextKind::Server(builder.build()),
                options,
            }),
        })
    }

    pub fn is_server(&self) -> bool {
        matches!(self.inner.kind, ContextKind::Server(_))
    }

    pub fn options(&self) -> &TlsContextOptions {
        &self.inner.options
    }

    pub(crate) fn connector(&self) -> Option<&SslConnector> {
        match &self.inner.kind {
            ContextKind::Client(connector) => Some(connector),
            ContextKind::Server(_) => None,
        }
    }

    pub(crate) fn acceptor(&self) -> Option<&SslAcceptor> {
        match &self.inner.kind {
            ContextKind::Server(acceptor) => Some(acceptor),
            ContextKind::Client(_) => None,
        }
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("server", &self.is_server())
            .field("alpn", &self.inner.options.alpn_protocols)
            .field("verify_peer", &self.inner.options.verify_peer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_context_defaults() {
        let ctx = TlsContext::new_client(TlsContextOptions::default()).unwrap();
        assert!(!ctx.is_server());
        assert!(ctx.connector().is_some());
        assert!(ctx.acceptor().is_none());
        assert_eq!(ctx.options().min_tls_version, Some(TlsVersion::TLS_1_2));
    }

    #[test]
    fn test_server_context_requires_identity() {
        let options = TlsContextOptions::builder().alpn_protocols(&["h2"]).build();
        assert!(matches!(TlsContext::new_server(options), Err(NetError::TlsCtxError)));

        let options = TlsContextOptions::builder()
            .certificate_pem(b"not a certificate".to_vec())
            .private_key_pem(b"not a key".to_vec())
            .build();
        assert!(matches!(TlsContext::new_server(options), Err(NetError::TlsCtxError)));
    }

    #[test]
    fn test_version_debug() {
        assert_eq!(format!("{:?}", TlsVersion::TLS_1_3), "TLSv1.3");
    }
}
