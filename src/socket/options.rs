use crate::base::neterror::NetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Address family of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketDomain {
    #[default]
    Ipv4,
    Ipv6,
    /// Unix domain socket; the endpoint address is a filesystem path.
    Local,
}

/// Transport semantics of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketKind {
    #[default]
    Stream,
    Dgram,
}

/// Builder for `SocketOptions`.
#[must_use]
#[derive(Debug, Clone)]
pub struct SocketOptionsBuilder {
    config: SocketOptions,
}

/// Socket configuration.
///
/// Deserializable so bootstraps can be configured from a file:
///
/// ```rust,ignore
/// let options: SocketOptions = serde_json::from_str(r#"{"domain":"ipv6","connect_timeout_ms":500}"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketOptions {
    pub domain: SocketDomain,
    pub kind: SocketKind,
    pub connect_timeout_ms: u64,
    pub keep_alive: bool,
    pub no_delay: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            domain: SocketDomain::Ipv4,
            kind: SocketKind::Stream,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            keep_alive: false,
            no_delay: true,
        }
    }
}

impl SocketOptionsBuilder {
    pub fn new() -> Self {
        Self {
            config: SocketOptions::default(),
        }
    }

    pub fn domain(mut self, domain: SocketDomain) -> Self {
        self.config.domain = domain;
        self
    }

    pub fn kind(mut self, kind: SocketKind) -> Self {
        self.config.kind = kind;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.config.keep_alive = enabled;
        self
    }

    pub fn no_delay(mut self, enabled: bool) -> Self {
        self.config.no_delay = enabled;
        self
    }

    pub fn build(self) -> SocketOptions {
        self.config
    }
}

impl Default for SocketOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketOptions {
    pub fn builder() -> SocketOptionsBuilder {
        SocketOptionsBuilder::new()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// True for IPv4 and IPv6 sockets.
    pub fn is_network(&self) -> bool {
        self.domain != SocketDomain::Local
    }

    /// Copy of these options retargeted at the family of `address`.
    pub fn for_address(&self, address: &IpAddr) -> SocketOptions {
        let mut options = self.clone();
        options.domain = match address {
            IpAddr::V4(_) => SocketDomain::Ipv4,
            IpAddr::V6(_) => SocketDomain::Ipv6,
        };
        options
    }
}

/// Where a socket connects or binds to.
///
/// For network domains `address` is an IP literal; for
/// [`SocketDomain::Local`] it is a filesystem path and `port` is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketEndpoint {
    pub address: String,
    pub port: u16,
}

impl SocketEndpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Parses the endpoint as an IP socket address of the given domain.
    pub fn to_socket_addr(&self, domain: SocketDomain) -> Result<SocketAddr, NetError> {
        let ip = crate::dns::parse_ip_literal(&self.address).ok_or(NetError::SocketInvalidAddress)?;
        match (domain, ip) {
            (SocketDomain::Ipv4, IpAddr::V4(_)) | (SocketDomain::Ipv6, IpAddr::V6(_)) => {
                Ok(SocketAddr::new(ip, self.port))
            }
            _ => Err(NetError::SocketInvalidAddress),
        }
    }
}

impl From<SocketAddr> for SocketEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_builder_defaults() {
        let options = SocketOptions::builder()
            .domain(SocketDomain::Ipv6)
            .connect_timeout(Duration::from_millis(250))
            .build();
        assert_eq!(options.domain, SocketDomain::Ipv6);
        assert_eq!(options.kind, SocketKind::Stream);
        assert_eq!(options.connect_timeout(), Duration::from_millis(250));
        assert!(options.is_network());
    }

    #[test]
    fn test_for_address_switches_family() {
        let options = SocketOptions::default();
        let v6 = options.for_address(&IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(v6.domain, SocketDomain::Ipv6);
        assert_eq!(v6.connect_timeout_ms, options.connect_timeout_ms);
    }

    #[test]
    fn test_endpoint_parsing() {
        let endpoint = SocketEndpoint::new("127.0.0.1", 8080);
        assert!(endpoint.to_socket_addr(SocketDomain::Ipv4).is_ok());
        assert_eq!(
            endpoint.to_socket_addr(SocketDomain::Ipv6),
            Err(NetError::SocketInvalidAddress)
        );
        assert_eq!(
            SocketEndpoint::new("example.com", 80).to_socket_addr(SocketDomain::Ipv4),
            Err(NetError::SocketInvalidAddress)
        );
        assert_eq!(SocketEndpoint::new("::1", 443).to_string(), "[::1]:443");
    }

    #[test]
    fn test_options_from_json() {
        let options: SocketOptions =
            serde_json::from_str(r#"{"domain":"local","kind":"stream","connect_timeout_ms":500}"#)
                .unwrap();
        assert_eq!(options.domain, SocketDomain::Local);
        assert_eq!(options.connect_timeout_ms, 500);
        assert!(options.no_delay);
        assert!(!options.is_network());
    }
}
