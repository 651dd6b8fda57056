//! System DNS resolver using getaddrinfo.
//!
//! Resolution runs on the blocking thread pool of the calling event loop so
//! the loop thread itself never blocks. This is the default resolution
//! implementation of a client bootstrap.

use super::{Addrs, Name, Resolve, Resolving};
use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use std::net::{IpAddr, ToSocketAddrs};

/// System DNS resolver using `getaddrinfo` in a thread pool.
#[derive(Clone, Debug, Default)]
pub struct GaiResolver;

impl GaiResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            let domain = host.clone();

            let result = tokio::task::spawn_blocking(move || {
                tracing::debug!(host = %host, "resolving via getaddrinfo");
                (host.as_str(), 0u16)
                    .to_socket_addrs()
                    .map(|iter| iter.map(|sa| sa.ip()).collect::<Vec<_>>())
            })
            .await;

            // Handle task join error (cancellation, panic)
            let mut addrs = result
                .map_err(|e| {
                    tracing::error!(error = %e, "DNS resolution task failed");
                    NetError::DnsQueryFailed
                })?
                .dns_context(&domain)?;

            addrs.dedup();
            if addrs.is_empty() {
                return Err(NetError::DnsNoAddressForHost);
            }

            tracing::debug!(domain = %domain, count = addrs.len(), "DNS resolution complete");
            Ok::<_, NetError>(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}

/// Parses a host that is already an IP literal.
///
/// Accepts bracketed IPv6 (`[::1]`). Returns `None` for anything that
/// needs DNS.
pub fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    let trimmed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    trimmed.parse::<IpAddr>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_parse_ip_literal() {
        assert_eq!(
            parse_ip_literal("127.0.0.1"),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(parse_ip_literal("::1"), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert_eq!(parse_ip_literal("[::1]"), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert_eq!(parse_ip_literal("example.com"), None);
        assert_eq!(parse_ip_literal(""), None);
    }

    #[tokio::test]
    async fn test_gai_resolver_localhost() {
        let resolver = GaiResolver::new();
        let addrs: Vec<_> = resolver
            .resolve(Name::new("localhost"))
            .await
            .unwrap()
            .collect();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|ip| ip.is_loopback()));
    }
}
