//! Async DNS resolver using hickory-dns.
//!
//! Fully async alternative to [`GaiResolver`](super::GaiResolver): no
//! blocking threads, dual-stack lookups, DoH/DoT capable.

use super::{Addrs, Name, Resolve, Resolving};
use crate::base::neterror::NetError;
use hickory_resolver::{
    config::{LookupIpStrategy, ResolverConfig},
    name_server::TokioConnectionProvider,
    TokioResolver,
};
use std::{net::IpAddr, sync::LazyLock};

/// Async DNS resolver backed by hickory-dns.
///
/// The underlying resolver is created lazily on first use and shared by
/// every instance.
#[derive(Debug, Clone)]
pub struct HickoryResolver {
    resolver: &'static LazyLock<TokioResolver>,
}

impl HickoryResolver {
    pub fn new() -> Self {
        static RESOLVER: LazyLock<TokioResolver> = LazyLock::new(|| {
            let mut builder = match TokioResolver::builder_tokio() {
                Ok(builder) => {
                    tracing::debug!("Using system DNS configuration");
                    builder
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Failed to read system DNS config, using defaults"
                    );
                    TokioResolver::builder_with_config(
                        ResolverConfig::default(),
                        TokioConnectionProvider::default(),
                    )
                }
            };

            // Both families: the bootstrap races A and AAAA records alike.
            builder.options_mut().ip_strategy = LookupIpStrategy::Ipv4AndIpv6;

            builder.build()
        });

        Self {
            resolver: &RESOLVER,
        }
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolve for HickoryResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.clone();
        Box::pin(async move {
            let domain = name.as_str();
            tracing::debug!(domain = %domain, "resolving via hickory-dns");

            let lookup = resolver.resolver.lookup_ip(domain).await.map_err(|e| {
                tracing::debug!(domain = %domain, error = %e, "hickory-dns lookup failed");
                NetError::DnsQueryFailed
            })?;

            let addrs: Vec<IpAddr> = lookup.iter().collect();
            if addrs.is_empty() {
                return Err(NetError::DnsNoAddressForHost);
            }

            tracing::debug!(domain = %domain, count = addrs.len(), "hickory-dns resolution complete");
            Ok::<_, NetError>(Box::new(addrs.into_iter()) as Addrs)
        })
    }
}
