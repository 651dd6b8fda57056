//! Host resolution with caching and connection-failure feedback.
//!
//! The client bootstrap talks to a [`HostResolver`]: it asks for every
//! address of a host and reports back the ones it could not connect to.
//! [`DefaultHostResolver`] keeps a small TTL cache in a `DashMap` and moves
//! failed addresses to the back of their entry.

use super::{parse_ip_literal, GaiResolver, Name, Resolve};
use crate::base::neterror::NetError;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default time-to-live for resolved entries.
pub const DEFAULT_DNS_TTL: Duration = Duration::from_secs(30);

/// Default cap on cached host names.
pub const MAX_HOST_RESOLVER_ENTRIES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
}

/// One resolved address of a host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAddress {
    pub host: Name,
    pub address: IpAddr,
    pub record_type: RecordType,
}

impl HostAddress {
    pub fn new(host: Name, address: IpAddr) -> Self {
        let record_type = match address {
            IpAddr::V4(_) => RecordType::A,
            IpAddr::V6(_) => RecordType::Aaaa,
        };
        Self {
            host,
            address,
            record_type,
        }
    }
}

/// How a host resolver should resolve: which implementation, and how long
/// results may be reused.
#[derive(Clone)]
pub struct HostResolutionConfig {
    pub resolve: Arc<dyn Resolve>,
    pub max_ttl: Duration,
}

impl HostResolutionConfig {
    pub fn new(resolve: Arc<dyn Resolve>) -> Self {
        Self {
            resolve,
            max_ttl: DEFAULT_DNS_TTL,
        }
    }

    #[must_use]
    pub fn with_max_ttl(mut self, max_ttl: Duration) -> Self {
        self.max_ttl = max_ttl;
        self
    }
}

impl Default for HostResolutionConfig {
    fn default() -> Self {
        Self::new(Arc::new(GaiResolver::new()))
    }
}

impl fmt::Debug for HostResolutionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostResolutionConfig")
            .field("max_ttl", &self.max_ttl)
            .finish_non_exhaustive()
    }
}

/// Future returned by [`HostResolver::resolve_host`].
pub type HostResolving = BoxFuture<'static, Result<Vec<HostAddress>, NetError>>;

/// Resolver consumed by the client bootstrap.
pub trait HostResolver: Send + Sync {
    /// Starts resolving `name`.
    ///
    /// An `Err` means resolution could not even start; it is returned to the
    /// caller of the connect operation synchronously.
    fn resolve_host(
        &self,
        name: &Name,
        config: &HostResolutionConfig,
    ) -> Result<HostResolving, NetError>;

    /// Feedback that connecting to `address` failed.
    fn record_connection_failure(&self, address: &HostAddress);
}

struct CacheEntry {
    addresses: Vec<HostAddress>,
    expires_at: Instant,
}

/// Caching host resolver.
pub struct DefaultHostResolver {
    cache: Arc<DashMap<Name, CacheEntry>>,
    max_entries: usize,
}

impl DefaultHostResolver {
    pub fn new() -> Self {
        Self::with_max_entries(MAX_HOST_RESOLVER_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of host names currently cached.
    pub fn cached_host_count(&self) -> usize {
        self.cache.len()
    }

    /// Drops the cached entry for `name`. Returns whether one existed.
    pub fn purge(&self, name: &Name) -> bool {
        self.cache.remove(name).is_some()
    }

    fn lookup_cached(&self, name: &Name) -> Option<Vec<HostAddress>> {
        let now = Instant::now();
        if let Some(entry) = self.cache.get(name) {
            if entry.expires_at > now {
                return Some(entry.addresses.clone());
            }
        }
        self.cache.remove_if(name, |_, entry| entry.expires_at <= now);
        None
    }

    fn store(
        cache: &DashMap<Name, CacheEntry>,
        max_entries: usize,
        name: Name,
        addresses: Vec<HostAddress>,
        ttl: Duration,
    ) {
        if !cache.contains_key(&name) && cache.len() >= max_entries {
            let oldest = cache
                .iter()
                .min_by_key(|entry| entry.value().expires_at)
                .map(|entry| entry.key().clone());
            if let Some(oldest) = oldest {
                tracing::trace!(domain = %oldest, "evicting host resolver entry");
                cache.remove(&oldest);
            }
        }
        cache.insert(
            name,
            CacheEntry {
                addresses,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

impl Default for DefaultHostResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HostResolver for DefaultHostResolver {
    fn resolve_host(
        &self,
        name: &Name,
        config: &HostResolutionConfig,
    ) -> Result<HostResolving, NetError> {
        if name.is_empty() {
            return Err(NetError::DnsInvalidName);
        }

        if let Some(ip) = parse_ip_literal(name.as_str()) {
            let addresses = vec![HostAddress::new(name.clone(), ip)];
            return Ok(futures::future::ready(Ok(addresses)).boxed());
        }

        if let Some(addresses) = self.lookup_cached(name) {
            tracing::trace!(domain = %name, count = addresses.len(), "host resolver cache hit");
            return Ok(futures::future::ready(Ok(addresses)).boxed());
        }

        let resolving = config.resolve.resolve(name.clone());
        let cache = Arc::clone(&self.cache);
        let max_entries = self.max_entries;
        let ttl = config.max_ttl;
        let name = name.clone();

        Ok(async move {
            let addresses: Vec<HostAddress> = resolving
                .await?
                .map(|ip| HostAddress::new(name.clone(), ip))
                .collect();
            if addresses.is_empty() {
                return Err(NetError::DnsNoAddressForHost);
            }
            Self::store(&cache, max_entries, name, addresses.clone(), ttl);
            Ok::<_, NetError>(addresses)
        }
        .boxed())
    }

    fn record_connection_failure(&self, address: &HostAddress) {
        tracing::debug!(
            domain = %address.host,
            address = %address.address,
            "recording connection failure"
        );
        if let Some(mut entry) = self.cache.get_mut(&address.host) {
            if let Some(pos) = entry
                .addresses
                .iter()
                .position(|a| a.address == address.address)
            {
                let failed = entry.addresses.remove(pos);
                entry.addresses.push(failed);
            }
        }
    }
}

impl fmt::Debug for DefaultHostResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultHostResolver")
            .field("cached", &self.cache.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Addrs, Resolving};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        addrs: Vec<IpAddr>,
        calls: AtomicUsize,
    }

    impl CountingResolver {
        fn new(addrs: Vec<IpAddr>) -> Arc<Self> {
            Arc::new(Self {
                addrs,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Resolve for CountingResolver {
        fn resolve(&self, _name: Name) -> Resolving {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let addrs = self.addrs.clone();
            Box::pin(async move { Ok(Box::new(addrs.into_iter()) as Addrs) })
        }
    }

    fn v4(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[tokio::test]
    async fn test_results_are_cached() {
        let backend = CountingResolver::new(vec![v4(1), v4(2)]);
        let config = HostResolutionConfig::new(backend.clone());
        let resolver = DefaultHostResolver::new();
        let name = Name::new("svc.example");

        let first = resolver.resolve_host(&name, &config).unwrap().await.unwrap();
        let second = resolver.resolve_host(&name, &config).unwrap().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].record_type, RecordType::A);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cached_host_count(), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_not_reused() {
        let backend = CountingResolver::new(vec![v4(1)]);
        let config = HostResolutionConfig::new(backend.clone()).with_max_ttl(Duration::ZERO);
        let resolver = DefaultHostResolver::new();
        let name = Name::new("svc.example");

        resolver.resolve_host(&name, &config).unwrap().await.unwrap();
        resolver.resolve_host(&name, &config).unwrap().await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ip_literal_skips_resolution() {
        let backend = CountingResolver::new(vec![v4(1)]);
        let config = HostResolutionConfig::new(backend.clone());
        let resolver = DefaultHostResolver::new();

        let addrs = resolver
            .resolve_host(&Name::new("::1"), &config)
            .unwrap()
            .await
            .unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].record_type, RecordType::Aaaa);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let resolver = DefaultHostResolver::new();
        let result = resolver.resolve_host(&Name::new(""), &HostResolutionConfig::default());
        assert!(matches!(result, Err(NetError::DnsInvalidName)));
    }

    #[tokio::test]
    async fn test_empty_answer_is_no_address() {
        let backend = CountingResolver::new(vec![]);
        let config = HostResolutionConfig::new(backend);
        let resolver = DefaultHostResolver::new();

        let err = resolver
            .resolve_host(&Name::new("empty.example"), &config)
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(err, NetError::DnsNoAddressForHost);
        assert_eq!(resolver.cached_host_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_address_moves_to_back() {
        let backend = CountingResolver::new(vec![v4(1), v4(2), v4(3)]);
        let config = HostResolutionConfig::new(backend);
        let resolver = DefaultHostResolver::new();
        let name = Name::new("svc.example");

        let addrs = resolver.resolve_host(&name, &config).unwrap().await.unwrap();
        resolver.record_connection_failure(&addrs[0]);

        let reordered = resolver.resolve_host(&name, &config).unwrap().await.unwrap();
        let ips: Vec<_> = reordered.iter().map(|a| a.address).collect();
        assert_eq!(ips, vec![v4(2), v4(3), v4(1)]);
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let backend = CountingResolver::new(vec![v4(1)]);
        let config = HostResolutionConfig::new(backend);
        let resolver = DefaultHostResolver::with_max_entries(2);

        for host in ["a.example", "b.example", "c.example"] {
            resolver
                .resolve_host(&Name::new(host), &config)
                .unwrap()
                .await
                .unwrap();
        }
        assert_eq!(resolver.cached_host_count(), 2);
        assert!(resolver.purge(&Name::new("c.example")));
        assert_eq!(resolver.cached_host_count(), 1);
    }
}
