//! Core DNS resolution types and traits.
//!
//! `Resolve` is the pluggable resolution implementation a
//! [`HostResolutionConfig`](super::HostResolutionConfig) carries. It only
//! answers "which IPs does this name have"; caching and failure feedback
//! live one layer up in [`HostResolver`](super::HostResolver).

use crate::base::neterror::NetError;
use std::{
    borrow::Cow, collections::HashMap, fmt, future::Future, net::IpAddr, pin::Pin, sync::Arc,
};

/// A domain name to resolve into IP addresses.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct Name {
    host: Box<str>,
}

impl Name {
    /// Creates a new [`Name`] from any string-like type.
    #[inline]
    pub fn new(host: impl Into<Box<str>>) -> Self {
        Self { host: host.into() }
    }

    /// View the hostname as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

impl From<String> for Name {
    fn from(value: String) -> Self {
        Name::new(value)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.host, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.host, f)
    }
}

/// Alias for an `Iterator` trait object over resolved IPs.
pub type Addrs = Box<dyn Iterator<Item = IpAddr> + Send>;

/// Alias for the `Future` type returned by a DNS resolver.
pub type Resolving = Pin<Box<dyn Future<Output = Result<Addrs, NetError>> + Send>>;

/// A resolution implementation.
///
/// Implementations must be thread-safe; a single instance is shared by every
/// connection attempt of a bootstrap.
pub trait Resolve: Send + Sync {
    /// Resolves a domain name to its A and AAAA records.
    fn resolve(&self, name: Name) -> Resolving;
}

impl<R: Resolve + ?Sized> Resolve for Arc<R> {
    fn resolve(&self, name: Name) -> Resolving {
        (**self).resolve(name)
    }
}

/// Resolver wrapper that answers some names from a fixed table.
///
/// Names present in the table never reach the inner resolver. Handy for
/// pinning a service name to local addresses in tests.
///
/// # Example
///
/// ```rust,ignore
/// use channelnet::dns::{DnsResolverWithOverrides, GaiResolver};
///
/// let resolver = DnsResolverWithOverrides::new(Arc::new(GaiResolver::new()))
///     .with_override("service.local", vec!["127.0.0.1".parse()?]);
/// ```
pub struct DnsResolverWithOverrides {
    inner: Arc<dyn Resolve>,
    overrides: HashMap<Cow<'static, str>, Vec<IpAddr>>,
}

impl DnsResolverWithOverrides {
    pub fn new(inner: Arc<dyn Resolve>) -> Self {
        Self {
            inner,
            overrides: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_override(
        mut self,
        host: impl Into<Cow<'static, str>>,
        addrs: Vec<IpAddr>,
    ) -> Self {
        self.overrides.insert(host.into(), addrs);
        self
    }

    /// Returns the number of configured overrides.
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}

impl Resolve for DnsResolverWithOverrides {
    fn resolve(&self, name: Name) -> Resolving {
        if let Some(addrs) = self.overrides.get(name.as_str()) {
            tracing::trace!(domain = %name, count = addrs.len(), "resolved from override table");
            let addrs: Addrs = Box::new(addrs.clone().into_iter());
            return Box::pin(std::future::ready(Ok(addrs)));
        }
        self.inner.resolve(name)
    }
}

impl fmt::Debug for DnsResolverWithOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsResolverWithOverrides")
            .field("override_count", &self.overrides.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_name_conversions() {
        let name = Name::from("example.com");
        assert_eq!(name.as_str(), "example.com");
        assert_eq!(name.to_string(), "example.com");
        assert_eq!(Name::from(String::from("example.com")), name);
        assert!(Name::new("").is_empty());
    }

    struct FixedResolver(IpAddr);

    impl Resolve for FixedResolver {
        fn resolve(&self, _name: Name) -> Resolving {
            let addr = self.0;
            Box::pin(async move { Ok(Box::new(std::iter::once(addr)) as Addrs) })
        }
    }

    #[tokio::test]
    async fn test_override_hit_and_miss() {
        let fallback = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        let pinned = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let resolver = DnsResolverWithOverrides::new(Arc::new(FixedResolver(fallback)))
            .with_override("service.local", vec![pinned]);
        assert_eq!(resolver.override_count(), 1);

        let hit: Vec<_> = resolver
            .resolve(Name::new("service.local"))
            .await
            .unwrap()
            .collect();
        assert_eq!(hit, vec![pinned]);

        let miss: Vec<_> = resolver
            .resolve(Name::new("elsewhere.example"))
            .await
            .unwrap()
            .collect();
        assert_eq!(miss, vec![fallback]);
    }
}
