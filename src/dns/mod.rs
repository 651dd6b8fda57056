//! DNS Resolution Module
//!
//! Two layers:
//! - [`Resolve`]: the resolution implementation (system `getaddrinfo` or
//!   async hickory-dns), optionally wrapped with static overrides
//! - [`HostResolver`]: what a client bootstrap consumes; adds caching,
//!   A/AAAA tagging and connection-failure feedback
//!
//! # Example
//!
//! ```rust,ignore
//! use channelnet::dns::{DefaultHostResolver, HostResolutionConfig, HostResolver, Name};
//!
//! let resolver = DefaultHostResolver::new();
//! let addrs = resolver
//!     .resolve_host(&Name::new("example.com"), &HostResolutionConfig::default())?
//!     .await?;
//! ```

mod gai;
mod hickory;
mod hostresolver;
mod resolve;

pub use gai::{parse_ip_literal, GaiResolver};
pub use hickory::HickoryResolver;
pub use hostresolver::{
    DefaultHostResolver, HostAddress, HostResolutionConfig, HostResolver, HostResolving,
    RecordType, DEFAULT_DNS_TTL, MAX_HOST_RESOLVER_ENTRIES,
};
pub use resolve::{Addrs, DnsResolverWithOverrides, Name, Resolve, Resolving};
