//! # channelnet
//!
//! Client and server channel bootstrapping over a group of event loops.
//!
//! A [`ClientBootstrap`] turns a host name and port into a ready channel:
//! it resolves the host, races a connection to every resolved address,
//! builds a channel on the first socket to connect and optionally layers
//! TLS and an ALPN-selected protocol handler on top. A [`ServerBootstrap`]
//! does the same for every connection a listener accepts.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use channelnet::{ClientBootstrap, EventLoopGroup, SocketOptions};
//! use channelnet::dns::DefaultHostResolver;
//! use std::sync::Arc;
//!
//! let group = EventLoopGroup::new(0)?;
//! let bootstrap = ClientBootstrap::new(&group, Arc::new(DefaultHostResolver::new()), None)?;
//! bootstrap.new_socket_channel(
//!     "example.com",
//!     80,
//!     &SocketOptions::default(),
//!     |_, result| match result {
//!         Ok(channel) => println!("connected: {channel:?}"),
//!         Err(e) => eprintln!("failed: {e}"),
//!     },
//!     |_, result, _| println!("closed: {result:?}"),
//! )?;
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error catalog and reference-counted handles
//! - [`eventloop`] - Event loops and loop groups
//! - [`dns`] - Resolution implementations and the caching host resolver
//! - [`socket`] - Event-loop bound sockets and the socket channel handler
//! - [`channel`] - Channels, slots and the handler trait
//! - [`tls`] - TLS contexts, the TLS handler and ALPN dispatch
//! - [`bootstrap`] - Client/server bootstraps and connection orchestration

pub mod base;
pub mod bootstrap;
pub mod channel;
pub mod dns;
pub mod eventloop;
pub mod socket;
pub mod tls;

pub use base::neterror::NetError;
pub use bootstrap::{ClientBootstrap, ServerBootstrap, SocketListener};
pub use channel::{Channel, ChannelHandler, ChannelSlot};
pub use eventloop::{EventLoop, EventLoopGroup};
pub use socket::{SocketDomain, SocketEndpoint, SocketKind, SocketOptions};
pub use tls::{TlsConnectionOptions, TlsContext, TlsContextOptions};
