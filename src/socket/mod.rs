//! Sockets.
//!
//! - [`handle`]: event-loop bound sockets (connect, bind, listen, accept)
//! - [`handler`]: the channel handler that owns a connected socket
//! - [`options`]: socket options and endpoints
//! - [`stream`]: the byte-stream transport a channel drives

pub mod handle;
pub mod handler;
pub mod options;
pub mod stream;

pub use handle::Socket;
pub use handler::SocketHandler;
pub use options::{SocketDomain, SocketEndpoint, SocketKind, SocketOptions, SocketOptionsBuilder};
pub use stream::{BoxedSocket, StreamSocket, UdpStream};
