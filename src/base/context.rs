//! Ergonomic error context helpers.
//!
//! Provides extension traits for turning `std::io` failures into the
//! catalogued `NetError` codes used by sockets and resolvers.

use crate::base::neterror::NetError;
use std::io;

/// Maps an IO error onto the socket error catalog.
///
/// Anything without a more specific code is reported as
/// [`NetError::SocketNotConnected`].
pub fn socket_error(err: &io::Error) -> NetError {
    use io::ErrorKind;

    match err.kind() {
        ErrorKind::ConnectionRefused => NetError::SocketConnectionRefused,
        ErrorKind::TimedOut => NetError::SocketTimeout,
        ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable => {
            NetError::SocketNoRouteToHost
        }
        ErrorKind::NetworkDown => NetError::SocketNetworkDown,
        ErrorKind::AddrNotAvailable => NetError::SocketInvalidAddress,
        ErrorKind::AddrInUse => NetError::SocketAddressInUse,
        ErrorKind::ConnectionAborted => NetError::SocketConnectAborted,
        ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => NetError::SocketClosed,
        ErrorKind::BrokenPipe => NetError::BrokenPipe,
        ErrorKind::NotConnected => NetError::SocketNotConnected,
        ErrorKind::WouldBlock => NetError::ReadWouldBlock,
        ErrorKind::PermissionDenied => NetError::NoPermission,
        ErrorKind::NotFound | ErrorKind::InvalidInput => NetError::FileInvalidPath,
        ErrorKind::Unsupported => NetError::SocketUnsupportedAddressFamily,
        _ => NetError::SocketNotConnected,
    }
}

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Map an IO error from a socket operation into the catalog.
    ///
    /// # Example
    /// ```ignore
    /// use channelnet::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await.socket_context()?;
    /// // Err(NetError::SocketConnectionRefused)
    /// ```
    fn socket_context(self) -> Result<T, NetError>;

    /// Map an IO error from host resolution into the catalog.
    fn dns_context(self, domain: &str) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn socket_context(self) -> Result<T, NetError> {
        self.map_err(|e| {
            let mapped = socket_error(&e);
            tracing::trace!(error = %e, code = mapped.as_i32(), "socket operation failed");
            mapped
        })
    }

    fn dns_context(self, domain: &str) -> Result<T, NetError> {
        self.map_err(|e| {
            tracing::debug!(domain = %domain, error = %e, "DNS resolution failed");
            NetError::DnsQueryFailed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_socket_context() {
        let result: Result<(), io::Error> =
            Err(Error::new(ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(
            result.socket_context().unwrap_err(),
            NetError::SocketConnectionRefused
        );

        let result: Result<(), io::Error> = Err(Error::new(ErrorKind::TimedOut, "slow"));
        assert_eq!(result.socket_context().unwrap_err(), NetError::SocketTimeout);
    }

    #[test]
    fn test_unmapped_kind_is_not_connected() {
        let err = Error::new(ErrorKind::Other, "weird");
        assert_eq!(socket_error(&err), NetError::SocketNotConnected);
    }

    #[test]
    fn test_dns_context() {
        let result: Result<(), io::Error> = Err(Error::new(ErrorKind::NotFound, "no such host"));
        let err = result.dns_context("unknown.example.com").unwrap_err();
        assert_eq!(err, NetError::DnsQueryFailed);
    }
}
