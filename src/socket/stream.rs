//! Transport stream abstraction.
//!
//! A channel's transport is a [`BoxedSocket`]: plain TCP, a Unix stream, a
//! connected UDP socket, or any of those wrapped in TLS once the TLS
//! handler has negotiated.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};
use tokio_boring::SslStream;

/// Any socket that supports async read/write and can back a channel.
pub trait StreamSocket: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl StreamSocket for TcpStream {}

#[cfg(unix)]
impl StreamSocket for tokio::net::UnixStream {}

impl StreamSocket for UdpStream {}

impl<S: StreamSocket> StreamSocket for SslStream<S> {}

impl StreamSocket for BoxedSocket {}

/// A connected datagram socket exposed as a byte stream.
///
/// Each write sends one datagram; each read returns one datagram.
pub struct UdpStream {
    socket: UdpSocket,
}

impl UdpStream {
    pub fn new(socket: UdpSocket) -> Self {
        Self { socket }
    }
}

impl AsyncRead for UdpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.socket.poll_recv(cx, buf)
    }
}

impl AsyncWrite for UdpStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.socket.poll_send(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A wrapper type for boxed dynamic StreamSocket that is object-safe.
/// This avoids conflicting trait implementations with tokio's blanket impls.
pub struct BoxedSocket {
    inner: Pin<Box<dyn StreamSocket>>,
}

impl BoxedSocket {
    /// Create a new BoxedSocket from any StreamSocket.
    pub fn new<S: StreamSocket>(socket: S) -> Self {
        Self {
            inner: Box::pin(socket),
        }
    }
}

impl fmt::Debug for BoxedSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedSocket").finish_non_exhaustive()
    }
}

impl AsyncRead for BoxedSocket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for BoxedSocket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.inner.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_boxed_tcp_roundtrip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut boxed = BoxedSocket::new(stream);
            boxed.write_all(b"ping").await.unwrap();
        });

        let (mut server, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_udp_stream_datagrams() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();

        let mut a = BoxedSocket::new(UdpStream::new(a));
        let mut b = UdpStream::new(b);
        a.write_all(b"datagram").await.unwrap();

        let mut buf = [0u8; 64];
        let n = b.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"datagram");
    }
}
