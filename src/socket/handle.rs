//! Event-loop bound sockets.
//!
//! A [`Socket`] starts idle and either connects (client side) or binds,
//! listens and accepts (server side). Every async step runs on the event
//! loop the socket was handed; completion is reported through a callback
//! that receives the socket back by value.

use super::options::{SocketDomain, SocketEndpoint, SocketKind, SocketOptions};
use super::stream::{BoxedSocket, UdpStream};
use crate::base::context::{socket_error, IoResultExt};
use crate::base::neterror::NetError;
use crate::eventloop::EventLoop;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};
use tokio::sync::watch;

#[cfg(unix)]
use std::path::PathBuf;
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

enum SocketIo {
    Idle,
    BoundTcp(TcpSocket),
    #[cfg(unix)]
    BoundUnix(std::os::unix::net::UnixListener),
    Listening,
    AcceptedTcp(std::net::TcpStream),
    #[cfg(unix)]
    AcceptedUnix(std::os::unix::net::UnixStream),
    Connected(BoxedSocket),
    /// The stream now belongs to a channel.
    Attached,
    Closed,
}

impl SocketIo {
    fn name(&self) -> &'static str {
        match self {
            SocketIo::Idle => "idle",
            SocketIo::BoundTcp(_) => "bound",
            #[cfg(unix)]
            SocketIo::BoundUnix(_) => "bound",
            SocketIo::Listening => "listening",
            SocketIo::AcceptedTcp(_) => "accepted",
            #[cfg(unix)]
            SocketIo::AcceptedUnix(_) => "accepted",
            SocketIo::Connected(_) => "connected",
            SocketIo::Attached => "attached",
            SocketIo::Closed => "closed",
        }
    }
}

enum ConnectTarget {
    Inet(SocketAddr),
    #[cfg(unix)]
    Path(PathBuf),
}

enum Acceptor {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
    /// Keeps the real listener bound but fails every accept.
    #[cfg(test)]
    Faulty { _listener: Box<Acceptor>, kind: io::ErrorKind },
}

#[cfg(test)]
thread_local! {
    static ACCEPT_FAULT: std::cell::Cell<Option<io::ErrorKind>> = const { std::cell::Cell::new(None) };
}

/// Makes the next `start_accept` on this thread fail its first accept.
#[cfg(test)]
pub(crate) fn fail_next_accept(kind: io::ErrorKind) {
    ACCEPT_FAULT.with(|fault| fault.set(Some(kind)));
}

impl Acceptor {
    async fn accept(&self) -> io::Result<(SocketIo, Option<SocketEndpoint>)> {
        match self {
            Acceptor::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((SocketIo::AcceptedTcp(stream.into_std()?), Some(peer.into())))
            }
            #[cfg(unix)]
            Acceptor::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((SocketIo::AcceptedUnix(stream.into_std()?), None))
            }
            #[cfg(test)]
            Acceptor::Faulty { kind, .. } => Err(io::Error::new(*kind, "accept fault")),
        }
    }
}

pub struct Socket {
    options: SocketOptions,
    io: SocketIo,
    backlog: Option<u32>,
    local: Option<SocketEndpoint>,
    remote: Option<SocketEndpoint>,
    event_loop: Option<EventLoop>,
    accept_stop: Option<watch::Sender<bool>>,
}

impl Socket {
    /// Creates an idle socket.
    pub fn new(options: SocketOptions) -> Result<Self, NetError> {
        if options.domain == SocketDomain::Local
            && (options.kind == SocketKind::Dgram || cfg!(not(unix)))
        {
            return Err(NetError::SocketInvalidOptions);
        }
        Ok(Self::with_io(options, SocketIo::Idle))
    }

    fn with_io(options: SocketOptions, io: SocketIo) -> Self {
        Self {
            options,
            io,
            backlog: None,
            local: None,
            remote: None,
            event_loop: None,
            accept_stop: None,
        }
    }

    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    /// The loop this socket is bound to, once it has one.
    pub fn event_loop(&self) -> Option<&EventLoop> {
        self.event_loop.as_ref()
    }

    pub fn local_endpoint(&self) -> Option<&SocketEndpoint> {
        self.local.as_ref()
    }

    pub fn remote_endpoint(&self) -> Option<&SocketEndpoint> {
        self.remote.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.io, SocketIo::Connected(_))
    }

    /// True while the accept loop runs. Turns false once accepting stops,
    /// including after an accept failure ended the loop.
    pub fn is_listening(&self) -> bool {
        self.accept_stop.as_ref().is_some_and(|stop| !stop.is_closed())
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.io, SocketIo::Closed)
    }

    fn connect_target(&self, endpoint: &SocketEndpoint) -> Result<ConnectTarget, NetError> {
        match self.options.domain {
            #[cfg(unix)]
            SocketDomain::Local => {
                if endpoint.address.is_empty() {
                    return Err(NetError::SocketInvalidAddress);
                }
                Ok(ConnectTarget::Path(PathBuf::from(&endpoint.address)))
            }
            #[cfg(not(unix))]
            SocketDomain::Local => Err(NetError::SocketInvalidOptions),
            domain => Ok(ConnectTarget::Inet(endpoint.to_socket_addr(domain)?)),
        }
    }

    /// Connects asynchronously on `event_loop`.
    ///
    /// An invalid endpoint or a stopped loop is reported synchronously and
    /// the socket is dropped. Otherwise `on_connect` runs exactly once on the
    /// loop thread with the socket and the outcome; the connect timeout from
    /// the socket options applies.
    pub fn connect<F>(
        mut self,
        endpoint: &SocketEndpoint,
        event_loop: &EventLoop,
        on_connect: F,
    ) -> Result<(), NetError>
    where
        F: FnOnce(Socket, Result<(), NetError>) + Send + 'static,
    {
        if !matches!(self.io, SocketIo::Idle) {
            return Err(NetError::SocketIllegalOperationForState);
        }
        let target = self.connect_target(endpoint)?;
        self.event_loop = Some(event_loop.clone());

        let timeout = self.options.connect_timeout();
        let endpoint = endpoint.clone();
        tracing::trace!(endpoint = %endpoint, "socket connect started");

        event_loop.spawn(async move {
            let outcome = tokio::time::timeout(timeout, open_transport(&self.options, target)).await;
            let result = match outcome {
                Ok(Ok((stream, local))) => {
                    self.io = SocketIo::Connected(stream);
                    self.local = local;
                    self.remote = Some(endpoint.clone());
                    Ok(())
                }
                Ok(Err(e)) => Err(e),
                Err(_) => Err(NetError::SocketTimeout),
            };
            if let Err(e) = &result {
                tracing::trace!(endpoint = %endpoint, error = %e, "socket connect failed");
                self.io = SocketIo::Closed;
            }
            on_connect(self, result);
        })
    }

    /// Binds a stream socket to `endpoint`.
    pub fn bind(&mut self, endpoint: &SocketEndpoint) -> Result<(), NetError> {
        if !matches!(self.io, SocketIo::Idle) {
            return Err(NetError::SocketIllegalOperationForState);
        }
        if self.options.kind != SocketKind::Stream {
            return Err(NetError::SocketInvalidOperationForType);
        }

        match self.options.domain {
            SocketDomain::Local => self.bind_local(endpoint)?,
            domain => {
                let addr = endpoint.to_socket_addr(domain)?;
                let socket = if addr.is_ipv4() {
                    TcpSocket::new_v4()
                } else {
                    TcpSocket::new_v6()
                }
                .socket_context()?;
                socket.set_reuseaddr(true).socket_context()?;
                socket.bind(addr).socket_context()?;
                self.local = socket.local_addr().ok().map(SocketEndpoint::from);
                self.io = SocketIo::BoundTcp(socket);
            }
        }

        tracing::trace!(endpoint = ?self.local, "socket bound");
        Ok(())
    }

    #[cfg(unix)]
    fn bind_local(&mut self, endpoint: &SocketEndpoint) -> Result<(), NetError> {
        if endpoint.address.is_empty() {
            return Err(NetError::SocketInvalidAddress);
        }
        let listener = std::os::unix::net::UnixListener::bind(&endpoint.address).socket_context()?;
        self.local = Some(endpoint.clone());
        self.io = SocketIo::BoundUnix(listener);
        Ok(())
    }

    #[cfg(not(unix))]
    fn bind_local(&mut self, _endpoint: &SocketEndpoint) -> Result<(), NetError> {
        Err(NetError::SocketInvalidOptions)
    }

    /// Marks a bound socket as listening with the given backlog.
    ///
    /// The listen queue is created when accepting starts, on the accepting
    /// loop.
    pub fn listen(&mut self, backlog: u32) -> Result<(), NetError> {
        match self.io {
            SocketIo::BoundTcp(_) => {}
            #[cfg(unix)]
            SocketIo::BoundUnix(_) => {}
            _ => return Err(NetError::SocketIllegalOperationForState),
        }
        self.backlog = Some(backlog);
        Ok(())
    }

    /// Starts accepting connections on `event_loop`.
    ///
    /// `on_accept` runs on the loop thread once per accepted connection with
    /// a socket that is not yet assigned to any loop. An accept failure is
    /// delivered once as `Err` and ends accepting.
    pub fn start_accept<F>(&mut self, event_loop: &EventLoop, on_accept: F) -> Result<(), NetError>
    where
        F: Fn(Result<Socket, NetError>) + Send + Sync + 'static,
    {
        let Some(backlog) = self.backlog else {
            return Err(NetError::SocketIllegalOperationForState);
        };
        if self.accept_stop.is_some() {
            return Err(NetError::SocketIllegalOperationForState);
        }

        let io = std::mem::replace(&mut self.io, SocketIo::Closed);
        let acceptor = {
            let _guard = event_loop.enter();
            match io {
                SocketIo::BoundTcp(socket) => Acceptor::Tcp(socket.listen(backlog).socket_context()?),
                #[cfg(unix)]
                SocketIo::BoundUnix(listener) => {
                    listener.set_nonblocking(true).socket_context()?;
                    Acceptor::Unix(UnixListener::from_std(listener).socket_context()?)
                }
                other => {
                    self.io = other;
                    return Err(NetError::SocketIllegalOperationForState);
                }
            }
        };

        #[cfg(test)]
        let acceptor = match ACCEPT_FAULT.with(|fault| fault.take()) {
            Some(kind) => Acceptor::Faulty {
                _listener: Box::new(acceptor),
                kind,
            },
            None => acceptor,
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let options = self.options.clone();
        let local = self.local.clone();
        event_loop.spawn(accept_loop(acceptor, options, local, stop_rx, on_accept))?;

        self.io = SocketIo::Listening;
        self.accept_stop = Some(stop_tx);
        self.event_loop = Some(event_loop.clone());
        tracing::debug!(endpoint = ?self.local, backlog, "socket accepting");
        Ok(())
    }

    /// Stops accepting and closes the listening socket.
    pub fn stop_accept(&mut self) -> Result<(), NetError> {
        let Some(stop) = self.accept_stop.take() else {
            return Err(NetError::SocketIllegalOperationForState);
        };
        // The accept loop may already have ended on an accept error.
        let _ = stop.send(true);
        self.io = SocketIo::Closed;
        tracing::debug!(endpoint = ?self.local, "socket stopped accepting");
        Ok(())
    }

    /// Registers an accepted socket with `event_loop`.
    pub fn assign_to_event_loop(&mut self, event_loop: &EventLoop) -> Result<(), NetError> {
        if self.event_loop.is_some() {
            return Err(NetError::EventLoopAlreadyAssigned);
        }

        let io = std::mem::replace(&mut self.io, SocketIo::Closed);
        let stream = {
            let _guard = event_loop.enter();
            match io {
                SocketIo::AcceptedTcp(stream) => {
                    stream.set_nonblocking(true).socket_context()?;
                    let stream = TcpStream::from_std(stream).socket_context()?;
                    stream.set_nodelay(self.options.no_delay).socket_context()?;
                    BoxedSocket::new(stream)
                }
                #[cfg(unix)]
                SocketIo::AcceptedUnix(stream) => {
                    stream.set_nonblocking(true).socket_context()?;
                    BoxedSocket::new(UnixStream::from_std(stream).socket_context()?)
                }
                other => {
                    self.io = other;
                    return Err(NetError::SocketIllegalOperationForState);
                }
            }
        };

        self.io = SocketIo::Connected(stream);
        self.event_loop = Some(event_loop.clone());
        Ok(())
    }

    /// Moves the connected stream out so a channel can own it.
    pub(crate) fn take_stream(&mut self) -> Option<BoxedSocket> {
        match std::mem::replace(&mut self.io, SocketIo::Attached) {
            SocketIo::Connected(stream) => Some(stream),
            other => {
                self.io = other;
                None
            }
        }
    }

    /// Closes the socket. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(stop) = self.accept_stop.take() {
            let _ = stop.send(true);
        }
        if !matches!(self.io, SocketIo::Closed) {
            tracing::trace!(state = self.io.name(), remote = ?self.remote, "socket closed");
            self.io = SocketIo::Closed;
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("domain", &self.options.domain)
            .field("kind", &self.options.kind)
            .field("state", &self.io.name())
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish()
    }
}

async fn open_transport(
    options: &SocketOptions,
    target: ConnectTarget,
) -> Result<(BoxedSocket, Option<SocketEndpoint>), NetError> {
    match target {
        ConnectTarget::Inet(addr) if options.kind == SocketKind::Stream => {
            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()
            } else {
                TcpSocket::new_v6()
            }
            .socket_context()?;
            socket.set_keepalive(options.keep_alive).socket_context()?;
            let stream = socket.connect(addr).await.socket_context()?;
            stream.set_nodelay(options.no_delay).socket_context()?;
            let local = stream.local_addr().ok().map(SocketEndpoint::from);
            Ok((BoxedSocket::new(stream), local))
        }
        ConnectTarget::Inet(addr) => {
            let unspecified: SocketAddr = if addr.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (Ipv6Addr::UNSPECIFIED, 0).into()
            };
            let socket = UdpSocket::bind(unspecified).await.socket_context()?;
            socket.connect(addr).await.socket_context()?;
            let local = socket.local_addr().ok().map(SocketEndpoint::from);
            Ok((BoxedSocket::new(UdpStream::new(socket)), local))
        }
        #[cfg(unix)]
        ConnectTarget::Path(path) => {
            let stream = UnixStream::connect(&path).await.socket_context()?;
            Ok((BoxedSocket::new(stream), None))
        }
    }
}

async fn accept_loop<F>(
    acceptor: Acceptor,
    options: SocketOptions,
    local: Option<SocketEndpoint>,
    mut stop: watch::Receiver<bool>,
    on_accept: F,
) where
    F: Fn(Result<Socket, NetError>) + Send + Sync + 'static,
{
    let failure = loop {
        let accepted = tokio::select! {
            _ = stop.wait_for(|stopped| *stopped) => break None,
            accepted = acceptor.accept() => accepted,
        };

        match accepted {
            Ok((io, remote)) => {
                tracing::trace!(remote = ?remote, "accepted incoming connection");
                let mut socket = Socket::with_io(options.clone(), io);
                socket.local = local.clone();
                socket.remote = remote;
                on_accept(Ok(socket));
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
                tracing::debug!(error = %e, "incoming connection aborted before accept");
            }
            Err(e) => {
                let err = socket_error(&e);
                tracing::error!(error = %e, code = err.as_i32(), "accept failed, listener stopping");
                break Some(err);
            }
        }
    };

    // Closing the listener and the stop receiver first makes
    // `Socket::is_listening` false before the failure is reported.
    drop(acceptor);
    drop(stop);
    if let Some(err) = failure {
        on_accept(Err(err));
    }
    tracing::trace!(endpoint = ?local, "accept loop finished");
}
