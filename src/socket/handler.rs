use super::handle::Socket;
use crate::base::neterror::NetError;
use crate::channel::{Channel, ChannelHandler, ChannelSlot};

/// Leftmost handler of every bootstrap channel.
///
/// Hands the socket's connected stream to the channel as its transport and
/// closes the socket when the channel shuts down.
pub struct SocketHandler {
    socket: Socket,
}

impl SocketHandler {
    /// Moves the stream of a connected `socket` into the channel owning
    /// `slot`. The socket must be bound to the channel's event loop.
    pub fn new(mut socket: Socket, slot: &ChannelSlot) -> Result<Self, NetError> {
        let channel = slot.channel();
        match socket.event_loop() {
            Some(event_loop) if event_loop.ptr_eq(channel.event_loop()) => {}
            Some(_) => return Err(NetError::EventLoopThreadOnly),
            None => return Err(NetError::SocketIllegalOperationForState),
        }

        let stream = socket.take_stream().ok_or(NetError::SocketNotConnected)?;
        channel.set_transport(stream)?;
        Ok(Self { socket })
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }
}

impl ChannelHandler for SocketHandler {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn on_shutdown(&mut self, channel: &Channel, result: Result<(), NetError>) {
        tracing::trace!(
            channel = channel.id(),
            remote = ?self.socket.remote_endpoint(),
            result = ?result,
            "closing channel socket"
        );
        self.socket.close();
    }
}
