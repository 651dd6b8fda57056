use super::Channel;
use crate::base::neterror::NetError;
use bytes::Bytes;

/// A stage in a channel's pipeline.
///
/// Handlers are owned by their slot. The channel calls them on its event
/// loop thread, one at a time, left to right for reads and right to left
/// for shutdown.
pub trait ChannelHandler: Send {
    /// Short name used for logging and pipeline inspection.
    fn name(&self) -> &'static str;

    /// Inbound data from the slot to the left.
    ///
    /// Returning `Some` passes (possibly transformed) data on to the right;
    /// `None` consumes it.
    fn on_read(&mut self, _channel: &Channel, data: Bytes) -> Option<Bytes> {
        Some(data)
    }

    /// The handler to the left negotiated an application protocol.
    ///
    /// Returning `Ok(Some(handler))` replaces this handler in its slot.
    fn on_protocol_negotiated(
        &mut self,
        _channel: &Channel,
        _protocol: &str,
    ) -> Result<Option<Box<dyn ChannelHandler>>, NetError> {
        Ok(None)
    }

    /// The channel is shutting down.
    fn on_shutdown(&mut self, _channel: &Channel, _result: Result<(), NetError>) {}
}
