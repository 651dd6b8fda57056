//! ALPN dispatch.
//!
//! The [`AlpnHandler`] sits to the right of the TLS handler. When TLS
//! reports the negotiated protocol, it asks the user callback for the
//! handler that speaks that protocol and swaps it into its own slot.

use crate::base::neterror::NetError;
use crate::channel::{Channel, ChannelHandler};
use bytes::Bytes;
use std::sync::Arc;

/// Maps a negotiated protocol to the handler that speaks it.
///
/// Returning `None` rejects the protocol and fails the connection.
pub type AlpnCallback =
    Arc<dyn Fn(&Channel, &str) -> Option<Box<dyn ChannelHandler>> + Send + Sync>;

pub struct AlpnHandler {
    on_protocol_negotiated: AlpnCallback,
}

impl AlpnHandler {
    pub fn new(on_protocol_negotiated: AlpnCallback) -> Self {
        Self {
            on_protocol_negotiated,
        }
    }
}

impl ChannelHandler for AlpnHandler {
    fn name(&self) -> &'static str {
        "alpn"
    }

    fn on_protocol_negotiated(
        &mut self,
        channel: &Channel,
        protocol: &str,
    ) -> Result<Option<Box<dyn ChannelHandler>>, NetError> {
        match (self.on_protocol_negotiated)(channel, protocol) {
            Some(handler) => {
                tracing::debug!(channel = channel.id(), protocol, handler = handler.name(), "alpn selected handler");
                Ok(Some(handler))
            }
            None => {
                tracing::warn!(channel = channel.id(), protocol, "no handler for negotiated protocol");
                Err(NetError::UnhandledAlpnProtocolMessage)
            }
        }
    }

    // Application data before a protocol message means TLS was set up
    // without advertising ALPN to this slot.
    fn on_read(&mut self, channel: &Channel, _data: Bytes) -> Option<Bytes> {
        tracing::error!(channel = channel.id(), "data reached alpn handler before protocol negotiation");
        channel.shutdown(Err(NetError::MissingAlpnMessage));
        None
    }
}

/// Encodes protocol names in ALPN wire format (length-prefixed).
pub fn encode_alpn_protocols(protocols: &[String]) -> Result<Vec<u8>, NetError> {
    let mut wire = Vec::with_capacity(protocols.iter().map(|p| p.len() + 1).sum());
    for proto in protocols {
        if proto.is_empty() || proto.len() > 255 {
            return Err(NetError::TlsCtxError);
        }
        wire.push(proto.len() as u8);
        wire.extend_from_slice(proto.as_bytes());
    }
    Ok(wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_alpn_protocols() {
        let wire = encode_alpn_protocols(&["h2".to_string(), "http/1.1".to_string()]).unwrap();
        assert_eq!(wire, b"\x02h2\x08http/1.1");
        assert_eq!(encode_alpn_protocols(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_encode_rejects_bad_names() {
        assert_eq!(
            encode_alpn_protocols(&[String::new()]),
            Err(NetError::TlsCtxError)
        );
        assert_eq!(
            encode_alpn_protocols(&["x".repeat(256)]),
            Err(NetError::TlsCtxError)
        );
    }
}
