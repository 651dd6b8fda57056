//! TLS channel handler.
//!
//! The handshake runs on the channel's event loop against the channel's
//! transport. On success the transport is replaced by the encrypted
//! stream, the negotiated protocol is announced to the slot on the right
//! and channel I/O starts.

use super::alpn::encode_alpn_protocols;
use super::options::TlsConnectionOptions;
use crate::base::neterror::NetError;
use crate::channel::{Channel, ChannelHandler, ChannelSlot};
use crate::dns::parse_ip_literal;
use crate::socket::BoxedSocket;
use bytes::Bytes;
use tokio::sync::watch;
use tokio_boring::SslStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsRole {
    Client,
    Server,
}

type HandshakeFailure = (NetError, String);

pub struct TlsHandler {
    role: TlsRole,
    options: TlsConnectionOptions,
    slot_id: u64,
}

impl TlsHandler {
    pub fn new_client(options: TlsConnectionOptions, slot: &ChannelSlot) -> Result<Self, NetError> {
        if options.ctx().is_server() {
            return Err(NetError::TlsCtxError);
        }
        Ok(Self {
            role: TlsRole::Client,
            options,
            slot_id: slot.id(),
        })
    }

    pub fn new_server(options: TlsConnectionOptions, slot: &ChannelSlot) -> Result<Self, NetError> {
        if !options.ctx().is_server() {
            return Err(NetError::TlsCtxError);
        }
        Ok(Self {
            role: TlsRole::Server,
            options,
            slot_id: slot.id(),
        })
    }

    /// Drives the handshake for this handler once it sits in its slot.
    pub fn negotiator(&self) -> TlsNegotiator {
        TlsNegotiator {
            role: self.role,
            options: self.options.clone(),
            slot_id: self.slot_id,
        }
    }
}

impl ChannelHandler for TlsHandler {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn on_read(&mut self, channel: &Channel, data: Bytes) -> Option<Bytes> {
        if let Some(callbacks) = self.options.callbacks() {
            callbacks.on_data_read(channel, &data);
        }
        Some(data)
    }

    fn on_shutdown(&mut self, channel: &Channel, result: Result<(), NetError>) {
        tracing::trace!(channel = channel.id(), role = ?self.role, result = ?result, "tls handler shut down");
    }
}

/// A pending handshake.
pub struct TlsNegotiator {
    role: TlsRole,
    options: TlsConnectionOptions,
    slot_id: u64,
}

impl TlsNegotiator {
    /// Starts the handshake on the channel's event loop.
    ///
    /// The outcome is reported through the connection's
    /// [`TlsCallbacks`](super::TlsCallbacks);
    /// a failed handshake also shuts the channel down.
    pub fn start(self, channel: &Channel) -> Result<(), NetError> {
        let transport = channel.take_transport().ok_or(NetError::SocketNotConnected)?;
        let closing = channel.closing_signal();
        let event_loop = channel.event_loop().clone();
        event_loop.spawn(self.run(channel.clone(), transport, closing))
    }

    async fn run(self, channel: Channel, transport: BoxedSocket, mut closing: watch::Receiver<bool>) {
        tracing::debug!(
            channel = channel.id(),
            role = ?self.role,
            server_name = ?self.options.server_name(),
            "tls negotiation started"
        );

        let outcome = tokio::select! {
            _ = closing.wait_for(|closing| *closing) => Err((
                NetError::OperationCancelled,
                "channel shut down during handshake".to_string(),
            )),
            handshake = tokio::time::timeout(self.options.timeout(), self.handshake(transport)) => {
                handshake.unwrap_or_else(|_| Err((NetError::SocketTimeout, "handshake timed out".to_string())))
            }
        };

        match outcome.and_then(|stream| self.install(&channel, stream)) {
            Ok(protocol) => {
                tracing::debug!(channel = channel.id(), protocol = ?protocol, "tls negotiation succeeded");
                if let Some(callbacks) = self.options.callbacks() {
                    callbacks.on_negotiation_result(&channel, Ok(()));
                }
            }
            Err((error, detail)) => self.fail(&channel, error, &detail),
        }
    }

    async fn handshake(&self, transport: BoxedSocket) -> Result<SslStream<BoxedSocket>, HandshakeFailure> {
        let ctx = self.options.ctx();
        let negotiation_failed = |e: &dyn std::fmt::Display| (NetError::TlsNegotiationFailure, e.to_string());

        match self.role {
            TlsRole::Client => {
                let connector = ctx
                    .connector()
                    .ok_or((NetError::TlsCtxError, "client handshake on server context".to_string()))?;
                let mut config = connector
                    .configure()
                    .map_err(|e| (NetError::TlsCtxError, e.to_string()))?;

                let host = self.options.server_name().unwrap_or_default();
                if host.is_empty() || parse_ip_literal(host).is_some() {
                    config.set_use_server_name_indication(false);
                }
                config.set_verify_hostname(ctx.options().verify_peer && !host.is_empty());
                if let Some(protocols) = self.options.alpn_list() {
                    let wire = encode_alpn_protocols(protocols)
                        .map_err(|e| (e, "invalid alpn list".to_string()))?;
                    config
                        .set_alpn_protos(&wire)
                        .map_err(|e| (NetError::TlsCtxError, e.to_string()))?;
                }

                tokio_boring::connect(config, host, transport)
                    .await
                    .map_err(|e| negotiation_failed(&e))
            }
            // ALPN for accepted connections comes from the server context.
            TlsRole::Server => {
                let acceptor = ctx
                    .acceptor()
                    .ok_or((NetError::TlsCtxError, "server handshake on client context".to_string()))?;
                tokio_boring::accept(acceptor, transport)
                    .await
                    .map_err(|e| negotiation_failed(&e))
            }
        }
    }

    fn install(&self, channel: &Channel, stream: SslStream<BoxedSocket>) -> Result<Option<String>, HandshakeFailure> {
        let protocol = stream
            .ssl()
            .selected_alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned());

        channel
            .set_transport(BoxedSocket::new(stream))
            .map_err(|e| (e, "channel closed after handshake".to_string()))?;

        if self.options.advertise_alpn_message() {
            if let Some(protocol) = &protocol {
                channel
                    .notify_protocol_negotiated(self.slot_id, protocol)
                    .map_err(|e| (e, format!("protocol {protocol} rejected")))?;
            }
        }

        channel
            .start_io()
            .map_err(|e| (e, "failed to start channel io".to_string()))?;
        Ok(protocol)
    }

    fn fail(&self, channel: &Channel, error: NetError, detail: &str) {
        tracing::warn!(channel = channel.id(), role = ?self.role, error = %error, detail, "tls negotiation failed");
        if let Some(callbacks) = self.options.callbacks() {
            callbacks.on_error(channel, error, detail);
            callbacks.on_negotiation_result(channel, Err(error));
        }
        channel.shutdown(Err(error));
    }
}
