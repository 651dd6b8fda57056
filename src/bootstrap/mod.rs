//! Client and server bootstraps.
//!
//! A bootstrap turns "connect to host:port" or "listen on endpoint" into
//! ready-to-use channels:
//!
//! ```text
//! client: resolve ─► race every address ─► channel ─► [TLS ─► ALPN] ─► on_setup
//! server: accept ─► assign loop ─► channel ─► [TLS ─► ALPN] ─► on_incoming
//! ```
//!
//! - [`client`]: [`ClientBootstrap`]
//! - [`connectjob`]: one client connection attempt
//! - [`server`]: [`ServerBootstrap`]
//! - [`listener`]: listening sockets and per-connection accept jobs
//! - [`cleanup`]: the thread-local cleanup barrier run on release

pub mod cleanup;
pub mod client;
mod connectjob;
pub mod listener;
pub mod server;

pub use cleanup::clean_up_thread_local_state;
pub use client::ClientBootstrap;
pub use listener::{SocketListener, DEFAULT_LISTENER_BACKLOG};
pub use server::ServerBootstrap;

use crate::base::neterror::NetError;
use crate::channel::{Channel, ChannelSlot};
use crate::tls::{AlpnCallback, AlpnHandler, TlsCallbacks, TlsHandler, TlsNegotiator};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Where a connection attempt (client) or accepted connection (server) is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum JobState {
    Resolving,
    Racing,
    ChannelBuilding,
    TlsNegotiating,
    Established,
    Failed,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Resolving,
            1 => JobState::Racing,
            2 => JobState::ChannelBuilding,
            3 => JobState::TlsNegotiating,
            4 => JobState::Established,
            _ => JobState::Failed,
        }
    }
}

pub(crate) struct AtomicJobState(AtomicU8);

impl AtomicJobState {
    pub(crate) fn new(state: JobState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> JobState {
        JobState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: JobState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves `from` → `to`; false if the state was not `from`.
    pub(crate) fn transition(&self, from: JobState, to: JobState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Receives the handshake outcome of a bootstrap-built TLS channel.
pub(crate) trait NegotiationSink: Send + Sync {
    fn on_tls_negotiated(&self, channel: &Channel, result: Result<(), NetError>);
}

/// Wraps the user's TLS callbacks: forwards to them first, then lets the
/// owning job observe the negotiation result.
pub(crate) struct NegotiationObserver<J> {
    job: Arc<J>,
    user: Option<Arc<dyn TlsCallbacks>>,
}

impl<J> NegotiationObserver<J> {
    pub(crate) fn new(job: Arc<J>, user: Option<Arc<dyn TlsCallbacks>>) -> Self {
        Self { job, user }
    }
}

impl<J: NegotiationSink + 'static> TlsCallbacks for NegotiationObserver<J> {
    fn on_negotiation_result(&self, channel: &Channel, result: Result<(), NetError>) {
        if let Some(user) = &self.user {
            user.on_negotiation_result(channel, result);
        }
        self.job.on_tls_negotiated(channel, result);
    }

    fn on_data_read(&self, channel: &Channel, data: &[u8]) {
        if let Some(user) = &self.user {
            user.on_data_read(channel, data);
        }
    }

    fn on_error(&self, channel: &Channel, error: NetError, detail: &str) {
        if let Some(user) = &self.user {
            user.on_error(channel, error, detail);
        }
    }
}

/// Inserts TLS (and ALPN, when a callback is set) to the right of the
/// socket slot and returns the handshake driver.
pub(crate) fn install_tls_pipeline<F>(
    channel: &Channel,
    socket_slot: &ChannelSlot,
    new_handler: F,
    alpn_callback: Option<AlpnCallback>,
) -> Result<TlsNegotiator, NetError>
where
    F: FnOnce(&ChannelSlot) -> Result<TlsHandler, NetError>,
{
    let tls_slot = channel.slot_new()?;
    socket_slot.insert_right(&tls_slot)?;
    let tls_handler = new_handler(&tls_slot)?;
    let negotiator = tls_handler.negotiator();
    tls_slot.set_handler(Box::new(tls_handler))?;
    tracing::trace!(channel = channel.id(), slot = tls_slot.id(), "tls handler installed");

    if let Some(callback) = alpn_callback {
        let alpn_slot = channel.slot_new()?;
        tls_slot.insert_right(&alpn_slot)?;
        alpn_slot.set_handler(Box::new(AlpnHandler::new(callback)))?;
        tracing::trace!(channel = channel.id(), slot = alpn_slot.id(), "alpn handler installed");
    }
    Ok(negotiator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_transitions() {
        let state = AtomicJobState::new(JobState::Resolving);
        assert!(state.transition(JobState::Resolving, JobState::Racing));
        assert!(!state.transition(JobState::Resolving, JobState::Failed));
        assert_eq!(state.get(), JobState::Racing);

        state.set(JobState::TlsNegotiating);
        assert!(state.transition(JobState::TlsNegotiating, JobState::Established));
        assert_eq!(state.get(), JobState::Established);
    }
}
