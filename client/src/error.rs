//! Error types for the coordination core

use thiserror::Error;

/// Failures reported by a transport adapter.
///
/// These surface to the UI as connection-status text. Nothing retries them.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("not subscribed to channel {0}")]
    NotSubscribed(String),
    #[error("failed to encode packet: {0}")]
    Encode(#[from] bincode::Error),
    #[error("invalid relay address {0}")]
    InvalidAddress(String),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed or out-of-place session traffic
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to decode {event_type} payload: {source}")]
    Decode {
        event_type: String,
        source: bincode::Error,
    },
    #[error("unknown event type {0}")]
    UnknownEvent(String),
}

/// Why a local action was refused by the phase machine or an adapter
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("no round is active")]
    NotActive,
    #[error("player already finished this round")]
    AlreadyDone,
    #[error("player is not expected to act this round")]
    NotYourTurn,
    #[error("illegal action: {0}")]
    Illegal(String),
}

/// Anything that can go wrong while the coordinator drives a match
#[derive(Debug, Error)]
pub enum MatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Action(#[from] ActionError),
}
