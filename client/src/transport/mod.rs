//! Channel-scoped publish/subscribe with presence tracking
//!
//! The hosted pub/sub service is an external collaborator; the coordination
//! core only sees it through [`Transport`]. Operations are queued and return
//! immediately. Everything the service pushes back arrives as a
//! [`TransportEvent`] on the receiver handed out when the transport is created.

pub mod memory;
pub mod udp;

use crate::error::TransportError;
use shared::PresenceRecord;

pub use memory::{MemoryHub, MemoryTransport};
pub use udp::UdpTransport;

pub trait Transport {
    fn subscribe(&mut self, channel: &str) -> Result<(), TransportError>;

    fn track(&mut self, channel: &str, record: PresenceRecord) -> Result<(), TransportError>;

    /// Fire-and-forget broadcast to every other subscriber of the channel
    fn send(
        &mut self,
        channel: &str,
        event_type: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    fn unsubscribe(&mut self, channel: &str) -> Result<(), TransportError>;
}

/// Connection state as shown to the player
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Failed(String),
    Disconnected(String),
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "connecting..."),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Failed(reason) => write!(f, "connection failed: {}", reason),
            ConnectionStatus::Disconnected(reason) => write!(f, "disconnected: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Full membership of a channel, including the receiver itself once tracked
    PresenceSync {
        channel: String,
        members: Vec<PresenceRecord>,
    },
    Broadcast {
        channel: String,
        event_type: String,
        payload: Vec<u8>,
    },
    Status(ConnectionStatus),
}
