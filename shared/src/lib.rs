use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod presence;

pub use presence::PresenceTable;

pub const PROTOCOL_VERSION: u32 = 1;
pub const LOBBY_CHANNEL: &str = "lobby";
pub const SESSION_CHANNEL_PREFIX: &str = "match:";
pub const MAX_PACKET_SIZE: usize = 8192;

/// Lobby status of a tracked player
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Idle,
    Matched,
}

/// Presence record published by a subscriber on a channel.
///
/// The coordination core only reads `id`, `joined_at` and `status`; everything
/// in `meta` (avatar, stats, ...) is passed through untouched.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub id: String,
    pub display_name: String,
    pub joined_at: u64,
    pub status: PresenceStatus,
    pub meta: BTreeMap<String, String>,
}

impl PresenceRecord {
    pub fn new(id: &str, display_name: &str, joined_at: u64) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            joined_at,
            status: PresenceStatus::Idle,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: &str) -> Self {
        self.meta.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_idle(&self) -> bool {
        self.status == PresenceStatus::Idle
    }
}

/// Relay wire protocol. The first group is sent by clients, the second by the relay.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Subscribe {
        channel: String,
    },
    Track {
        channel: String,
        record: PresenceRecord,
    },
    Publish {
        channel: String,
        event_type: String,
        payload: Vec<u8>,
    },
    Unsubscribe {
        channel: String,
    },
    Heartbeat,
    Disconnect,

    Connected {
        client_id: u32,
    },
    Subscribed {
        channel: String,
    },
    PresenceSync {
        channel: String,
        members: Vec<PresenceRecord>,
    },
    Broadcast {
        channel: String,
        event_type: String,
        payload: Vec<u8>,
    },
    Disconnected {
        reason: String,
    },
}

/// Channel name shared by every participant of a pairing.
///
/// Built from the sorted ids so both peers derive the same name without a
/// rendezvous: `session_id(a, b) == session_id(b, a)`. `%` and `:` inside an
/// id are percent-escaped, so distinct pairs never share a channel.
pub fn session_id(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!(
        "{}{}:{}",
        SESSION_CHANNEL_PREFIX,
        escape_id(lo),
        escape_id(hi)
    )
}

fn escape_id(id: &str) -> String {
    id.replace('%', "%25").replace(':', "%3A")
}

// Get current timestamp in milliseconds
pub fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    (millis.min(u64::MAX as u128)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_is_order_independent() {
        assert_eq!(session_id("alice", "bob"), session_id("bob", "alice"));
        assert_eq!(session_id("alice", "bob"), "match:alice:bob");
    }

    #[test]
    fn test_session_id_distinguishes_pairs() {
        assert_ne!(session_id("a", "b"), session_id("a", "c"));
        assert!(session_id("x", "y").starts_with(SESSION_CHANNEL_PREFIX));
    }

    #[test]
    fn test_session_id_escapes_separator_in_ids() {
        assert_ne!(session_id("a:b", "c"), session_id("a", "b:c"));
        assert_eq!(session_id("a:b", "c"), "match:a%3Ab:c");
        assert_ne!(session_id("a%3Ab", "c"), session_id("a:b", "c"));
    }

    #[test]
    fn test_presence_record_defaults_to_idle() {
        let record = PresenceRecord::new("p1", "Pat", 100).with_meta("avatar", "owl");
        assert!(record.is_idle());
        assert_eq!(record.meta.get("avatar").map(String::as_str), Some("owl"));
    }

    #[test]
    fn test_packet_serialization_presence_sync() {
        let packet = Packet::PresenceSync {
            channel: LOBBY_CHANNEL.to_string(),
            members: vec![
                PresenceRecord::new("p1", "Pat", 100),
                PresenceRecord::new("p2", "Sam", 200),
            ],
        };

        let serialized = bincode::serialize(&packet).unwrap();
        assert!(serialized.len() < MAX_PACKET_SIZE);
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();

        match deserialized {
            Packet::PresenceSync { channel, members } => {
                assert_eq!(channel, LOBBY_CHANNEL);
                assert_eq!(members.len(), 2);
                assert_eq!(members[1].joined_at, 200);
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_publish_keeps_payload_bytes() {
        let payload = vec![0u8, 7, 255, 42];
        let packet = Packet::Publish {
            channel: session_id("a", "b"),
            event_type: "START".to_string(),
            payload: payload.clone(),
        };

        let serialized = bincode::serialize(&packet).unwrap();
        let deserialized: Packet = bincode::deserialize(&serialized).unwrap();
        assert_eq!(
            deserialized,
            Packet::Publish {
                channel: session_id("a", "b"),
                event_type: "START".to_string(),
                payload,
            }
        );
    }

    #[test]
    fn test_timestamp_is_monotonic_enough() {
        let t1 = now_millis();
        std::thread::sleep(Duration::from_millis(2));
        assert!(now_millis() > t1);
    }
}
