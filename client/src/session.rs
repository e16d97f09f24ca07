//! Private per-match channel and the session event envelope
//!
//! All session traffic is fire-and-forget. Ordering only holds between events
//! from the same sender; two senders may be observed interleaved differently by
//! each recipient.

use crate::error::{ProtocolError, TransportError};
use crate::transport::Transport;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::PresenceRecord;
use std::collections::BTreeSet;

pub const START: &str = "START";
pub const ACTION: &str = "ACTION";
pub const RESULT: &str = "RESULT";
pub const LEAVE: &str = "LEAVE";

/// Session envelope, generic over the shared content and the action effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent<C, E> {
    Start { sender_id: String, content: C },
    Action { sender_id: String, round: u32, effect: E },
    Result { sender_id: String, won: bool, score: u32 },
    Leave { sender_id: String },
}

impl<C, E> SessionEvent<C, E>
where
    C: Serialize + DeserializeOwned,
    E: Serialize + DeserializeOwned,
{
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::Start { .. } => START,
            SessionEvent::Action { .. } => ACTION,
            SessionEvent::Result { .. } => RESULT,
            SessionEvent::Leave { .. } => LEAVE,
        }
    }

    pub fn sender_id(&self) -> &str {
        match self {
            SessionEvent::Start { sender_id, .. }
            | SessionEvent::Action { sender_id, .. }
            | SessionEvent::Result { sender_id, .. }
            | SessionEvent::Leave { sender_id } => sender_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decodes a payload, checking it against the transport's event tag
    pub fn decode(event_type: &str, payload: &[u8]) -> Result<Self, ProtocolError> {
        if ![START, ACTION, RESULT, LEAVE].contains(&event_type) {
            return Err(ProtocolError::UnknownEvent(event_type.to_string()));
        }
        let event: Self =
            bincode::deserialize(payload).map_err(|source| ProtocolError::Decode {
                event_type: event_type.to_string(),
                source,
            })?;
        if event.event_type() != event_type {
            return Err(ProtocolError::UnknownEvent(event_type.to_string()));
        }
        Ok(event)
    }
}

/// Participants and roles of one match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub participant_ids: Vec<String>,
    pub host_id: String,
}

impl Session {
    pub fn new(session_id: &str, participant_ids: Vec<String>, host_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            participant_ids,
            host_id: host_id.to_string(),
        }
    }

    pub fn is_host(&self, id: &str) -> bool {
        self.host_id == id
    }

    pub fn opponents<'a>(&'a self, local_id: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.participant_ids.iter().filter(move |id| *id != local_id)
    }
}

/// What a presence snapshot on the session channel means for the match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    Unchanged,
    /// Every participant is visible for the first time
    AllPresent,
    PeerLeft(String),
}

pub struct SessionChannel {
    session: Session,
    local_id: String,
    open: bool,
    seen: BTreeSet<String>,
    all_present: bool,
}

impl SessionChannel {
    /// Subscribes to the session channel and tracks the local player on it
    pub fn open<T: Transport>(
        transport: &mut T,
        session: Session,
        local: &PresenceRecord,
    ) -> Result<Self, TransportError> {
        transport.subscribe(&session.session_id)?;
        transport.track(&session.session_id, local.clone())?;
        info!(
            "Opened session {} (host {})",
            session.session_id, session.host_id
        );

        Ok(Self {
            session,
            local_id: local.id.clone(),
            open: true,
            seen: BTreeSet::new(),
            all_present: false,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn carries(&self, channel: &str) -> bool {
        self.open && self.session.session_id == channel
    }

    pub fn send<T, C, E>(
        &self,
        transport: &mut T,
        event: &SessionEvent<C, E>,
    ) -> Result<(), TransportError>
    where
        T: Transport,
        C: Serialize + DeserializeOwned,
        E: Serialize + DeserializeOwned,
    {
        if !self.open {
            return Err(TransportError::NotSubscribed(self.session.session_id.clone()));
        }
        let payload = event.encode()?;
        debug!(
            "Sending {} on {} ({} bytes)",
            event.event_type(),
            self.session.session_id,
            payload.len()
        );
        transport.send(&self.session.session_id, event.event_type(), payload)
    }

    /// Interprets a presence snapshot of the session channel.
    ///
    /// A participant counts as departed only after it has been seen present.
    pub fn on_presence_sync(&mut self, members: &[PresenceRecord]) -> PresenceChange {
        if !self.open {
            return PresenceChange::Unchanged;
        }

        let present: BTreeSet<&str> = members.iter().map(|m| m.id.as_str()).collect();

        if let Some(departed) = self
            .seen
            .iter()
            .find(|id| **id != self.local_id && !present.contains(id.as_str()))
        {
            warn!("{} left session {}", departed, self.session.session_id);
            return PresenceChange::PeerLeft(departed.clone());
        }

        for id in &self.session.participant_ids {
            if present.contains(id.as_str()) {
                self.seen.insert(id.clone());
            }
        }

        let everyone_here = self
            .session
            .participant_ids
            .iter()
            .all(|id| present.contains(id.as_str()));
        if everyone_here && !self.all_present {
            self.all_present = true;
            return PresenceChange::AllPresent;
        }
        PresenceChange::Unchanged
    }

    /// Unsubscribes; the peer learns of it only through its presence feed
    pub fn close<T: Transport>(&mut self, transport: &mut T) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        info!("Closing session {}", self.session.session_id);
        transport.unsubscribe(&self.session.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryHub, TransportEvent};
    use shared::session_id;

    type TestEvent = SessionEvent<Vec<String>, u32>;

    fn session() -> Session {
        Session::new(
            &session_id("amy", "bob"),
            vec!["amy".to_string(), "bob".to_string()],
            "amy",
        )
    }

    fn record(id: &str) -> PresenceRecord {
        PresenceRecord::new(id, id, 1)
    }

    #[test]
    fn test_event_tag_must_match_payload() {
        let event: TestEvent = SessionEvent::Leave {
            sender_id: "amy".to_string(),
        };
        let payload = event.encode().unwrap();

        assert_eq!(TestEvent::decode(LEAVE, &payload).unwrap(), event);
        assert!(matches!(
            TestEvent::decode(START, &payload),
            Err(ProtocolError::UnknownEvent(_))
        ));
        assert!(matches!(
            TestEvent::decode("PING", &payload),
            Err(ProtocolError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_garbage_payload_is_decode_error() {
        assert!(matches!(
            TestEvent::decode(ACTION, &[0xff]),
            Err(ProtocolError::Decode { .. })
        ));
    }

    #[test]
    fn test_all_present_reported_once() {
        let hub = MemoryHub::new();
        let (mut transport, _events) = hub.connect();
        let mut channel = SessionChannel::open(&mut transport, session(), &record("amy")).unwrap();

        assert_eq!(
            channel.on_presence_sync(&[record("amy")]),
            PresenceChange::Unchanged
        );
        assert_eq!(
            channel.on_presence_sync(&[record("amy"), record("bob")]),
            PresenceChange::AllPresent
        );
        assert_eq!(
            channel.on_presence_sync(&[record("bob"), record("amy")]),
            PresenceChange::Unchanged
        );
    }

    #[test]
    fn test_departure_after_presence_is_peer_left() {
        let hub = MemoryHub::new();
        let (mut transport, _events) = hub.connect();
        let mut channel = SessionChannel::open(&mut transport, session(), &record("amy")).unwrap();

        channel.on_presence_sync(&[record("amy"), record("bob")]);
        assert_eq!(
            channel.on_presence_sync(&[record("amy")]),
            PresenceChange::PeerLeft("bob".to_string())
        );
    }

    #[test]
    fn test_send_after_close_fails() {
        let hub = MemoryHub::new();
        let (mut a, _rx_a) = hub.connect();
        let (mut b, mut rx_b) = hub.connect();
        let mut channel = SessionChannel::open(&mut a, session(), &record("amy")).unwrap();
        let _peer = SessionChannel::open(&mut b, session(), &record("bob")).unwrap();
        while rx_b.try_recv().is_ok() {}

        let event: TestEvent = SessionEvent::Action {
            sender_id: "amy".to_string(),
            round: 0,
            effect: 7,
        };
        channel.send(&mut a, &event).unwrap();
        match rx_b.try_recv().unwrap() {
            TransportEvent::Broadcast {
                event_type,
                payload,
                ..
            } => assert_eq!(TestEvent::decode(&event_type, &payload).unwrap(), event),
            other => panic!("Unexpected event: {:?}", other),
        }

        channel.close(&mut a).unwrap();
        assert!(!channel.is_open());
        assert!(channel.send(&mut a, &event).is_err());
    }

    #[test]
    fn test_opponents_exclude_local() {
        let s = session();
        let opponents: Vec<&String> = s.opponents("amy").collect();
        assert_eq!(opponents, vec!["bob"]);
        assert!(s.is_host("amy"));
    }
}
