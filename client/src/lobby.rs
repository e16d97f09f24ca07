//! Presence lobby: who is waiting for a match, and since when

use crate::error::{ProtocolError, TransportError};
use crate::matchmaker::{join_order, MatchOffer, MATCH_OFFER};
use crate::transport::Transport;
use log::{debug, info};
use shared::{PresenceRecord, PresenceStatus, LOBBY_CHANNEL};
use std::collections::HashMap;

pub struct Lobby {
    record: PresenceRecord,
    joined: bool,
    members: HashMap<String, PresenceRecord>,
}

impl Lobby {
    pub fn new(record: PresenceRecord) -> Self {
        Self {
            record,
            joined: false,
            members: HashMap::new(),
        }
    }

    pub fn local(&self) -> &PresenceRecord {
        &self.record
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn join<T: Transport>(&mut self, transport: &mut T) -> Result<(), TransportError> {
        transport.subscribe(LOBBY_CHANNEL)?;
        transport.track(LOBBY_CHANNEL, self.record.clone())?;
        self.joined = true;
        info!("{} joined the lobby", self.record.id);
        Ok(())
    }

    pub fn leave<T: Transport>(&mut self, transport: &mut T) -> Result<(), TransportError> {
        if !self.joined {
            return Ok(());
        }
        self.joined = false;
        self.members.clear();
        transport.unsubscribe(LOBBY_CHANNEL)
    }

    /// Idle players in join order, from a full presence snapshot.
    ///
    /// A player present more than once (two tabs) keeps the earliest record.
    pub fn on_presence_sync(&mut self, members: &[PresenceRecord]) -> Vec<PresenceRecord> {
        self.members.clear();
        for member in members {
            let keep_existing = self
                .members
                .get(&member.id)
                .is_some_and(|existing| existing.joined_at <= member.joined_at);
            if !keep_existing {
                self.members.insert(member.id.clone(), member.clone());
            }
        }

        let mut idle: Vec<PresenceRecord> = self
            .members
            .values()
            .filter(|p| p.status == PresenceStatus::Idle)
            .cloned()
            .collect();
        idle.sort_by(join_order);
        debug!("Lobby sync: {} present, {} idle", self.members.len(), idle.len());
        idle
    }

    /// Last known record for a lobby member
    pub fn member(&self, id: &str) -> Option<&PresenceRecord> {
        self.members.get(id)
    }

    /// Flips the local status so the next evaluation on every peer skips us
    pub fn mark_matched<T: Transport>(&mut self, transport: &mut T) -> Result<(), TransportError> {
        self.record.status = PresenceStatus::Matched;
        if self.joined {
            transport.track(LOBBY_CHANNEL, self.record.clone())?;
        }
        Ok(())
    }

    pub fn send_offer<T: Transport>(
        &self,
        transport: &mut T,
        offer: &MatchOffer,
    ) -> Result<(), TransportError> {
        let payload = bincode::serialize(offer)?;
        transport.send(LOBBY_CHANNEL, MATCH_OFFER, payload)
    }

    pub fn decode_offer(event_type: &str, payload: &[u8]) -> Result<MatchOffer, ProtocolError> {
        if event_type != MATCH_OFFER {
            return Err(ProtocolError::UnknownEvent(event_type.to_string()));
        }
        bincode::deserialize(payload).map_err(|source| ProtocolError::Decode {
            event_type: event_type.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryHub, TransportEvent};
    use shared::session_id;

    #[test]
    fn test_sync_returns_idle_in_join_order() {
        let mut lobby = Lobby::new(PresenceRecord::new("me", "Me", 150));
        let mut busy = PresenceRecord::new("busy", "Busy", 50);
        busy.status = PresenceStatus::Matched;

        let idle = lobby.on_presence_sync(&[
            PresenceRecord::new("late", "Late", 300),
            busy,
            PresenceRecord::new("me", "Me", 150),
            PresenceRecord::new("early", "Early", 100),
        ]);

        let ids: Vec<&str> = idle.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "me", "late"]);
        assert!(lobby.member("busy").is_some());
    }

    #[test]
    fn test_duplicate_presence_keeps_earliest() {
        let mut lobby = Lobby::new(PresenceRecord::new("me", "Me", 1));
        let idle = lobby.on_presence_sync(&[
            PresenceRecord::new("twin", "Twin", 90),
            PresenceRecord::new("twin", "Twin", 40),
        ]);
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].joined_at, 40);
    }

    #[test]
    fn test_join_tracks_and_mark_matched_retracks() {
        let hub = MemoryHub::new();
        let (mut transport, mut events) = hub.connect();
        let mut lobby = Lobby::new(PresenceRecord::new("me", "Me", 1));

        lobby.join(&mut transport).unwrap();
        lobby.mark_matched(&mut transport).unwrap();

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            if let TransportEvent::PresenceSync { members, .. } = event {
                last = Some(members);
            }
        }
        let members = last.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].status, PresenceStatus::Matched);

        lobby.leave(&mut transport).unwrap();
        assert!(!lobby.is_joined());
        assert_eq!(hub.subscriber_count(LOBBY_CHANNEL), 0);
    }

    #[test]
    fn test_offer_payload_decodes() {
        let offer = MatchOffer {
            initiator_id: "a".to_string(),
            target_id: "b".to_string(),
            session_id: session_id("a", "b"),
        };
        let payload = bincode::serialize(&offer).unwrap();
        assert_eq!(Lobby::decode_offer(MATCH_OFFER, &payload).unwrap(), offer);
        assert!(Lobby::decode_offer("START", &payload).is_err());
        assert!(Lobby::decode_offer(MATCH_OFFER, &[1]).is_err());
    }
}
