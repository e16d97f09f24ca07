//! In-process loopback transport
//!
//! Every endpoint connected to the same [`MemoryHub`] shares one presence table.
//! Delivery is synchronous into each endpoint's queue, which keeps tests
//! deterministic: drain with `try_recv` after each step.

use super::{ConnectionStatus, Transport, TransportEvent};
use crate::error::TransportError;
use log::debug;
use shared::{PresenceRecord, PresenceTable};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Default)]
struct HubState {
    table: PresenceTable,
    endpoints: HashMap<u32, mpsc::UnboundedSender<TransportEvent>>,
    next_endpoint_id: u32,
}

impl HubState {
    fn deliver(&self, endpoint: u32, event: TransportEvent) {
        if let Some(tx) = self.endpoints.get(&endpoint) {
            // Receiver dropped means the endpoint stopped listening
            let _ = tx.send(event);
        }
    }

    fn sync_presence(&self, channel: &str) {
        let members = self.table.snapshot(channel);
        for endpoint in self.table.subscribers(channel) {
            self.deliver(
                endpoint,
                TransportEvent::PresenceSync {
                    channel: channel.to_string(),
                    members: members.clone(),
                },
            );
        }
    }
}

/// Shared broker state for a set of loopback endpoints
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn connect(&self) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.next_endpoint_id += 1;
        let endpoint = state.next_endpoint_id;

        let _ = tx.send(TransportEvent::Status(ConnectionStatus::Connected));
        state.endpoints.insert(endpoint, tx);

        let transport = MemoryTransport {
            hub: self.clone(),
            endpoint,
        };
        (transport, rx)
    }

    /// Removes an endpoint without any goodbye, as if its process died.
    ///
    /// Remaining subscribers only learn about it from the presence snapshot.
    pub fn drop_endpoint(&self, endpoint: u32) {
        let mut state = self.lock();
        state.endpoints.remove(&endpoint);
        for channel in state.table.remove_member(endpoint) {
            state.sync_presence(&channel);
        }
        debug!("Loopback endpoint {} dropped", endpoint);
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock().table.subscribers(channel).len()
    }
}

pub struct MemoryTransport {
    hub: MemoryHub,
    endpoint: u32,
}

impl MemoryTransport {
    pub fn endpoint(&self) -> u32 {
        self.endpoint
    }

    fn live_state(&self) -> Result<MutexGuard<'_, HubState>, TransportError> {
        let state = self.hub.lock();
        if !state.endpoints.contains_key(&self.endpoint) {
            return Err(TransportError::Closed);
        }
        Ok(state)
    }
}

impl Transport for MemoryTransport {
    fn subscribe(&mut self, channel: &str) -> Result<(), TransportError> {
        let mut state = self.live_state()?;
        state.table.subscribe(channel, self.endpoint);

        let members = state.table.snapshot(channel);
        state.deliver(
            self.endpoint,
            TransportEvent::PresenceSync {
                channel: channel.to_string(),
                members,
            },
        );
        Ok(())
    }

    fn track(&mut self, channel: &str, record: PresenceRecord) -> Result<(), TransportError> {
        let mut state = self.live_state()?;
        if !state.table.track(channel, self.endpoint, record) {
            return Err(TransportError::NotSubscribed(channel.to_string()));
        }
        state.sync_presence(channel);
        Ok(())
    }

    fn send(
        &mut self,
        channel: &str,
        event_type: &str,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let state = self.live_state()?;
        if !state.table.is_subscribed(channel, self.endpoint) {
            return Err(TransportError::NotSubscribed(channel.to_string()));
        }

        for endpoint in state.table.subscribers(channel) {
            if endpoint == self.endpoint {
                continue;
            }
            state.deliver(
                endpoint,
                TransportEvent::Broadcast {
                    channel: channel.to_string(),
                    event_type: event_type.to_string(),
                    payload: payload.clone(),
                },
            );
        }
        Ok(())
    }

    fn unsubscribe(&mut self, channel: &str) -> Result<(), TransportError> {
        let mut state = self.live_state()?;
        if state.table.unsubscribe(channel, self.endpoint) {
            state.sync_presence(channel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn last_presence(events: &[TransportEvent], channel: &str) -> Option<Vec<PresenceRecord>> {
        events.iter().rev().find_map(|event| match event {
            TransportEvent::PresenceSync {
                channel: c,
                members,
            } if c == channel => Some(members.clone()),
            _ => None,
        })
    }

    #[test]
    fn test_presence_sync_reaches_all_subscribers() {
        let hub = MemoryHub::new();
        let (mut a, mut rx_a) = hub.connect();
        let (mut b, mut rx_b) = hub.connect();

        a.subscribe("lobby").unwrap();
        a.track("lobby", PresenceRecord::new("a", "A", 1)).unwrap();
        b.subscribe("lobby").unwrap();
        b.track("lobby", PresenceRecord::new("b", "B", 2)).unwrap();

        let seen_by_a = last_presence(&drain(&mut rx_a), "lobby").unwrap();
        let seen_by_b = last_presence(&drain(&mut rx_b), "lobby").unwrap();
        assert_eq!(seen_by_a, seen_by_b);
        assert_eq!(seen_by_a.len(), 2);
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let hub = MemoryHub::new();
        let (mut a, mut rx_a) = hub.connect();
        let (mut b, mut rx_b) = hub.connect();
        a.subscribe("room").unwrap();
        b.subscribe("room").unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        a.send("room", "PING", vec![1, 2, 3]).unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![TransportEvent::Broadcast {
                channel: "room".to_string(),
                event_type: "PING".to_string(),
                payload: vec![1, 2, 3],
            }]
        );
    }

    #[test]
    fn test_send_requires_subscription() {
        let hub = MemoryHub::new();
        let (mut a, _rx) = hub.connect();
        assert!(matches!(
            a.send("room", "PING", vec![]),
            Err(TransportError::NotSubscribed(_))
        ));
    }

    #[test]
    fn test_dropped_endpoint_leaves_presence() {
        let hub = MemoryHub::new();
        let (mut a, mut rx_a) = hub.connect();
        let (mut b, _rx_b) = hub.connect();
        a.subscribe("room").unwrap();
        a.track("room", PresenceRecord::new("a", "A", 1)).unwrap();
        b.subscribe("room").unwrap();
        b.track("room", PresenceRecord::new("b", "B", 2)).unwrap();
        drain(&mut rx_a);

        hub.drop_endpoint(b.endpoint());

        let members = last_presence(&drain(&mut rx_a), "room").unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "a");
        assert!(matches!(b.subscribe("room"), Err(TransportError::Closed)));
    }
}
