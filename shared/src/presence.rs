//! Per-channel membership bookkeeping
//!
//! Both the relay server and the in-process loopback hub keep the same shape of
//! state: which members are subscribed to which channel, and the presence record
//! each member has tracked there. A member that subscribed but never tracked
//! receives broadcasts and presence snapshots but does not appear in them.

use crate::PresenceRecord;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone)]
pub struct PresenceTable {
    channels: BTreeMap<String, BTreeMap<u32, Option<PresenceRecord>>>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the member was already subscribed
    pub fn subscribe(&mut self, channel: &str, member: u32) -> bool {
        let members = self.channels.entry(channel.to_string()).or_default();
        if members.contains_key(&member) {
            return false;
        }
        members.insert(member, None);
        true
    }

    /// Replaces the member's record. Returns false if the member is not subscribed.
    pub fn track(&mut self, channel: &str, member: u32, record: PresenceRecord) -> bool {
        match self
            .channels
            .get_mut(channel)
            .and_then(|members| members.get_mut(&member))
        {
            Some(slot) => {
                *slot = Some(record);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&mut self, channel: &str, member: u32) -> bool {
        let Some(members) = self.channels.get_mut(channel) else {
            return false;
        };
        let removed = members.remove(&member).is_some();
        if members.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }

    /// Drops the member from every channel, returning the channels it left.
    pub fn remove_member(&mut self, member: u32) -> Vec<String> {
        let channels: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, members)| members.contains_key(&member))
            .map(|(name, _)| name.clone())
            .collect();

        for channel in &channels {
            self.unsubscribe(channel, member);
        }
        channels
    }

    pub fn is_subscribed(&self, channel: &str, member: u32) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|members| members.contains_key(&member))
    }

    pub fn subscribers(&self, channel: &str) -> Vec<u32> {
        self.channels
            .get(channel)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Tracked records on the channel, ordered by member key
    pub fn snapshot(&self, channel: &str) -> Vec<PresenceRecord> {
        self.channels
            .get(channel)
            .map(|members| members.values().flatten().cloned().collect())
            .unwrap_or_default()
    }
}
