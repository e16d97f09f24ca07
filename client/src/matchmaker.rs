//! Deterministic pairing of idle lobby players
//!
//! Every lobby member runs the same pure function over the same globally
//! synced presence snapshot, so all of them agree on the pairs and on who
//! hosts without exchanging anything. The stateful [`Matchmaker`] wraps the
//! pure function with the bookkeeping that keeps repeated presence syncs from
//! pairing a player twice.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use shared::{session_id, PresenceRecord};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

pub const MATCH_OFFER: &str = "MATCH_OFFER";

/// Sent once by the host of a pairing over the lobby channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOffer {
    pub initiator_id: String,
    pub target_id: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub host: PresenceRecord,
    pub guest: PresenceRecord,
    pub session_id: String,
}

/// What the local player should do after evaluating a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingDecision {
    Unmatched,
    Host {
        partner: PresenceRecord,
        session_id: String,
    },
    Guest {
        partner: PresenceRecord,
        session_id: String,
    },
}

/// Join order, ties broken by the lexicographically smaller id
pub fn join_order(a: &PresenceRecord, b: &PresenceRecord) -> Ordering {
    a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id))
}

/// The host of a pair whose roles are otherwise ambiguous
pub fn tie_break_host<'a>(a: &'a str, b: &'a str) -> &'a str {
    if a <= b {
        a
    } else {
        b
    }
}

/// Pairs idle players by join order: (0, 1), (2, 3), ...
///
/// The earlier joiner of each pair hosts. An odd player out stays unpaired
/// until the next snapshot.
pub fn pair_idle(snapshot: &[PresenceRecord]) -> Vec<Pairing> {
    let mut idle: Vec<&PresenceRecord> = snapshot.iter().filter(|p| p.is_idle()).collect();
    idle.sort_by(|a, b| join_order(a, b));
    let mut seen = HashSet::new();
    idle.retain(|p| seen.insert(p.id.as_str()));

    idle.chunks_exact(2)
        .map(|pair| Pairing {
            host: pair[0].clone(),
            guest: pair[1].clone(),
            session_id: session_id(&pair[0].id, &pair[1].id),
        })
        .collect()
}

pub fn decide(snapshot: &[PresenceRecord], local_id: &str) -> PairingDecision {
    for pairing in pair_idle(snapshot) {
        if pairing.host.id == local_id {
            return PairingDecision::Host {
                partner: pairing.guest,
                session_id: pairing.session_id,
            };
        }
        if pairing.guest.id == local_id {
            return PairingDecision::Guest {
                partner: pairing.host,
                session_id: pairing.session_id,
            };
        }
    }
    PairingDecision::Unmatched
}

/// Result of seeing a `MATCH_OFFER` on the lobby channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Someone else's pairing; both players are now off the table
    Observed,
    /// Matches the pairing we already derived
    Confirmed,
    /// We had not paired yet; the initiator hosts
    AcceptAsGuest { host_id: String, session_id: String },
    /// Both sides claimed to host the same session
    HostConflict { host_id: String },
    /// Targets us while we are committed elsewhere
    Rejected,
}

pub struct Matchmaker {
    local_id: String,
    /// Players taken by a pairing, keyed to the `joined_at` they were claimed
    /// under. `None` until a snapshot shows the claimed id.
    claimed: HashMap<String, Option<u64>>,
    /// `joined_at` of every candidate in the latest snapshot
    seen: HashMap<String, u64>,
    current: Option<(String, bool)>,
}

impl Matchmaker {
    pub fn new(local_id: &str) -> Self {
        Self {
            local_id: local_id.to_string(),
            claimed: HashMap::new(),
            seen: HashMap::new(),
            current: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_session(&self) -> Option<&str> {
        self.current.as_ref().map(|(session, _)| session.as_str())
    }

    /// Runs the pure pairing over the snapshot minus players already claimed.
    ///
    /// A decision to pair claims both players immediately, so replaying the
    /// same or a lagging snapshot never pairs them again. A claim lapses once
    /// its player drops out of the snapshot or comes back with a newer
    /// `joined_at`, so every member again pairs over the same candidates.
    pub fn evaluate(&mut self, snapshot: &[PresenceRecord]) -> PairingDecision {
        self.refresh_claims(snapshot);
        if self.current.is_some() {
            return PairingDecision::Unmatched;
        }

        let candidates: Vec<PresenceRecord> = snapshot
            .iter()
            .filter(|p| !self.claimed.contains_key(&p.id))
            .cloned()
            .collect();

        let decision = decide(&candidates, &self.local_id);
        match &decision {
            PairingDecision::Host {
                partner,
                session_id,
            } => {
                info!("Paired with {} as host ({})", partner.id, session_id);
                self.claim(&partner.id);
                self.current = Some((session_id.clone(), true));
            }
            PairingDecision::Guest {
                partner,
                session_id,
            } => {
                info!("Paired with {} as guest ({})", partner.id, session_id);
                self.claim(&partner.id);
                self.current = Some((session_id.clone(), false));
            }
            PairingDecision::Unmatched => {
                debug!("No pairing for {} in {} candidates", self.local_id, candidates.len());
            }
        }
        decision
    }

    pub fn observe_offer(&mut self, offer: &MatchOffer) -> OfferOutcome {
        self.claim(&offer.initiator_id);
        self.claim(&offer.target_id);

        if offer.target_id != self.local_id {
            if offer.initiator_id == self.local_id {
                return OfferOutcome::Confirmed;
            }
            return OfferOutcome::Observed;
        }

        match self.current.clone() {
            None => {
                self.current = Some((offer.session_id.clone(), false));
                OfferOutcome::AcceptAsGuest {
                    host_id: offer.initiator_id.clone(),
                    session_id: offer.session_id.clone(),
                }
            }
            Some((session, false)) if session == offer.session_id => OfferOutcome::Confirmed,
            Some((session, true)) if session == offer.session_id => {
                let host = tie_break_host(&self.local_id, &offer.initiator_id).to_string();
                let local_hosts = host == self.local_id;
                self.current = Some((session, local_hosts));
                OfferOutcome::HostConflict { host_id: host }
            }
            Some(_) => OfferOutcome::Rejected,
        }
    }

    /// Forget the current pairing so the player can re-enter matchmaking
    pub fn reset(&mut self) {
        self.current = None;
        self.claimed.clear();
        self.seen.clear();
    }

    fn claim(&mut self, id: &str) {
        let joined_at = self.seen.get(id).copied();
        self.claimed.insert(id.to_string(), joined_at);
    }

    fn refresh_claims(&mut self, snapshot: &[PresenceRecord]) {
        self.seen = snapshot
            .iter()
            .map(|p| (p.id.clone(), p.joined_at))
            .collect();

        let seen = &self.seen;
        self.claimed.retain(|id, claimed_at| match (seen.get(id), *claimed_at) {
            (None, _) => false,
            (Some(joined_at), Some(at)) => *joined_at == at,
            (Some(joined_at), None) => {
                *claimed_at = Some(*joined_at);
                true
            }
        });
        debug!("{} holds {} claims", self.local_id, self.claimed.len());
    }
}
