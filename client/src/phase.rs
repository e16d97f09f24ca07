//! Generic round/phase driver shared by every game mode
//!
//! `Waiting -> Active(round) -> Advancing -> Active(next) | Terminal`
//!
//! A round ends once every required player is marked done, either by acting or
//! by the local countdown running out (a miss). Each peer runs its own machine
//! and advances on its own as done-markers arrive; nothing arbitrates lockstep.
//! A lost event leaves the two copies diverged and later events are applied on
//! top of whatever state each side has.

use crate::error::ActionError;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;

pub type PlayerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Active { round: u32 },
    Advancing { round: u32 },
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseState {
    pub phase: Phase,
    pub round_index: u32,
    pub per_player_done: BTreeMap<PlayerId, bool>,
    /// Seconds left on the local countdown
    pub deadline: u32,
}

impl PhaseState {
    fn waiting() -> Self {
        Self {
            phase: Phase::Waiting,
            round_index: 0,
            per_player_done: BTreeMap::new(),
            deadline: 0,
        }
    }

    pub fn is_done(&self, player: &str) -> bool {
        self.per_player_done.get(player).copied().unwrap_or(true)
    }

    fn all_done(&self) -> bool {
        self.per_player_done.values().all(|done| *done)
    }
}

/// Normalized per-player standing at the end of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    pub won: bool,
    pub score: u32,
}

/// Round semantics of one game mode, plugged into [`PhaseMachine`]
pub trait RoundAdapter {
    /// Raw local input
    type Action;
    /// What actually goes over the wire: the computed result of an action
    type Effect: Clone + Debug + Serialize + DeserializeOwned;

    fn round_secs(&self, round: u32) -> u32;

    /// Players that must be done before `round` can end
    fn required_players(&self, _round: u32, participants: &[PlayerId]) -> Vec<PlayerId> {
        participants.to_vec()
    }

    fn on_round_start(&mut self, _round: u32) {}

    /// Validates a local action and computes its effect without applying it
    fn on_player_action(
        &mut self,
        player: &str,
        round: u32,
        action: Self::Action,
        remaining_secs: u32,
    ) -> Result<Self::Effect, ActionError>;

    /// Applies an effect, local or received
    fn apply_effect(&mut self, player: &str, round: u32, effect: &Self::Effect);

    fn on_timeout(&mut self, player: &str, round: u32);

    fn is_terminal(&self, rounds_completed: u32) -> bool;

    fn outcome(&self, local_id: &str) -> MatchOutcome;
}

/// What a call into the machine did to the phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Stay,
    NextRound(u32),
    Terminal,
}

#[derive(Debug, Clone)]
pub struct LocalAction<E> {
    pub round: u32,
    pub effect: E,
    pub advance: Advance,
}

pub struct PhaseMachine<A: RoundAdapter> {
    adapter: A,
    participants: Vec<PlayerId>,
    local_id: PlayerId,
    state: PhaseState,
    /// Effects for rounds this peer has not reached yet
    pending: Vec<(PlayerId, u32, A::Effect)>,
}

impl<A: RoundAdapter> PhaseMachine<A> {
    pub fn new(adapter: A, participants: Vec<PlayerId>, local_id: &str) -> Self {
        Self {
            adapter,
            participants,
            local_id: local_id.to_string(),
            state: PhaseState::waiting(),
            pending: Vec::new(),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn state(&self) -> &PhaseState {
        &self.state
    }

    pub fn participants(&self) -> &[PlayerId] {
        &self.participants
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn is_terminal(&self) -> bool {
        self.state.phase == Phase::Terminal
    }

    pub fn current_round(&self) -> Option<u32> {
        match self.state.phase {
            Phase::Active { round } => Some(round),
            _ => None,
        }
    }

    /// True while the local player still owes an action this round
    pub fn awaiting_local(&self) -> bool {
        self.current_round().is_some() && !self.state.is_done(&self.local_id)
    }

    pub fn outcome(&self) -> MatchOutcome {
        self.adapter.outcome(&self.local_id)
    }

    pub fn start(&mut self) -> Advance {
        if self.state.phase != Phase::Waiting {
            return Advance::Stay;
        }
        info!("Match started with {} participants", self.participants.len());
        self.begin_round(0)
    }

    pub fn local_action(&mut self, action: A::Action) -> Result<LocalAction<A::Effect>, ActionError> {
        let round = self.current_round().ok_or(ActionError::NotActive)?;
        match self.state.per_player_done.get(&self.local_id) {
            None => return Err(ActionError::NotYourTurn),
            Some(true) => return Err(ActionError::AlreadyDone),
            Some(false) => {}
        }

        let local_id = self.local_id.clone();
        let effect =
            self.adapter
                .on_player_action(&local_id, round, action, self.state.deadline)?;
        self.adapter.apply_effect(&local_id, round, &effect);
        self.mark_done(&local_id);

        let advance = self.try_advance();
        Ok(LocalAction {
            round,
            effect,
            advance,
        })
    }

    /// Applies an effect received from a peer
    pub fn remote_effect(&mut self, sender: &str, round: u32, effect: A::Effect) -> Advance {
        match self.state.phase {
            Phase::Terminal => {
                debug!("Dropping effect from {} after match end", sender);
                Advance::Stay
            }
            Phase::Waiting => {
                self.pending.push((sender.to_string(), round, effect));
                Advance::Stay
            }
            Phase::Active { round: current } | Phase::Advancing { round: current } => {
                if round > current {
                    self.pending.push((sender.to_string(), round, effect));
                    return Advance::Stay;
                }
                if round < current {
                    debug!(
                        "Dropping stale effect from {} for round {} (now {})",
                        sender, round, current
                    );
                    return Advance::Stay;
                }
                if self.state.is_done(sender) {
                    debug!("{} already done in round {}", sender, round);
                    return Advance::Stay;
                }

                self.adapter.apply_effect(sender, round, &effect);
                self.mark_done(sender);
                self.try_advance()
            }
        }
    }

    /// One countdown step. At zero every player still owing an action misses.
    pub fn tick(&mut self) -> Advance {
        let Phase::Active { round } = self.state.phase else {
            return Advance::Stay;
        };

        self.state.deadline = self.state.deadline.saturating_sub(1);
        if self.state.deadline > 0 {
            return Advance::Stay;
        }

        let missing: Vec<PlayerId> = self
            .state
            .per_player_done
            .iter()
            .filter(|(_, done)| !**done)
            .map(|(id, _)| id.clone())
            .collect();
        for player in missing {
            debug!("{} missed round {}", player, round);
            self.adapter.on_timeout(&player, round);
            self.mark_done(&player);
        }
        self.try_advance()
    }

    fn mark_done(&mut self, player: &str) {
        if let Some(done) = self.state.per_player_done.get_mut(player) {
            *done = true;
        }
    }

    fn begin_round(&mut self, round: u32) -> Advance {
        let required = self.adapter.required_players(round, &self.participants);
        self.state.phase = Phase::Active { round };
        self.state.round_index = round;
        self.state.per_player_done = required.into_iter().map(|id| (id, false)).collect();
        self.state.deadline = self.adapter.round_secs(round);
        self.adapter.on_round_start(round);
        debug!("Round {} started ({}s)", round, self.state.deadline);

        let (ready, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(_, r, _)| *r == round);
        self.pending = later;

        let mut advance = Advance::NextRound(round);
        for (sender, r, effect) in ready {
            match self.remote_effect(&sender, r, effect) {
                Advance::Stay => {}
                other => advance = other,
            }
        }
        advance
    }

    fn try_advance(&mut self) -> Advance {
        let Phase::Active { round } = self.state.phase else {
            return Advance::Stay;
        };
        if !self.state.all_done() {
            return Advance::Stay;
        }

        self.state.phase = Phase::Advancing { round };
        if self.adapter.is_terminal(round + 1) {
            info!("Match reached its end after round {}", round);
            self.state.phase = Phase::Terminal;
            self.pending.clear();
            return Advance::Terminal;
        }
        self.begin_round(round + 1)
    }
}
