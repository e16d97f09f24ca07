//! Word-relay drawing game
//!
//! Every player owns one chain. Round `r` assigns each player the chain owned
//! by the participant `r` places after them in the host's shuffled order:
//! WRITE works on your own chain, DRAW on the next one, GUESS on the one after.
//! Steps alternate TEXT and IMAGE. Once GUESS ends the match is in REVIEW.

use super::GameMode;
use crate::config::RelayConfig;
use crate::error::ActionError;
use crate::host::ContentGenerator;
use crate::phase::{MatchOutcome, PlayerId, RoundAdapter};
use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    Text,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPhase {
    Write,
    Draw,
    Guess,
    Review,
}

impl RelayPhase {
    pub fn for_round(round: u32) -> Self {
        match round {
            0 => RelayPhase::Write,
            1 => RelayPhase::Draw,
            2 => RelayPhase::Guess,
            _ => RelayPhase::Review,
        }
    }

    pub fn step_kind(self) -> Option<StepKind> {
        match self {
            RelayPhase::Write | RelayPhase::Guess => Some(StepKind::Text),
            RelayPhase::Draw => Some(StepKind::Image),
            RelayPhase::Review => None,
        }
    }
}

pub const RELAY_ROUNDS: u32 = 3;

/// Host-chosen chain ownership and starting suggestions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayContent {
    pub order: Vec<PlayerId>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStep {
    pub round: u32,
    pub author: PlayerId,
    pub kind: StepKind,
    pub body: String,
    pub missed: bool,
}

/// One submitted step as broadcast to the other players
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEffect {
    pub chain_owner: PlayerId,
    pub kind: StepKind,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub owner: PlayerId,
    pub suggestion: String,
    pub steps: Vec<ChainStep>,
}

pub fn default_word_bank() -> Vec<String> {
    [
        "volcano", "lighthouse", "octopus", "library", "rainbow", "astronaut", "cactus",
        "waterfall", "dragon", "bicycle", "snowman", "pyramid", "submarine", "castle",
    ]
    .iter()
    .map(|w| w.to_string())
    .collect()
}

pub struct ChainAssigner {
    words: Vec<String>,
}

impl ChainAssigner {
    pub fn new(words: Vec<String>) -> Self {
        Self { words }
    }
}

impl ContentGenerator for ChainAssigner {
    type Content = RelayContent;

    fn generate<R: Rng + ?Sized>(&self, participants: &[String], rng: &mut R) -> RelayContent {
        let mut order = participants.to_vec();
        order.shuffle(rng);
        let suggestions = self
            .words
            .choose_multiple(rng, order.len())
            .cloned()
            .collect();
        RelayContent { order, suggestions }
    }
}

pub struct RelayAdapter {
    config: RelayConfig,
    chains: Vec<Chain>,
}

impl RelayAdapter {
    pub fn new(config: RelayConfig, content: &RelayContent) -> Self {
        let chains = content
            .order
            .iter()
            .enumerate()
            .map(|(i, owner)| Chain {
                owner: owner.clone(),
                suggestion: content.suggestions.get(i).cloned().unwrap_or_default(),
                steps: Vec::new(),
            })
            .collect();
        Self { config, chains }
    }

    fn seat(&self, player: &str) -> Option<usize> {
        self.chains.iter().position(|c| c.owner == player)
    }

    /// Index of the chain `player` works on in `round`
    pub fn target_chain(&self, player: &str, round: u32) -> Option<usize> {
        let seat = self.seat(player)?;
        Some((seat + round as usize) % self.chains.len())
    }

    /// What the player sees when the round opens: the previous step of their
    /// target chain, or the starting suggestion during WRITE
    pub fn prompt_for(&self, player: &str, round: u32) -> Option<&str> {
        let chain = &self.chains[self.target_chain(player, round)?];
        if round == 0 {
            return Some(chain.suggestion.as_str());
        }
        chain
            .steps
            .iter()
            .find(|s| s.round + 1 == round)
            .map(|s| s.body.as_str())
    }

    /// All chains, steps in origination order
    pub fn review(&self) -> Vec<Chain> {
        let mut chains = self.chains.clone();
        for chain in &mut chains {
            chain.steps.sort_by_key(|s| s.round);
        }
        chains
    }

    fn push_step(&mut self, chain: usize, step: ChainStep) {
        let chain = &mut self.chains[chain];
        if chain.steps.iter().any(|s| s.round == step.round) {
            warn!("Chain of {} already has a step for round {}", chain.owner, step.round);
            return;
        }
        chain.steps.push(step);
    }
}

impl RoundAdapter for RelayAdapter {
    type Action = String;
    type Effect = RelayEffect;

    fn round_secs(&self, round: u32) -> u32 {
        match RelayPhase::for_round(round) {
            RelayPhase::Write => self.config.write_secs,
            RelayPhase::Draw => self.config.draw_secs,
            RelayPhase::Guess => self.config.guess_secs,
            RelayPhase::Review => 0,
        }
    }

    fn on_player_action(
        &mut self,
        player: &str,
        round: u32,
        body: String,
        _remaining_secs: u32,
    ) -> Result<RelayEffect, ActionError> {
        let kind = RelayPhase::for_round(round)
            .step_kind()
            .ok_or(ActionError::NotActive)?;
        let chain = self
            .target_chain(player, round)
            .ok_or_else(|| ActionError::Illegal(format!("{} owns no chain", player)))?;
        if body.trim().is_empty() {
            return Err(ActionError::Illegal("empty submission".to_string()));
        }

        Ok(RelayEffect {
            chain_owner: self.chains[chain].owner.clone(),
            kind,
            body,
        })
    }

    fn apply_effect(&mut self, player: &str, round: u32, effect: &RelayEffect) {
        let Some(chain) = self.seat(&effect.chain_owner) else {
            warn!("Step for unknown chain owner {}", effect.chain_owner);
            return;
        };
        if self.target_chain(player, round) != Some(chain) {
            warn!(
                "{} submitted to the chain of {} out of rotation",
                player, effect.chain_owner
            );
        }
        self.push_step(
            chain,
            ChainStep {
                round,
                author: player.to_string(),
                kind: effect.kind,
                body: effect.body.clone(),
                missed: false,
            },
        );
    }

    fn on_timeout(&mut self, player: &str, round: u32) {
        let (Some(chain), Some(kind)) = (
            self.target_chain(player, round),
            RelayPhase::for_round(round).step_kind(),
        ) else {
            return;
        };
        debug!("{} missed {:?}", player, RelayPhase::for_round(round));
        self.push_step(
            chain,
            ChainStep {
                round,
                author: player.to_string(),
                kind,
                body: String::new(),
                missed: true,
            },
        );
    }

    fn is_terminal(&self, rounds_completed: u32) -> bool {
        RelayPhase::for_round(rounds_completed) == RelayPhase::Review
    }

    fn outcome(&self, local_id: &str) -> MatchOutcome {
        let own_steps: Vec<&ChainStep> = self
            .chains
            .iter()
            .flat_map(|c| c.steps.iter())
            .filter(|s| s.author == local_id)
            .collect();
        let submitted = own_steps.iter().filter(|s| !s.missed).count() as u32;
        MatchOutcome {
            won: submitted == own_steps.len() as u32 && submitted > 0,
            score: submitted * self.config.points_per_step,
        }
    }
}

pub struct RelayMode {
    pub config: RelayConfig,
    pub words: Vec<String>,
}

impl RelayMode {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            words: default_word_bank(),
        }
    }
}

impl GameMode for RelayMode {
    type Generator = ChainAssigner;
    type Content = RelayContent;
    type Adapter = RelayAdapter;

    fn name(&self) -> &'static str {
        "relay"
    }

    fn generator(&self) -> ChainAssigner {
        ChainAssigner::new(self.words.clone())
    }

    fn build_adapter(
        &self,
        content: &RelayContent,
        _participants: &[PlayerId],
        _local_id: &str,
    ) -> RelayAdapter {
        RelayAdapter::new(self.config.clone(), content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{Advance, PhaseMachine};

    fn content(order: &[&str]) -> RelayContent {
        RelayContent {
            order: order.iter().map(|s| s.to_string()).collect(),
            suggestions: order.iter().map(|s| format!("idea-{}", s)).collect(),
        }
    }

    fn adapter(order: &[&str]) -> RelayAdapter {
        RelayAdapter::new(RelayConfig::default(), &content(order))
    }

    /// Plays every round for every player from one machine's point of view
    fn play_three(order: &[&str]) -> PhaseMachine<RelayAdapter> {
        let players: Vec<PlayerId> = order.iter().map(|s| s.to_string()).collect();
        let mut m = PhaseMachine::new(adapter(order), players.clone(), order[0]);
        m.start();

        for round in 0..RELAY_ROUNDS {
            for player in &players {
                let body = format!("{}-r{}", player, round);
                if player == order[0] {
                    m.local_action(body).unwrap();
                } else {
                    let chain = m.adapter().target_chain(player, round).unwrap();
                    let effect = RelayEffect {
                        chain_owner: order[chain].to_string(),
                        kind: RelayPhase::for_round(round).step_kind().unwrap(),
                        body,
                    };
                    m.remote_effect(player, round, effect);
                }
            }
        }
        m
    }

    #[test]
    fn test_phase_sequence_and_kinds() {
        assert_eq!(RelayPhase::for_round(0), RelayPhase::Write);
        assert_eq!(RelayPhase::for_round(1).step_kind(), Some(StepKind::Image));
        assert_eq!(RelayPhase::for_round(2).step_kind(), Some(StepKind::Text));
        assert_eq!(RelayPhase::for_round(3), RelayPhase::Review);
    }

    #[test]
    fn test_rotation_visits_every_chain_once() {
        let a = adapter(&["a", "b", "c"]);
        for player in ["a", "b", "c"] {
            let mut chains: Vec<usize> = (0..RELAY_ROUNDS)
                .map(|r| a.target_chain(player, r).unwrap())
                .collect();
            chains.sort();
            assert_eq!(chains, vec![0, 1, 2]);
        }
        assert_eq!(a.target_chain("a", 1), Some(1));
        assert_eq!(a.target_chain("c", 1), Some(0));
        assert_eq!(a.target_chain("c", 2), Some(1));
    }

    #[test]
    fn test_draw_prompt_is_write_of_next_chain() {
        let order = ["a", "b", "c"];
        let players: Vec<PlayerId> = order.iter().map(|s| s.to_string()).collect();
        let mut m = PhaseMachine::new(adapter(&order), players, "a");
        m.start();

        m.local_action("a writes".to_string()).unwrap();
        for (player, chain_owner) in [("b", "b"), ("c", "c")] {
            m.remote_effect(
                player,
                0,
                RelayEffect {
                    chain_owner: chain_owner.to_string(),
                    kind: StepKind::Text,
                    body: format!("{} writes", player),
                },
            );
        }

        assert_eq!(m.current_round(), Some(1));
        assert_eq!(m.adapter().prompt_for("a", 1), Some("b writes"));
        assert_eq!(m.adapter().prompt_for("b", 1), Some("c writes"));
        assert_eq!(m.adapter().prompt_for("c", 1), Some("a writes"));
        assert_eq!(m.adapter().prompt_for("a", 0), Some("idea-a"));
    }

    #[test]
    fn test_review_lists_steps_in_origination_order() {
        let m = play_three(&["a", "b", "c"]);
        assert!(m.is_terminal());

        let review = m.adapter().review();
        let chain_b = review.iter().find(|c| c.owner == "b").unwrap();
        let bodies: Vec<&str> = chain_b.steps.iter().map(|s| s.body.as_str()).collect();
        assert_eq!(bodies, vec!["b-r0", "a-r1", "c-r2"]);

        let kinds: Vec<StepKind> = chain_b.steps.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StepKind::Text, StepKind::Image, StepKind::Text]);
    }

    #[test]
    fn test_complete_play_scores_every_step() {
        let m = play_three(&["a", "b", "c"]);
        assert_eq!(m.outcome(), MatchOutcome { won: true, score: 30 });
    }

    #[test]
    fn test_missed_step_is_recorded_empty() {
        let mut a = adapter(&["a", "b"]);
        a.on_timeout("b", 1);
        let review = a.review();
        assert_eq!(review[0].steps.len(), 1);
        assert!(review[0].steps[0].missed);
        assert!(review[0].steps[0].body.is_empty());
        assert_eq!(review[0].steps[0].kind, StepKind::Image);
    }

    #[test]
    fn test_two_player_relay_runs_to_review() {
        let mut m = PhaseMachine::new(
            adapter(&["a", "b"]),
            vec!["a".to_string(), "b".to_string()],
            "a",
        );
        m.start();
        let mut last = Advance::Stay;
        while !m.is_terminal() {
            last = m.tick();
        }
        assert_eq!(last, Advance::Terminal);
        assert_eq!(m.outcome(), MatchOutcome { won: false, score: 0 });
        assert!(m.adapter().review().iter().all(|c| c.steps.len() == 3));
    }

    #[test]
    fn test_empty_submission_is_rejected() {
        let mut a = adapter(&["a", "b"]);
        assert!(matches!(
            a.on_player_action("a", 0, "  ".to_string(), 10),
            Err(ActionError::Illegal(_))
        ));
    }

    #[test]
    fn test_assigner_covers_all_participants() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let players: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let mut rng = StdRng::seed_from_u64(11);
        let content = ChainAssigner::new(default_word_bank()).generate(&players, &mut rng);

        let mut order = content.order.clone();
        order.sort();
        assert_eq!(order, players);
        assert_eq!(content.suggestions.len(), 3);
    }
}
