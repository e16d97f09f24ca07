//! Local input sources
//!
//! A [`Controller`] is asked for the local player's move once per tick while
//! the phase machine is waiting on them. The bots here stand in for a human:
//! they hesitate a random number of ticks, then answer.

use crate::adapters::battle::BattleAdapter;
use crate::adapters::board::{BoardAdapter, Move};
use crate::adapters::relay::{default_word_bank, RelayAdapter, RelayPhase, StepKind};
use crate::phase::{PhaseMachine, RoundAdapter};
use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

pub trait Controller<A: RoundAdapter> {
    fn next_action(&mut self, machine: &PhaseMachine<A>) -> Option<A::Action>;
}

/// Random per-round hesitation
struct Hesitation {
    round: Option<u32>,
    wait: u32,
    max_wait: u32,
}

impl Hesitation {
    fn new(max_wait: u32) -> Self {
        Self {
            round: None,
            wait: 0,
            max_wait,
        }
    }

    fn ready<R: Rng>(&mut self, round: u32, rng: &mut R) -> bool {
        if self.round != Some(round) {
            self.round = Some(round);
            self.wait = rng.gen_range(0..=self.max_wait);
        }
        if self.wait == 0 {
            return true;
        }
        self.wait -= 1;
        false
    }
}

/// Answers trivia, right with a fixed probability
pub struct BattleBot {
    rng: StdRng,
    accuracy: f64,
    hesitation: Hesitation,
}

impl BattleBot {
    pub fn new(seed: u64, accuracy: f64, max_wait: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            accuracy: accuracy.clamp(0.0, 1.0),
            hesitation: Hesitation::new(max_wait),
        }
    }
}

impl Controller<BattleAdapter> for BattleBot {
    fn next_action(&mut self, machine: &PhaseMachine<BattleAdapter>) -> Option<usize> {
        let round = machine.current_round()?;
        if !self.hesitation.ready(round, &mut self.rng) {
            return None;
        }
        let question = machine.adapter().question(round)?;
        let choice = if self.rng.gen_bool(self.accuracy) {
            question.answer
        } else {
            self.rng.gen_range(0..question.choices.len())
        };
        debug!("BattleBot picks {} for round {}", choice, round);
        Some(choice)
    }
}

/// Writes a word, scribbles strokes, guesses a word
pub struct RelayBot {
    rng: StdRng,
    words: Vec<String>,
    hesitation: Hesitation,
}

impl RelayBot {
    pub fn new(seed: u64, max_wait: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            words: default_word_bank(),
            hesitation: Hesitation::new(max_wait),
        }
    }

    fn strokes(&mut self) -> String {
        let points: Vec<String> = (0..8)
            .map(|_| format!("{},{}", self.rng.gen_range(0..256), self.rng.gen_range(0..256)))
            .collect();
        format!("strokes:{}", points.join(";"))
    }
}

impl Controller<RelayAdapter> for RelayBot {
    fn next_action(&mut self, machine: &PhaseMachine<RelayAdapter>) -> Option<String> {
        let round = machine.current_round()?;
        if !self.hesitation.ready(round, &mut self.rng) {
            return None;
        }

        match RelayPhase::for_round(round).step_kind()? {
            StepKind::Image => Some(self.strokes()),
            StepKind::Text => {
                // Writers echo their suggestion half the time
                let prompt = machine.adapter().prompt_for(machine.local_id(), round);
                match prompt {
                    Some(prompt) if round == 0 && !prompt.is_empty() && self.rng.gen_bool(0.5) => {
                        Some(prompt.to_string())
                    }
                    _ => self.words.choose(&mut self.rng).cloned(),
                }
            }
        }
    }
}

/// Plays a random legal move, taking a capture when one is available
pub struct BoardBot {
    rng: StdRng,
    hesitation: Hesitation,
}

impl BoardBot {
    pub fn new(seed: u64, max_wait: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            hesitation: Hesitation::new(max_wait),
        }
    }
}

impl Controller<BoardAdapter> for BoardBot {
    fn next_action(&mut self, machine: &PhaseMachine<BoardAdapter>) -> Option<Move> {
        let round = machine.current_round()?;
        if !self.hesitation.ready(round, &mut self.rng) {
            return None;
        }

        let adapter = machine.adapter();
        let seat = adapter.seat_of(machine.local_id())?;
        let moves = adapter.board().legal_moves(seat);
        let captures: Vec<Move> = moves
            .iter()
            .copied()
            .filter(|m| m.from.row.abs_diff(m.to.row) == 2)
            .collect();
        let pool = if captures.is_empty() { &moves } else { &captures };
        pool.choose(&mut self.rng).copied()
    }
}
