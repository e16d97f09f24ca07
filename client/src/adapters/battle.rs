//! Timed trivia battle
//!
//! Both players answer the same question each round. A correct answer hits the
//! opponent for `base + remaining_seconds * per_second`; each peer keeps a
//! mirrored copy of both HP bars and applies the damage it receives in events.

use super::GameMode;
use crate::config::BattleConfig;
use crate::error::ActionError;
use crate::host::ContentGenerator;
use crate::phase::{MatchOutcome, PlayerId, RoundAdapter};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriviaQuestion {
    pub prompt: String,
    pub choices: Vec<String>,
    pub answer: usize,
}

impl TriviaQuestion {
    pub fn new(prompt: &str, correct: &str, wrong: [&str; 3]) -> Self {
        let mut choices = vec![correct.to_string()];
        choices.extend(wrong.iter().map(|w| w.to_string()));
        Self {
            prompt: prompt.to_string(),
            choices,
            answer: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleContent {
    pub questions: Vec<TriviaQuestion>,
}

/// Result of one answer, as broadcast to the opponent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleEffect {
    pub correct: bool,
    pub damage: u32,
}

pub fn default_question_bank() -> Vec<TriviaQuestion> {
    vec![
        TriviaQuestion::new("What is 7 x 8?", "56", ["54", "64", "48"]),
        TriviaQuestion::new("Which planet is closest to the sun?", "Mercury", ["Venus", "Mars", "Earth"]),
        TriviaQuestion::new("What is the chemical symbol for gold?", "Au", ["Ag", "Go", "Gd"]),
        TriviaQuestion::new("How many sides does a hexagon have?", "6", ["5", "7", "8"]),
        TriviaQuestion::new("What gas do plants absorb?", "Carbon dioxide", ["Oxygen", "Nitrogen", "Helium"]),
        TriviaQuestion::new("What is the largest ocean?", "Pacific", ["Atlantic", "Indian", "Arctic"]),
        TriviaQuestion::new("What is the square root of 144?", "12", ["14", "11", "16"]),
        TriviaQuestion::new("Which organ pumps blood?", "Heart", ["Liver", "Lung", "Kidney"]),
        TriviaQuestion::new("What is H2O commonly called?", "Water", ["Salt", "Hydrogen", "Steam"]),
        TriviaQuestion::new("How many continents are there?", "7", ["5", "6", "8"]),
        TriviaQuestion::new("What is 15% of 200?", "30", ["15", "20", "35"]),
        TriviaQuestion::new("Which shape has three sides?", "Triangle", ["Square", "Circle", "Pentagon"]),
    ]
}

/// Host-side draw of the match questions, with shuffled choice order
pub struct TriviaGenerator {
    rounds: usize,
    bank: Vec<TriviaQuestion>,
}

impl TriviaGenerator {
    pub fn new(rounds: u32, bank: Vec<TriviaQuestion>) -> Self {
        Self {
            rounds: rounds as usize,
            bank,
        }
    }
}

impl ContentGenerator for TriviaGenerator {
    type Content = BattleContent;

    fn generate<R: Rng + ?Sized>(&self, _participants: &[String], rng: &mut R) -> BattleContent {
        let questions = self
            .bank
            .choose_multiple(rng, self.rounds)
            .map(|question| {
                let correct = question.choices[question.answer].clone();
                let mut choices = question.choices.clone();
                choices.shuffle(rng);
                let answer = choices.iter().position(|c| *c == correct).unwrap_or(0);
                TriviaQuestion {
                    prompt: question.prompt.clone(),
                    choices,
                    answer,
                }
            })
            .collect();
        BattleContent { questions }
    }
}

pub struct BattleAdapter {
    config: BattleConfig,
    content: BattleContent,
    hp: BTreeMap<PlayerId, u32>,
    damage_dealt: BTreeMap<PlayerId, u32>,
    correct_answers: BTreeMap<PlayerId, u32>,
}

impl BattleAdapter {
    pub fn new(config: BattleConfig, content: BattleContent, participants: &[PlayerId]) -> Self {
        let hp = participants
            .iter()
            .map(|id| (id.clone(), config.starting_hp))
            .collect();
        let zeroes: BTreeMap<PlayerId, u32> =
            participants.iter().map(|id| (id.clone(), 0)).collect();
        Self {
            config,
            content,
            hp,
            damage_dealt: zeroes.clone(),
            correct_answers: zeroes,
        }
    }

    pub fn hp(&self, player: &str) -> u32 {
        self.hp.get(player).copied().unwrap_or(0)
    }

    pub fn damage_dealt(&self, player: &str) -> u32 {
        self.damage_dealt.get(player).copied().unwrap_or(0)
    }

    pub fn question(&self, round: u32) -> Option<&TriviaQuestion> {
        self.content.questions.get(round as usize)
    }

    pub fn damage_for(&self, remaining_secs: u32) -> u32 {
        self.config.base_damage + remaining_secs * self.config.damage_per_second
    }

    fn total_rounds(&self) -> u32 {
        self.config.rounds.min(self.content.questions.len() as u32)
    }
}

impl RoundAdapter for BattleAdapter {
    type Action = usize;
    type Effect = BattleEffect;

    fn round_secs(&self, _round: u32) -> u32 {
        self.config.round_secs
    }

    fn on_player_action(
        &mut self,
        _player: &str,
        round: u32,
        choice: usize,
        remaining_secs: u32,
    ) -> Result<BattleEffect, ActionError> {
        let question = self
            .question(round)
            .ok_or_else(|| ActionError::Illegal(format!("no question for round {}", round)))?;
        if choice >= question.choices.len() {
            return Err(ActionError::Illegal(format!("choice {} out of range", choice)));
        }

        let correct = choice == question.answer;
        let damage = if correct {
            self.damage_for(remaining_secs)
        } else {
            0
        };
        Ok(BattleEffect { correct, damage })
    }

    fn apply_effect(&mut self, player: &str, round: u32, effect: &BattleEffect) {
        if effect.correct {
            let correct = self.correct_answers.entry(player.to_string()).or_default();
            *correct = correct.saturating_add(1);
        }
        let dealt = self.damage_dealt.entry(player.to_string()).or_default();
        *dealt = dealt.saturating_add(effect.damage);

        for (id, hp) in self.hp.iter_mut().filter(|(id, _)| id.as_str() != player) {
            *hp = hp.saturating_sub(effect.damage);
            debug!("Round {}: {} hits {} for {} (hp {})", round, player, id, effect.damage, hp);
        }
    }

    fn on_timeout(&mut self, player: &str, round: u32) {
        debug!("Round {}: {} ran out of time", round, player);
    }

    fn is_terminal(&self, rounds_completed: u32) -> bool {
        rounds_completed >= self.total_rounds() || self.hp.values().any(|hp| *hp == 0)
    }

    fn outcome(&self, local_id: &str) -> MatchOutcome {
        let own = self.hp(local_id);
        let best_opponent = self
            .hp
            .iter()
            .filter(|(id, _)| id.as_str() != local_id)
            .map(|(_, hp)| *hp)
            .max()
            .unwrap_or(0);
        info!(
            "Battle over: {} has {} hp against {}",
            local_id, own, best_opponent
        );
        MatchOutcome {
            won: own > best_opponent,
            score: self.damage_dealt(local_id),
        }
    }
}

pub struct BattleMode {
    pub config: BattleConfig,
    pub bank: Vec<TriviaQuestion>,
}

impl BattleMode {
    pub fn new(config: BattleConfig) -> Self {
        Self {
            config,
            bank: default_question_bank(),
        }
    }
}

impl GameMode for BattleMode {
    type Generator = TriviaGenerator;
    type Content = BattleContent;
    type Adapter = BattleAdapter;

    fn name(&self) -> &'static str {
        "battle"
    }

    fn generator(&self) -> TriviaGenerator {
        TriviaGenerator::new(self.config.rounds, self.bank.clone())
    }

    fn build_adapter(
        &self,
        content: &BattleContent,
        participants: &[PlayerId],
        _local_id: &str,
    ) -> BattleAdapter {
        BattleAdapter::new(self.config.clone(), content.clone(), participants)
    }
}
