//! Gameplay constants for the three game modes

/// Timers and scoring constants, in seconds where durations are concerned.
///
/// Defaults follow the classroom game's tuning; tests shorten the timers.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchConfig {
    pub battle: BattleConfig,
    pub relay: RelayConfig,
    pub board: BoardConfig,
    /// Local countdown tick
    pub tick_millis: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BattleConfig {
    pub starting_hp: u32,
    pub rounds: u32,
    pub round_secs: u32,
    pub base_damage: u32,
    pub damage_per_second: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    pub write_secs: u32,
    pub draw_secs: u32,
    pub guess_secs: u32,
    pub points_per_step: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardConfig {
    pub turn_secs: u32,
    pub max_turns: u32,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            starting_hp: 1000,
            rounds: 5,
            round_secs: 10,
            base_damage: 200,
            damage_per_second: 10,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            write_secs: 60,
            draw_secs: 90,
            guess_secs: 60,
            points_per_step: 10,
        }
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            turn_secs: 30,
            max_turns: 200,
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            battle: BattleConfig::default(),
            relay: RelayConfig::default(),
            board: BoardConfig::default(),
            tick_millis: 1000,
        }
    }
}
