use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a sequence of rounds in one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundConfig {
    pub max_participants: u8,
    pub round_count: u8,
    pub round_duration: Duration,
    pub between_round_duration: Duration,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            max_participants: 10,
            round_count: 3,
            round_duration: Duration::from_secs(300),
            between_round_duration: Duration::from_secs(15),
        }
    }
}

/// Current phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Lobby,
    InRound,
    BetweenRounds,
}
