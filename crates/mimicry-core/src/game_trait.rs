use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::player::Participant;

/// Identifier of an observer connection (one per participant).
pub type ConnectionId = u64;

/// Identifier of a spawned character entity. Never reused within a round.
pub type EntityId = u64;

/// Core trait for the authoritative side of a session.
///
/// The runtime owns transport, participant tracking, and tick scheduling;
/// the game owns every gameplay mutation and decides what observers see.
pub trait AuthoritativeGame: Send + Sync {
    /// Game metadata for the session catalog.
    fn metadata(&self) -> GameMetadata;

    /// Called once per round with the participants that have a role.
    fn init(&mut self, participants: &[Participant], config: &GameConfig);

    /// Advance the simulation by `dt` seconds. Returns outbound events.
    fn update(&mut self, dt: f32) -> Vec<GameEvent>;

    /// Full serialized snapshot, used for late joiners and round starts.
    fn snapshot(&self) -> Vec<u8>;

    /// Static per-round data sent once with `RoundStart`.
    fn setup_data(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Queue a serialized request from an observer connection.
    /// Malformed or invalid requests are dropped without a reply.
    fn apply_input(&mut self, connection: ConnectionId, input: &[u8]);

    /// Called when a participant joins mid-round.
    fn participant_joined(&mut self, participant: &Participant);

    /// Called when a participant disconnects.
    fn participant_left(&mut self, connection: ConnectionId);

    /// Simulation tick rate in Hz.
    fn tick_rate(&self) -> f32 {
        20.0
    }

    /// Whether the current round is complete.
    fn is_round_complete(&self) -> bool;

    /// Scores for the current (or just completed) round.
    fn round_results(&self) -> Vec<ParticipantScore>;
}

/// Game metadata for the session catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameMetadata {
    pub name: String,
    pub description: String,
    pub min_participants: u8,
    pub max_participants: u8,
    pub estimated_round_duration: Duration,
}

/// Configuration for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub round_count: u8,
    pub round_duration: Duration,
    pub seed: u64,
    pub custom: HashMap<String, serde_json::Value>,
}

/// Events emitted by a game during `update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    /// Serialized field changes since the last published tick.
    StateDelta(Vec<u8>),
    /// Serialized one-shot effect. `effect_id` lets observers drop duplicates.
    Effect { effect_id: u64, data: Vec<u8> },
    ScoreUpdate { connection: ConnectionId, score: i32 },
    RoundComplete,
}

/// Score entry for a participant at the end of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantScore {
    pub connection: ConnectionId,
    pub score: i32,
}
