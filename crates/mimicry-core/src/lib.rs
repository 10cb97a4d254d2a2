pub mod capability;
pub mod game_trait;
pub mod net;
pub mod player;
pub mod round;
pub mod time;
pub mod timers;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::game_trait::{AuthoritativeGame, GameConfig, GameEvent, ParticipantScore};
    use crate::player::{Participant, Role};

    /// Create `evaders` evader participants followed by `pursuers` pursuers,
    /// with sequential connection ids starting at 1.
    pub fn make_participants(evaders: usize, pursuers: usize) -> Vec<Participant> {
        (0..evaders + pursuers)
            .map(|i| Participant {
                connection: i as u64 + 1,
                display_name: format!("Player{}", i + 1),
                role: if i < evaders {
                    Role::Evader
                } else {
                    Role::Pursuer
                },
                is_bot: false,
            })
            .collect()
    }

    /// Create a default GameConfig with the given round duration in seconds.
    pub fn default_config(round_duration_secs: u64) -> GameConfig {
        GameConfig {
            round_count: 1,
            round_duration: Duration::from_secs(round_duration_secs),
            seed: 7,
            custom: HashMap::new(),
        }
    }

    /// Run N game ticks, returning all accumulated events.
    pub fn run_game_ticks(game: &mut dyn AuthoritativeGame, n: usize, dt: f32) -> Vec<GameEvent> {
        let mut all_events = Vec::new();
        for _ in 0..n {
            all_events.extend(game.update(dt));
        }
        all_events
    }

    // ================================================================
    // Game Trait Contract Tests
    // ================================================================
    // Generic suite every AuthoritativeGame implementation must pass. Game
    // crates call these from their own #[cfg(test)] modules.

    /// After init() the snapshot must be non-empty.
    pub fn contract_init_creates_snapshot(game: &mut dyn AuthoritativeGame, evaders: usize) {
        let participants = make_participants(evaders, 1);
        game.init(&participants, &default_config(120));
        assert!(
            !game.snapshot().is_empty(),
            "snapshot() must return non-empty bytes after init"
        );
    }

    /// The first update after init must publish a state delta.
    pub fn contract_first_update_publishes_delta(game: &mut dyn AuthoritativeGame) {
        let events = game.update(0.05);
        assert!(
            events.iter().any(|e| matches!(e, GameEvent::StateDelta(_))),
            "first update must publish the initial state delta"
        );
    }

    /// Garbage input must be dropped without changing the snapshot.
    pub fn contract_malformed_input_ignored(
        game: &mut dyn AuthoritativeGame,
        connection: u64,
    ) {
        game.update(0.05);
        let before = game.snapshot();
        game.apply_input(connection, &[0xC1, 0xFF, 0x00]);
        game.update(0.0);
        assert_eq!(before, game.snapshot(), "malformed input must be a no-op");
    }

    /// Running update() long enough must complete the round.
    pub fn contract_round_eventually_completes(game: &mut dyn AuthoritativeGame, max_ticks: usize) {
        for _ in 0..max_ticks {
            game.update(1.0);
            if game.is_round_complete() {
                return;
            }
        }
        assert!(
            game.is_round_complete(),
            "Game must complete after {max_ticks} ticks of 1s each"
        );
    }

    /// participant_left() must remove the participant from the results.
    pub fn contract_participant_left_cleanup(
        game: &mut dyn AuthoritativeGame,
        connection: u64,
        participant_count: usize,
    ) {
        let before = game.snapshot();
        game.participant_left(connection);
        assert_ne!(before, game.snapshot(), "participant_left must change state");
        let results = game.round_results();
        assert_eq!(
            results.len(),
            participant_count - 1,
            "round_results should have {} entries after removing a participant",
            participant_count - 1
        );
    }

    /// round_results() must return an entry per participant with a role.
    pub fn contract_round_results_complete(
        game: &dyn AuthoritativeGame,
        expected: usize,
    ) -> Vec<ParticipantScore> {
        let results = game.round_results();
        assert_eq!(
            results.len(),
            expected,
            "round_results must have one entry per participant"
        );
        results
    }
}
