//! Bots-only rounds run as fast as the CPU allows, for balance checks and
//! smoke testing.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;

use mimicry_core::game_trait::{AuthoritativeGame, ConnectionId, GameConfig};
use mimicry_core::player::{Participant, Role};
use mimicry_hunt::bot::generate_bot_requests;
use mimicry_hunt::config::HuntConfig;
use mimicry_hunt::{HuntGame, RoundOutcome};

/// Settings for a headless run.
#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    pub evaders: usize,
    pub pursuers: usize,
    pub rounds: u8,
    pub round_secs: f32,
    pub tick_rate_hz: f32,
    pub seed: u64,
}

impl Default for HeadlessOptions {
    fn default() -> Self {
        Self {
            evaders: 4,
            pursuers: 1,
            rounds: 1,
            round_secs: 120.0,
            tick_rate_hz: 20.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub round: u8,
    pub outcome: Option<RoundOutcome>,
    pub ticks: u32,
    pub sim_secs: f32,
    pub evaders_out: usize,
    pub deliveries: u32,
    pub scores: BTreeMap<ConnectionId, i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeadlessReport {
    pub rounds: Vec<RoundReport>,
    pub final_scores: BTreeMap<ConnectionId, i32>,
}

/// Connection ids from 1, evaders first.
fn bot_participants(evaders: usize, pursuers: usize) -> Vec<Participant> {
    (0..evaders + pursuers)
        .map(|i| {
            let role = if i < evaders {
                Role::Evader
            } else {
                Role::Pursuer
            };
            Participant {
                connection: i as ConnectionId + 1,
                display_name: format!("Bot {}", i + 1),
                role,
                is_bot: true,
            }
        })
        .collect()
}

/// Play every round to completion with bots on all seats.
pub fn run_headless(options: &HeadlessOptions, hunt: HuntConfig) -> HeadlessReport {
    let participants = bot_participants(options.evaders, options.pursuers);
    let tick_rate = if options.tick_rate_hz > 0.0 {
        options.tick_rate_hz
    } else {
        20.0
    };
    let dt = 1.0 / tick_rate;
    // A round always ends by its timer; the margin only guards a stuck clock.
    let max_ticks = ((options.round_secs.max(0.0) + 1.0) * tick_rate).ceil() as u32 + 1;

    let mut game = HuntGame::with_config(hunt.clone());
    let mut rounds = Vec::new();
    let mut final_scores: BTreeMap<ConnectionId, i32> = BTreeMap::new();

    for round in 1..=options.rounds.max(1) {
        let mut custom = HashMap::new();
        custom.insert(
            mimicry_hunt::ROUND_DURATION_KEY.to_string(),
            serde_json::json!(options.round_secs),
        );
        let config = GameConfig {
            round_count: options.rounds,
            round_duration: Duration::from_secs_f32(options.round_secs.max(0.0)),
            seed: options.seed.wrapping_add(u64::from(round)),
            custom,
        };
        game.init(&participants, &config);

        let mut ticks = 0;
        while !game.is_round_complete() && ticks < max_ticks {
            let snapshot = game.world_snapshot();
            for p in &participants {
                for request in generate_bot_requests(&snapshot, p.connection, &hunt) {
                    if let Err(rejection) = game.handle_request(p.connection, request) {
                        let phase = game.phase_of(p.connection);
                        tracing::trace!(connection = p.connection, ?phase, %rejection, "Bot request rejected");
                    }
                }
            }
            game.update(dt);
            ticks += 1;
        }

        let scores: BTreeMap<ConnectionId, i32> = game
            .round_results()
            .into_iter()
            .map(|s| (s.connection, s.score))
            .collect();
        for (&connection, &score) in &scores {
            *final_scores.entry(connection).or_insert(0) += score;
        }
        let evaders_out = game
            .roster()
            .iter()
            .filter(|e| e.role() == Role::Evader && e.is_permanently_out)
            .count();
        let deliveries = game.roster().iter().map(|e| e.stats.deliveries).sum();
        let report = RoundReport {
            round,
            outcome: game.outcome(),
            ticks,
            sim_secs: game.now() as f32,
            evaders_out,
            deliveries,
            scores,
        };
        tracing::info!(
            round,
            outcome = ?report.outcome,
            ticks,
            evaders_out,
            deliveries,
            "Headless round finished"
        );
        rounds.push(report);
    }

    HeadlessReport {
        rounds,
        final_scores,
    }
}
