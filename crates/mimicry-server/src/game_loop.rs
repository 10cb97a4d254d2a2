use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use mimicry_core::game_trait::{AuthoritativeGame, ConnectionId, GameConfig, GameEvent};
use mimicry_core::net::messages::{
    EffectMsg, GameEndMsg, RoundEndMsg, RoundStartMsg, ScoreEntry, ServerMessage, SnapshotMsg,
    StateDeltaMsg,
};
use mimicry_core::net::protocol::encode_server_message;
use mimicry_core::player::Participant;
use mimicry_core::round::RoundConfig;
use mimicry_hunt::bot::generate_bot_requests;
use mimicry_hunt::config::HuntConfig;
use mimicry_hunt::replication::WorldSnapshot;

/// Commands sent from the session layer to the game tick loop.
#[derive(Debug)]
pub enum GameCommand {
    Request {
        connection: ConnectionId,
        seq: u32,
        request_data: Vec<u8>,
    },
    ParticipantJoined {
        participant: Participant,
    },
    ParticipantLeft {
        connection: ConnectionId,
    },
    /// Send `connection` a full snapshot; its view fell out of step.
    Resync {
        connection: ConnectionId,
    },
    Stop,
}

/// Output of the game tick loop.
#[derive(Debug, Clone)]
pub enum GameBroadcast {
    /// Serialized ServerMessage for every connection. `Bytes` keeps the
    /// per-connection fan-out zero-copy.
    EncodedMessage(Bytes),
    /// Serialized ServerMessage for one connection (late-join or resync
    /// snapshot).
    Direct {
        connection: ConnectionId,
        data: Bytes,
    },
    /// The session is over and the loop has exited.
    GameEnded,
}

/// Produces serialized requests for bot connections from the current
/// snapshot.
pub trait BotDriver: Send {
    fn requests(&mut self, snapshot: &[u8], bot: ConnectionId) -> Vec<Vec<u8>>;
}

/// Bot driver for the hunt game.
pub struct HuntBots {
    config: HuntConfig,
}

impl HuntBots {
    pub fn new(config: HuntConfig) -> Self {
        Self { config }
    }
}

impl BotDriver for HuntBots {
    fn requests(&mut self, snapshot: &[u8], bot: ConnectionId) -> Vec<Vec<u8>> {
        let Ok(state) = rmp_serde::from_slice::<WorldSnapshot>(snapshot) else {
            return Vec::new();
        };
        generate_bot_requests(&state, bot, &self.config)
            .iter()
            .filter_map(|request| rmp_serde::to_vec(request).ok())
            .collect()
    }
}

/// Configuration for a game session spawned by the server.
pub struct GameSessionConfig {
    /// Participants with roles already assigned.
    pub participants: Vec<Participant>,
    pub round: RoundConfig,
    /// Overrides the game's own tick rate when positive.
    pub tick_rate_hz: f32,
    pub seed: u64,
    pub custom: HashMap<String, serde_json::Value>,
}

type SessionChannels = (
    mpsc::UnboundedSender<GameCommand>,
    mpsc::UnboundedReceiver<GameBroadcast>,
    JoinHandle<()>,
);

/// Spawn a game tick loop as a tokio task.
pub fn spawn_game_session(
    mut game: Box<dyn AuthoritativeGame>,
    bots: Option<Box<dyn BotDriver>>,
    config: GameSessionConfig,
) -> SessionChannels {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        run_game_tick_loop(&mut *game, bots, config, cmd_rx, broadcast_tx).await;
    });

    (cmd_tx, broadcast_rx, handle)
}

fn encode(msg: &ServerMessage) -> Option<Bytes> {
    match encode_server_message(msg) {
        Ok(data) => Some(Bytes::from(data)),
        Err(e) => {
            tracing::error!(message = ?msg.message_type(), error = %e, "Failed to encode message");
            None
        },
    }
}

fn broadcast(tx: &mpsc::UnboundedSender<GameBroadcast>, msg: &ServerMessage) {
    if let Some(data) = encode(msg) {
        let _ = tx.send(GameBroadcast::EncodedMessage(data));
    }
}

fn start_round(
    game: &mut dyn AuthoritativeGame,
    config: &GameSessionConfig,
    round: u8,
    participants: &[Participant],
    tx: &mpsc::UnboundedSender<GameBroadcast>,
) {
    let game_config = GameConfig {
        round_count: config.round.round_count,
        round_duration: config.round.round_duration,
        seed: config.seed.wrapping_add(u64::from(round)),
        custom: config.custom.clone(),
    };
    game.init(participants, &game_config);

    let round_id = Uuid::new_v4();
    tracing::info!(round, %round_id, participants = participants.len(), "Round starting");
    broadcast(
        tx,
        &ServerMessage::RoundStart(RoundStartMsg {
            round_id,
            round,
            participants: participants.to_vec(),
            setup_data: game.setup_data(),
        }),
    );
    broadcast(
        tx,
        &ServerMessage::Snapshot(SnapshotMsg {
            tick: 0,
            snapshot_data: game.snapshot(),
        }),
    );
}

fn send_direct_snapshot(
    game: &dyn AuthoritativeGame,
    connection: ConnectionId,
    tick: u32,
    tx: &mpsc::UnboundedSender<GameBroadcast>,
) {
    let snapshot = ServerMessage::Snapshot(SnapshotMsg {
        tick,
        snapshot_data: game.snapshot(),
    });
    if let Some(data) = encode(&snapshot) {
        let _ = tx.send(GameBroadcast::Direct { connection, data });
    }
}

/// Apply a command that is valid both in and between rounds. Returns
/// `false` when the loop should exit.
fn handle_membership(
    game: &mut dyn AuthoritativeGame,
    participants: &mut Vec<Participant>,
    cmd: Option<GameCommand>,
    tick: u32,
    tx: &mpsc::UnboundedSender<GameBroadcast>,
) -> bool {
    match cmd {
        Some(GameCommand::Request {
            connection,
            seq,
            request_data,
        }) => {
            tracing::trace!(connection, seq, "Request forwarded");
            game.apply_input(connection, &request_data);
        },
        Some(GameCommand::ParticipantJoined { participant }) => {
            let connection = participant.connection;
            game.participant_joined(&participant);
            participants.retain(|p| p.connection != connection);
            participants.push(participant);
            send_direct_snapshot(game, connection, tick, tx);
        },
        Some(GameCommand::Resync { connection }) => {
            if participants.iter().any(|p| p.connection == connection) {
                tracing::debug!(connection, tick, "Resync snapshot");
                send_direct_snapshot(game, connection, tick, tx);
            }
        },
        Some(GameCommand::ParticipantLeft { connection }) => {
            game.participant_left(connection);
            participants.retain(|p| p.connection != connection);
            if participants.is_empty() {
                tracing::info!("Last participant left, ending session");
                return false;
            }
        },
        Some(GameCommand::Stop) | None => return false,
    }
    true
}

/// The authoritative tick loop. Requests are queued by the game as they
/// arrive and applied at the start of the next tick.
async fn run_game_tick_loop(
    game: &mut dyn AuthoritativeGame,
    mut bots: Option<Box<dyn BotDriver>>,
    config: GameSessionConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<GameCommand>,
    broadcast_tx: mpsc::UnboundedSender<GameBroadcast>,
) {
    let round_count = config.round.round_count.max(1);
    let tick_rate = if config.tick_rate_hz > 0.0 {
        config.tick_rate_hz
    } else {
        game.tick_rate()
    };
    let dt = 1.0 / tick_rate;
    let tick_interval = Duration::from_secs_f32(dt);

    let mut participants = config.participants.clone();
    let mut current_round: u8 = 1;
    let mut tick: u32 = 0;
    let mut cumulative_scores: BTreeMap<ConnectionId, i32> = BTreeMap::new();

    start_round(game, &config, current_round, &participants, &broadcast_tx);
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some(driver) = bots.as_mut() {
                    let snapshot = game.snapshot();
                    for bot in participants.iter().filter(|p| p.is_bot) {
                        for request in driver.requests(&snapshot, bot.connection) {
                            game.apply_input(bot.connection, &request);
                        }
                    }
                }

                tick += 1;
                let events = game.update(dt);
                let mut round_complete = game.is_round_complete();
                for event in events {
                    match event {
                        GameEvent::StateDelta(delta_data) => broadcast(
                            &broadcast_tx,
                            &ServerMessage::StateDelta(StateDeltaMsg { tick, delta_data }),
                        ),
                        GameEvent::Effect { effect_id, data } => broadcast(
                            &broadcast_tx,
                            &ServerMessage::Effect(EffectMsg {
                                effect_id,
                                effect_data: data,
                            }),
                        ),
                        GameEvent::ScoreUpdate { .. } => {},
                        GameEvent::RoundComplete => round_complete = true,
                    }
                }
                if !round_complete {
                    continue;
                }

                let results = game.round_results();
                for s in &results {
                    *cumulative_scores.entry(s.connection).or_insert(0) += s.score;
                }
                let scores: Vec<ScoreEntry> = results
                    .iter()
                    .map(|s| ScoreEntry {
                        connection: s.connection,
                        score: s.score,
                    })
                    .collect();
                tracing::info!(round = current_round, tick, "Round complete");

                if current_round >= round_count {
                    let final_scores = cumulative_scores
                        .iter()
                        .map(|(&connection, &score)| ScoreEntry { connection, score })
                        .collect();
                    broadcast(&broadcast_tx, &ServerMessage::GameEnd(GameEndMsg { final_scores }));
                    break;
                }

                broadcast(
                    &broadcast_tx,
                    &ServerMessage::RoundEnd(RoundEndMsg {
                        round: current_round,
                        scores,
                        between_round_secs: config.round.between_round_duration.as_secs() as u16,
                    }),
                );

                // Pause between rounds: membership changes apply, no ticks.
                let pause_end = tokio::time::Instant::now() + config.round.between_round_duration;
                loop {
                    tokio::select! {
                        cmd = cmd_rx.recv() => {
                            if matches!(cmd, Some(GameCommand::Request { .. })) {
                                continue;
                            }
                            if !handle_membership(game, &mut participants, cmd, tick, &broadcast_tx) {
                                let _ = broadcast_tx.send(GameBroadcast::GameEnded);
                                return;
                            }
                        }
                        _ = tokio::time::sleep_until(pause_end) => break,
                    }
                }

                current_round += 1;
                tick = 0;
                start_round(game, &config, current_round, &participants, &broadcast_tx);
                interval = tokio::time::interval(tick_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            }
            cmd = cmd_rx.recv() => {
                if !handle_membership(game, &mut participants, cmd, tick, &broadcast_tx) {
                    break;
                }
            }
        }
    }

    let _ = broadcast_tx.send(GameBroadcast::GameEnded);
}
