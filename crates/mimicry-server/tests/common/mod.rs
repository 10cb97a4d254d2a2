use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use mimicry_core::game_trait::ConnectionId;
use mimicry_core::net::messages::{ClientMessage, RequestMsg, ServerMessage, SnapshotRequestMsg};
use mimicry_core::net::protocol::{
    PROTOCOL_VERSION, decode_server_message, encode_client_message,
};
use mimicry_hunt::RoundSetup;
use mimicry_hunt::authority::Request;
use mimicry_hunt::replication::{DeltaOutcome, ObserverMirror, StateDelta, WorldSnapshot};
use mimicry_server::config::ServerConfig;
use mimicry_server::session::SessionManager;

pub const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Server config that ticks fast and plays one long round.
pub fn fast_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.tick_rate_hz = 50.0;
    config.seed = 11;
    config.rounds.round_count = 1;
    config.rounds.round_duration_secs = 60;
    config.rounds.between_round_secs = 0;
    config
}

/// A joined observer and its inbound message channel.
pub struct Observer {
    pub connection: ConnectionId,
    pub rx: mpsc::Receiver<Bytes>,
    seq: u32,
}

impl Observer {
    pub fn join(mgr: &mut SessionManager, name: &str) -> Self {
        Self::join_with_buffer(mgr, name, 4096)
    }

    /// Join with a small outbound buffer to model a slow link.
    pub fn join_with_buffer(mgr: &mut SessionManager, name: &str, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        let connection = mgr
            .join(name, PROTOCOL_VERSION, tx)
            .expect("join should succeed");
        Self {
            connection,
            rx,
            seq: 0,
        }
    }

    pub async fn read_raw(&mut self) -> Bytes {
        tokio::time::timeout(READ_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("channel closed")
    }

    pub async fn read(&mut self) -> ServerMessage {
        let data = self.read_raw().await;
        decode_server_message(&data).expect("server message should decode")
    }

    /// Read until `pick` returns `Some`, giving up after 1000 messages.
    pub async fn read_until<T>(&mut self, mut pick: impl FnMut(&ServerMessage) -> Option<T>) -> T {
        for _ in 0..1000 {
            let msg = self.read().await;
            if let Some(found) = pick(&msg) {
                return found;
            }
        }
        panic!("expected message never arrived");
    }

    /// Frame a gameplay request the way a client would.
    pub fn frame_request(&mut self, request: &Request) -> Vec<u8> {
        self.seq += 1;
        let msg = ClientMessage::Request(RequestMsg {
            connection: self.connection,
            seq: self.seq,
            request_data: rmp_serde::to_vec(request).expect("request should encode"),
        });
        encode_client_message(&msg).expect("client message should encode")
    }

    pub fn frame_snapshot_request(&self) -> Vec<u8> {
        let msg = ClientMessage::RequestSnapshot(SnapshotRequestMsg {
            connection: self.connection,
        });
        encode_client_message(&msg).expect("client message should encode")
    }
}

/// Rebuilds authoritative state from the message stream the way a client
/// would: setup from `RoundStart`, base from `Snapshot`, then deltas.
#[derive(Default)]
pub struct Follower {
    setup: Option<RoundSetup>,
    pub mirror: Option<ObserverMirror>,
    pub snapshots: usize,
    /// Loop tick of the newest snapshot; zero for the round-start one.
    pub last_snapshot_tick: u32,
    pub gaps: usize,
}

impl Follower {
    pub fn feed(&mut self, msg: &ServerMessage) {
        match msg {
            ServerMessage::RoundStart(start) => {
                self.setup = rmp_serde::from_slice(&start.setup_data).ok();
                self.mirror = None;
            },
            ServerMessage::Snapshot(snap) => {
                let world: WorldSnapshot =
                    rmp_serde::from_slice(&snap.snapshot_data).expect("snapshot should decode");
                self.snapshots += 1;
                self.last_snapshot_tick = snap.tick;
                match self.mirror.as_mut() {
                    Some(mirror) => mirror.apply_snapshot(&world),
                    None => {
                        let config = self
                            .setup
                            .as_ref()
                            .map(|s| s.config.clone())
                            .unwrap_or_default();
                        self.mirror = Some(ObserverMirror::from_snapshot(config, &world));
                    },
                }
            },
            ServerMessage::StateDelta(msg) => {
                let delta: StateDelta =
                    rmp_serde::from_slice(&msg.delta_data).expect("delta should decode");
                if let Some(mirror) = self.mirror.as_mut()
                    && mirror.apply_delta(&delta) == DeltaOutcome::Gap
                {
                    self.gaps += 1;
                }
            },
            _ => {},
        }
    }

    /// Tick of the mirrored state, `None` while there is nothing trustworthy
    /// to show.
    pub fn tick(&self) -> Option<u32> {
        self.mirror
            .as_ref()
            .filter(|m| !m.needs_resync())
            .map(ObserverMirror::tick)
    }
}
