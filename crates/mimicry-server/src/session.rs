use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use mimicry_core::game_trait::ConnectionId;
use mimicry_core::net::messages::{
    ClientMessage, JoinSessionResponseMsg, MessageType, ParticipantListMsg, ServerMessage,
};
use mimicry_core::net::protocol::{
    PROTOCOL_VERSION, ProtocolError, decode_client_message, decode_message_type,
    encode_server_message,
};
use mimicry_core::player::{Participant, Role, sanitize_display_name};
use mimicry_core::round::SessionPhase;
use mimicry_hunt::HuntGame;
use mimicry_hunt::config::HuntConfig;

use crate::config::ServerConfig;
use crate::game_loop::{
    BotDriver, GameBroadcast, GameCommand, GameSessionConfig, HuntBots, spawn_game_session,
};
use crate::rate_limit::{LimitClass, RateLimiter};

/// Per-participant sender for outbound messages. Bounded so a slow observer
/// cannot grow memory without limit.
pub type ParticipantSender = mpsc::Sender<Bytes>;

type SenderMap = Arc<Mutex<HashMap<ConnectionId, ParticipantSender>>>;

/// Why a session operation was refused.
#[derive(Debug)]
pub enum SessionError {
    Full,
    VersionMismatch { expected: u8, got: u8 },
    InvalidName,
    AlreadyJoined,
    UnknownConnection,
    /// The request names a connection other than the sender's.
    ConnectionMismatch,
    RateLimited,
    NotInLobby,
    NotInRound,
    NotEnoughParticipants,
    Protocol(ProtocolError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "session is full"),
            Self::VersionMismatch { expected, got } => {
                write!(f, "protocol version mismatch: expected {expected}, got {got}")
            },
            Self::InvalidName => write!(f, "invalid display name"),
            Self::AlreadyJoined => write!(f, "connection already joined"),
            Self::UnknownConnection => write!(f, "unknown connection"),
            Self::ConnectionMismatch => write!(f, "request names another connection"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::NotInLobby => write!(f, "session is not in the lobby"),
            Self::NotInRound => write!(f, "no round in progress"),
            Self::NotEnoughParticipants => write!(f, "at least two participants are required"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One authoritative session: participants, their outbound channels, and the
/// running game loop.
pub struct SessionManager {
    config: ServerConfig,
    hunt: HuntConfig,
    participants: Vec<Participant>,
    senders: SenderMap,
    phase: Arc<Mutex<SessionPhase>>,
    next_connection: ConnectionId,
    limiter: RateLimiter,
    game_command_tx: Option<mpsc::UnboundedSender<GameCommand>>,
    game_task: Option<JoinHandle<()>>,
    broadcast_task: Option<JoinHandle<()>>,
}

impl SessionManager {
    pub fn new(config: ServerConfig, hunt: HuntConfig) -> Self {
        let limiter = RateLimiter::from_limits(&config.limits);
        Self {
            config,
            hunt,
            participants: Vec::new(),
            senders: Arc::new(Mutex::new(HashMap::new())),
            phase: Arc::new(Mutex::new(SessionPhase::Lobby)),
            next_connection: 1,
            limiter,
            game_command_tx: None,
            game_task: None,
            broadcast_task: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *lock(&self.phase)
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    fn alloc_connection(&mut self) -> ConnectionId {
        let id = self.next_connection;
        self.next_connection += 1;
        id
    }

    fn is_full(&self) -> bool {
        self.participants.len() >= usize::from(self.config.rounds.max_participants)
    }

    fn pursuer_target(&self, count: usize) -> usize {
        (count / self.config.rounds.participants_per_pursuer)
            .max(1)
            .min(count.saturating_sub(1))
    }

    /// Role for a participant joining a running session.
    fn late_join_role(&self) -> Role {
        let pursuers = self
            .participants
            .iter()
            .filter(|p| p.role == Role::Pursuer)
            .count();
        if pursuers < self.pursuer_target(self.participants.len() + 1) {
            Role::Pursuer
        } else {
            Role::Evader
        }
    }

    fn broadcast_participant_list(&self) {
        let msg = ServerMessage::ParticipantList(ParticipantListMsg {
            participants: self.participants.clone(),
        });
        let Ok(data) = encode_server_message(&msg) else {
            return;
        };
        let data = Bytes::from(data);
        for sender in lock(&self.senders).values() {
            let _ = sender.try_send(data.clone());
        }
    }

    /// Admit an observer. Replies with `JoinSessionResponse` on `sender`
    /// either way.
    pub fn join(
        &mut self,
        display_name: &str,
        protocol_version: u8,
        sender: ParticipantSender,
    ) -> Result<ConnectionId, SessionError> {
        let result = self.admit(display_name, protocol_version, false);
        let response = match &result {
            Ok(participant) => JoinSessionResponseMsg {
                success: true,
                connection: Some(participant.connection),
                role: Some(participant.role),
                error: None,
            },
            Err(e) => JoinSessionResponseMsg {
                success: false,
                connection: None,
                role: None,
                error: Some(e.to_string()),
            },
        };
        if let Ok(data) =
            encode_server_message(&ServerMessage::JoinSessionResponse(response))
        {
            let _ = sender.try_send(Bytes::from(data));
        }
        let participant = result?;
        let connection = participant.connection;
        lock(&self.senders).insert(connection, sender);
        self.enter(participant);
        Ok(connection)
    }

    /// Add a bot participant. Lobby only.
    pub fn add_bot(&mut self) -> Result<ConnectionId, SessionError> {
        if self.phase() != SessionPhase::Lobby {
            return Err(SessionError::NotInLobby);
        }
        let number = self.participants.iter().filter(|p| p.is_bot).count() + 1;
        let participant = self.admit(&format!("Bot {number}"), PROTOCOL_VERSION, true)?;
        let connection = participant.connection;
        self.enter(participant);
        Ok(connection)
    }

    fn admit(
        &mut self,
        display_name: &str,
        protocol_version: u8,
        is_bot: bool,
    ) -> Result<Participant, SessionError> {
        if protocol_version != PROTOCOL_VERSION {
            return Err(SessionError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: protocol_version,
            });
        }
        if self.is_full() {
            return Err(SessionError::Full);
        }
        let display_name = sanitize_display_name(display_name, self.hunt.max_name_len)
            .map_err(|_| SessionError::InvalidName)?;
        let role = match self.phase() {
            SessionPhase::Lobby => Role::Unassigned,
            SessionPhase::InRound | SessionPhase::BetweenRounds => self.late_join_role(),
        };
        Ok(Participant {
            connection: self.alloc_connection(),
            display_name,
            role,
            is_bot,
        })
    }

    fn enter(&mut self, participant: Participant) {
        tracing::info!(
            connection = participant.connection,
            name = %participant.display_name,
            role = ?participant.role,
            bot = participant.is_bot,
            "Participant joined"
        );
        if let Some(tx) = &self.game_command_tx {
            let _ = tx.send(GameCommand::ParticipantJoined {
                participant: participant.clone(),
            });
        }
        self.participants.push(participant);
        self.broadcast_participant_list();
    }

    /// Remove a participant. Unknown connections are ignored.
    pub async fn leave(&mut self, connection: ConnectionId) {
        let before = self.participants.len();
        self.participants.retain(|p| p.connection != connection);
        if self.participants.len() == before {
            return;
        }
        lock(&self.senders).remove(&connection);
        self.limiter.remove(connection).await;
        if let Some(tx) = &self.game_command_tx {
            let _ = tx.send(GameCommand::ParticipantLeft { connection });
        }
        tracing::info!(connection, "Participant left");
        self.broadcast_participant_list();
    }

    /// Handle a framed message from a joined connection.
    pub async fn handle_message(
        &mut self,
        from: ConnectionId,
        data: &[u8],
    ) -> Result<(), SessionError> {
        if !self.participants.iter().any(|p| p.connection == from) {
            return Err(SessionError::UnknownConnection);
        }
        match decode_client_message(data)? {
            ClientMessage::JoinSession(_) => Err(SessionError::AlreadyJoined),
            ClientMessage::LeaveSession(_) => {
                self.leave(from).await;
                Ok(())
            },
            ClientMessage::Request(msg) => {
                if msg.connection != from {
                    return Err(SessionError::ConnectionMismatch);
                }
                if !self.limiter.check(from, LimitClass::Request).await {
                    return Err(SessionError::RateLimited);
                }
                self.send_command(GameCommand::Request {
                    connection: from,
                    seq: msg.seq,
                    request_data: msg.request_data,
                })
            },
            ClientMessage::RequestSnapshot(msg) => {
                if msg.connection != from {
                    return Err(SessionError::ConnectionMismatch);
                }
                if !self.limiter.check(from, LimitClass::Resync).await {
                    return Err(SessionError::RateLimited);
                }
                self.send_command(GameCommand::Resync { connection: from })
            },
        }
    }

    fn send_command(&self, cmd: GameCommand) -> Result<(), SessionError> {
        let tx = self
            .game_command_tx
            .as_ref()
            .ok_or(SessionError::NotInRound)?;
        tx.send(cmd).map_err(|_| SessionError::NotInRound)
    }

    /// Fix roles and start the game loop.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.phase() != SessionPhase::Lobby || self.game_command_tx.is_some() {
            return Err(SessionError::NotInLobby);
        }
        if self.participants.len() < 2 {
            return Err(SessionError::NotEnoughParticipants);
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut order: Vec<usize> = (0..self.participants.len()).collect();
        order.shuffle(&mut rng);
        let pursuers = self.pursuer_target(self.participants.len());
        for (rank, &index) in order.iter().enumerate() {
            self.participants[index].role = if rank < pursuers {
                Role::Pursuer
            } else {
                Role::Evader
            };
        }

        let has_bots = self.participants.iter().any(|p| p.is_bot);
        let bots: Option<Box<dyn BotDriver>> =
            has_bots.then(|| Box::new(HuntBots::new(self.hunt.clone())) as Box<dyn BotDriver>);
        let session = GameSessionConfig {
            participants: self.participants.clone(),
            round: self.config.rounds.to_round_config(),
            tick_rate_hz: self.config.tick_rate_hz,
            seed: self.config.seed,
            custom: HashMap::new(),
        };
        let game = Box::new(HuntGame::with_config(self.hunt.clone()));
        let (cmd_tx, broadcast_rx, game_task) = spawn_game_session(game, bots, session);

        *lock(&self.phase) = SessionPhase::InRound;
        self.broadcast_task = Some(spawn_forwarder(
            broadcast_rx,
            Arc::clone(&self.senders),
            Arc::clone(&self.phase),
            cmd_tx.downgrade(),
        ));
        self.game_command_tx = Some(cmd_tx);
        self.game_task = Some(game_task);
        tracing::info!(
            participants = self.participants.len(),
            pursuers,
            "Session started"
        );
        self.broadcast_participant_list();
        Ok(())
    }

    /// Stop the game loop and wait for both tasks to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.game_command_tx.take()
            && let Err(e) = tx.send(GameCommand::Stop)
        {
            tracing::debug!(error = %e, "Game session already stopped");
        }
        if let Some(task) = self.game_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.broadcast_task.take() {
            let _ = task.await;
        }
        *lock(&self.phase) = SessionPhase::Lobby;
    }

    /// Wait for the game loop to end on its own.
    pub async fn wait(&mut self) {
        if let Some(task) = self.game_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.broadcast_task.take() {
            let _ = task.await;
        }
        self.game_command_tx = None;
    }
}

/// Connections that lost broadcast messages to a full buffer and still owe
/// a resync snapshot.
#[derive(Debug, Default)]
struct Backlog {
    stale: HashSet<ConnectionId>,
    requested: HashSet<ConnectionId>,
}

impl Backlog {
    fn dropped(&mut self, connection: ConnectionId) {
        if self.stale.insert(connection) {
            tracing::debug!(connection, "Outbound buffer full, observer needs a resync");
        }
    }

    /// True once per stale episode, when the buffer has room again.
    fn wants_resync(&mut self, connection: ConnectionId) -> bool {
        self.stale.contains(&connection) && self.requested.insert(connection)
    }

    fn resynced(&mut self, connection: ConnectionId) {
        self.stale.remove(&connection);
        self.requested.remove(&connection);
    }

    /// The resync snapshot itself was dropped; ask again later.
    fn resync_dropped(&mut self, connection: ConnectionId) {
        self.requested.remove(&connection);
    }

    fn retain_known(&mut self, senders: &HashMap<ConnectionId, ParticipantSender>) {
        self.stale.retain(|c| senders.contains_key(c));
        self.requested.retain(|c| senders.contains_key(c));
    }
}

/// Fan game output out to participant channels and track the session phase.
///
/// A connection whose buffer overflowed gets a fresh snapshot once it
/// drains, so a slow observer recovers instead of drifting.
fn spawn_forwarder(
    mut rx: mpsc::UnboundedReceiver<GameBroadcast>,
    senders: SenderMap,
    phase: Arc<Mutex<SessionPhase>>,
    commands: mpsc::WeakUnboundedSender<GameCommand>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backlog = Backlog::default();
        while let Some(msg) = rx.recv().await {
            match msg {
                GameBroadcast::EncodedMessage(data) => {
                    let kind = decode_message_type(&data).ok();
                    match kind {
                        Some(MessageType::RoundStart) => *lock(&phase) = SessionPhase::InRound,
                        Some(MessageType::RoundEnd) => {
                            *lock(&phase) = SessionPhase::BetweenRounds;
                        },
                        _ => {},
                    }
                    let is_snapshot = kind == Some(MessageType::Snapshot);
                    let mut resync = Vec::new();
                    {
                        let senders = lock(&senders);
                        backlog.retain_known(&senders);
                        for (&connection, sender) in senders.iter() {
                            match sender.try_send(data.clone()) {
                                Ok(()) if is_snapshot => backlog.resynced(connection),
                                Ok(()) => {
                                    if backlog.wants_resync(connection) {
                                        resync.push(connection);
                                    }
                                },
                                Err(TrySendError::Full(_)) => backlog.dropped(connection),
                                Err(TrySendError::Closed(_)) => {},
                            }
                        }
                    }
                    if let Some(tx) = commands.upgrade() {
                        for connection in resync {
                            let _ = tx.send(GameCommand::Resync { connection });
                        }
                    }
                },
                GameBroadcast::Direct { connection, data } => {
                    let is_snapshot =
                        matches!(decode_message_type(&data), Ok(MessageType::Snapshot));
                    let sent = lock(&senders)
                        .get(&connection)
                        .map(|sender| sender.try_send(data));
                    match sent {
                        Some(Ok(())) if is_snapshot => backlog.resynced(connection),
                        Some(Ok(())) => {},
                        Some(Err(_)) => backlog.resync_dropped(connection),
                        None => backlog.resynced(connection),
                    }
                },
                GameBroadcast::GameEnded => break,
            }
        }
        *lock(&phase) = SessionPhase::Lobby;
    })
}
