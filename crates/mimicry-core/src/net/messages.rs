use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game_trait::ConnectionId;
use crate::player::{Participant, Role};

/// Network message type discriminator (first byte on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Observer -> Authority
    Request = 0x01,
    JoinSession = 0x02,
    LeaveSession = 0x03,
    RequestSnapshot = 0x04,

    // Authority -> Observer
    JoinSessionResponse = 0x10,
    ParticipantList = 0x11,
    RoundStart = 0x12,
    Snapshot = 0x13,
    StateDelta = 0x14,
    Effect = 0x15,
    RoundEnd = 0x16,
    GameEnd = 0x17,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::JoinSession),
            0x03 => Some(Self::LeaveSession),
            0x04 => Some(Self::RequestSnapshot),
            0x10 => Some(Self::JoinSessionResponse),
            0x11 => Some(Self::ParticipantList),
            0x12 => Some(Self::RoundStart),
            0x13 => Some(Self::Snapshot),
            0x14 => Some(Self::StateDelta),
            0x15 => Some(Self::Effect),
            0x16 => Some(Self::RoundEnd),
            0x17 => Some(Self::GameEnd),
            _ => None,
        }
    }
}

/// Messages sent by observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    JoinSession(JoinSessionMsg),
    LeaveSession(LeaveSessionMsg),
    Request(RequestMsg),
    /// The observer lost track of state and wants a full snapshot.
    RequestSnapshot(SnapshotRequestMsg),
}

impl ClientMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::JoinSession(_) => MessageType::JoinSession,
            Self::LeaveSession(_) => MessageType::LeaveSession,
            Self::Request(_) => MessageType::Request,
            Self::RequestSnapshot(_) => MessageType::RequestSnapshot,
        }
    }
}

/// Messages sent by the authoritative process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    JoinSessionResponse(JoinSessionResponseMsg),
    ParticipantList(ParticipantListMsg),
    RoundStart(RoundStartMsg),
    Snapshot(SnapshotMsg),
    StateDelta(StateDeltaMsg),
    Effect(EffectMsg),
    RoundEnd(RoundEndMsg),
    GameEnd(GameEndMsg),
}

impl ServerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::JoinSessionResponse(_) => MessageType::JoinSessionResponse,
            Self::ParticipantList(_) => MessageType::ParticipantList,
            Self::RoundStart(_) => MessageType::RoundStart,
            Self::Snapshot(_) => MessageType::Snapshot,
            Self::StateDelta(_) => MessageType::StateDelta,
            Self::Effect(_) => MessageType::Effect,
            Self::RoundEnd(_) => MessageType::RoundEnd,
            Self::GameEnd(_) => MessageType::GameEnd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSessionMsg {
    pub display_name: String,
    pub protocol_version: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveSessionMsg {
    pub connection: ConnectionId,
}

/// A serialized gameplay request. `seq` is per-connection and only used
/// for diagnostics; the authority treats requests as unordered intents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMsg {
    pub connection: ConnectionId,
    pub seq: u32,
    pub request_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequestMsg {
    pub connection: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSessionResponseMsg {
    pub success: bool,
    pub connection: Option<ConnectionId>,
    pub role: Option<Role>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantListMsg {
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStartMsg {
    pub round_id: Uuid,
    pub round: u8,
    pub participants: Vec<Participant>,
    /// Game-specific static data observers need (catalog, tuning).
    pub setup_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMsg {
    pub tick: u32,
    pub snapshot_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDeltaMsg {
    pub tick: u32,
    pub delta_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectMsg {
    pub effect_id: u64,
    pub effect_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub connection: ConnectionId,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEndMsg {
    pub round: u8,
    pub scores: Vec<ScoreEntry>,
    pub between_round_secs: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEndMsg {
    pub final_scores: Vec<ScoreEntry>,
}
