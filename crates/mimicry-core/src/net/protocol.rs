use serde::{Deserialize, Serialize};

use super::messages::{
    ClientMessage, EffectMsg, GameEndMsg, JoinSessionMsg, JoinSessionResponseMsg,
    LeaveSessionMsg, MessageType, ParticipantListMsg, RequestMsg, RoundEndMsg, RoundStartMsg,
    ServerMessage, SnapshotMsg, SnapshotRequestMsg, StateDeltaMsg,
};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default authoritative tick rate in Hz.
pub const DEFAULT_TICK_RATE_HZ: u32 = 20;

/// Maximum message payload size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownMessageType(u8),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownMessageType(b) => write!(f, "unknown message type: 0x{b:02x}"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode a serializable payload with a 1-byte type prefix.
pub fn encode_message<T: Serialize>(
    msg_type: MessageType,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        tracing::warn!(?msg_type, size = total, "Outbound message exceeds size limit");
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(msg_type as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Encode a `ClientMessage` to wire format.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ClientMessage::JoinSession(m) => encode_message(MessageType::JoinSession, m),
        ClientMessage::LeaveSession(m) => encode_message(MessageType::LeaveSession, m),
        ClientMessage::Request(m) => encode_message(MessageType::Request, m),
        ClientMessage::RequestSnapshot(m) => encode_message(MessageType::RequestSnapshot, m),
    }
}

/// Encode a `ServerMessage` to wire format.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Vec<u8>, ProtocolError> {
    match msg {
        ServerMessage::JoinSessionResponse(m) => {
            encode_message(MessageType::JoinSessionResponse, m)
        },
        ServerMessage::ParticipantList(m) => encode_message(MessageType::ParticipantList, m),
        ServerMessage::RoundStart(m) => encode_message(MessageType::RoundStart, m),
        ServerMessage::Snapshot(m) => encode_message(MessageType::Snapshot, m),
        ServerMessage::StateDelta(m) => encode_message(MessageType::StateDelta, m),
        ServerMessage::Effect(m) => encode_message(MessageType::Effect, m),
        ServerMessage::RoundEnd(m) => encode_message(MessageType::RoundEnd, m),
        ServerMessage::GameEnd(m) => encode_message(MessageType::GameEnd, m),
    }
}

/// Extract the message type byte from raw wire data.
pub fn decode_message_type(data: &[u8]) -> Result<MessageType, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    MessageType::from_byte(data[0]).ok_or(ProtocolError::UnknownMessageType(data[0]))
}

/// Decode a MessagePack payload (bytes after the type prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw wire data into a `ClientMessage`.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::JoinSession => Ok(ClientMessage::JoinSession(decode_payload::<
            JoinSessionMsg,
        >(data)?)),
        MessageType::LeaveSession => Ok(ClientMessage::LeaveSession(decode_payload::<
            LeaveSessionMsg,
        >(data)?)),
        MessageType::Request => Ok(ClientMessage::Request(decode_payload::<RequestMsg>(
            data,
        )?)),
        MessageType::RequestSnapshot => Ok(ClientMessage::RequestSnapshot(decode_payload::<
            SnapshotRequestMsg,
        >(data)?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}

/// Decode raw wire data into a `ServerMessage`.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, ProtocolError> {
    let msg_type = decode_message_type(data)?;
    match msg_type {
        MessageType::JoinSessionResponse => Ok(ServerMessage::JoinSessionResponse(
            decode_payload::<JoinSessionResponseMsg>(data)?,
        )),
        MessageType::ParticipantList => Ok(ServerMessage::ParticipantList(decode_payload::<
            ParticipantListMsg,
        >(data)?)),
        MessageType::RoundStart => Ok(ServerMessage::RoundStart(decode_payload::<
            RoundStartMsg,
        >(data)?)),
        MessageType::Snapshot => Ok(ServerMessage::Snapshot(decode_payload::<SnapshotMsg>(
            data,
        )?)),
        MessageType::StateDelta => Ok(ServerMessage::StateDelta(decode_payload::<
            StateDeltaMsg,
        >(data)?)),
        MessageType::Effect => Ok(ServerMessage::Effect(decode_payload::<EffectMsg>(data)?)),
        MessageType::RoundEnd => Ok(ServerMessage::RoundEnd(decode_payload::<RoundEndMsg>(
            data,
        )?)),
        MessageType::GameEnd => Ok(ServerMessage::GameEnd(decode_payload::<GameEndMsg>(data)?)),
        _ => Err(ProtocolError::UnknownMessageType(data[0])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::messages::ScoreEntry;
    use crate::player::{Participant, Role};

    fn test_participant() -> Participant {
        Participant {
            connection: 42,
            display_name: "Alice".to_string(),
            role: Role::Evader,
            is_bot: false,
        }
    }

    #[test]
    fn roundtrip_join_session() {
        let msg = ClientMessage::JoinSession(JoinSessionMsg {
            display_name: "Alice".to_string(),
            protocol_version: PROTOCOL_VERSION,
        });
        let encoded = encode_client_message(&msg).unwrap();
        let decoded = decode_client_message(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn roundtrip_request() {
        let msg = ClientMessage::Request(RequestMsg {
            connection: 1,
            seq: 100,
            request_data: vec![0xDE, 0xAD],
        });
        let encoded = encode_client_message(&msg).unwrap();
        let decoded = decode_client_message(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn snapshot_request_has_its_own_type_byte() {
        let msg = ClientMessage::RequestSnapshot(SnapshotRequestMsg { connection: 5 });
        let encoded = encode_client_message(&msg).unwrap();
        assert_eq!(encoded[0], 0x04);
        assert_eq!(decode_client_message(&encoded).unwrap(), msg);
        assert!(decode_server_message(&encoded).is_err());
    }

    #[test]
    fn roundtrip_round_start() {
        let msg = ServerMessage::RoundStart(RoundStartMsg {
            round_id: uuid::Uuid::new_v4(),
            round: 2,
            participants: vec![test_participant()],
            setup_data: vec![1, 2, 3],
        });
        let encoded = encode_server_message(&msg).unwrap();
        let decoded = decode_server_message(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn roundtrip_round_end() {
        let msg = ServerMessage::RoundEnd(RoundEndMsg {
            round: 1,
            scores: vec![ScoreEntry {
                connection: 42,
                score: 150,
            }],
            between_round_secs: 15,
        });
        let encoded = encode_server_message(&msg).unwrap();
        let decoded = decode_server_message(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn decode_empty_message_fails() {
        assert!(matches!(
            decode_client_message(&[]),
            Err(ProtocolError::EmptyMessage)
        ));
    }

    #[test]
    fn decode_unknown_type_fails() {
        assert!(matches!(
            decode_server_message(&[0xEE, 0x00]),
            Err(ProtocolError::UnknownMessageType(0xEE))
        ));
    }

    #[test]
    fn decode_client_msg_with_server_type_fails() {
        let msg = ServerMessage::Snapshot(SnapshotMsg {
            tick: 1,
            snapshot_data: vec![],
        });
        let encoded = encode_server_message(&msg).unwrap();
        assert!(decode_client_message(&encoded).is_err());
    }

    #[test]
    fn truncated_payload_is_a_deserialize_error() {
        let msg = ServerMessage::StateDelta(StateDeltaMsg {
            tick: 9,
            delta_data: vec![7; 32],
        });
        let encoded = encode_server_message(&msg).unwrap();
        let truncated = &encoded[..encoded.len() / 2];
        assert!(matches!(
            decode_server_message(truncated),
            Err(ProtocolError::DeserializeError(_))
        ));
    }

    #[test]
    fn message_type_byte_prefix() {
        let cases: Vec<(ServerMessage, u8)> = vec![
            (
                ServerMessage::ParticipantList(ParticipantListMsg {
                    participants: vec![],
                }),
                0x11,
            ),
            (
                ServerMessage::Effect(EffectMsg {
                    effect_id: 3,
                    effect_data: vec![],
                }),
                0x15,
            ),
            (
                ServerMessage::GameEnd(GameEndMsg {
                    final_scores: vec![],
                }),
                0x17,
            ),
        ];
        for (msg, expected_byte) in cases {
            let encoded = encode_server_message(&msg).unwrap();
            assert_eq!(
                encoded[0],
                expected_byte,
                "Type byte mismatch for {:?}",
                msg.message_type()
            );
        }
    }

    #[test]
    fn message_type_from_byte_exhaustive() {
        for byte in 0u8..=255 {
            if let Some(t) = MessageType::from_byte(byte) {
                assert_eq!(t as u8, byte);
            }
        }
        assert!(MessageType::from_byte(0x00).is_none());
        assert!(MessageType::from_byte(0xFF).is_none());
    }

    #[test]
    fn protocol_error_display() {
        assert_eq!(format!("{}", ProtocolError::EmptyMessage), "empty message");
        assert_eq!(
            format!("{}", ProtocolError::UnknownMessageType(0xFF)),
            "unknown message type: 0xff"
        );
        assert!(format!("{}", ProtocolError::PayloadTooLarge(99999)).contains("99999"));
    }

    #[test]
    fn payload_too_large_rejected() {
        let msg = ClientMessage::Request(RequestMsg {
            connection: 1,
            seq: 0,
            request_data: vec![0u8; MAX_MESSAGE_SIZE + 1],
        });
        assert!(matches!(
            encode_client_message(&msg),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
    }
}
