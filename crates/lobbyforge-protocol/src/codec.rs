//! Codec trait and the JSON implementation.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The handler only talks to the [`Codec`] trait, so the wire format can
//! change without touching connection logic.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task on the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed or
    /// don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Browser clients speak JSON natively, and the transport sends UTF-8
/// payloads as text frames, so messages are readable in DevTools.
///
/// ## Example
///
/// ```rust
/// use lobbyforge_protocol::{Codec, JsonCodec, ServerMessage};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&ServerMessage::error("not your turn")).unwrap();
/// assert_eq!(bytes, br#"{"type":"error","message":"not your turn"}"#);
///
/// let decoded: ServerMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, ServerMessage::error("not your turn"));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Mark, PlayerEntry, Role, ServerMessage, UserId};

    #[test]
    fn test_encode_game_update_board_as_array() {
        let mut board = [None; 9];
        board[4] = Some(Mark::X);
        let msg = ServerMessage::GameUpdate {
            board,
            turn: Mark::O,
            winner: None,
            completed: false,
        };
        let bytes = JsonCodec.encode(&msg).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "game_update");
        assert_eq!(json["board"][4], "X");
        assert_eq!(json["board"][0], serde_json::Value::Null);
        assert_eq!(json["winner"], serde_json::Value::Null);
    }

    #[test]
    fn test_decode_roster_message() {
        let json = br#"{"type":"update_player_list","players":[{"userId":1,"displayName":"Ada","role":"X"}]}"#;
        let msg: ServerMessage = JsonCodec.decode(json).unwrap();
        assert_eq!(
            msg,
            ServerMessage::UpdatePlayerList {
                players: vec![PlayerEntry {
                    user_id: UserId(1),
                    display_name: "Ada".into(),
                    role: Role::X,
                }]
            }
        );
    }

    #[test]
    fn test_decode_garbage_returns_decode_error() {
        let result: Result<ServerMessage, _> = JsonCodec.decode(b"{nope");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
