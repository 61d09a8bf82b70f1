//! The message envelope: `{ "type": string, ...fields }` both ways.
//!
//! Client requests are validated in two passes. First the raw JSON is
//! checked structurally (object? string `type`? on this connection
//! kind's allow-list?), then the payload is decoded into the typed enum
//! for that kind. Splitting it this way lets the handler tell a garbled
//! envelope apart from a well-formed one that simply isn't allowed here,
//! which matters because the two can carry different close policies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BOARD_CELLS, Board, EnvelopeError, Mark, PlayerEntry, Role, SessionId, UserId};

// ---------------------------------------------------------------------------
// Connection kinds
// ---------------------------------------------------------------------------

/// Which endpoint a connection was opened on. Each kind accepts its own
/// set of client message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// `/lobby/{sessionId}`: pre-game gathering and start.
    Lobby,
    /// `/game/{sessionId}`: moves and the rematch handshake.
    Game,
}

impl ConnectionKind {
    const LOBBY_TYPES: &'static [&'static str] =
        &["join_lobby", "leave_lobby", "start_game"];
    const GAME_TYPES: &'static [&'static str] = &[
        "move",
        "rematch_request",
        "rematch_accept",
        "rematch_decline",
    ];

    /// The client message types this kind accepts.
    pub fn allowed_types(self) -> &'static [&'static str] {
        match self {
            Self::Lobby => Self::LOBBY_TYPES,
            Self::Game => Self::GAME_TYPES,
        }
    }

    /// Returns `true` if `message_type` is on this kind's allow-list.
    pub fn allows(self, message_type: &str) -> bool {
        self.allowed_types().contains(&message_type)
    }
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Lobby => "lobby",
            Self::Game => "game",
        })
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Requests accepted on a lobby connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LobbyRequest {
    JoinLobby,
    LeaveLobby,
    StartGame,
}

/// Requests accepted on a game connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameRequest {
    Move { position: u8 },
    RematchRequest,
    RematchAccept,
    RematchDecline,
}

/// A validated client request, tagged with the kind it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Lobby(LobbyRequest),
    Game(GameRequest),
}

/// Validates a raw client payload for the given connection kind.
///
/// # Errors
/// Returns the first [`EnvelopeError`] found, in this order: not JSON,
/// not an object, missing or non-string `type`, `type` not allowed on
/// this kind, bad fields for that type.
pub fn parse_request(
    kind: ConnectionKind,
    data: &[u8],
) -> Result<ClientRequest, EnvelopeError> {
    let value: Value =
        serde_json::from_slice(data).map_err(|_| EnvelopeError::NotJson)?;

    let message_type = {
        let object = value.as_object().ok_or(EnvelopeError::NotAnObject)?;
        match object.get("type") {
            None => return Err(EnvelopeError::MissingType),
            Some(Value::String(t)) => t.clone(),
            Some(_) => return Err(EnvelopeError::TypeNotString),
        }
    };

    if !kind.allows(&message_type) {
        return Err(EnvelopeError::UnknownType(message_type));
    }

    let invalid = |e: serde_json::Error| EnvelopeError::InvalidFields {
        kind: message_type.clone(),
        reason: e.to_string(),
    };

    match kind {
        ConnectionKind::Lobby => serde_json::from_value(value)
            .map(ClientRequest::Lobby)
            .map_err(invalid),
        ConnectionKind::Game => {
            let request: GameRequest =
                serde_json::from_value(value).map_err(invalid)?;
            if let GameRequest::Move { position } = request {
                if usize::from(position) >= BOARD_CELLS {
                    return Err(EnvelopeError::PositionOutOfRange(position));
                }
            }
            Ok(ClientRequest::Game(request))
        }
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Every message the server sends.
///
/// Internally tagged with snake_case type names and camelCase fields:
/// `{"type": "rematch_start", "newSessionId": "43", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Sent once to the joining connection after authorization.
    SessionEstablished {
        session_id: SessionId,
        session_key: String,
        user_id: UserId,
        role: Role,
    },

    /// The current roster, broadcast whenever it changes.
    UpdatePlayerList { players: Vec<PlayerEntry> },

    /// Reply to `join_lobby`.
    JoinLobbySuccess { session_id: SessionId, role: Role },

    /// Broadcast when the X holder starts the game.
    GameStartAcknowledgment {
        session_id: SessionId,
        session_key: String,
        starting_turn: Mark,
        player_x: UserId,
        player_o: UserId,
    },

    /// The authoritative board after a move (or on join).
    GameUpdate {
        board: Board,
        turn: Mark,
        winner: Option<Mark>,
        completed: bool,
    },

    /// A rematch proposal. `show_actions` is filled in per connection
    /// by [`ServerMessage::personalize`], never by the sender.
    RematchOffer {
        requested_by_role: Mark,
        requester_user_id: UserId,
        receiver_user_id: UserId,
        show_actions: bool,
    },

    /// The pending offer (if any) was declined.
    RematchDeclined {
        declined_by: UserId,
        requester_user_id: Option<UserId>,
    },

    /// The offer was accepted and a new session exists.
    RematchStart {
        new_session_id: SessionId,
        session_key: String,
        starting_turn: Mark,
    },

    /// A targeted error for the connection that caused it.
    Error { message: String },
}

impl ServerMessage {
    /// Builds an `error` message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The wire `type` of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionEstablished { .. } => "session_established",
            Self::UpdatePlayerList { .. } => "update_player_list",
            Self::JoinLobbySuccess { .. } => "join_lobby_success",
            Self::GameStartAcknowledgment { .. } => "game_start_acknowledgment",
            Self::GameUpdate { .. } => "game_update",
            Self::RematchOffer { .. } => "rematch_offer",
            Self::RematchDeclined { .. } => "rematch_declined",
            Self::RematchStart { .. } => "rematch_start",
            Self::Error { .. } => "error",
        }
    }

    /// Adapts a broadcast copy for the connection owned by `viewer`.
    ///
    /// Each receiving connection decides for itself whether to show the
    /// accept/decline controls: only the offer's receiver does.
    pub fn personalize(&mut self, viewer: UserId) {
        if let Self::RematchOffer {
            receiver_user_id,
            show_actions,
            ..
        } = self
        {
            *show_actions = *receiver_user_id == viewer;
        }
    }
}
