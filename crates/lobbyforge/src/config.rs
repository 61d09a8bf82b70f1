//! Server configuration.

use std::time::Duration;

use lobbyforge_protocol::{CloseReason, ConnectionKind, EnvelopeError};
use lobbyforge_store::DEFAULT_RETENTION;

// ---------------------------------------------------------------------------
// ViolationPolicy
// ---------------------------------------------------------------------------

/// What a connection kind does when a client sends a bad envelope.
///
/// The offending connection always gets an `error` message first. The
/// policy only decides whether the socket is closed with 4003 afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationPolicy {
    /// Never close; client mistakes are recoverable.
    ReplyOnly,
    /// Close when the envelope is well formed but its `type` isn't
    /// accepted on this connection kind. Garbled envelopes only get a
    /// reply.
    CloseOnDisallowedType,
    /// Close on any envelope error.
    CloseOnAny,
}

impl ViolationPolicy {
    /// The close to send after the error reply, if any.
    pub fn close_for(self, error: &EnvelopeError) -> Option<CloseReason> {
        let close = match self {
            Self::ReplyOnly => false,
            Self::CloseOnDisallowedType => error.is_disallowed_type(),
            Self::CloseOnAny => true,
        };
        close.then_some(CloseReason::ProtocolViolation)
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Configuration for a server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Prefix for this process's channel names. Must be unique among
    /// the processes sharing one store.
    pub instance_id: String,

    /// First path segment of lobby connections (`/lobby/{id}`).
    pub lobby_route: String,

    /// First path segment of game connections (`/game/{id}`).
    pub game_route: String,

    /// Envelope error handling on lobby connections.
    pub lobby_policy: ViolationPolicy,

    /// Envelope error handling on game connections.
    pub game_policy: ViolationPolicy,

    /// How long a finished game, or a rematch nobody has joined yet,
    /// outlives its last connection.
    pub retention: Duration,
}

impl ServerConfig {
    /// The violation policy for a connection kind.
    pub fn policy(&self, kind: ConnectionKind) -> ViolationPolicy {
        match kind {
            ConnectionKind::Lobby => self.lobby_policy,
            ConnectionKind::Game => self.game_policy,
        }
    }

    /// Maps a route segment to a connection kind.
    pub fn route_kind(&self, segment: &str) -> Option<ConnectionKind> {
        if segment == self.lobby_route {
            Some(ConnectionKind::Lobby)
        } else if segment == self.game_route {
            Some(ConnectionKind::Game)
        } else {
            None
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("{:08x}", rand::random::<u32>()),
            lobby_route: ConnectionKind::Lobby.to_string(),
            game_route: ConnectionKind::Game.to_string(),
            lobby_policy: ViolationPolicy::ReplyOnly,
            game_policy: ViolationPolicy::CloseOnDisallowedType,
            retention: DEFAULT_RETENTION,
        }
    }
}
