//! Error types for the lobby layer.

use lobbyforge_session::SessionError;
use lobbyforge_store::StoreError;

/// Errors raised while handling a lobby or game request.
///
/// Every variant is answered with an `error` message to the caller. The
/// `Store` and `Collaborator` variants additionally mean something outside
/// the client's control went wrong, see [`LobbyError::is_client_error`].
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// The caller's role doesn't allow this request.
    #[error("{0}")]
    NotAllowed(String),

    /// The session isn't in a state that allows this request yet.
    #[error("{0}")]
    NotReady(String),

    /// The caller isn't seated in the session's game.
    #[error("you are not a player in this game")]
    NotParticipant,

    /// No rematch offer is pending (never made, declined, or already
    /// accepted by a concurrent caller).
    #[error("no pending rematch offer")]
    NoPendingOffer,

    /// The game-state collaborator refused the move.
    #[error("{0}")]
    MoveRejected(String),

    /// The shared state store failed.
    #[error("shared state error: {0}")]
    Store(#[from] StoreError),

    /// An external collaborator failed.
    #[error("{0}")]
    Collaborator(#[from] SessionError),
}

impl LobbyError {
    /// Returns `true` if the error was caused by the request itself
    /// rather than by a backend.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Store(_) | Self::Collaborator(_))
    }
}
