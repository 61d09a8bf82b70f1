//! Error types for the collaborator layer.

use lobbyforge_protocol::SessionId;

/// Errors raised by the external collaborators.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The token was missing, invalid, or rejected by the
    /// [`Authenticator`](crate::Authenticator).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// No game record exists for the session.
    #[error("no game record for session {0}")]
    RecordNotFound(SessionId),

    /// A record exists but isn't in a state that allows the operation.
    #[error("game record for session {0} is not startable: {1}")]
    InvalidRecord(SessionId, String),

    /// The collaborator couldn't be reached.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}
