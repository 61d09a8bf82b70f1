//! Unified error type for Lobbyforge.

use lobbyforge_lobby::LobbyError;
use lobbyforge_protocol::ProtocolError;
use lobbyforge_session::SessionError;
use lobbyforge_store::StoreError;
use lobbyforge_transport::TransportError;

/// Top-level error that wraps every crate-specific error, so `?` works
/// across layers.
#[derive(Debug, thiserror::Error)]
pub enum LobbyforgeError {
    /// Connection, send or receive failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode or decode failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An external collaborator failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The shared state store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A lobby or game request failed.
    #[error(transparent)]
    Lobby(#[from] LobbyError),
}
