//! # Lobbyforge
//!
//! Real-time lobby and game-session orchestration over WebSockets.
//!
//! Clients connect to `/lobby/{sessionId}` or `/game/{sessionId}`, prove
//! who they are and that they may enter (an invite or the session key),
//! and are then kept in sync: roster, roles, game start, moves and the
//! rematch handshake. All state shared between connections lives in a
//! [`SharedStateStore`](lobbyforge_store::SharedStateStore), so several
//! server processes can serve the same sessions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use lobbyforge::prelude::*;
//!
//! struct AnyoneAuth;
//!
//! impl Authenticator for AnyoneAuth {
//!     async fn authenticate(&self, token: &str) -> Result<UserIdentity, SessionError> {
//!         let id = token
//!             .parse()
//!             .map_err(|_| SessionError::AuthFailed("numeric token expected".into()))?;
//!         Ok(UserIdentity::new(UserId(id), format!("player {id}")))
//!     }
//! }
//!
//! # async fn run() -> Result<(), LobbyforgeError> {
//! let server = LobbyforgeServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(
//!         AnyoneAuth,
//!         MemoryInviteGuard::new(),
//!         Arc::new(MemoryGameRecords::default()),
//!         Arc::new(MemoryStore::new()),
//!     )
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod lifecycle;
mod server;

pub use config::{ServerConfig, ViolationPolicy};
pub use error::LobbyforgeError;
pub use lifecycle::ConnectionState;
pub use server::{LobbyforgeServer, LobbyforgeServerBuilder};

/// Re-exports everything needed to run a server.
pub mod prelude {
    pub use crate::{
        ConnectionState, LobbyforgeError, LobbyforgeServer, LobbyforgeServerBuilder,
        ServerConfig, ViolationPolicy,
    };
    pub use lobbyforge_lobby::LobbyError;
    pub use lobbyforge_protocol::{
        CloseReason, ConnectionKind, Mark, PlayerEntry, Role, ServerMessage, SessionId,
        UserId,
    };
    pub use lobbyforge_session::{
        Authenticator, GameRecord, GameRecords, Invite, InviteGuard, InviteStatus,
        MemoryGameRecords, MemoryInviteGuard, Seats, SessionError, UserIdentity,
    };
    #[cfg(feature = "redis")]
    pub use lobbyforge_store::RedisStore;
    pub use lobbyforge_store::{MemoryStore, SharedStateStore, StoreError};
}
