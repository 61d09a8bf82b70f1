//! External collaborators consumed by the Lobbyforge core.
//!
//! The lobby core doesn't own users, invites, or game rules. It talks to
//! them through three traits, each a single seam the host application
//! implements:
//!
//! 1. **[`Authenticator`]**: auth token → [`UserIdentity`]
//! 2. **[`InviteGuard`]**: may this user join this session with this
//!    invite? ([`InviteVerdict`])
//! 3. **[`GameRecords`]**: the persistent game record: start, moves,
//!    rematch creation
//!
//! In-memory implementations ([`MemoryInviteGuard`],
//! [`MemoryGameRecords`]) back the demo server and the test suites.
//!
//! ```text
//! Lobby Layer (above)  ← asks who you are, whether you may join, what the board is
//!     ↕
//! Collaborators (this crate)
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod invite;
mod records;

pub use auth::{Authenticator, UserIdentity};
pub use error::SessionError;
pub use invite::{
    Invite, InviteGuard, InviteStatus, InviteVerdict, MemoryInviteGuard,
    check_invite,
};
pub use records::{
    GameRecord, GameRecords, MemoryGameRecords, MoveOutcome, Seats,
};

/// Milliseconds since the Unix epoch, the timestamp unit used for
/// expiries and `created_at` fields.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
