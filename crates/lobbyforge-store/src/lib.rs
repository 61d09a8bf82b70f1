//! Shared per-session state for Lobbyforge.
//!
//! Every piece of state that more than one connection can touch lives
//! behind the [`SharedStateStore`] trait: who's in a session, which
//! channels are listening, who holds which role, the pending rematch
//! offer, and the session key. Connection handlers keep no shared maps
//! of their own, so several server processes can serve one session as
//! long as they point at the same store.
//!
//! Every operation that reads and then writes (role assignment, key
//! minting, offer pop, channel release, idle cleanup) is a single atomic
//! step in the backend: one critical section in [`MemoryStore`], one Lua
//! script in `RedisStore`. Callers never do check-then-act across two
//! store calls.
//!
//! # Backends
//!
//! - [`MemoryStore`]: single process, used by tests and the demo
//! - `RedisStore` (feature `redis`): multi-process deployments

#![allow(async_fn_in_trait)]

mod error;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;
mod roles;

pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use roles::next_free_role;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use lobbyforge_protocol::{ChannelName, Mark, Role, SessionId, UserId};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How long finished and freshly seeded sessions outlive their last
/// connection.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10 * 60);

/// A user registered in a session, without their role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub user_id: UserId,
    pub display_name: String,
}

/// The single pending rematch proposal of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RematchOffer {
    pub requested_by_role: Mark,
    pub requester_user_id: UserId,
    pub receiver_user_id: UserId,
    /// Unix milliseconds.
    pub created_at: u64,
}

/// What [`SharedStateStore::release_channel`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    /// The user that owned the channel, `None` if it wasn't registered.
    pub user_id: Option<UserId>,
    /// Whether the player (and their role) was removed.
    pub player_removed: bool,
    /// Channels still registered in the session afterwards.
    pub remaining_channels: usize,
}

/// The shared, externally synchronized state of every session.
///
/// All methods are keyed by [`SessionId`] and may be called concurrently
/// from any number of connections and processes.
///
/// # Errors
/// Every method returns [`StoreError::Unavailable`] when the backend
/// can't be reached.
pub trait SharedStateStore: Send + Sync + 'static {
    /// Registers a player. Upsert: re-adding updates the display name.
    fn add_player(
        &self,
        session: &SessionId,
        user: UserId,
        display_name: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes a player and their role. No-op if absent.
    fn remove_player(
        &self,
        session: &SessionId,
        user: UserId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Every registered player, in no particular order.
    fn players(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<Vec<PlayerRecord>, StoreError>> + Send;

    /// Adds a channel owned by `user`. Set semantics on the channel name.
    fn add_channel(
        &self,
        session: &SessionId,
        channel: &ChannelName,
        user: UserId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes a channel. Returns its owner, or `None` if it wasn't there.
    fn remove_channel(
        &self,
        session: &SessionId,
        channel: &ChannelName,
    ) -> impl Future<Output = Result<Option<UserId>, StoreError>> + Send;

    /// Every registered channel and its owner.
    fn channels(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<Vec<(ChannelName, UserId)>, StoreError>> + Send;

    /// Returns `true` if any channel is registered in the session.
    fn has_any_channels(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Removes `channel` and, unless `retain_player` is set, removes its
    /// owner's player and role records when they have no other channel
    /// left in the session. One atomic step.
    fn release_channel(
        &self,
        session: &SessionId,
        channel: &ChannelName,
        retain_player: bool,
    ) -> impl Future<Output = Result<Departure, StoreError>> + Send;

    /// Returns the user's role, assigning one if they have none yet:
    /// X if free, then O, else Spectator. Atomic and idempotent.
    fn assign_role(
        &self,
        session: &SessionId,
        user: UserId,
    ) -> impl Future<Output = Result<Role, StoreError>> + Send;

    /// Gives `user` the `mark` role whatever they held before. Any other
    /// holder of that mark becomes a Spectator. One atomic step.
    fn seat_role(
        &self,
        session: &SessionId,
        user: UserId,
        mark: Mark,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Looks up a user's role without assigning one.
    fn role_of(
        &self,
        session: &SessionId,
        user: UserId,
    ) -> impl Future<Output = Result<Option<Role>, StoreError>> + Send;

    /// Every role assignment in the session.
    fn roles(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<HashMap<UserId, Role>, StoreError>> + Send;

    /// Stores the session's offer, replacing any previous one.
    fn store_rematch_offer(
        &self,
        session: &SessionId,
        offer: &RematchOffer,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Reads the pending offer without consuming it.
    fn rematch_offer(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<Option<RematchOffer>, StoreError>> + Send;

    /// Atomically takes the pending offer if it is addressed to
    /// `receiver`; an offer for anyone else stays in place. Of two
    /// concurrent callers, at most one gets `Some`.
    fn pop_rematch_offer(
        &self,
        session: &SessionId,
        receiver: UserId,
    ) -> impl Future<Output = Result<Option<RematchOffer>, StoreError>> + Send;

    /// Deletes the pending offer. No-op if absent.
    fn clear_rematch_offer(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns the session key, minting it on first call. Concurrent
    /// first callers all get the same key.
    fn ensure_session_key(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;

    /// Reads the session key without minting one.
    fn session_key(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;

    /// Removes every key of the session.
    fn clear_all(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Lets an idle session lapse after `ttl` instead of clearing it
    /// now. Returns whether the session was idle. A later
    /// [`add_channel`](Self::add_channel) keeps it alive again.
    fn retain_if_idle(
        &self,
        session: &SessionId,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Removes every key of the session only if no channel is
    /// registered. Returns whether it cleared. One atomic step.
    fn clear_if_idle(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Generates a random 32-character hex string (128 bits of entropy).
pub(crate) fn generate_session_key() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
