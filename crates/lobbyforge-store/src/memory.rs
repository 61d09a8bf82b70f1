//! Single-process [`SharedStateStore`].
//!
//! All sessions live in one map behind one `tokio::sync::Mutex`. Each
//! trait method takes the lock once and never awaits while holding it,
//! so every method is atomic with respect to every other.
//!
//! Retained sessions expire lazily: an expired slot reads as absent and
//! is dropped on the next write to it, and every
//! [`retain_if_idle`](SharedStateStore::retain_if_idle) call sweeps all
//! expired slots.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lobbyforge_protocol::{ChannelName, Mark, Role, SessionId, UserId};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{
    Departure, PlayerRecord, RematchOffer, SharedStateStore, StoreError,
    generate_session_key, next_free_role,
};

/// Everything stored for one session.
#[derive(Debug, Default)]
struct SessionSlot {
    players: BTreeMap<UserId, String>,
    channels: HashMap<ChannelName, UserId>,
    roles: HashMap<UserId, Role>,
    rematch: Option<RematchOffer>,
    session_key: Option<String>,
    expires_at: Option<Instant>,
}

impl SessionSlot {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }

    fn is_empty(&self) -> bool {
        self.players.is_empty()
            && self.channels.is_empty()
            && self.roles.is_empty()
            && self.rematch.is_none()
            && self.session_key.is_none()
    }
}

/// An in-memory store for a single server process.
#[derive(Debug)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, SessionSlot>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the backend going away (`false`) or coming back.
    /// While unavailable, every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns `true` if nothing at all is stored for the session.
    pub async fn is_session_empty(&self, session: &SessionId) -> bool {
        self.sessions
            .lock()
            .await
            .get(session)
            .is_none_or(|slot| slot.is_empty() || slot.expired())
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store disabled".into()))
        }
    }

    /// Runs `f` on the session's slot (created on demand) under the lock,
    /// dropping the slot again if `f` left it empty.
    async fn with_slot<T>(
        &self,
        session: &SessionId,
        f: impl FnOnce(&mut SessionSlot) -> T,
    ) -> Result<T, StoreError> {
        self.check()?;
        let mut sessions = self.sessions.lock().await;
        if sessions.get(session).is_some_and(SessionSlot::expired) {
            sessions.remove(session);
        }
        let slot = sessions.entry(session.clone()).or_default();
        let out = f(slot);
        if slot.is_empty() {
            sessions.remove(session);
        }
        Ok(out)
    }

    /// Like [`with_slot`](Self::with_slot) but read-only and without
    /// creating a slot.
    async fn read_slot<T>(
        &self,
        session: &SessionId,
        f: impl FnOnce(Option<&SessionSlot>) -> T,
    ) -> Result<T, StoreError> {
        self.check()?;
        let sessions = self.sessions.lock().await;
        Ok(f(sessions.get(session).filter(|slot| !slot.expired())))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStateStore for MemoryStore {
    async fn add_player(
        &self,
        session: &SessionId,
        user: UserId,
        display_name: &str,
    ) -> Result<(), StoreError> {
        self.with_slot(session, |slot| {
            slot.players.insert(user, display_name.to_string());
        })
        .await
    }

    async fn remove_player(&self, session: &SessionId, user: UserId) -> Result<(), StoreError> {
        self.with_slot(session, |slot| {
            slot.players.remove(&user);
            slot.roles.remove(&user);
        })
        .await
    }

    async fn players(&self, session: &SessionId) -> Result<Vec<PlayerRecord>, StoreError> {
        self.read_slot(session, |slot| {
            slot.map(|s| {
                s.players
                    .iter()
                    .map(|(user_id, name)| PlayerRecord {
                        user_id: *user_id,
                        display_name: name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
        })
        .await
    }

    async fn add_channel(
        &self,
        session: &SessionId,
        channel: &ChannelName,
        user: UserId,
    ) -> Result<(), StoreError> {
        self.with_slot(session, |slot| {
            slot.channels.insert(channel.clone(), user);
            slot.expires_at = None;
        })
        .await
    }

    async fn remove_channel(
        &self,
        session: &SessionId,
        channel: &ChannelName,
    ) -> Result<Option<UserId>, StoreError> {
        self.with_slot(session, |slot| slot.channels.remove(channel)).await
    }

    async fn channels(
        &self,
        session: &SessionId,
    ) -> Result<Vec<(ChannelName, UserId)>, StoreError> {
        self.read_slot(session, |slot| {
            slot.map(|s| {
                s.channels
                    .iter()
                    .map(|(name, user)| (name.clone(), *user))
                    .collect()
            })
            .unwrap_or_default()
        })
        .await
    }

    async fn has_any_channels(&self, session: &SessionId) -> Result<bool, StoreError> {
        self.read_slot(session, |slot| slot.is_some_and(|s| !s.channels.is_empty()))
            .await
    }

    async fn release_channel(
        &self,
        session: &SessionId,
        channel: &ChannelName,
        retain_player: bool,
    ) -> Result<Departure, StoreError> {
        self.with_slot(session, |slot| {
            let user_id = slot.channels.remove(channel);
            let mut player_removed = false;
            if let Some(user) = user_id {
                let still_connected = slot.channels.values().any(|u| *u == user);
                if !retain_player && !still_connected {
                    slot.players.remove(&user);
                    slot.roles.remove(&user);
                    player_removed = true;
                }
            }
            Departure {
                user_id,
                player_removed,
                remaining_channels: slot.channels.len(),
            }
        })
        .await
    }

    async fn assign_role(&self, session: &SessionId, user: UserId) -> Result<Role, StoreError> {
        self.with_slot(session, |slot| {
            if let Some(role) = slot.roles.get(&user) {
                return *role;
            }
            let role = next_free_role(slot.roles.values().copied());
            slot.roles.insert(user, role);
            role
        })
        .await
    }

    async fn seat_role(
        &self,
        session: &SessionId,
        user: UserId,
        mark: Mark,
    ) -> Result<(), StoreError> {
        let seat = Role::from(mark);
        self.with_slot(session, |slot| {
            for (holder, role) in slot.roles.iter_mut() {
                if *role == seat && *holder != user {
                    *role = Role::Spectator;
                }
            }
            slot.roles.insert(user, seat);
        })
        .await
    }

    async fn role_of(&self, session: &SessionId, user: UserId) -> Result<Option<Role>, StoreError> {
        self.read_slot(session, |slot| slot.and_then(|s| s.roles.get(&user).copied()))
            .await
    }

    async fn roles(&self, session: &SessionId) -> Result<HashMap<UserId, Role>, StoreError> {
        self.read_slot(session, |slot| slot.map(|s| s.roles.clone()).unwrap_or_default())
            .await
    }

    async fn store_rematch_offer(
        &self,
        session: &SessionId,
        offer: &RematchOffer,
    ) -> Result<(), StoreError> {
        self.with_slot(session, |slot| slot.rematch = Some(offer.clone()))
            .await
    }

    async fn rematch_offer(&self, session: &SessionId) -> Result<Option<RematchOffer>, StoreError> {
        self.read_slot(session, |slot| slot.and_then(|s| s.rematch.clone()))
            .await
    }

    async fn pop_rematch_offer(
        &self,
        session: &SessionId,
        receiver: UserId,
    ) -> Result<Option<RematchOffer>, StoreError> {
        self.with_slot(session, |slot| {
            slot.rematch
                .take_if(|offer| offer.receiver_user_id == receiver)
        })
        .await
    }

    async fn clear_rematch_offer(&self, session: &SessionId) -> Result<(), StoreError> {
        self.with_slot(session, |slot| slot.rematch = None).await
    }

    async fn ensure_session_key(&self, session: &SessionId) -> Result<String, StoreError> {
        self.with_slot(session, |slot| {
            slot.session_key
                .get_or_insert_with(generate_session_key)
                .clone()
        })
        .await
    }

    async fn session_key(&self, session: &SessionId) -> Result<Option<String>, StoreError> {
        self.read_slot(session, |slot| slot.and_then(|s| s.session_key.clone()))
            .await
    }

    async fn clear_all(&self, session: &SessionId) -> Result<(), StoreError> {
        self.check()?;
        self.sessions.lock().await.remove(session);
        Ok(())
    }

    async fn retain_if_idle(&self, session: &SessionId, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        let mut sessions = self.sessions.lock().await;
        sessions.retain(|_, slot| !slot.expired());
        let Some(slot) = sessions.get_mut(session) else {
            return Ok(true);
        };
        let idle = slot.channels.is_empty();
        if idle {
            slot.expires_at = Some(Instant::now() + ttl);
        }
        Ok(idle)
    }

    async fn clear_if_idle(&self, session: &SessionId) -> Result<bool, StoreError> {
        self.check()?;
        let mut sessions = self.sessions.lock().await;
        let idle = sessions
            .get(session)
            .is_none_or(|slot| slot.channels.is_empty());
        if idle {
            sessions.remove(session);
        }
        Ok(idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId::from("42")
    }

    fn chan(n: u64) -> ChannelName {
        ChannelName::new("test", n)
    }

    fn offer() -> RematchOffer {
        RematchOffer {
            requested_by_role: lobbyforge_protocol::Mark::X,
            requester_user_id: UserId(1),
            receiver_user_id: UserId(2),
            created_at: 0,
        }
    }

    // =====================================================================
    // players
    // =====================================================================

    #[tokio::test]
    async fn test_add_player_is_upsert() {
        let store = MemoryStore::new();
        store.add_player(&sid(), UserId(1), "Ada").await.unwrap();
        store.add_player(&sid(), UserId(1), "Ada L.").await.unwrap();

        let players = store.players(&sid()).await.unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].display_name, "Ada L.");
    }

    #[tokio::test]
    async fn test_remove_player_absent_is_noop() {
        let store = MemoryStore::new();
        store.remove_player(&sid(), UserId(9)).await.unwrap();
        assert!(store.players(&sid()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_player_drops_role() {
        let store = MemoryStore::new();
        store.add_player(&sid(), UserId(1), "Ada").await.unwrap();
        store.assign_role(&sid(), UserId(1)).await.unwrap();

        store.remove_player(&sid(), UserId(1)).await.unwrap();

        assert_eq!(store.role_of(&sid(), UserId(1)).await.unwrap(), None);
    }

    // =====================================================================
    // channels
    // =====================================================================

    #[tokio::test]
    async fn test_add_channel_duplicates_collapse() {
        let store = MemoryStore::new();
        store.add_channel(&sid(), &chan(1), UserId(1)).await.unwrap();
        store.add_channel(&sid(), &chan(1), UserId(1)).await.unwrap();

        assert_eq!(store.channels(&sid()).await.unwrap().len(), 1);
        assert!(store.has_any_channels(&sid()).await.unwrap());

        assert_eq!(store.remove_channel(&sid(), &chan(1)).await.unwrap(), Some(UserId(1)));
        assert_eq!(store.remove_channel(&sid(), &chan(1)).await.unwrap(), None);
        assert!(!store.has_any_channels(&sid()).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_channel_keeps_player_with_other_tab() {
        let store = MemoryStore::new();
        store.add_player(&sid(), UserId(1), "Ada").await.unwrap();
        store.assign_role(&sid(), UserId(1)).await.unwrap();
        store.add_channel(&sid(), &chan(1), UserId(1)).await.unwrap();
        store.add_channel(&sid(), &chan(2), UserId(1)).await.unwrap();

        let first = store.release_channel(&sid(), &chan(1), false).await.unwrap();
        assert!(!first.player_removed);
        assert_eq!(first.remaining_channels, 1);

        let second = store.release_channel(&sid(), &chan(2), false).await.unwrap();
        assert!(second.player_removed);
        assert_eq!(second.remaining_channels, 0);
        assert!(store.players(&sid()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_channel_retain_keeps_role() {
        let store = MemoryStore::new();
        store.add_player(&sid(), UserId(1), "Ada").await.unwrap();
        store.assign_role(&sid(), UserId(1)).await.unwrap();
        store.add_channel(&sid(), &chan(1), UserId(1)).await.unwrap();

        let departure = store.release_channel(&sid(), &chan(1), true).await.unwrap();

        assert_eq!(departure.user_id, Some(UserId(1)));
        assert!(!departure.player_removed);
        assert_eq!(store.role_of(&sid(), UserId(1)).await.unwrap(), Some(Role::X));
    }

    #[tokio::test]
    async fn test_release_unknown_channel_reports_none() {
        let store = MemoryStore::new();
        let departure = store.release_channel(&sid(), &chan(5), false).await.unwrap();
        assert_eq!(departure.user_id, None);
        assert_eq!(departure.remaining_channels, 0);
    }

    // =====================================================================
    // roles
    // =====================================================================

    #[tokio::test]
    async fn test_assign_role_first_x_then_o_then_spectator() {
        let store = MemoryStore::new();
        assert_eq!(store.assign_role(&sid(), UserId(1)).await.unwrap(), Role::X);
        assert_eq!(store.assign_role(&sid(), UserId(2)).await.unwrap(), Role::O);
        assert_eq!(store.assign_role(&sid(), UserId(3)).await.unwrap(), Role::Spectator);
    }

    #[tokio::test]
    async fn test_assign_role_idempotent() {
        let store = MemoryStore::new();
        store.assign_role(&sid(), UserId(1)).await.unwrap();
        assert_eq!(store.assign_role(&sid(), UserId(2)).await.unwrap(), Role::O);
        store.assign_role(&sid(), UserId(3)).await.unwrap();

        assert_eq!(store.assign_role(&sid(), UserId(2)).await.unwrap(), Role::O);
        assert_eq!(store.roles(&sid()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_assign_role_sessions_are_independent() {
        let store = MemoryStore::new();
        store.assign_role(&sid(), UserId(1)).await.unwrap();
        let other = SessionId::from("43");
        assert_eq!(store.assign_role(&other, UserId(2)).await.unwrap(), Role::X);
    }

    // =====================================================================
    // rematch offers
    // =====================================================================

    #[tokio::test]
    async fn test_seat_role_moves_holder_to_spectator() {
        let store = MemoryStore::new();
        store.assign_role(&sid(), UserId(4)).await.unwrap();
        store.assign_role(&sid(), UserId(1)).await.unwrap();

        store.seat_role(&sid(), UserId(1), Mark::X).await.unwrap();
        let roles = store.roles(&sid()).await.unwrap();
        assert_eq!(roles[&UserId(1)], Role::X);
        assert_eq!(roles[&UserId(4)], Role::Spectator);

        store.seat_role(&sid(), UserId(1), Mark::X).await.unwrap();
        assert_eq!(store.roles(&sid()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pop_rematch_offer_takes_once() {
        let store = MemoryStore::new();
        store.store_rematch_offer(&sid(), &offer()).await.unwrap();

        let receiver = offer().receiver_user_id;
        assert_eq!(store.rematch_offer(&sid()).await.unwrap(), Some(offer()));
        assert_eq!(store.pop_rematch_offer(&sid(), receiver).await.unwrap(), Some(offer()));
        assert_eq!(store.pop_rematch_offer(&sid(), receiver).await.unwrap(), None);
        assert_eq!(store.rematch_offer(&sid()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pop_rematch_offer_wrong_receiver_leaves_offer() {
        let store = MemoryStore::new();
        store.store_rematch_offer(&sid(), &offer()).await.unwrap();

        let requester = offer().requester_user_id;
        assert_eq!(store.pop_rematch_offer(&sid(), requester).await.unwrap(), None);
        assert_eq!(store.pop_rematch_offer(&sid(), UserId(99)).await.unwrap(), None);
        assert_eq!(store.rematch_offer(&sid()).await.unwrap(), Some(offer()));
    }

    #[tokio::test]
    async fn test_store_rematch_offer_overwrites() {
        let store = MemoryStore::new();
        store.store_rematch_offer(&sid(), &offer()).await.unwrap();
        let mut newer = offer();
        newer.created_at = 5;
        store.store_rematch_offer(&sid(), &newer).await.unwrap();

        assert_eq!(store.rematch_offer(&sid()).await.unwrap(), Some(newer));
        store.clear_rematch_offer(&sid()).await.unwrap();
        store.clear_rematch_offer(&sid()).await.unwrap();
        assert_eq!(store.rematch_offer(&sid()).await.unwrap(), None);
    }

    // =====================================================================
    // session keys and cleanup
    // =====================================================================

    #[tokio::test]
    async fn test_ensure_session_key_stable() {
        let store = MemoryStore::new();
        assert_eq!(store.session_key(&sid()).await.unwrap(), None);

        let key = store.ensure_session_key(&sid()).await.unwrap();
        assert_eq!(key.len(), 32);
        assert_eq!(store.ensure_session_key(&sid()).await.unwrap(), key);
        assert_eq!(store.session_key(&sid()).await.unwrap(), Some(key));
    }

    #[tokio::test]
    async fn test_clear_all_removes_everything() {
        let store = MemoryStore::new();
        store.add_player(&sid(), UserId(1), "Ada").await.unwrap();
        store.add_channel(&sid(), &chan(1), UserId(1)).await.unwrap();
        store.assign_role(&sid(), UserId(1)).await.unwrap();
        store.store_rematch_offer(&sid(), &offer()).await.unwrap();
        store.ensure_session_key(&sid()).await.unwrap();

        store.clear_all(&sid()).await.unwrap();

        assert!(store.is_session_empty(&sid()).await);
    }

    #[tokio::test]
    async fn test_clear_if_idle_refuses_with_channels() {
        let store = MemoryStore::new();
        store.add_channel(&sid(), &chan(1), UserId(1)).await.unwrap();
        store.ensure_session_key(&sid()).await.unwrap();

        assert!(!store.clear_if_idle(&sid()).await.unwrap());
        assert!(store.session_key(&sid()).await.unwrap().is_some());

        store.remove_channel(&sid(), &chan(1)).await.unwrap();
        assert!(store.clear_if_idle(&sid()).await.unwrap());
        assert!(store.is_session_empty(&sid()).await);
    }

    #[tokio::test]
    async fn test_retain_if_idle_expires_session() {
        let store = MemoryStore::new();
        store.add_player(&sid(), UserId(1), "Ada").await.unwrap();
        store.assign_role(&sid(), UserId(1)).await.unwrap();
        store.ensure_session_key(&sid()).await.unwrap();

        assert!(store.retain_if_idle(&sid(), Duration::from_millis(20)).await.unwrap());
        assert_eq!(store.players(&sid()).await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.is_session_empty(&sid()).await);
        assert_eq!(store.session_key(&sid()).await.unwrap(), None);
        assert_eq!(store.role_of(&sid(), UserId(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_retain_if_idle_cancelled_by_new_channel() {
        let store = MemoryStore::new();
        store.add_player(&sid(), UserId(1), "Ada").await.unwrap();
        assert!(store.retain_if_idle(&sid(), Duration::from_millis(20)).await.unwrap());

        store.add_channel(&sid(), &chan(1), UserId(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.players(&sid()).await.unwrap().len(), 1);
        assert!(!store.retain_if_idle(&sid(), Duration::from_millis(20)).await.unwrap());
    }

    #[tokio::test]
    async fn test_retain_if_idle_sweeps_other_expired_sessions() {
        let store = MemoryStore::new();
        let other = SessionId::from("43");
        store.ensure_session_key(&other).await.unwrap();
        store.retain_if_idle(&other, Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        store.retain_if_idle(&sid(), Duration::from_secs(60)).await.unwrap();
        assert!(store.sessions.lock().await.get(&other).is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_available(false);

        let err = store.assign_role(&sid(), UserId(1)).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(store.players(&sid()).await.is_err());

        store.set_available(true);
        assert!(store.assign_role(&sid(), UserId(1)).await.is_ok());
    }
}
