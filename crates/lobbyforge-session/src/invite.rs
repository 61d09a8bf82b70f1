//! Invite validation.
//!
//! Invites are owned by the host application's invite management. The
//! lobby core only asks one question, through [`InviteGuard`]: may this
//! user join this session with this invite token?
//!
//! Whatever backs the guard, the answer must follow the same rules,
//! captured once in [`check_invite`]:
//!
//! - only the invite's two named parties may use it
//! - the sender may join while the invite is pending or accepted
//! - the receiver may join only once it is accepted
//! - expired, declined and canceled invites are never joinable

use std::collections::HashMap;

use lobbyforge_protocol::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{SessionError, now_millis};

/// Where an invite is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Canceled,
}

/// A single-use, time-boxed join credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    pub id: u64,
    pub token: String,
    pub from_user: UserId,
    pub to_user: UserId,
    pub session_id: SessionId,
    pub status: InviteStatus,
    /// Unix milliseconds after which the invite can't be used.
    pub expires_at: u64,
}

/// The guard's answer for one join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteVerdict {
    /// The user may join; carries the invite that allowed it.
    Accepted(Invite),
    /// The user isn't allowed to use this invite (yet).
    Forbidden,
    /// The invite's time box has passed.
    Expired,
    /// Unknown token, wrong session, or a dead invite.
    Invalid,
}

/// Applies the invite rules to one join attempt.
pub fn check_invite(
    invite: &Invite,
    user: UserId,
    session: &SessionId,
    now_ms: u64,
) -> InviteVerdict {
    if &invite.session_id != session {
        return InviteVerdict::Invalid;
    }

    let is_sender = invite.from_user == user;
    let is_receiver = invite.to_user == user;
    if !is_sender && !is_receiver {
        return InviteVerdict::Forbidden;
    }

    match invite.status {
        InviteStatus::Declined | InviteStatus::Canceled => {
            return InviteVerdict::Invalid;
        }
        InviteStatus::Expired => return InviteVerdict::Expired,
        InviteStatus::Pending | InviteStatus::Accepted => {}
    }

    if now_ms >= invite.expires_at {
        return InviteVerdict::Expired;
    }

    // The sender can wait in the lobby before the receiver answers.
    if is_receiver && !is_sender && invite.status != InviteStatus::Accepted {
        return InviteVerdict::Forbidden;
    }

    InviteVerdict::Accepted(invite.clone())
}

/// Decides whether a user may join a session with an invite token.
pub trait InviteGuard: Send + Sync + 'static {
    /// Validates `token` for `user` joining `session`.
    ///
    /// # Errors
    /// Returns [`SessionError::Unavailable`] if the invite store can't be
    /// reached. A bad token is a verdict, not an error.
    fn validate(
        &self,
        user: UserId,
        session: &SessionId,
        token: &str,
    ) -> impl std::future::Future<Output = Result<InviteVerdict, SessionError>> + Send;
}

/// An in-memory invite table, keyed by token.
#[derive(Debug, Default)]
pub struct MemoryInviteGuard {
    invites: RwLock<HashMap<String, Invite>>,
}

impl MemoryInviteGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an invite.
    pub async fn insert(&self, invite: Invite) {
        self.invites
            .write()
            .await
            .insert(invite.token.clone(), invite);
    }

    /// Moves an invite to a new status. Returns `false` for unknown tokens.
    pub async fn set_status(&self, token: &str, status: InviteStatus) -> bool {
        match self.invites.write().await.get_mut(token) {
            Some(invite) => {
                invite.status = status;
                true
            }
            None => false,
        }
    }
}

impl InviteGuard for MemoryInviteGuard {
    async fn validate(
        &self,
        user: UserId,
        session: &SessionId,
        token: &str,
    ) -> Result<InviteVerdict, SessionError> {
        let invites = self.invites.read().await;
        let verdict = match invites.get(token) {
            Some(invite) => check_invite(invite, user, session, now_millis()),
            None => InviteVerdict::Invalid,
        };
        tracing::debug!(%user, %session, ?verdict, "invite checked");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_000_000;

    fn invite(status: InviteStatus) -> Invite {
        Invite {
            id: 1,
            token: "tok".into(),
            from_user: UserId(1),
            to_user: UserId(2),
            session_id: SessionId::from("42"),
            status,
            expires_at: NOW + 60_000,
        }
    }

    fn check(invite: &Invite, user: u64) -> InviteVerdict {
        check_invite(invite, UserId(user), &SessionId::from("42"), NOW)
    }

    #[test]
    fn test_check_sender_may_join_pending_and_accepted() {
        assert!(matches!(check(&invite(InviteStatus::Pending), 1), InviteVerdict::Accepted(_)));
        assert!(matches!(check(&invite(InviteStatus::Accepted), 1), InviteVerdict::Accepted(_)));
    }

    #[test]
    fn test_check_receiver_only_after_accept() {
        assert_eq!(check(&invite(InviteStatus::Pending), 2), InviteVerdict::Forbidden);
        assert!(matches!(check(&invite(InviteStatus::Accepted), 2), InviteVerdict::Accepted(_)));
    }

    #[test]
    fn test_check_third_party_forbidden() {
        assert_eq!(check(&invite(InviteStatus::Accepted), 3), InviteVerdict::Forbidden);
    }

    #[test]
    fn test_check_dead_invites_never_joinable() {
        assert_eq!(check(&invite(InviteStatus::Declined), 1), InviteVerdict::Invalid);
        assert_eq!(check(&invite(InviteStatus::Canceled), 2), InviteVerdict::Invalid);
        assert_eq!(check(&invite(InviteStatus::Expired), 1), InviteVerdict::Expired);
    }

    #[test]
    fn test_check_past_expiry_is_expired() {
        let mut inv = invite(InviteStatus::Accepted);
        inv.expires_at = NOW;
        assert_eq!(check(&inv, 2), InviteVerdict::Expired);
    }

    #[test]
    fn test_check_wrong_session_invalid() {
        let inv = invite(InviteStatus::Accepted);
        let verdict = check_invite(&inv, UserId(1), &SessionId::from("7"), NOW);
        assert_eq!(verdict, InviteVerdict::Invalid);
    }

    #[tokio::test]
    async fn test_memory_guard_unknown_token_invalid() {
        let guard = MemoryInviteGuard::new();
        let verdict = guard
            .validate(UserId(1), &SessionId::from("42"), "nope")
            .await
            .unwrap();
        assert_eq!(verdict, InviteVerdict::Invalid);
    }

    #[tokio::test]
    async fn test_memory_guard_status_change_takes_effect() {
        let guard = MemoryInviteGuard::new();
        let mut inv = invite(InviteStatus::Pending);
        inv.expires_at = now_millis() + 60_000;
        guard.insert(inv).await;

        let session = SessionId::from("42");
        let before = guard.validate(UserId(2), &session, "tok").await.unwrap();
        assert_eq!(before, InviteVerdict::Forbidden);

        assert!(guard.set_status("tok", InviteStatus::Accepted).await);
        let after = guard.validate(UserId(2), &session, "tok").await.unwrap();
        assert!(matches!(after, InviteVerdict::Accepted(_)));
    }
}
