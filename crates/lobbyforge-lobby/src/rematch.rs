//! The rematch handshake.
//!
//! ```text
//! NoOffer ──request──▶ Offered ──accept──▶ new session created
//!    ▲                    │
//!    └──────decline───────┘
//! ```
//!
//! Who may offer, accept and decline is decided by the seats of the
//! finished game record, not by the live role table: roles shift as
//! players leave and rejoin, the seats of a completed game don't.
//!
//! The offer lives in one store slot per session. Accept takes it with
//! a pop conditional on the receiver, so of two concurrent accepts
//! exactly one creates a session and the other gets
//! [`LobbyError::NoPendingOffer`], and an accept by the wrong user never
//! disturbs the offer.

use std::sync::Arc;
use std::time::Duration;

use lobbyforge_protocol::{Mark, ServerMessage, SessionId, UserId};
use lobbyforge_session::{GameRecords, Seats, now_millis};
use lobbyforge_store::{DEFAULT_RETENTION, RematchOffer, SharedStateStore};

use crate::match_flow::random_mark;
use crate::{Dispatch, LobbyError, Recipient, RoleAssigner};

/// Handles `rematch_request`, `rematch_accept` and `rematch_decline`.
pub struct RematchCoordinator<S, R> {
    store: Arc<S>,
    records: Arc<R>,
    roles: RoleAssigner<S>,
    retention: Duration,
}

impl<S: SharedStateStore, R: GameRecords> RematchCoordinator<S, R> {
    pub fn new(store: Arc<S>, records: Arc<R>) -> Self {
        let roles = RoleAssigner::new(Arc::clone(&store));
        Self {
            store,
            records,
            roles,
            retention: DEFAULT_RETENTION,
        }
    }

    /// How long a seeded session waits for its players before lapsing.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Seats of the session's completed game.
    async fn finished_seats(&self, session: &SessionId) -> Result<Seats, LobbyError> {
        self.records
            .get(session)
            .await?
            .filter(|record| record.completed)
            .and_then(|record| record.seats)
            .ok_or_else(|| LobbyError::NotReady("the game is not over yet".into()))
    }

    /// The mark `user` played in the finished game.
    fn seated_mark(seats: &Seats, user: UserId) -> Result<Mark, LobbyError> {
        seats
            .mark_of(user)
            .ok_or_else(|| LobbyError::NotAllowed("only seated players can do that".into()))
    }

    /// Offers a rematch to the other seated player, replacing any stale
    /// offer. The offer goes to the whole group; each connection works
    /// out for itself whether to show the controls.
    pub async fn request(&self, session: &SessionId, user: UserId) -> Result<Dispatch, LobbyError> {
        let seats = self.finished_seats(session).await?;
        let mark = Self::seated_mark(&seats, user)?;

        let offer = RematchOffer {
            requested_by_role: mark,
            requester_user_id: user,
            receiver_user_id: seats.user_of(mark.other()),
            created_at: now_millis(),
        };
        self.store.store_rematch_offer(session, &offer).await?;
        tracing::info!(%session, requester = %user, receiver = %offer.receiver_user_id, "rematch offered");

        Ok(vec![(
            Recipient::Group,
            ServerMessage::RematchOffer {
                requested_by_role: offer.requested_by_role,
                requester_user_id: offer.requester_user_id,
                receiver_user_id: offer.receiver_user_id,
                show_actions: false,
            },
        )])
    }

    /// Accepts the pending offer and creates the new session.
    ///
    /// The new session keeps the seats (X stays X), has its roles
    /// pre-assigned and its session key minted, so both players can join
    /// it with the key from `rematch_start`.
    pub async fn accept(&self, session: &SessionId, user: UserId) -> Result<Dispatch, LobbyError> {
        let Some(offer) = self.store.pop_rematch_offer(session, user).await? else {
            return Err(match self.store.rematch_offer(session).await? {
                Some(_) => LobbyError::NotAllowed(
                    "only the invited player can accept this rematch".into(),
                ),
                None => LobbyError::NoPendingOffer,
            });
        };

        let seats = match offer.requested_by_role {
            Mark::X => Seats {
                x: offer.requester_user_id,
                o: offer.receiver_user_id,
            },
            Mark::O => Seats {
                x: offer.receiver_user_id,
                o: offer.requester_user_id,
            },
        };
        let record = self
            .records
            .create_rematch(session, seats, random_mark())
            .await?;
        let new_session = record.session_id.clone();
        self.roles.seed(&new_session, seats).await?;
        let session_key = self.store.ensure_session_key(&new_session).await?;
        self.store
            .retain_if_idle(&new_session, self.retention)
            .await?;

        tracing::info!(%session, %new_session, starting_turn = %record.turn, "rematch accepted");
        Ok(vec![(
            Recipient::Group,
            ServerMessage::RematchStart {
                new_session_id: new_session,
                session_key,
                starting_turn: record.turn,
            },
        )])
    }

    /// Declines and clears the pending offer. Declining with no offer
    /// pending still broadcasts, with no requester.
    pub async fn decline(&self, session: &SessionId, user: UserId) -> Result<Dispatch, LobbyError> {
        let seats = self.finished_seats(session).await?;
        Self::seated_mark(&seats, user)?;
        let offer = self.store.rematch_offer(session).await?;
        self.store.clear_rematch_offer(session).await?;
        tracing::info!(%session, declined_by = %user, had_offer = offer.is_some(), "rematch declined");

        Ok(vec![(
            Recipient::Group,
            ServerMessage::RematchDeclined {
                declined_by: user,
                requester_user_id: offer.map(|o| o.requester_user_id),
            },
        )])
    }
}
