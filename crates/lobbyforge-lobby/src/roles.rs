//! Role assignment and the roster view built from it.

use std::sync::Arc;

use lobbyforge_protocol::{Mark, PlayerEntry, Role, SessionId, UserId};
use lobbyforge_session::Seats;
use lobbyforge_store::SharedStateStore;

use crate::LobbyError;

/// Hands out X, O and Spectator through the store's atomic assignment.
pub struct RoleAssigner<S> {
    store: Arc<S>,
}

impl<S> Clone for RoleAssigner<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: SharedStateStore> RoleAssigner<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Returns the user's role, assigning the first free seat if they
    /// don't have one. A returning user gets their previous role back.
    pub async fn assign(&self, session: &SessionId, user: UserId) -> Result<Role, LobbyError> {
        let role = self.store.assign_role(session, user).await?;
        tracing::debug!(%session, %user, %role, "role assigned");
        Ok(role)
    }

    /// The user's current role, without assigning one.
    pub async fn role_of(
        &self,
        session: &SessionId,
        user: UserId,
    ) -> Result<Option<Role>, LobbyError> {
        Ok(self.store.role_of(session, user).await?)
    }

    /// The X and O holders, or `None` unless both seats are taken.
    pub async fn seats(&self, session: &SessionId) -> Result<Option<Seats>, LobbyError> {
        let roles = self.store.roles(session).await?;
        let holder = |wanted: Role| {
            roles
                .iter()
                .find(|(_, role)| **role == wanted)
                .map(|(user, _)| *user)
        };
        Ok(holder(Role::X)
            .zip(holder(Role::O))
            .map(|(x, o)| Seats { x, o }))
    }

    /// Puts `user` back in the `mark` seat. Whoever held it drops to
    /// Spectator.
    pub async fn reseat(
        &self,
        session: &SessionId,
        user: UserId,
        mark: Mark,
    ) -> Result<(), LobbyError> {
        self.store.seat_role(session, user, mark).await?;
        tracing::info!(%session, %user, %mark, "seat restored from game record");
        Ok(())
    }

    /// Pre-assigns seats in a fresh session: X first so it takes the X
    /// slot, then O.
    pub async fn seed(&self, session: &SessionId, seats: Seats) -> Result<(), LobbyError> {
        let x = self.store.assign_role(session, seats.x).await?;
        let o = self.store.assign_role(session, seats.o).await?;
        if x != Role::X || o != Role::O {
            tracing::warn!(%session, %x, %o, "seeded session already had roles");
        }
        Ok(())
    }

    /// Registered players with their roles, ordered by user id. Players
    /// without a role record are listed as spectators.
    pub async fn roster(&self, session: &SessionId) -> Result<Vec<PlayerEntry>, LobbyError> {
        let players = self.store.players(session).await?;
        let roles = self.store.roles(session).await?;

        let mut roster: Vec<PlayerEntry> = players
            .into_iter()
            .map(|player| PlayerEntry {
                role: roles
                    .get(&player.user_id)
                    .copied()
                    .unwrap_or(Role::Spectator),
                user_id: player.user_id,
                display_name: player.display_name,
            })
            .collect();
        roster.sort_by_key(|entry| entry.user_id);
        Ok(roster)
    }
}
