//! Game start and move forwarding.
//!
//! The game-state collaborator owns the board and the rules. This module
//! only decides who may start, maps a connection's user to a mark, and
//! turns collaborator outcomes into messages.

use std::sync::Arc;

use lobbyforge_protocol::{Mark, Role, ServerMessage, SessionId, UserId};
use lobbyforge_session::{GameRecord, GameRecords, MoveOutcome};
use lobbyforge_store::SharedStateStore;

use crate::{Dispatch, LobbyError, Recipient, RoleAssigner};

/// A coin flip for who moves first.
pub fn random_mark() -> Mark {
    if rand::random::<bool>() { Mark::X } else { Mark::O }
}

/// The `game_update` snapshot of a record.
pub fn game_update(record: &GameRecord) -> ServerMessage {
    ServerMessage::GameUpdate {
        board: record.board,
        turn: record.turn,
        winner: record.winner,
        completed: record.completed,
    }
}

/// Handles `start_game` and `move`.
pub struct MatchFlow<S, R> {
    store: Arc<S>,
    records: Arc<R>,
    roles: RoleAssigner<S>,
}

impl<S: SharedStateStore, R: GameRecords> MatchFlow<S, R> {
    pub fn new(store: Arc<S>, records: Arc<R>) -> Self {
        let roles = RoleAssigner::new(Arc::clone(&store));
        Self {
            store,
            records,
            roles,
        }
    }

    /// Starts the session's game on behalf of `user`.
    ///
    /// Only the X holder may start, and only once both seats are taken.
    /// The collaborator's `start` is a single read-modify-write, so a
    /// second start request gets the first one's starting turn back
    /// instead of re-rolling it.
    pub async fn start(&self, session: &SessionId, user: UserId) -> Result<Dispatch, LobbyError> {
        if self.roles.role_of(session, user).await? != Some(Role::X) {
            return Err(LobbyError::NotAllowed(
                "only player X can start the game".into(),
            ));
        }
        let seats = self.roles.seats(session).await?.ok_or_else(|| {
            LobbyError::NotReady("two players are required to start".into())
        })?;

        let session_key = self.store.ensure_session_key(session).await?;
        let record = self.records.start(session, seats, random_mark()).await?;
        // A concurrent start may have seated a different pair.
        let seats = record.seats.unwrap_or(seats);

        tracing::info!(%session, starting_turn = %record.turn, "game start acknowledged");
        Ok(vec![(
            Recipient::Group,
            ServerMessage::GameStartAcknowledgment {
                session_id: session.clone(),
                session_key,
                starting_turn: record.turn,
                player_x: seats.x,
                player_o: seats.o,
            },
        )])
    }

    /// Forwards a move by `user` to the collaborator.
    ///
    /// An applied move is broadcast as a `game_update`. A refused move is
    /// reported to the mover only and nothing is broadcast.
    pub async fn play(
        &self,
        session: &SessionId,
        user: UserId,
        position: u8,
    ) -> Result<Dispatch, LobbyError> {
        let record = self
            .records
            .get(session)
            .await?
            .ok_or_else(|| LobbyError::NotReady("game has not started".into()))?;
        let mark = record.mark_of(user).ok_or(LobbyError::NotParticipant)?;

        match self.records.apply_move(session, mark, position).await? {
            MoveOutcome::Applied(record) => {
                tracing::debug!(%session, %user, %mark, position, "move applied");
                if record.completed {
                    tracing::info!(%session, winner = ?record.winner, "game completed");
                }
                Ok(vec![(Recipient::Group, game_update(&record))])
            }
            MoveOutcome::Rejected(reason) => Err(LobbyError::MoveRejected(reason)),
        }
    }

    /// The current snapshot, if the session has a record.
    pub async fn snapshot(&self, session: &SessionId) -> Result<Option<ServerMessage>, LobbyError> {
        Ok(self.records.get(session).await?.as_ref().map(game_update))
    }
}

#[cfg(test)]
mod tests {
    use lobbyforge_session::MemoryGameRecords;
    use lobbyforge_store::MemoryStore;

    use super::*;

    struct Fixture {
        store: Arc<MemoryStore>,
        records: Arc<MemoryGameRecords>,
        flow: MatchFlow<MemoryStore, MemoryGameRecords>,
    }

    async fn seated() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let records = Arc::new(MemoryGameRecords::default());
        let sid = SessionId::from("42");
        store.assign_role(&sid, UserId(1)).await.unwrap();
        store.assign_role(&sid, UserId(2)).await.unwrap();
        let flow = MatchFlow::new(Arc::clone(&store), Arc::clone(&records));
        Fixture { store, records, flow }
    }

    #[tokio::test]
    async fn test_start_by_o_refused_without_mutation() {
        let fx = seated().await;
        let sid = SessionId::from("42");

        let err = fx.flow.start(&sid, UserId(2)).await.unwrap_err();
        assert!(matches!(err, LobbyError::NotAllowed(_)));
        assert_eq!(fx.records.get(&sid).await.unwrap(), None);
        assert_eq!(fx.store.session_key(&sid).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_start_without_o_not_ready() {
        let store = Arc::new(MemoryStore::new());
        let sid = SessionId::from("42");
        store.assign_role(&sid, UserId(1)).await.unwrap();
        let flow = MatchFlow::new(store, Arc::new(MemoryGameRecords::default()));

        let err = flow.start(&sid, UserId(1)).await.unwrap_err();
        assert!(matches!(err, LobbyError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_start_twice_reuses_starting_turn() {
        let fx = seated().await;
        let sid = SessionId::from("42");

        let first = fx.flow.start(&sid, UserId(1)).await.unwrap();
        let second = fx.flow.start(&sid, UserId(1)).await.unwrap();
        assert_eq!(first, second);

        let (recipient, msg) = &first[0];
        assert_eq!(*recipient, Recipient::Group);
        assert!(matches!(
            msg,
            ServerMessage::GameStartAcknowledgment { player_x: UserId(1), player_o: UserId(2), .. }
        ));
    }

    #[tokio::test]
    async fn test_play_by_spectator_not_participant() {
        let fx = seated().await;
        let sid = SessionId::from("42");
        fx.flow.start(&sid, UserId(1)).await.unwrap();

        let err = fx.flow.play(&sid, UserId(3), 0).await.unwrap_err();
        assert!(matches!(err, LobbyError::NotParticipant));
    }

    #[tokio::test]
    async fn test_play_before_start_not_ready() {
        let fx = seated().await;
        let err = fx.flow.play(&SessionId::from("42"), UserId(1), 0).await.unwrap_err();
        assert!(matches!(err, LobbyError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_play_applied_broadcasts_and_rejected_does_not() {
        let fx = seated().await;
        let sid = SessionId::from("42");
        fx.flow.start(&sid, UserId(1)).await.unwrap();
        let turn = fx.records.get(&sid).await.unwrap().unwrap().turn;
        let (mover, waiter) = match turn {
            Mark::X => (UserId(1), UserId(2)),
            Mark::O => (UserId(2), UserId(1)),
        };

        let out = fx.flow.play(&sid, mover, 4).await.unwrap();
        assert_eq!(out.len(), 1);
        assert!(matches!(
            &out[0],
            (Recipient::Group, ServerMessage::GameUpdate { board, completed: false, .. })
                if board[4] == Some(turn)
        ));

        let err = fx.flow.play(&sid, waiter, 4).await.unwrap_err();
        assert_eq!(err.to_string(), "cell is occupied");
        let err = fx.flow.play(&sid, mover, 0).await.unwrap_err();
        assert_eq!(err.to_string(), "not your turn");
    }
}
