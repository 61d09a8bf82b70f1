//! The persistent game record collaborator.
//!
//! The lobby core never decides whether a move is legal or who won. It
//! maps a connection to a mark, hands the move to [`GameRecords`], and
//! broadcasts whatever record comes back.
//!
//! [`GameRecords::start`] is the one operation with a concurrency
//! contract: it's a single read-modify-write. If two start requests race,
//! the second must see the already-started record and return it as-is
//! instead of re-rolling the starting turn.

use std::collections::HashMap;

use lobbyforge_protocol::{BOARD_CELLS, Board, Mark, SessionId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{SessionError, now_millis};

/// Which user sits on which side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seats {
    pub x: UserId,
    pub o: UserId,
}

impl Seats {
    /// The mark held by `user`, if they're seated.
    pub fn mark_of(&self, user: UserId) -> Option<Mark> {
        if self.x == user {
            Some(Mark::X)
        } else if self.o == user {
            Some(Mark::O)
        } else {
            None
        }
    }

    /// The user holding `mark`.
    pub fn user_of(&self, mark: Mark) -> UserId {
        match mark {
            Mark::X => self.x,
            Mark::O => self.o,
        }
    }
}

/// The authoritative state of one session's game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub session_id: SessionId,
    /// `None` until the game is started.
    pub seats: Option<Seats>,
    pub board: Board,
    pub turn: Mark,
    pub winner: Option<Mark>,
    pub completed: bool,
    pub created_at: u64,
}

impl GameRecord {
    /// A fresh, unstarted record.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            seats: None,
            board: [None; BOARD_CELLS],
            turn: Mark::X,
            winner: None,
            completed: false,
            created_at: now_millis(),
        }
    }

    /// `true` once seats have been assigned.
    pub fn is_started(&self) -> bool {
        self.seats.is_some()
    }

    /// The mark held by `user` in this game.
    pub fn mark_of(&self, user: UserId) -> Option<Mark> {
        self.seats.and_then(|s| s.mark_of(user))
    }

    /// Applies tic-tac-toe rules for one move.
    ///
    /// Returns the reason the move was refused, leaving the record
    /// untouched in that case.
    pub fn apply(&mut self, mark: Mark, position: u8) -> Result<(), String> {
        let cell = usize::from(position);
        if !self.is_started() {
            return Err("game has not started".into());
        }
        if self.completed {
            return Err("game is over".into());
        }
        if self.turn != mark {
            return Err("not your turn".into());
        }
        if cell >= BOARD_CELLS {
            return Err("position must be 0-8".into());
        }
        if self.board[cell].is_some() {
            return Err("cell is occupied".into());
        }

        self.board[cell] = Some(mark);
        if has_line(&self.board, mark) {
            self.winner = Some(mark);
            self.completed = true;
        } else if self.board.iter().all(Option::is_some) {
            self.completed = true;
        } else {
            self.turn = mark.other();
        }
        Ok(())
    }
}

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

fn has_line(board: &Board, mark: Mark) -> bool {
    LINES
        .iter()
        .any(|line| line.iter().all(|&i| board[i] == Some(mark)))
}

/// What happened to a submitted move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The move was legal; carries the updated record.
    Applied(GameRecord),
    /// The move was refused; the record is unchanged.
    Rejected(String),
}

/// Reads and writes game records.
pub trait GameRecords: Send + Sync + 'static {
    /// Fetches the record for a session.
    fn get(
        &self,
        session: &SessionId,
    ) -> impl std::future::Future<Output = Result<Option<GameRecord>, SessionError>> + Send;

    /// Starts the session's game with the given seats and proposed
    /// starting turn, creating the record if needed.
    ///
    /// Atomic: if the game is already started the stored record is
    /// returned untouched and `starting_turn` is ignored.
    fn start(
        &self,
        session: &SessionId,
        seats: Seats,
        starting_turn: Mark,
    ) -> impl std::future::Future<Output = Result<GameRecord, SessionError>> + Send;

    /// Submits a move for `mark`.
    ///
    /// # Errors
    /// [`SessionError::RecordNotFound`] if the session has no record.
    /// Illegal moves are a [`MoveOutcome::Rejected`], not an error.
    fn apply_move(
        &self,
        session: &SessionId,
        mark: Mark,
        position: u8,
    ) -> impl std::future::Future<Output = Result<MoveOutcome, SessionError>> + Send;

    /// Creates a brand-new, already-started record for a rematch and
    /// returns it. The new record gets a session id never used before.
    fn create_rematch(
        &self,
        previous: &SessionId,
        seats: Seats,
        starting_turn: Mark,
    ) -> impl std::future::Future<Output = Result<GameRecord, SessionError>> + Send;
}

struct MemoryRecordsInner {
    records: HashMap<SessionId, GameRecord>,
    next_id: u64,
}

/// An in-memory [`GameRecords`] with tic-tac-toe rules.
///
/// Each operation runs under one lock acquisition, which is what makes
/// `start` a single read-modify-write.
pub struct MemoryGameRecords {
    inner: Mutex<MemoryRecordsInner>,
}

impl MemoryGameRecords {
    /// Rematch sessions get numeric ids starting at `first_rematch_id`.
    pub fn new(first_rematch_id: u64) -> Self {
        Self {
            inner: Mutex::new(MemoryRecordsInner {
                records: HashMap::new(),
                next_id: first_rematch_id,
            }),
        }
    }

    /// Stores a record as-is, replacing any existing one.
    pub async fn insert(&self, record: GameRecord) {
        self.inner
            .lock()
            .await
            .records
            .insert(record.session_id.clone(), record);
    }
}

impl Default for MemoryGameRecords {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl GameRecords for MemoryGameRecords {
    async fn get(&self, session: &SessionId) -> Result<Option<GameRecord>, SessionError> {
        Ok(self.inner.lock().await.records.get(session).cloned())
    }

    async fn start(
        &self,
        session: &SessionId,
        seats: Seats,
        starting_turn: Mark,
    ) -> Result<GameRecord, SessionError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .entry(session.clone())
            .or_insert_with(|| GameRecord::new(session.clone()));

        if record.completed {
            return Err(SessionError::InvalidRecord(
                session.clone(),
                "game already completed".into(),
            ));
        }
        if !record.is_started() {
            record.seats = Some(seats);
            record.turn = starting_turn;
            tracing::info!(%session, %starting_turn, "game started");
        }
        Ok(record.clone())
    }

    async fn apply_move(
        &self,
        session: &SessionId,
        mark: Mark,
        position: u8,
    ) -> Result<MoveOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .get_mut(session)
            .ok_or_else(|| SessionError::RecordNotFound(session.clone()))?;

        Ok(match record.apply(mark, position) {
            Ok(()) => MoveOutcome::Applied(record.clone()),
            Err(reason) => MoveOutcome::Rejected(reason),
        })
    }

    async fn create_rematch(
        &self,
        previous: &SessionId,
        seats: Seats,
        starting_turn: Mark,
    ) -> Result<GameRecord, SessionError> {
        let mut inner = self.inner.lock().await;
        let mut id = SessionId::from(inner.next_id);
        while inner.records.contains_key(&id) {
            inner.next_id += 1;
            id = SessionId::from(inner.next_id);
        }
        inner.next_id += 1;

        let mut record = GameRecord::new(id.clone());
        record.seats = Some(seats);
        record.turn = starting_turn;
        inner.records.insert(id.clone(), record.clone());

        tracing::info!(%previous, new_session = %id, "rematch record created");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seats() -> Seats {
        Seats {
            x: UserId(1),
            o: UserId(2),
        }
    }

    fn started() -> GameRecord {
        let mut record = GameRecord::new(SessionId::from("1"));
        record.seats = Some(seats());
        record
    }

    #[test]
    fn test_seats_mark_of() {
        assert_eq!(seats().mark_of(UserId(1)), Some(Mark::X));
        assert_eq!(seats().mark_of(UserId(2)), Some(Mark::O));
        assert_eq!(seats().mark_of(UserId(3)), None);
        assert_eq!(seats().user_of(Mark::O), UserId(2));
    }

    #[test]
    fn test_apply_rejects_before_start() {
        let mut record = GameRecord::new(SessionId::from("1"));
        assert_eq!(record.apply(Mark::X, 0), Err("game has not started".into()));
    }

    #[test]
    fn test_apply_wrong_turn_and_occupied() {
        let mut record = started();
        assert_eq!(record.apply(Mark::O, 0), Err("not your turn".into()));
        record.apply(Mark::X, 0).unwrap();
        assert_eq!(record.turn, Mark::O);
        assert_eq!(record.apply(Mark::O, 0), Err("cell is occupied".into()));
    }

    #[test]
    fn test_apply_detects_win() {
        let mut record = started();
        for (mark, pos) in [(Mark::X, 0), (Mark::O, 3), (Mark::X, 1), (Mark::O, 4), (Mark::X, 2)] {
            record.apply(mark, pos).unwrap();
        }
        assert_eq!(record.winner, Some(Mark::X));
        assert!(record.completed);
        assert_eq!(record.apply(Mark::O, 8), Err("game is over".into()));
    }

    #[test]
    fn test_apply_detects_draw() {
        let mut record = started();
        // X O X / X O O / O X X
        for (mark, pos) in [
            (Mark::X, 0), (Mark::O, 1), (Mark::X, 2),
            (Mark::O, 4), (Mark::X, 3), (Mark::O, 5),
            (Mark::X, 7), (Mark::O, 6), (Mark::X, 8),
        ] {
            record.apply(mark, pos).unwrap();
        }
        assert!(record.completed);
        assert_eq!(record.winner, None);
    }

    #[tokio::test]
    async fn test_start_second_call_keeps_first_turn() {
        let records = MemoryGameRecords::default();
        let session = SessionId::from("42");

        let first = records.start(&session, seats(), Mark::O).await.unwrap();
        let second = records.start(&session, seats(), Mark::X).await.unwrap();

        assert_eq!(first.turn, Mark::O);
        assert_eq!(second.turn, Mark::O, "second start must not re-roll");
    }

    #[tokio::test]
    async fn test_start_completed_game_refused() {
        let records = MemoryGameRecords::default();
        let mut record = started();
        record.completed = true;
        records.insert(record).await;

        let result = records.start(&SessionId::from("1"), seats(), Mark::X).await;
        assert!(matches!(result, Err(SessionError::InvalidRecord(..))));
    }

    #[tokio::test]
    async fn test_apply_move_unknown_session_not_found() {
        let records = MemoryGameRecords::default();
        let result = records.apply_move(&SessionId::from("nope"), Mark::X, 0).await;
        assert!(matches!(result, Err(SessionError::RecordNotFound(_))));
    }

    #[tokio::test]
    async fn test_create_rematch_mints_unused_ids() {
        let records = MemoryGameRecords::new(100);
        records.insert(GameRecord::new(SessionId::from(100))).await;

        let a = records.create_rematch(&SessionId::from("1"), seats(), Mark::X).await.unwrap();
        let b = records.create_rematch(&SessionId::from("1"), seats(), Mark::O).await.unwrap();

        assert_eq!(a.session_id, SessionId::from(101));
        assert_eq!(b.session_id, SessionId::from(102));
        assert!(b.is_started());
        assert_eq!(b.turn, Mark::O);
    }
}
