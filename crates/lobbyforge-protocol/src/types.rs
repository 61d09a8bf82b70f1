//! Identity and roster types shared by every layer.
//!
//! These are "newtype wrappers" around primitives so a `UserId` can't be
//! passed where a `SessionId` is expected. `#[serde(transparent)]` keeps
//! the wire form flat: `UserId(42)` is just `42` in JSON.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A user as known to the authentication collaborator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

/// One shared match: a lobby and the game played in it.
///
/// Session ids come from the route (`/lobby/42`) or from the game-state
/// collaborator when a rematch creates a new record, so they're kept as
/// opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a raw session id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw id, as used in store keys and routes.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Names one live connection for fan-out, unique across server
/// processes (`{instance}.{connection}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    /// Builds a channel name from a server instance prefix and a
    /// process-local connection number.
    pub fn new(instance: &str, connection: u64) -> Self {
        Self(format!("{instance}.{connection}"))
    }

    /// Wraps an already-formatted channel name (e.g. read from a store).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Roles and marks
// ---------------------------------------------------------------------------

/// A board marker. Only the two seated players have one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    /// The other player's mark.
    pub fn other(self) -> Self {
        match self {
            Self::X => Self::O,
            Self::O => Self::X,
        }
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::X => "X",
            Self::O => "O",
        })
    }
}

/// A participant's function in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    X,
    O,
    Spectator,
}

impl Role {
    /// The string stored in shared state and sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X => "X",
            Self::O => "O",
            Self::Spectator => "Spectator",
        }
    }

    /// The board marker for seated players, `None` for spectators.
    pub fn mark(self) -> Option<Mark> {
        match self {
            Self::X => Some(Mark::X),
            Self::O => Some(Mark::O),
            Self::Spectator => None,
        }
    }
}

impl From<Mark> for Role {
    fn from(mark: Mark) -> Self {
        match mark {
            Mark::X => Self::X,
            Mark::O => Self::O,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "X" => Ok(Self::X),
            "O" => Ok(Self::O),
            "Spectator" => Ok(Self::Spectator),
            other => Err(format!("unknown role `{other}`")),
        }
    }
}

// ---------------------------------------------------------------------------
// Roster and board
// ---------------------------------------------------------------------------

/// One line of the roster broadcast in `update_player_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
}

/// Number of cells on the board; move positions are `0..BOARD_CELLS`.
pub const BOARD_CELLS: usize = 9;

/// Row-major 3x3 board, `None` for an empty cell.
pub type Board = [Option<Mark>; BOARD_CELLS];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_serializes_as_bare_number() {
        let json = serde_json::to_string(&UserId(42)).unwrap();
        assert_eq!(json, "42");
        assert_eq!(UserId(42).to_string(), "U-42");
    }

    #[test]
    fn test_session_id_from_number_and_str_agree() {
        assert_eq!(SessionId::from(42), SessionId::from("42"));
        assert_eq!(serde_json::to_string(&SessionId::from(42)).unwrap(), "\"42\"");
    }

    #[test]
    fn test_channel_name_joins_instance_and_connection() {
        assert_eq!(ChannelName::new("a1b2", 7).as_str(), "a1b2.7");
    }

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::X, Role::O, Role::Spectator] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("Z".parse::<Role>().is_err());
    }

    #[test]
    fn test_role_mark_only_for_seated_players() {
        assert_eq!(Role::X.mark(), Some(Mark::X));
        assert_eq!(Role::O.mark(), Some(Mark::O));
        assert_eq!(Role::Spectator.mark(), None);
        assert_eq!(Mark::X.other(), Mark::O);
    }

    #[test]
    fn test_player_entry_uses_camel_case() {
        let entry = PlayerEntry {
            user_id: UserId(1),
            display_name: "Ada".into(),
            role: Role::X,
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"userId": 1, "displayName": "Ada", "role": "X"})
        );
    }
}
