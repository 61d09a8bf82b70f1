//! Session coordination for Lobbyforge.
//!
//! Everything a joined connection asks for goes through this crate.
//! Handlers read and write shared state only through the
//! [`SharedStateStore`](lobbyforge_store::SharedStateStore) and return a
//! [`Dispatch`] (who gets which message) that the connection delivers
//! through the [`SessionRegistry`].
//!
//! # Key types
//!
//! - [`SessionRegistry`]: session → live channels, FIFO per channel
//! - [`RoleAssigner`]: X, O, then Spectator; roster view
//! - [`MatchFlow`]: `start_game` and `move`
//! - [`RematchCoordinator`]: offer / accept / decline

mod error;
mod match_flow;
mod rematch;
mod registry;
mod roles;

pub use error::LobbyError;
pub use match_flow::{MatchFlow, game_update, random_mark};
pub use registry::{ChannelSender, Dispatch, Outbound, Recipient, SessionRegistry};
pub use rematch::RematchCoordinator;
pub use roles::RoleAssigner;
