//! Wire protocol for Lobbyforge.
//!
//! This crate defines the "language" that clients and the server speak:
//!
//! - **Types** ([`UserId`], [`SessionId`], [`Role`], [`Mark`],
//!   [`PlayerEntry`]): identities and roster entries.
//! - **Messages** ([`ClientRequest`], [`ServerMessage`]): the JSON
//!   envelope `{ "type": ..., ... }` in both directions, validated per
//!   [`ConnectionKind`] against an explicit allow-list.
//! - **Close codes** ([`CloseReason`]): why the server hung up.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): bytes in, bytes out.
//!
//! ```text
//! Transport (bytes) → Protocol (ClientRequest) → Lobby (roles, rematch)
//! ```

mod close;
mod codec;
mod error;
mod messages;
mod types;

pub use close::CloseReason;
pub use codec::{Codec, JsonCodec};
pub use error::{EnvelopeError, ProtocolError};
pub use messages::{
    ClientRequest, ConnectionKind, GameRequest, LobbyRequest, ServerMessage,
    parse_request,
};
pub use types::{
    BOARD_CELLS, Board, ChannelName, Mark, PlayerEntry, Role, SessionId,
    UserId,
};
