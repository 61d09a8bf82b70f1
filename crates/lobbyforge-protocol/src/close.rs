//! Application close codes.
//!
//! Codes in the 4000-4999 range are reserved by RFC 6455 for
//! applications; several of them deliberately echo the HTTP status they
//! correspond to (4401 ~ 401, 4403 ~ 403, ...).

/// Why the server closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Client-initiated leave.
    Normal,
    /// A message type the connection kind treats as a protocol violation.
    ProtocolViolation,
    /// No auth token, or the authenticator rejected it.
    Unauthenticated,
    /// `/lobby/` without a session id.
    MissingLobbyId,
    /// The invite belongs to someone else or isn't usable by this party yet.
    InviteForbidden,
    /// The invite doesn't exist, is declined/canceled, or names another
    /// session.
    InviteInvalid,
    /// Neither (or both) of `invite` and `sessionKey` was presented.
    MissingCredentials,
    /// `/game/` without a session id, or an unknown route.
    UnknownRoute,
    /// The invite's expiry has passed.
    InviteExpired,
    /// The session key doesn't match the session's stored key.
    SessionKeyInvalid,
    /// Shared state or a collaborator failed while joining.
    ServerError,
}

impl CloseReason {
    /// The numeric close code sent in the close frame.
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::ProtocolViolation => 4003,
            Self::Unauthenticated => 4401,
            Self::MissingLobbyId => 4402,
            Self::InviteForbidden => 4403,
            Self::InviteInvalid | Self::MissingCredentials | Self::UnknownRoute => 4404,
            Self::InviteExpired | Self::SessionKeyInvalid => 4408,
            Self::ServerError => 4500,
        }
    }

    /// A short human-readable reason for the close frame.
    pub fn description(self) -> &'static str {
        match self {
            Self::Normal => "bye",
            Self::ProtocolViolation => "protocol violation",
            Self::Unauthenticated => "authentication required",
            Self::MissingLobbyId => "missing lobby id",
            Self::InviteForbidden => "invite not usable by this user",
            Self::InviteInvalid => "invalid invite",
            Self::MissingCredentials => "exactly one of invite or sessionKey required",
            Self::UnknownRoute => "unknown route or missing game id",
            Self::InviteExpired => "invite expired",
            Self::SessionKeyInvalid => "invalid or expired session key",
            Self::ServerError => "server error initializing session",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes_match_wire_contract() {
        assert_eq!(CloseReason::Normal.code(), 1000);
        assert_eq!(CloseReason::ProtocolViolation.code(), 4003);
        assert_eq!(CloseReason::Unauthenticated.code(), 4401);
        assert_eq!(CloseReason::MissingLobbyId.code(), 4402);
        assert_eq!(CloseReason::InviteForbidden.code(), 4403);
        assert_eq!(CloseReason::InviteInvalid.code(), 4404);
        assert_eq!(CloseReason::MissingCredentials.code(), 4404);
        assert_eq!(CloseReason::InviteExpired.code(), 4408);
        assert_eq!(CloseReason::SessionKeyInvalid.code(), 4408);
        assert_eq!(CloseReason::ServerError.code(), 4500);
    }

    #[test]
    fn test_close_reason_display_includes_code() {
        assert_eq!(CloseReason::InviteExpired.to_string(), "invite expired (4408)");
    }
}
