//! Per-connection lifecycle state machine.

/// Where a connection is between accept and close.
///
/// ```text
/// Connecting → Authenticating → Authorizing → Joined → Disconnecting → Closed
/// ```
///
/// - **Connecting**: upgrade done, route not yet checked.
/// - **Authenticating**: waiting on the authenticator.
/// - **Authorizing**: checking the invite or session key.
/// - **Joined**: registered in the session, running the message loop.
/// - **Disconnecting**: releasing the channel and shared state.
/// - **Closed**: nothing left to do.
///
/// A failure before `Joined` goes straight to `Closed`; only a joined
/// connection has anything to clean up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticating,
    Authorizing,
    Joined,
    Disconnecting,
    Closed,
}

impl ConnectionState {
    /// The next state on the success path, `None` once closed.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Connecting => Some(Self::Authenticating),
            Self::Authenticating => Some(Self::Authorizing),
            Self::Authorizing => Some(Self::Joined),
            Self::Joined => Some(Self::Disconnecting),
            Self::Disconnecting => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Returns `true` if moving to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target) || (target == Self::Closed && !self.has_joined())
    }

    /// Returns `true` once join-time state may exist.
    pub fn has_joined(self) -> bool {
        matches!(self, Self::Joined | Self::Disconnecting)
    }

    /// Moves to `target` if the transition is valid. Returns whether it
    /// moved.
    pub fn advance(&mut self, target: Self) -> bool {
        if self.can_transition_to(target) {
            *self = target;
            true
        } else {
            tracing::warn!(from = %self, to = %target, "invalid connection state transition");
            false
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Authorizing => write!(f, "Authorizing"),
            Self::Joined => write!(f, "Joined"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_next_follows_strict_order() {
        let mut state = ConnectionState::Connecting;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            state = next;
            seen.push(state);
        }
        assert_eq!(
            seen,
            [
                ConnectionState::Connecting,
                ConnectionState::Authenticating,
                ConnectionState::Authorizing,
                ConnectionState::Joined,
                ConnectionState::Disconnecting,
                ConnectionState::Closed,
            ]
        );
    }

    #[test]
    fn test_pre_join_failure_may_close_directly() {
        assert!(ConnectionState::Authenticating.can_transition_to(ConnectionState::Closed));
        assert!(ConnectionState::Authorizing.can_transition_to(ConnectionState::Closed));
        assert!(!ConnectionState::Joined.can_transition_to(ConnectionState::Closed));
    }

    #[test]
    fn test_cannot_skip_authorization() {
        let mut state = ConnectionState::Authenticating;
        assert!(!state.advance(ConnectionState::Joined));
        assert_eq!(state, ConnectionState::Authenticating);
        assert!(state.advance(ConnectionState::Authorizing));
    }

    #[test]
    fn test_has_joined() {
        assert!(!ConnectionState::Authorizing.has_joined());
        assert!(ConnectionState::Joined.has_joined());
        assert!(ConnectionState::Disconnecting.has_joined());
        assert!(!ConnectionState::Closed.has_joined());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Authorizing.to_string(), "Authorizing");
        assert_eq!(ConnectionState::Closed.to_string(), "Closed");
    }
}
