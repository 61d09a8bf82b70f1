//! Error types for the shared state layer.

/// Errors that can occur talking to the shared state backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend couldn't be reached. Read paths log and degrade,
    /// the join path refuses the connection.
    #[error("shared state store unavailable: {0}")]
    Unavailable(String),

    /// The backend answered, but with data we can't interpret.
    #[error("corrupt shared state: {0}")]
    Corrupt(String),

    /// The backend rejected a command.
    #[error("shared state backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Returns `true` for transient unavailability.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}
