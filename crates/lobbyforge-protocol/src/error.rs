//! Error types for the protocol layer.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A client envelope failed validation.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Why a client envelope was rejected.
///
/// Every variant is a client mistake. Whether it ends the connection is
/// the handler's decision, see [`EnvelopeError::is_disallowed_type`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// The payload isn't JSON at all.
    #[error("message is not valid JSON")]
    NotJson,

    /// Valid JSON, but not an object.
    #[error("message must be a JSON object")]
    NotAnObject,

    /// The object has no `type` field.
    #[error("message is missing the `type` field")]
    MissingType,

    /// `type` is present but not a string, e.g. `{"type": 123}`.
    #[error("message `type` must be a string")]
    TypeNotString,

    /// A well-formed envelope whose `type` isn't allowed on this
    /// connection kind.
    #[error("unsupported message type `{0}`")]
    UnknownType(String),

    /// The `type` is allowed but its fields are missing or mistyped.
    #[error("invalid `{kind}` message: {reason}")]
    InvalidFields { kind: String, reason: String },

    /// A move position outside the 3x3 board.
    #[error("position {0} is out of range (0-8)")]
    PositionOutOfRange(u8),
}

impl EnvelopeError {
    /// `true` for well-formed envelopes carrying a type the connection
    /// kind doesn't accept. Everything else is a malformed envelope.
    pub fn is_disallowed_type(&self) -> bool {
        matches!(self, Self::UnknownType(_))
    }
}
