/// Transport failures, as seen by a connection handler.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket is already closed; carries the connection id.
    #[error("connection {0} is closed")]
    ConnectionClosed(String),

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding the listener, accepting a socket, or the upgrade handshake
    /// failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),
}

impl TransportError {
    /// Whether the peer (or we) had already closed the socket. Such
    /// failures are routine at disconnect time.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_closed_only_for_connection_closed() {
        assert!(TransportError::ConnectionClosed("conn-1".into()).is_closed());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(!TransportError::SendFailed(io).is_closed());
    }

    #[test]
    fn test_connection_closed_names_connection() {
        let err = TransportError::ConnectionClosed("conn-7".into());
        assert_eq!(err.to_string(), "connection conn-7 is closed");
    }
}
