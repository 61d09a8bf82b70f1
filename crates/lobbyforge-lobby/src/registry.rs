//! Per-session fan-out of server messages to live channels.
//!
//! Every joined connection registers an unbounded sender here. The
//! connection's writer task is the only consumer of the matching
//! receiver, so everything queued for one channel is written to the
//! socket in queue order. Ordering across channels isn't defined.

use std::collections::HashMap;

use lobbyforge_protocol::{ChannelName, CloseReason, ServerMessage, SessionId};
use tokio::sync::{RwLock, mpsc};

/// Something queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encode and send a message.
    Message(ServerMessage),
    /// Send a close frame and stop writing.
    Close(CloseReason),
}

/// Sending half of a channel's outbound queue.
pub type ChannelSender = mpsc::UnboundedSender<Outbound>;

/// Who should receive a message produced by a request handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every channel registered in the caller's session.
    Group,
    /// Only the connection that sent the request.
    Caller,
}

/// What a handler asks the connection to deliver, in order.
pub type Dispatch = Vec<(Recipient, ServerMessage)>;

/// Session id → registered channels.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    groups: RwLock<HashMap<SessionId, HashMap<ChannelName, ChannelSender>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel to a session's group, replacing a previous sender
    /// registered under the same name.
    pub async fn register(
        &self,
        session: &SessionId,
        channel: ChannelName,
        sender: ChannelSender,
    ) {
        let mut groups = self.groups.write().await;
        groups
            .entry(session.clone())
            .or_default()
            .insert(channel.clone(), sender);
        tracing::debug!(%session, %channel, "channel registered");
    }

    /// Removes a channel. Safe to call any number of times, including for
    /// channels that never registered. Returns whether it was present.
    pub async fn unregister(&self, session: &SessionId, channel: &ChannelName) -> bool {
        let mut groups = self.groups.write().await;
        let Some(group) = groups.get_mut(session) else {
            return false;
        };
        let removed = group.remove(channel).is_some();
        if group.is_empty() {
            groups.remove(session);
        }
        if removed {
            tracing::debug!(%session, %channel, "channel unregistered");
        }
        removed
    }

    /// Queues `message` for every channel in the session. Returns how many
    /// channels accepted it; channels whose writer is gone are skipped.
    pub async fn group_send(&self, session: &SessionId, message: &ServerMessage) -> usize {
        let groups = self.groups.read().await;
        let Some(group) = groups.get(session) else {
            return 0;
        };
        let delivered = group
            .values()
            .filter(|sender| sender.send(Outbound::Message(message.clone())).is_ok())
            .count();
        tracing::debug!(%session, kind = message.kind(), delivered, "group send");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId::from("42")
    }

    #[tokio::test]
    async fn test_group_send_reaches_every_channel_in_order() {
        let registry = SessionRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.register(&sid(), ChannelName::new("i", 1), tx_a).await;
        registry.register(&sid(), ChannelName::new("i", 2), tx_b).await;

        for n in 0..3 {
            let sent = registry
                .group_send(&sid(), &ServerMessage::error(n.to_string()))
                .await;
            assert_eq!(sent, 2);
        }

        for rx in [&mut rx_a, &mut rx_b] {
            for n in 0..3 {
                assert_eq!(
                    rx.recv().await,
                    Some(Outbound::Message(ServerMessage::error(n.to_string())))
                );
            }
        }
    }

    #[tokio::test]
    async fn test_group_send_other_session_not_reached() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(&SessionId::from("7"), ChannelName::new("i", 1), tx).await;

        assert_eq!(registry.group_send(&sid(), &ServerMessage::error("x")).await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let channel = ChannelName::new("i", 1);
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(!registry.unregister(&sid(), &channel).await);
        registry.register(&sid(), channel.clone(), tx).await;
        assert!(registry.unregister(&sid(), &channel).await);
        assert!(!registry.unregister(&sid(), &channel).await);
        assert_eq!(registry.group_send(&sid(), &ServerMessage::error("x")).await, 0);
    }

    #[tokio::test]
    async fn test_group_send_skips_dropped_writer() {
        let registry = SessionRegistry::new();
        let (gone, rx) = mpsc::unbounded_channel();
        let (live, mut live_rx) = mpsc::unbounded_channel();
        registry.register(&sid(), ChannelName::new("i", 1), gone).await;
        registry.register(&sid(), ChannelName::new("i", 2), live).await;
        drop(rx);

        assert_eq!(registry.group_send(&sid(), &ServerMessage::error("x")).await, 1);
        assert!(live_rx.try_recv().is_ok());
    }
}
