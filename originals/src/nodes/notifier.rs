//! Best-effort fan-out of node state changes.
//!
//! Every registry mutation publishes an event here. Publishing never blocks and never fails:
//! with no subscribers the event is dropped, and a subscriber that falls more than the channel
//! capacity behind skips the oldest events. Late subscribers recover full state by listing nodes.

use crate::db::models::nodes::NodeDBResponse;
use crate::types::{NodeId, abbrev_uuid};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use utoipa::ToSchema;

/// Wire name of a node event, used as the SSE event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeEventType {
    NodeUpdate,
    NodeRemoved,
}

impl std::fmt::Display for NodeEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeUpdate => write!(f, "node_update"),
            Self::NodeRemoved => write!(f, "node_removed"),
        }
    }
}

/// A change to the node registry.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A node was created or mutated; carries the full updated record
    Updated(NodeDBResponse),
    /// A node was deleted
    Removed(NodeId),
}

impl NodeEvent {
    pub fn event_type(&self) -> NodeEventType {
        match self {
            NodeEvent::Updated(_) => NodeEventType::NodeUpdate,
            NodeEvent::Removed(_) => NodeEventType::NodeRemoved,
        }
    }

    pub fn node_id(&self) -> NodeId {
        match self {
            NodeEvent::Updated(node) => node.id,
            NodeEvent::Removed(id) => *id,
        }
    }
}

/// Broadcasts [`NodeEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<NodeEvent>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to current subscribers.
    pub fn publish(&self, event: NodeEvent) {
        let event_type = event.event_type();
        let node_id = event.node_id();
        match self.sender.send(event) {
            Ok(receivers) => tracing::trace!(
                event = %event_type,
                node_id = %abbrev_uuid(&node_id),
                receivers,
                "Published node event"
            ),
            // No subscribers
            Err(_) => tracing::trace!(event = %event_type, node_id = %abbrev_uuid(&node_id), "Dropped node event"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::nodes::tests::online_node;

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let notifier = ChangeNotifier::new(4);
        notifier.publish(NodeEvent::Updated(online_node()));
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let notifier = ChangeNotifier::new(4);
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        let node = online_node();
        notifier.publish(NodeEvent::Updated(node.clone()));

        for rx in [&mut first, &mut second] {
            match rx.recv().await.unwrap() {
                NodeEvent::Updated(received) => assert_eq!(received.id, node.id),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let notifier = ChangeNotifier::new(2);
        let mut rx = notifier.subscribe();

        let node = online_node();
        for _ in 0..5 {
            notifier.publish(NodeEvent::Updated(node.clone()));
        }
        notifier.publish(NodeEvent::Removed(node.id));

        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(_))));
        // Oldest events were dropped, the latest survives
        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert!(matches!(last, Some(NodeEvent::Removed(id)) if id == node.id));
    }

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(NodeEventType::NodeUpdate.to_string(), "node_update");
        assert_eq!(
            serde_json::to_string(&NodeEventType::NodeRemoved).unwrap(),
            "\"node_removed\""
        );
    }
}
