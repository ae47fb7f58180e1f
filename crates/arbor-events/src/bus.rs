//! In-process broadcast bus from the services to the gateway.
//!
//! Collaboration state changes travel through the ephemeral store's pub/sub
//! (which also reaches other server instances). This bus carries what never
//! touches the ephemeral store: persisted activities and domain diffs that
//! external callers hand to the REST surface for fan-out. The services
//! publish here and the gateway subscribes, so the dependency stays one-way.

use std::sync::Arc;

use arbor_core::{CanvasId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// Default channel capacity for the bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// The kind of domain diff carried by a `canvas_change` broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasChangeKind {
    /// A conversation tree was created.
    TreeCreated,
    /// A conversation tree was updated.
    TreeUpdated,
    /// A conversation tree was deleted.
    TreeDeleted,
    /// A node was created.
    NodeCreated,
    /// A node was updated.
    NodeUpdated,
    /// A node was deleted.
    NodeDeleted,
}

impl CanvasChangeKind {
    /// The wire name carried in the `canvas_change` frame.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TreeCreated => "tree_created",
            Self::TreeUpdated => "tree_updated",
            Self::TreeDeleted => "tree_deleted",
            Self::NodeCreated => "node_created",
            Self::NodeUpdated => "node_updated",
            Self::NodeDeleted => "node_deleted",
        }
    }
}

/// A fan-out directive published by the services.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// A persisted activity for the canvas room; `notify` additionally
    /// requests a toast (`activity_notification`) for high-priority types.
    Activity {
        /// Target canvas room.
        canvas_id: CanvasId,
        /// The serialized activity record.
        activity: serde_json::Value,
        /// Whether to also emit an `activity_notification` toast.
        notify: bool,
    },
    /// A flushed batch of activities for the canvas room.
    BulkActivity {
        /// Target canvas room.
        canvas_id: CanvasId,
        /// The serialized activity records.
        activities: Vec<serde_json::Value>,
    },
    /// A domain diff from an external collaborator (node-edit RPC and
    /// friends), emitted directly to already-joined clients.
    CanvasChange {
        /// Target canvas room.
        canvas_id: CanvasId,
        /// Which domain object changed and how.
        kind: CanvasChangeKind,
        /// The diff payload handed in by the caller.
        payload: serde_json::Value,
    },
    /// A message addressed to one user's connections, on any canvas.
    ToUser {
        /// Target user.
        user_id: UserId,
        /// Socket event name.
        event: String,
        /// Frame payload.
        payload: serde_json::Value,
    },
}

/// Broadcast bus delivering [`BusEvent`]s to all gateway subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<BusEvent>>,
}

impl EventBus {
    /// Create a bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of receivers that observed the event; zero when no
    /// gateway is attached, which is fine (nothing to fan out to).
    pub fn publish(&self, event: BusEvent) -> usize {
        let event = Arc::new(event);
        match self.sender.send(Arc::clone(&event)) {
            Ok(count) => {
                debug!(receiver_count = count, "bus event published");
                count
            },
            Err(_) => {
                trace!("no receivers for bus event");
                0
            },
        }
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> BusReceiver {
        BusReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// The current number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver half of the bus.
pub struct BusReceiver {
    receiver: broadcast::Receiver<Arc<BusEvent>>,
}

impl BusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` when the bus is closed. Lagged receivers skip the
    /// dropped events and keep going; a reconnecting client re-snapshots
    /// anyway.
    pub async fn recv(&mut self) -> Option<Arc<BusEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "bus receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive without waiting; `None` when nothing is queued or the bus is
    /// closed.
    pub fn try_recv(&mut self) -> Option<Arc<BusEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "bus receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change_event() -> BusEvent {
        BusEvent::CanvasChange {
            canvas_id: CanvasId::new("c1"),
            kind: CanvasChangeKind::NodeCreated,
            payload: serde_json::json!({ "nodeId": "n1" }),
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        assert_eq!(bus.publish(change_event()), 1);

        let event = receiver.recv().await.unwrap();
        assert!(matches!(
            event.as_ref(),
            BusEvent::CanvasChange {
                kind: CanvasChangeKind::NodeCreated,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(change_event()), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.publish(change_event()), 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[test]
    fn test_change_kind_wire_names() {
        assert_eq!(CanvasChangeKind::TreeCreated.as_str(), "tree_created");
        assert_eq!(CanvasChangeKind::NodeDeleted.as_str(), "node_deleted");
    }
}
