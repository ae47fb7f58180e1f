//! Shared harness for the collaboration scenario tests.

use std::sync::Arc;
use std::time::Duration;

use arbor_activity::{ActivityConfig, ActivityService};
use arbor_collab::{CollabConfig, CollaborationService};
use arbor_core::UserInfo;
use arbor_ephemeral::{EphemeralStore, MemoryStore, PubSubMessage};
use arbor_events::{EventBus, EventEnvelope};
use arbor_session::{MemoryActivityStore, MemorySessionStore};
use tokio::sync::mpsc;

/// Everything a scenario needs, wired over in-memory stores.
pub struct CollabHarness {
    pub collab: CollaborationService,
    pub activity: ActivityService,
    pub bus: EventBus,
    pub ephemeral: Arc<MemoryStore>,
}

impl CollabHarness {
    pub fn new() -> Self {
        Self::with_configs(CollabConfig::default(), ActivityConfig::default())
    }

    pub fn with_configs(collab_config: CollabConfig, activity_config: ActivityConfig) -> Self {
        let ephemeral = Arc::new(MemoryStore::new());
        let bus = EventBus::new();
        let collab = CollaborationService::new(
            Arc::clone(&ephemeral) as Arc<dyn EphemeralStore>,
            Arc::new(MemorySessionStore::new()),
            collab_config,
        );
        let activity = ActivityService::new(
            Arc::new(MemoryActivityStore::new()),
            bus.clone(),
            activity_config,
        );
        Self {
            collab,
            activity,
            bus,
            ephemeral,
        }
    }

    /// Subscribe to every canvas event channel.
    pub async fn events(&self) -> mpsc::Receiver<PubSubMessage> {
        self.ephemeral
            .pattern_subscribe("canvas:*:events")
            .await
            .expect("memory store subscription cannot fail")
    }

    pub fn user(id: &str) -> UserInfo {
        UserInfo::new(id, format!("User {id}"), format!("{id}@example.com"))
    }
}

/// Collect the next `count` event types from an event receiver.
pub async fn next_event_types(rx: &mut mpsc::Receiver<PubSubMessage>, count: usize) -> Vec<String> {
    let mut types = Vec::new();
    for _ in 0..count {
        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        let envelope =
            EventEnvelope::from_json(&message.payload).expect("event payload must parse");
        types.push(envelope.event.event_type().to_string());
    }
    types
}
