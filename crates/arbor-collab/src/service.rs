//! Service construction, configuration, and the publish path.

use std::sync::Arc;
use std::time::Duration;

use arbor_core::CollabError;
use arbor_ephemeral::{EphemeralError, EphemeralStore, keys};
use arbor_events::{CanvasEvent, EventEnvelope};
use arbor_session::{SessionError, SessionStore};
use tracing::warn;

/// Time-to-live and throttle knobs, resolved from configuration at boot.
#[derive(Debug, Clone, Copy)]
pub struct CollabConfig {
    /// Presence and focus record TTL.
    pub presence_ttl: Duration,
    /// Heartbeat record TTL; staleness cleanup evicts at twice this.
    pub heartbeat_ttl: Duration,
    /// Cursor record TTL.
    pub cursor_ttl: Duration,
    /// Typing indicator TTL.
    pub typing_ttl: Duration,
    /// Minimum interval between cursor writes per user.
    pub cursor_throttle: Duration,
    /// Default node lock duration.
    pub lock_duration: Duration,
    /// Idle window after which durable sessions are deactivated.
    pub session_timeout: Duration,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            presence_ttl: Duration::from_secs(300),
            heartbeat_ttl: Duration::from_secs(30),
            cursor_ttl: Duration::from_secs(60),
            typing_ttl: Duration::from_secs(10),
            cursor_throttle: Duration::from_secs(1),
            lock_duration: Duration::from_secs(30),
            session_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// The collaboration service.
///
/// Cheap to clone; all state lives behind the two stores.
#[derive(Clone)]
pub struct CollaborationService {
    pub(crate) store: Arc<dyn EphemeralStore>,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) config: CollabConfig,
}

impl CollaborationService {
    /// Build a service over the two stores.
    #[must_use]
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        sessions: Arc<dyn SessionStore>,
        config: CollabConfig,
    ) -> Self {
        Self {
            store,
            sessions,
            config,
        }
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &CollabConfig {
        &self.config
    }

    /// The ephemeral store handle.
    #[must_use]
    pub fn ephemeral(&self) -> &Arc<dyn EphemeralStore> {
        &self.store
    }

    /// The durable session store handle.
    #[must_use]
    pub fn durable(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Publish a state-change event on its canvas channel.
    ///
    /// Publish failures never roll back the state change: the write already
    /// happened, other clients reconcile on their next snapshot fetch. The
    /// failure is logged and swallowed.
    pub(crate) async fn publish_event(&self, event: CanvasEvent) {
        let channel = keys::events_channel(event.canvas_id());
        let envelope = EventEnvelope::new(event);
        let payload = match envelope.to_json() {
            Ok(p) => p,
            Err(err) => {
                warn!(%err, channel, "failed to serialize event, broadcast dropped");
                return;
            },
        };
        if let Err(err) = self.store.publish(&channel, &payload).await {
            warn!(%err, channel, "event publish failed, state change retained");
        }
    }

    /// Publish without blocking the caller; used on the cursor hot path.
    pub(crate) fn publish_event_detached(&self, event: CanvasEvent) {
        let service = self.clone();
        tokio::spawn(async move {
            service.publish_event(event).await;
        });
    }

    /// Map an ephemeral store failure onto the collaboration error set.
    pub(crate) fn store_err(err: EphemeralError) -> CollabError {
        match err {
            EphemeralError::Connection(_) | EphemeralError::ReadyTimeout(_) => {
                CollabError::StoreUnavailable(err.to_string())
            },
            EphemeralError::Command(_) | EphemeralError::Serialization(_) => {
                CollabError::Internal(err.to_string())
            },
        }
    }

    /// Map a durable store failure onto the collaboration error set.
    pub(crate) fn durable_err(err: SessionError) -> CollabError {
        CollabError::Internal(err.to_string())
    }
}

impl std::fmt::Debug for CollaborationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollaborationService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use arbor_core::UserInfo;
    use arbor_ephemeral::MemoryStore;
    use arbor_session::MemorySessionStore;

    /// A service over fresh in-memory stores with fast test TTLs.
    pub(crate) fn service() -> CollaborationService {
        service_with(CollabConfig::default())
    }

    pub(crate) fn service_with(config: CollabConfig) -> CollaborationService {
        CollaborationService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySessionStore::new()),
            config,
        )
    }

    pub(crate) fn user(id: &str) -> UserInfo {
        UserInfo::new(id, format!("User {id}"), format!("{id}@example.com"))
    }
}
