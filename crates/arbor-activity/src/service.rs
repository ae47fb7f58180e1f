//! The activity service: recording, flush, queries, summary, retention.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arbor_core::{CanvasId, ConversationId, NodeId, UserId};
use arbor_events::{BusEvent, EventBus};
use arbor_session::{
    Activity, ActivityFilter, ActivityStore, ActivityType, SessionResult,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::batch::{BatchQueue, batch_key, coalesce};

/// Batching and retention knobs, resolved from configuration at boot.
#[derive(Debug, Clone, Copy)]
pub struct ActivityConfig {
    /// Flush window for batchable types.
    pub batch_window: Duration,
    /// Queue size that flushes immediately, without waiting for the timer.
    pub batch_max: usize,
    /// Days of history the retention job keeps.
    pub retention_days: u32,
    /// Feed query limit applied when the caller specifies none.
    pub default_query_limit: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            batch_window: Duration::from_millis(2_000),
            batch_max: 10,
            retention_days: 30,
            default_query_limit: 50,
        }
    }
}

/// A domain event submitted by an external collaborator.
#[derive(Debug, Clone)]
pub struct ActivityInput {
    /// The canvas the event happened on.
    pub canvas_id: CanvasId,
    /// Conversation scope, when applicable.
    pub conversation_id: Option<ConversationId>,
    /// Node scope, when applicable.
    pub node_id: Option<NodeId>,
    /// The acting user.
    pub user_id: UserId,
    /// The acting user's display name.
    pub user_name: String,
    /// Domain event type.
    pub activity_type: ActivityType,
    /// Human-readable description.
    pub description: String,
    /// Free-form payload.
    pub metadata: serde_json::Value,
}

/// What happened to a submitted activity.
#[derive(Debug, Clone)]
pub enum Recorded {
    /// Persisted and broadcast immediately.
    Immediate(Activity),
    /// Queued into a batch; it will persist on the next flush.
    Batched,
}

/// Per-type slice of an activity summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSummary {
    /// Events of this type inside the window.
    pub count: usize,
    /// Distinct users who produced them.
    pub users: Vec<UserId>,
    /// The newest event's timestamp.
    pub latest_activity: DateTime<Utc>,
}

/// One row of the most-active-users table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivityCount {
    /// The user.
    pub user_id: UserId,
    /// Display name, denormalized from the newest record.
    pub user_name: String,
    /// Events inside the window.
    pub count: usize,
}

/// Aggregated view of a canvas's recent activity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    /// The canvas summarized.
    pub canvas_id: CanvasId,
    /// Window length in hours.
    pub window_hours: u32,
    /// Total events in the window.
    pub total: usize,
    /// Breakdown keyed by wire type name.
    pub by_type: HashMap<String, TypeSummary>,
    /// The ten most active users, descending.
    pub top_users: Vec<UserActivityCount>,
}

/// The activity service.
#[derive(Clone)]
pub struct ActivityService {
    store: Arc<dyn ActivityStore>,
    bus: EventBus,
    config: ActivityConfig,
    queues: Arc<DashMap<String, BatchQueue>>,
}

impl ActivityService {
    /// Build a service over a store and the gateway bus.
    #[must_use]
    pub fn new(store: Arc<dyn ActivityStore>, bus: EventBus, config: ActivityConfig) -> Self {
        Self {
            store,
            bus,
            config,
            queues: Arc::new(DashMap::new()),
        }
    }

    /// Record a domain event.
    ///
    /// Batchable types join their `(canvas, user, type)` queue and flush on
    /// the window timer or when the queue reaches the size cap, whichever
    /// comes first; reaching the cap flushes immediately. Everything else
    /// persists and broadcasts right away.
    ///
    /// # Errors
    ///
    /// Fails when the immediate persist fails; queued items report flush
    /// failures through logs only.
    pub async fn record(&self, input: ActivityInput) -> SessionResult<Recorded> {
        let activity = Activity {
            id: Uuid::new_v4(),
            canvas_id: input.canvas_id,
            conversation_id: input.conversation_id,
            node_id: input.node_id,
            user_id: input.user_id,
            user_name: input.user_name,
            activity_type: input.activity_type,
            description: input.description,
            priority: input.activity_type.priority(),
            metadata: input.metadata,
            timestamp: Utc::now(),
            batch_id: None,
        };

        if !activity.activity_type.is_batchable() {
            let persisted = self.persist_and_broadcast(activity).await?;
            return Ok(Recorded::Immediate(persisted));
        }

        let key = batch_key(&activity.canvas_id, &activity.user_id, activity.activity_type);
        let flush_now = {
            let mut queue = self.queues.entry(key.clone()).or_insert_with(|| {
                let service = self.clone();
                let timer_key = key.clone();
                let window = self.config.batch_window;
                BatchQueue {
                    items: Vec::new(),
                    timer: Some(tokio::spawn(async move {
                        tokio::time::sleep(window).await;
                        service.flush_key(&timer_key).await;
                    })),
                }
            });
            queue.items.push(activity);
            queue.items.len() >= self.config.batch_max
        };

        if flush_now {
            self.flush_key(&key).await;
        }
        Ok(Recorded::Batched)
    }

    /// Flush one batch queue: coalesce, persist once, broadcast once.
    async fn flush_key(&self, key: &str) {
        // Removing the entry also aborts its timer (queue drop), so the
        // size-triggered path and the timer path cannot both flush.
        let Some((_, queue)) = self.queues.remove(key) else {
            return;
        };
        let Some(batch) = coalesce(queue.items.clone()) else {
            return;
        };

        debug!(key, count = batch.metadata["batchCount"].as_u64(), "flushing activity batch");
        if let Err(err) = self.persist_and_broadcast(batch).await {
            warn!(%err, key, "activity batch flush failed, batch dropped");
        }
    }

    /// Flush every pending queue; called on shutdown.
    pub async fn flush_all(&self) {
        let keys: Vec<String> = self.queues.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            self.flush_key(&key).await;
        }
    }

    async fn persist_and_broadcast(&self, activity: Activity) -> SessionResult<Activity> {
        let persisted = self.store.insert(activity).await?;
        let payload = serde_json::to_value(&persisted)
            .map_err(|e| arbor_session::SessionError::Serialization(e.to_string()))?;
        self.bus.publish(BusEvent::Activity {
            canvas_id: persisted.canvas_id.clone(),
            activity: payload,
            notify: persisted.activity_type.is_notification(),
        });
        Ok(persisted)
    }

    /// Query the feed, newest first, with the default limit applied when the
    /// caller gave none.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_activities(&self, mut filter: ActivityFilter) -> SessionResult<Vec<Activity>> {
        filter.limit = Some(filter.limit.unwrap_or(self.config.default_query_limit));
        self.store.query(&filter).await
    }

    /// Summarize a canvas's activity over the trailing window.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_activity_summary(
        &self,
        canvas_id: CanvasId,
        hours: Option<u32>,
    ) -> SessionResult<ActivitySummary> {
        let window_hours = hours.unwrap_or(24);
        let since = Utc::now() - chrono::Duration::hours(i64::from(window_hours));
        let window = self
            .store
            .query(&ActivityFilter {
                canvas_id: Some(canvas_id.clone()),
                start_date: Some(since),
                ..ActivityFilter::default()
            })
            .await?;

        let mut by_type: HashMap<String, TypeSummary> = HashMap::new();
        let mut per_user: HashMap<UserId, (String, usize)> = HashMap::new();
        for activity in &window {
            let slot = by_type
                .entry(activity.activity_type.as_str().to_string())
                .or_insert_with(|| TypeSummary {
                    count: 0,
                    users: Vec::new(),
                    latest_activity: activity.timestamp,
                });
            slot.count += 1;
            if !slot.users.contains(&activity.user_id) {
                slot.users.push(activity.user_id.clone());
            }
            if activity.timestamp > slot.latest_activity {
                slot.latest_activity = activity.timestamp;
            }

            let user = per_user
                .entry(activity.user_id.clone())
                .or_insert_with(|| (activity.user_name.clone(), 0));
            user.1 += 1;
        }

        let mut top_users: Vec<UserActivityCount> = per_user
            .into_iter()
            .map(|(user_id, (user_name, count))| UserActivityCount {
                user_id,
                user_name,
                count,
            })
            .collect();
        top_users.sort_by(|a, b| b.count.cmp(&a.count).then(a.user_id.cmp(&b.user_id)));
        top_users.truncate(10);

        Ok(ActivitySummary {
            canvas_id,
            window_hours,
            total: window.len(),
            by_type,
            top_users,
        })
    }

    /// Delete activities older than the retention window.
    ///
    /// Returns the number deleted.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn cleanup_old_activities(&self, days_to_keep: Option<u32>) -> SessionResult<u64> {
        let days = days_to_keep.unwrap_or(self.config.retention_days);
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let deleted = self.store.delete_older_than(cutoff).await?;
        if deleted > 0 {
            debug!(deleted, days, "old activities removed");
        }
        Ok(deleted)
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &ActivityConfig {
        &self.config
    }
}

impl std::fmt::Debug for ActivityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityService")
            .field("config", &self.config)
            .field("pending_queues", &self.queues.len())
            .finish_non_exhaustive()
    }
}
