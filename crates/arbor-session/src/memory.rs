//! In-memory implementations of the persistence traits, used by tests and
//! by deployments without a durable store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use arbor_core::{CanvasId, SessionId};

use crate::error::SessionResult;
use crate::records::{Activity, ActivityFilter, EditingSession};
use crate::store::{ActivityStore, SessionStore};

/// In-memory session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, EditingSession>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: EditingSession) -> SessionResult<EditingSession> {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: &SessionId) -> SessionResult<Option<EditingSession>> {
        let sessions = self.sessions.lock().expect("session mutex poisoned");
        Ok(sessions.get(session_id).cloned())
    }

    async fn touch(&self, session_id: &SessionId) -> SessionResult<Option<EditingSession>> {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        match sessions.get_mut(session_id) {
            Some(session) if session.is_active => {
                session.last_activity_at = Utc::now();
                session.version += 1;
                Ok(Some(session.clone()))
            },
            _ => Ok(None),
        }
    }

    async fn end(&self, session_id: &SessionId) -> SessionResult<bool> {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        match sessions.get_mut(session_id) {
            Some(session) if session.is_active => {
                session.is_active = false;
                session.has_lock = false;
                session.lock_expiry = None;
                session.last_activity_at = Utc::now();
                session.version += 1;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn set_lock(
        &self,
        session_id: &SessionId,
        expiry: DateTime<Utc>,
    ) -> SessionResult<Option<EditingSession>> {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        match sessions.get_mut(session_id) {
            Some(session) if session.is_active => {
                session.has_lock = true;
                session.lock_expiry = Some(expiry);
                session.last_activity_at = Utc::now();
                session.version += 1;
                Ok(Some(session.clone()))
            },
            _ => Ok(None),
        }
    }

    async fn clear_lock(&self, session_id: &SessionId) -> SessionResult<Option<EditingSession>> {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        match sessions.get_mut(session_id) {
            Some(session) => {
                session.has_lock = false;
                session.lock_expiry = None;
                session.last_activity_at = Utc::now();
                session.version += 1;
                Ok(Some(session.clone()))
            },
            None => Ok(None),
        }
    }

    async fn find_lock_conflict(
        &self,
        editing_target: &str,
        now: DateTime<Utc>,
        exclude: &SessionId,
    ) -> SessionResult<Option<EditingSession>> {
        let sessions = self.sessions.lock().expect("session mutex poisoned");
        Ok(sessions
            .values()
            .find(|s| {
                s.is_active
                    && &s.session_id != exclude
                    && s.editing_target == editing_target
                    && s.holds_live_lock(now)
            })
            .cloned())
    }

    async fn active_for_canvas(&self, canvas_id: &CanvasId) -> SessionResult<Vec<EditingSession>> {
        let sessions = self.sessions.lock().expect("session mutex poisoned");
        Ok(sessions
            .values()
            .filter(|s| s.is_active && &s.canvas_id == canvas_id)
            .cloned()
            .collect())
    }

    async fn deactivate_stale(&self, idle_cutoff: DateTime<Utc>) -> SessionResult<u64> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        let mut reaped = 0;
        for session in sessions.values_mut() {
            let lapsed_lock =
                session.has_lock && session.lock_expiry.is_some_and(|expiry| expiry < now);
            if session.is_active && (session.last_activity_at < idle_cutoff || lapsed_lock) {
                session.is_active = false;
                session.has_lock = false;
                session.lock_expiry = None;
                session.version += 1;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn clear_expired_locks(&self, now: DateTime<Utc>) -> SessionResult<u64> {
        let mut sessions = self.sessions.lock().expect("session mutex poisoned");
        let mut cleared = 0;
        for session in sessions.values_mut() {
            if session.has_lock && session.lock_expiry.is_some_and(|expiry| expiry < now) {
                session.has_lock = false;
                session.lock_expiry = None;
                session.version += 1;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn ping(&self) -> SessionResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore").finish_non_exhaustive()
    }
}

/// In-memory activity store.
#[derive(Default)]
pub struct MemoryActivityStore {
    activities: Mutex<Vec<Activity>>,
}

impl MemoryActivityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn insert(&self, activity: Activity) -> SessionResult<Activity> {
        let mut activities = self.activities.lock().expect("activity mutex poisoned");
        activities.push(activity.clone());
        Ok(activity)
    }

    async fn query(&self, filter: &ActivityFilter) -> SessionResult<Vec<Activity>> {
        let activities = self.activities.lock().expect("activity mutex poisoned");
        let mut matched: Vec<Activity> = activities
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let paged: Vec<Activity> = matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(paged)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> SessionResult<u64> {
        let mut activities = self.activities.lock().expect("activity mutex poisoned");
        let before = activities.len();
        activities.retain(|a| a.timestamp >= cutoff);
        Ok((before - activities.len()) as u64)
    }
}

impl std::fmt::Debug for MemoryActivityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryActivityStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{ConversationId, NodeId, UserId, UserInfo};
    use chrono::Duration;

    fn session_for(user: &str, target_node: &str) -> EditingSession {
        let user = UserInfo::new(user, "User", "user@example.com");
        EditingSession::start(
            user,
            CanvasId::new("c1"),
            Some(ConversationId::new("v1")),
            Some(NodeId::new(target_node)),
            crate::records::EditingTargetKind::Node,
        )
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = MemorySessionStore::new();
        let session = store.create(session_for("u1", "n1")).await.unwrap();

        let fetched = store.get(&session.session_id).await.unwrap().unwrap();
        assert!(fetched.is_active);
        assert_eq!(fetched.version, 0);

        let touched = store.touch(&session.session_id).await.unwrap().unwrap();
        assert_eq!(touched.version, 1);

        assert!(store.end(&session.session_id).await.unwrap());
        assert!(!store.end(&session.session_id).await.unwrap());
        let ended = store.get(&session.session_id).await.unwrap().unwrap();
        assert!(!ended.is_active);
    }

    #[tokio::test]
    async fn test_lock_conflict_detection() {
        let store = MemorySessionStore::new();
        let holder = store.create(session_for("u1", "n1")).await.unwrap();
        let now = Utc::now();
        store
            .set_lock(&holder.session_id, now + Duration::seconds(30))
            .await
            .unwrap();

        let challenger = store.create(session_for("u2", "n1")).await.unwrap();
        let conflict = store
            .find_lock_conflict(&challenger.editing_target, now, &challenger.session_id)
            .await
            .unwrap();
        assert_eq!(conflict.unwrap().user_id, UserId::new("u1"));

        // The holder does not conflict with itself.
        let own = store
            .find_lock_conflict(&holder.editing_target, now, &holder.session_id)
            .await
            .unwrap();
        assert!(own.is_none());
    }

    #[tokio::test]
    async fn test_expired_lock_is_no_conflict() {
        let store = MemorySessionStore::new();
        let holder = store.create(session_for("u1", "n1")).await.unwrap();
        let now = Utc::now();
        store
            .set_lock(&holder.session_id, now - Duration::seconds(1))
            .await
            .unwrap();

        let challenger = store.create(session_for("u2", "n1")).await.unwrap();
        let conflict = store
            .find_lock_conflict(&challenger.editing_target, now, &challenger.session_id)
            .await
            .unwrap();
        assert!(conflict.is_none());

        assert_eq!(store.clear_expired_locks(now).await.unwrap(), 1);
        let cleared = store.get(&holder.session_id).await.unwrap().unwrap();
        assert!(!cleared.has_lock);
        assert!(cleared.is_active);
    }

    #[tokio::test]
    async fn test_deactivate_stale() {
        let store = MemorySessionStore::new();
        let session = store.create(session_for("u1", "n1")).await.unwrap();
        // A cutoff in the future makes the fresh session stale.
        let reaped = store
            .deactivate_stale(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(reaped, 1);
        let ended = store.get(&session.session_id).await.unwrap().unwrap();
        assert!(!ended.is_active);
    }

    fn activity(canvas: &str, user: &str, minutes_ago: i64) -> Activity {
        Activity {
            id: uuid::Uuid::new_v4(),
            canvas_id: CanvasId::new(canvas),
            conversation_id: None,
            node_id: None,
            user_id: UserId::new(user),
            user_name: user.to_string(),
            activity_type: crate::records::ActivityType::NodeEdited,
            description: format!("{user} edited a node"),
            priority: crate::records::ActivityPriority::Low,
            metadata: serde_json::json!({}),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            batch_id: None,
        }
    }

    #[tokio::test]
    async fn test_activity_query_orders_newest_first() {
        let store = MemoryActivityStore::new();
        store.insert(activity("c1", "u1", 10)).await.unwrap();
        store.insert(activity("c1", "u2", 1)).await.unwrap();
        store.insert(activity("c2", "u3", 5)).await.unwrap();

        let results = store
            .query(&ActivityFilter::for_canvas(CanvasId::new("c1")))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].user_id, UserId::new("u2"));
        assert_eq!(results[1].user_id, UserId::new("u1"));
    }

    #[tokio::test]
    async fn test_activity_paging_and_retention() {
        let store = MemoryActivityStore::new();
        for i in 0..5 {
            store.insert(activity("c1", "u1", i)).await.unwrap();
        }

        let page = store
            .query(&ActivityFilter {
                canvas_id: Some(CanvasId::new("c1")),
                limit: Some(2),
                offset: 1,
                ..ActivityFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);

        let deleted = store
            .delete_older_than(Utc::now() - Duration::minutes(3))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
    }
}
