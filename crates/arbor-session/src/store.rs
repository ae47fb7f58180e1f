//! Persistence traits for sessions and activities.
//!
//! Implementations bump the session `version` on every update; concurrent
//! writers to the same record either retry or surface
//! [`SessionError::VersionConflict`](crate::SessionError::VersionConflict)
//! per their backend's discipline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use arbor_core::{CanvasId, SessionId};

use crate::error::SessionResult;
use crate::records::{Activity, ActivityFilter, EditingSession};

/// Store of authoritative editing-session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new session record.
    async fn create(&self, session: EditingSession) -> SessionResult<EditingSession>;

    /// Fetch a session by id, active or not.
    async fn get(&self, session_id: &SessionId) -> SessionResult<Option<EditingSession>>;

    /// Refresh `last_activity_at` on an active session. Returns the updated
    /// record, or `None` when the session does not exist or already ended.
    async fn touch(&self, session_id: &SessionId) -> SessionResult<Option<EditingSession>>;

    /// End a session (clears `is_active` and any lock). Returns whether a
    /// record changed.
    async fn end(&self, session_id: &SessionId) -> SessionResult<bool>;

    /// Grant the durable lock to a session until `expiry`.
    async fn set_lock(
        &self,
        session_id: &SessionId,
        expiry: DateTime<Utc>,
    ) -> SessionResult<Option<EditingSession>>;

    /// Release a session's durable lock.
    async fn clear_lock(&self, session_id: &SessionId) -> SessionResult<Option<EditingSession>>;

    /// Find another active session holding a live lock on `editing_target`,
    /// excluding `exclude`. This is the durable conflict check performed
    /// before lock acquisition.
    async fn find_lock_conflict(
        &self,
        editing_target: &str,
        now: DateTime<Utc>,
        exclude: &SessionId,
    ) -> SessionResult<Option<EditingSession>>;

    /// All active sessions on a canvas.
    async fn active_for_canvas(&self, canvas_id: &CanvasId) -> SessionResult<Vec<EditingSession>>;

    /// Deactivate active sessions idle since before `idle_cutoff`, or whose
    /// lock lapsed. Returns the number deactivated.
    async fn deactivate_stale(&self, idle_cutoff: DateTime<Utc>) -> SessionResult<u64>;

    /// Clear lapsed durable locks without ending their sessions. Returns the
    /// number cleared.
    async fn clear_expired_locks(&self, now: DateTime<Utc>) -> SessionResult<u64>;

    /// Liveness probe.
    async fn ping(&self) -> SessionResult<()>;
}

/// Append-only store of activity records.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Insert a record.
    async fn insert(&self, activity: Activity) -> SessionResult<Activity>;

    /// Query records, newest first, honoring the filter's limit and offset.
    async fn query(&self, filter: &ActivityFilter) -> SessionResult<Vec<Activity>>;

    /// Delete records older than `cutoff`. Returns the number deleted.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> SessionResult<u64>;
}
