//! The hybrid session layer: durable store first, ephemeral store
//! best-effort.
//!
//! The durable record is authoritative. An ephemeral failure after a durable
//! success surfaces as a warning, never as an operation failure; the next
//! cleanup or join reconciles the ephemeral side.

use std::time::Duration;

use arbor_core::{
    CanvasId, CanvasPresence, CollabError, CollabResult, ConversationId, NodeId, NodeLock,
    SessionId, UserInfo,
};
use arbor_session::{EditingSession, EditingTargetKind, SessionStore as _};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::service::CollaborationService;

/// Input for starting a durable editing session.
#[derive(Debug, Clone)]
pub struct StartSessionRequest {
    /// The editing user.
    pub user: UserInfo,
    /// Canvas being edited.
    pub canvas_id: CanvasId,
    /// Conversation scope, when narrower than the canvas.
    pub conversation_id: Option<ConversationId>,
    /// Node scope, when narrower still.
    pub node_id: Option<NodeId>,
    /// Declared scope of the session.
    pub editing_type: EditingTargetKind,
}

/// Answer to a realtime lock probe, labeled with the store that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    /// Whether a live lock exists on the node.
    pub has_lock: bool,
    /// The lock, when one exists and its details are known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock: Option<NodeLock>,
    /// `"redis"` when the ephemeral store answered, `"mongodb"` when the
    /// durable store had to.
    pub source: &'static str,
}

/// Combined view of a canvas for the hybrid-state endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridCanvasState {
    /// The live ephemeral snapshot; absent when that store is unreachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<CanvasPresence>,
    /// Active durable sessions on the canvas.
    pub sessions: Vec<EditingSession>,
}

impl CollaborationService {
    /// Start a durable editing session, mirroring presence into the
    /// ephemeral store best-effort.
    ///
    /// # Errors
    ///
    /// Fails only when the durable store rejects the write.
    pub async fn start_hybrid_session(
        &self,
        request: StartSessionRequest,
    ) -> CollabResult<EditingSession> {
        let session = EditingSession::start(
            request.user.clone(),
            request.canvas_id.clone(),
            request.conversation_id,
            request.node_id,
            request.editing_type,
        );
        let session = self
            .sessions
            .create(session)
            .await
            .map_err(Self::durable_err)?;

        // Best-effort ephemeral mirror; the durable record stands either way.
        if let Err(err) = self
            .join_canvas(
                request.canvas_id,
                request.user.id.clone(),
                request.user,
            )
            .await
        {
            warn!(%err, session = %session.session_id, "session started without ephemeral presence");
        }

        info!(session = %session.session_id, target = %session.editing_target, "hybrid session started");
        Ok(session)
    }

    /// End a durable editing session and release what it held.
    ///
    /// Returns `false` when the session was already ended or unknown.
    ///
    /// # Errors
    ///
    /// Fails only when the durable store rejects the write.
    pub async fn end_hybrid_session(&self, session_id: &SessionId) -> CollabResult<bool> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .map_err(Self::durable_err)?;

        let ended = self
            .sessions
            .end(session_id)
            .await
            .map_err(Self::durable_err)?;

        // Mirror the release into the ephemeral store for node sessions that
        // held a lock.
        if let Some(session) = session
            && session.has_lock
            && let (Some(conversation_id), Some(node_id)) =
                (session.conversation_id.clone(), session.node_id.clone())
            && let Err(err) = self
                .unlock_node(
                    session.canvas_id.clone(),
                    conversation_id,
                    node_id,
                    session.user_id.clone(),
                )
                .await
        {
            warn!(%err, session = %session_id, "ephemeral unlock failed while ending session");
        }

        Ok(ended)
    }

    /// Acquire the durable lock for a session, then mirror it into the
    /// ephemeral store best-effort.
    ///
    /// The durable conflict check runs first: another active session holding
    /// a live lock on the same target fails the acquisition.
    ///
    /// # Errors
    ///
    /// [`CollabError::LockAlreadyHeld`] on a durable conflict;
    /// [`CollabError::InvalidInput`] for an unknown or ended session.
    pub async fn acquire_hybrid_lock(
        &self,
        session_id: &SessionId,
        lock_duration: Option<Duration>,
    ) -> CollabResult<EditingSession> {
        let duration = lock_duration.unwrap_or(self.config.lock_duration);
        let session = self
            .sessions
            .get(session_id)
            .await
            .map_err(Self::durable_err)?
            .ok_or_else(|| CollabError::InvalidInput(format!("unknown session {session_id}")))?;

        let now = Utc::now();
        if let Some(conflict) = self
            .sessions
            .find_lock_conflict(&session.editing_target, now, session_id)
            .await
            .map_err(Self::durable_err)?
        {
            return Err(CollabError::LockAlreadyHeld {
                current_lock: Box::new(Self::session_lock_view(&conflict)),
            });
        }

        let expiry = now
            + chrono::Duration::from_std(duration)
                .map_err(|e| CollabError::InvalidInput(e.to_string()))?;
        let updated = self
            .sessions
            .set_lock(session_id, expiry)
            .await
            .map_err(Self::durable_err)?
            .ok_or_else(|| {
                CollabError::InvalidInput(format!("session {session_id} is not active"))
            })?;

        // Best-effort ephemeral lock for node-scoped sessions. A failure
        // here leaves the durable lock standing; the warning is the only
        // trace until the next cleanup reconciles.
        if let (Some(conversation_id), Some(node_id)) =
            (updated.conversation_id.clone(), updated.node_id.clone())
            && let Err(err) = self
                .lock_node(
                    updated.canvas_id.clone(),
                    conversation_id,
                    node_id,
                    updated.user_id.clone(),
                    updated.user.clone(),
                    session_id.clone(),
                    Some(duration),
                )
                .await
        {
            warn!(%err, session = %session_id, "durable lock acquired without ephemeral mirror");
        }

        Ok(updated)
    }

    /// Release a session's lock, ephemeral store first, then the durable
    /// record.
    ///
    /// # Errors
    ///
    /// [`CollabError::InvalidInput`] for an unknown session.
    pub async fn release_hybrid_lock(&self, session_id: &SessionId) -> CollabResult<EditingSession> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .map_err(Self::durable_err)?
            .ok_or_else(|| CollabError::InvalidInput(format!("unknown session {session_id}")))?;

        if let (Some(conversation_id), Some(node_id)) =
            (session.conversation_id.clone(), session.node_id.clone())
            && let Err(err) = self
                .unlock_node(
                    session.canvas_id.clone(),
                    conversation_id,
                    node_id,
                    session.user_id.clone(),
                )
                .await
        {
            warn!(%err, session = %session_id, "ephemeral unlock failed, durable release proceeds");
        }

        self.sessions
            .clear_lock(session_id)
            .await
            .map_err(Self::durable_err)?
            .ok_or_else(|| CollabError::InvalidInput(format!("unknown session {session_id}")))
    }

    /// Probe a node's lock, preferring the ephemeral store and falling back
    /// to the durable store when it is unreachable.
    ///
    /// # Errors
    ///
    /// Fails only when both stores fail to produce an answer.
    pub async fn get_realtime_lock_status(
        &self,
        canvas_id: &CanvasId,
        conversation_id: &ConversationId,
        node_id: &NodeId,
    ) -> CollabResult<LockStatus> {
        match self.get_node_lock(canvas_id, conversation_id, node_id).await {
            Ok(lock) => Ok(LockStatus {
                has_lock: lock.is_some(),
                lock,
                source: "redis",
            }),
            Err(CollabError::StoreUnavailable(reason)) => {
                warn!(reason, "lock probe degrading to durable store");
                let target = EditingSession::target_string(
                    canvas_id,
                    Some(conversation_id),
                    Some(node_id),
                );
                // Any live-locked session counts; the probe session id never
                // collides with a real one.
                let holder = self
                    .sessions
                    .find_lock_conflict(&target, Utc::now(), &SessionId::new())
                    .await
                    .map_err(Self::durable_err)?;
                Ok(LockStatus {
                    has_lock: holder.is_some(),
                    lock: holder.as_ref().map(Self::session_lock_view),
                    source: "mongodb",
                })
            },
            Err(other) => Err(other),
        }
    }

    /// The combined durable + ephemeral view of a canvas.
    ///
    /// # Errors
    ///
    /// Fails only when the durable store rejects the query; an unreachable
    /// ephemeral store just leaves the snapshot absent.
    pub async fn hybrid_state(&self, canvas_id: &CanvasId) -> CollabResult<HybridCanvasState> {
        let sessions = self
            .sessions
            .active_for_canvas(canvas_id)
            .await
            .map_err(Self::durable_err)?;

        let presence = match self.get_canvas_presence(canvas_id.clone()).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(%err, canvas = %canvas_id, "hybrid state served without ephemeral snapshot");
                None
            },
        };

        Ok(HybridCanvasState { presence, sessions })
    }

    /// Render a durable session's lock as a node lock for wire payloads.
    ///
    /// Canvas- and conversation-scoped targets have no node; the empty
    /// identifier marks the whole target.
    fn session_lock_view(session: &EditingSession) -> NodeLock {
        NodeLock {
            canvas_id: session.canvas_id.clone(),
            conversation_id: session
                .conversation_id
                .clone()
                .unwrap_or_else(|| ConversationId::new("")),
            node_id: session.node_id.clone().unwrap_or_else(|| NodeId::new("")),
            user_id: session.user_id.clone(),
            user: session.user.clone(),
            locked_at: session.last_activity_at,
            expires_at: session.lock_expiry.unwrap_or(session.last_activity_at),
            session_id: session.session_id.clone(),
        }
    }

    /// Convenience for REST callers that address sessions by UUID string.
    ///
    /// # Errors
    ///
    /// [`CollabError::InvalidInput`] when the string is not a UUID.
    pub fn parse_session_id(raw: &str) -> CollabResult<SessionId> {
        raw.parse::<uuid::Uuid>()
            .map(SessionId::from_uuid)
            .map_err(|e| CollabError::InvalidInput(format!("bad session id: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::{service, user};
    use arbor_core::UserId;

    fn node_request(uid: &str) -> StartSessionRequest {
        StartSessionRequest {
            user: user(uid),
            canvas_id: CanvasId::new("c1"),
            conversation_id: Some(ConversationId::new("v1")),
            node_id: Some(NodeId::new("n1")),
            editing_type: EditingTargetKind::Node,
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle_mirrors_presence() {
        let service = service();
        let session = service.start_hybrid_session(node_request("u1")).await.unwrap();
        assert!(session.is_active);

        // Presence was mirrored into the ephemeral store.
        let snapshot = service
            .get_canvas_presence(CanvasId::new("c1"))
            .await
            .unwrap();
        assert_eq!(snapshot.users.len(), 1);

        assert!(service.end_hybrid_session(&session.session_id).await.unwrap());
        assert!(!service.end_hybrid_session(&session.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_hybrid_lock_conflict() {
        let service = service();
        let holder = service.start_hybrid_session(node_request("u1")).await.unwrap();
        let challenger = service.start_hybrid_session(node_request("u2")).await.unwrap();

        let held = service
            .acquire_hybrid_lock(&holder.session_id, None)
            .await
            .unwrap();
        assert!(held.has_lock);

        let err = service
            .acquire_hybrid_lock(&challenger.session_id, None)
            .await
            .unwrap_err();
        match err {
            CollabError::LockAlreadyHeld { current_lock } => {
                assert_eq!(current_lock.user_id, UserId::new("u1"));
            },
            other => panic!("expected LockAlreadyHeld, got {other:?}"),
        }

        // Release frees the target for the challenger.
        service.release_hybrid_lock(&holder.session_id).await.unwrap();
        let taken = service
            .acquire_hybrid_lock(&challenger.session_id, None)
            .await
            .unwrap();
        assert!(taken.has_lock);
    }

    #[tokio::test]
    async fn test_hybrid_lock_mirrors_to_ephemeral() {
        let service = service();
        let session = service.start_hybrid_session(node_request("u1")).await.unwrap();
        service
            .acquire_hybrid_lock(&session.session_id, None)
            .await
            .unwrap();

        let lock = service
            .get_node_lock(
                &CanvasId::new("c1"),
                &ConversationId::new("v1"),
                &NodeId::new("n1"),
            )
            .await
            .unwrap();
        assert_eq!(lock.unwrap().user_id, UserId::new("u1"));

        let status = service
            .get_realtime_lock_status(
                &CanvasId::new("c1"),
                &ConversationId::new("v1"),
                &NodeId::new("n1"),
            )
            .await
            .unwrap();
        assert!(status.has_lock);
        assert_eq!(status.source, "redis");
    }

    #[tokio::test]
    async fn test_hybrid_state_reports_sessions() {
        let service = service();
        service.start_hybrid_session(node_request("u1")).await.unwrap();
        let state = service.hybrid_state(&CanvasId::new("c1")).await.unwrap();
        assert_eq!(state.sessions.len(), 1);
        assert!(state.presence.is_some());
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let service = service();
        let err = service
            .acquire_hybrid_lock(&SessionId::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::InvalidInput(_)));
    }
}
