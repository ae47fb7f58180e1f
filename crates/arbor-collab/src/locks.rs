//! The single-writer node lock protocol.
//!
//! Conditional create at the ephemeral store is the only tie-breaker between
//! racing acquirers; no client-side ordering exists. A lock whose
//! `expiresAt` has passed is semantically absent whatever the store still
//! holds.

use std::time::Duration;

use arbor_core::{
    CanvasId, CollabError, CollabResult, ConversationId, NodeId, NodeLock, SessionId, UserId,
    UserInfo,
};
use arbor_ephemeral::{EphemeralStore as _, SetOptions, keys};
use arbor_events::{CanvasEvent, NodeUnlockedPayload};
use chrono::Utc;
use tracing::{debug, warn};

use crate::service::CollaborationService;

/// Conditional create can race a concurrent expiry; one follow-up attempt
/// resolves it.
const ACQUIRE_ATTEMPTS: u32 = 2;

impl CollaborationService {
    /// Acquire or extend the single-writer lock on a node.
    ///
    /// Three outcomes:
    /// - the caller already owns a live lock: its expiry is extended and the
    ///   extended lock returned (no event published);
    /// - another user owns a live lock: [`CollabError::LockAlreadyHeld`],
    ///   carrying the current lock;
    /// - no live lock: the lock is created with conditional create, and
    ///   `NODE_LOCKED` published. A lost creation race re-reads and fails
    ///   with the winner's lock.
    ///
    /// # Errors
    ///
    /// [`CollabError::LockAlreadyHeld`] on contention, the
    /// store-unavailable kind when the ephemeral store is unreachable.
    pub async fn lock_node(
        &self,
        canvas_id: CanvasId,
        conversation_id: ConversationId,
        node_id: NodeId,
        user_id: UserId,
        user: UserInfo,
        session_id: SessionId,
        lock_duration: Option<Duration>,
    ) -> CollabResult<NodeLock> {
        let duration = lock_duration.unwrap_or(self.config.lock_duration);
        let key = keys::node_lock(&canvas_id, &conversation_id, &node_id);

        for attempt in 0..ACQUIRE_ATTEMPTS {
            let now = Utc::now();

            // Probe.
            if let Some(current) = self.read_lock(&key).await? {
                if current.is_expired(now) {
                    // Semantically absent; drop the lingering record so the
                    // conditional create below can win.
                    self.store.delete(&key).await.map_err(Self::store_err)?;
                } else if current.user_id == user_id {
                    // Same owner: extend in place. No publish.
                    let extended = self.write_extended(&key, current, duration).await?;
                    return Ok(extended);
                } else {
                    return Err(CollabError::LockAlreadyHeld {
                        current_lock: Box::new(current),
                    });
                }
            }

            // Absent: conditional create decides the race.
            let lock = NodeLock {
                canvas_id: canvas_id.clone(),
                conversation_id: conversation_id.clone(),
                node_id: node_id.clone(),
                user_id: user_id.clone(),
                user: user.clone(),
                locked_at: now,
                expires_at: now
                    + chrono::Duration::from_std(duration)
                        .map_err(|e| CollabError::InvalidInput(e.to_string()))?,
                session_id: session_id.clone(),
            };
            let payload =
                serde_json::to_string(&lock).map_err(|e| CollabError::Internal(e.to_string()))?;
            let created = self
                .store
                .set_string(&key, &payload, SetOptions::create_with_ttl(duration))
                .await
                .map_err(Self::store_err)?;

            if created {
                self.publish_event(CanvasEvent::NodeLocked(lock.clone())).await;
                debug!(node = %node_id, user = %user_id, "node locked");
                return Ok(lock);
            }

            // Lost the race: report the winner.
            if let Some(winner) = self.read_lock(&key).await? {
                return Err(CollabError::LockAlreadyHeld {
                    current_lock: Box::new(winner),
                });
            }
            // The winner's lock lapsed between the failed create and the
            // re-read; one more pass resolves it.
            debug!(node = %node_id, attempt, "lock vanished during acquisition race, retrying");
        }

        Err(CollabError::Internal(
            "lock acquisition raced expiry twice".to_string(),
        ))
    }

    /// Release a lock owned by `user_id`.
    ///
    /// Returns `false` when no live lock exists (lapsed locks count as
    /// absent). Publishes `NODE_UNLOCKED` on success.
    ///
    /// # Errors
    ///
    /// [`CollabError::LockNotOwned`] when another user holds the lock.
    pub async fn unlock_node(
        &self,
        canvas_id: CanvasId,
        conversation_id: ConversationId,
        node_id: NodeId,
        user_id: UserId,
    ) -> CollabResult<bool> {
        let key = keys::node_lock(&canvas_id, &conversation_id, &node_id);
        let Some(lock) = self.read_lock(&key).await? else {
            return Ok(false);
        };

        if lock.is_expired(Utc::now()) {
            // Already semantically absent; drop the record quietly. The
            // stale-lock scan publishes expiry events, not this path.
            self.store.delete(&key).await.map_err(Self::store_err)?;
            return Ok(false);
        }

        if lock.user_id != user_id {
            return Err(CollabError::LockNotOwned {
                node_id,
                owner: lock.user_id,
            });
        }

        self.store.delete(&key).await.map_err(Self::store_err)?;
        self.publish_event(CanvasEvent::NodeUnlocked(NodeUnlockedPayload {
            canvas_id,
            conversation_id,
            node_id: node_id.clone(),
            user_id,
        }))
        .await;
        debug!(node = %node_id, "node unlocked");
        Ok(true)
    }

    /// Extend a lock the caller already owns.
    ///
    /// Returns `None` when no live lock exists. No event is published.
    ///
    /// # Errors
    ///
    /// [`CollabError::LockNotOwned`] when another user holds the lock.
    pub async fn extend_node_lock(
        &self,
        canvas_id: CanvasId,
        conversation_id: ConversationId,
        node_id: NodeId,
        user_id: UserId,
        lock_duration: Option<Duration>,
    ) -> CollabResult<Option<NodeLock>> {
        let duration = lock_duration.unwrap_or(self.config.lock_duration);
        let key = keys::node_lock(&canvas_id, &conversation_id, &node_id);

        let Some(lock) = self.read_lock(&key).await? else {
            return Ok(None);
        };
        if lock.is_expired(Utc::now()) {
            return Ok(None);
        }
        if lock.user_id != user_id {
            return Err(CollabError::LockNotOwned {
                node_id,
                owner: lock.user_id,
            });
        }

        let extended = self.write_extended(&key, lock, duration).await?;
        Ok(Some(extended))
    }

    /// The live lock on a node, if any.
    ///
    /// # Errors
    ///
    /// Fails only when the ephemeral store is unreachable.
    pub async fn get_node_lock(
        &self,
        canvas_id: &CanvasId,
        conversation_id: &ConversationId,
        node_id: &NodeId,
    ) -> CollabResult<Option<NodeLock>> {
        let key = keys::node_lock(canvas_id, conversation_id, node_id);
        let lock = self.read_lock(&key).await?;
        Ok(lock.filter(|l| !l.is_expired(Utc::now())))
    }

    async fn read_lock(&self, key: &str) -> CollabResult<Option<NodeLock>> {
        let Some(raw) = self.store.get_string(key).await.map_err(Self::store_err)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(lock) => Ok(Some(lock)),
            Err(err) => {
                // A record nothing can parse would wedge the node; treat it
                // as absent and let conditional create race over it.
                warn!(%err, key, "malformed lock record treated as absent");
                self.store.delete(key).await.map_err(Self::store_err)?;
                Ok(None)
            },
        }
    }

    async fn write_extended(
        &self,
        key: &str,
        mut lock: NodeLock,
        duration: Duration,
    ) -> CollabResult<NodeLock> {
        lock.expires_at = Utc::now()
            + chrono::Duration::from_std(duration)
                .map_err(|e| CollabError::InvalidInput(e.to_string()))?;
        let payload =
            serde_json::to_string(&lock).map_err(|e| CollabError::Internal(e.to_string()))?;
        self.store
            .set_string(key, &payload, SetOptions::with_ttl(duration))
            .await
            .map_err(Self::store_err)?;
        Ok(lock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::{service, user};

    fn ids() -> (CanvasId, ConversationId, NodeId) {
        (
            CanvasId::new("c1"),
            ConversationId::new("v1"),
            NodeId::new("n1"),
        )
    }

    #[tokio::test]
    async fn test_acquire_then_conflict() {
        let service = service();
        let (canvas, conversation, node) = ids();

        let lock = service
            .lock_node(
                canvas.clone(),
                conversation.clone(),
                node.clone(),
                UserId::new("a"),
                user("a"),
                SessionId::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(lock.user_id, UserId::new("a"));

        let err = service
            .lock_node(
                canvas,
                conversation,
                node,
                UserId::new("b"),
                user("b"),
                SessionId::new(),
                None,
            )
            .await
            .unwrap_err();
        match err {
            CollabError::LockAlreadyHeld { current_lock } => {
                assert_eq!(current_lock.user_id, UserId::new("a"));
            },
            other => panic!("expected LockAlreadyHeld, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_same_owner_extends() {
        let service = service();
        let (canvas, conversation, node) = ids();
        let uid = UserId::new("a");

        let first = service
            .lock_node(
                canvas.clone(),
                conversation.clone(),
                node.clone(),
                uid.clone(),
                user("a"),
                SessionId::new(),
                None,
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let second = service
            .lock_node(canvas, conversation, node, uid, user("a"), SessionId::new(), None)
            .await
            .unwrap();

        assert!(second.expires_at > first.expires_at);
        assert_eq!(second.locked_at, first.locked_at);
    }

    #[tokio::test]
    async fn test_unlock_lifecycle() {
        let service = service();
        let (canvas, conversation, node) = ids();
        let uid = UserId::new("a");

        service
            .lock_node(
                canvas.clone(),
                conversation.clone(),
                node.clone(),
                uid.clone(),
                user("a"),
                SessionId::new(),
                None,
            )
            .await
            .unwrap();

        // Wrong owner cannot release.
        let err = service
            .unlock_node(canvas.clone(), conversation.clone(), node.clone(), UserId::new("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::LockNotOwned { .. }));

        assert!(
            service
                .unlock_node(canvas.clone(), conversation.clone(), node.clone(), uid.clone())
                .await
                .unwrap()
        );
        assert!(
            service
                .get_node_lock(&canvas, &conversation, &node)
                .await
                .unwrap()
                .is_none()
        );
        // Releasing an absent lock reports false, not an error.
        assert!(!service.unlock_node(canvas, conversation, node, uid).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_is_absent() {
        let service = service();
        let (canvas, conversation, node) = ids();

        service
            .lock_node(
                canvas.clone(),
                conversation.clone(),
                node.clone(),
                UserId::new("a"),
                user("a"),
                SessionId::new(),
                Some(Duration::from_millis(40)),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(
            service
                .get_node_lock(&canvas, &conversation, &node)
                .await
                .unwrap()
                .is_none()
        );

        // A second user can acquire after expiry.
        let lock = service
            .lock_node(
                canvas,
                conversation,
                node,
                UserId::new("b"),
                user("b"),
                SessionId::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(lock.user_id, UserId::new("b"));
    }

    #[tokio::test]
    async fn test_extend_absent_lock_returns_none() {
        let service = service();
        let (canvas, conversation, node) = ids();
        let extended = service
            .extend_node_lock(canvas, conversation, node, UserId::new("a"), None)
            .await
            .unwrap();
        assert!(extended.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_acquirers_single_winner() {
        let service = service();
        let (canvas, conversation, node) = ids();

        let mut handles = Vec::new();
        for i in 0..100 {
            let service = service.clone();
            let (canvas, conversation, node) =
                (canvas.clone(), conversation.clone(), node.clone());
            handles.push(tokio::spawn(async move {
                let uid = UserId::new(format!("u{i}"));
                service
                    .lock_node(
                        canvas,
                        conversation,
                        node,
                        uid.clone(),
                        user(&format!("u{i}")),
                        SessionId::new(),
                        None,
                    )
                    .await
            }));
        }

        let mut winners = 0;
        let mut already_held = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(CollabError::LockAlreadyHeld { .. }) => already_held += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(already_held, 99);
    }
}
