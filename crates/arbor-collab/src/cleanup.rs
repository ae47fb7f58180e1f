//! Stale-state cleanup: presence eviction, lock reaping, and the periodic
//! durable-session sweep.
//!
//! Heartbeat keys expire on their own; the presence set can lag a lapsed
//! key, so the scan evicts users whose last heartbeat is older than twice
//! the heartbeat TTL (or gone entirely) and restores the set invariant.

use arbor_core::{CanvasId, CollabResult, NodeLock, UserId};
use arbor_ephemeral::{EphemeralStore as _, keys};
use arbor_events::{CanvasEvent, LockExpiredPayload};
use arbor_session::SessionStore as _;
use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};

use crate::service::CollaborationService;

impl CollaborationService {
    /// Evict users whose heartbeat lapsed from a canvas.
    ///
    /// A single user's eviction failing does not abort the scan. Each
    /// eviction runs the full leave path, so `USER_LEFT` is published.
    ///
    /// Returns the evicted users.
    ///
    /// # Errors
    ///
    /// Fails only when the membership read itself fails.
    pub async fn cleanup_stale_presence(
        &self,
        canvas_id: &CanvasId,
    ) -> CollabResult<Vec<UserId>> {
        let members = self
            .store
            .set_members(&keys::presence_set(canvas_id))
            .await
            .map_err(Self::store_err)?;
        let heartbeats = self.heartbeats_for(canvas_id, &members).await?;

        let staleness =
            ChronoDuration::from_std(self.config.heartbeat_ttl * 2).unwrap_or(ChronoDuration::MAX);
        let cutoff = Utc::now() - staleness;

        let mut evicted = Vec::new();
        for member in members {
            let fresh = heartbeats
                .get(&member)
                .copied()
                .flatten()
                .is_some_and(|beat| beat >= cutoff);
            if fresh {
                continue;
            }

            let user_id = UserId::new(member);
            match self.leave_canvas(canvas_id.clone(), user_id.clone()).await {
                Ok(()) => {
                    info!(canvas = %canvas_id, user = %user_id, "evicted stale presence");
                    evicted.push(user_id);
                },
                Err(err) => {
                    warn!(%err, canvas = %canvas_id, user = %user_id, "stale presence eviction failed");
                },
            }
        }
        Ok(evicted)
    }

    /// Reap lapsed lock records on a canvas, publishing `LOCK_EXPIRED` for
    /// each.
    ///
    /// Covers records whose TTL has not physically fired yet and records
    /// that vanish between the scan and the read.
    ///
    /// Returns the number of locks reaped.
    ///
    /// # Errors
    ///
    /// Fails only when the key scan itself fails.
    pub async fn clear_stale_locks_for_canvas(&self, canvas_id: &CanvasId) -> CollabResult<u32> {
        let lock_keys = self
            .store
            .keys_matching(&keys::lock_pattern(canvas_id))
            .await
            .map_err(Self::store_err)?;

        let now = Utc::now();
        let mut reaped = 0;
        for key in lock_keys {
            let raw = match self.store.get_string(&key).await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(%err, key, "lock read failed during reap scan");
                    continue;
                },
            };

            let expired = match raw.as_deref().map(serde_json::from_str::<NodeLock>) {
                // Gone between scan and read: the TTL fired.
                None => {
                    let (conversation_id, node_id) = match keys::parse_lock_key(&key) {
                        Some(parsed) => parsed,
                        None => continue,
                    };
                    Some(LockExpiredPayload {
                        canvas_id: canvas_id.clone(),
                        conversation_id: Some(conversation_id),
                        node_id,
                        user_id: None,
                    })
                },
                Some(Ok(lock)) if lock.is_expired(now) => {
                    if let Err(err) = self.store.delete(&key).await {
                        warn!(%err, key, "lapsed lock delete failed");
                        continue;
                    }
                    Some(LockExpiredPayload {
                        canvas_id: canvas_id.clone(),
                        conversation_id: Some(lock.conversation_id),
                        node_id: lock.node_id,
                        user_id: Some(lock.user_id),
                    })
                },
                Some(Ok(_)) => None,
                Some(Err(err)) => {
                    warn!(%err, key, "malformed lock record skipped by reap scan");
                    None
                },
            };

            if let Some(payload) = expired {
                self.publish_event(CanvasEvent::LockExpired(payload)).await;
                reaped += 1;
            }
        }

        if reaped > 0 {
            debug!(canvas = %canvas_id, reaped, "stale locks reaped");
        }
        Ok(reaped)
    }

    /// Canvases with at least one present user, discovered from the store.
    ///
    /// # Errors
    ///
    /// Fails only when the key scan fails.
    pub async fn active_canvases(&self) -> CollabResult<Vec<CanvasId>> {
        let set_keys = self
            .store
            .keys_matching("canvas:*:presence")
            .await
            .map_err(Self::store_err)?;
        Ok(set_keys
            .iter()
            .filter_map(|key| {
                let parts: Vec<&str> = key.split(':').collect();
                match parts.as_slice() {
                    ["canvas", canvas, "presence"] => Some(CanvasId::new(*canvas)),
                    _ => None,
                }
            })
            .collect())
    }

    /// Clear lapsed durable locks, publishing `LOCK_EXPIRED` for the
    /// node-scoped sessions that lost theirs. Runs every minute.
    ///
    /// # Errors
    ///
    /// Fails when the durable store rejects the sweep.
    pub async fn release_expired_durable_locks(&self) -> CollabResult<u64> {
        let now = Utc::now();

        // Collect the node-scoped holders before the sweep wipes the
        // evidence of who held what.
        let mut lapsed = Vec::new();
        for canvas_id in self.active_canvases().await.unwrap_or_default() {
            match self.sessions.active_for_canvas(&canvas_id).await {
                Ok(sessions) => {
                    for session in sessions {
                        if session.has_lock
                            && session.lock_expiry.is_some_and(|expiry| expiry < now)
                            && let (Some(conversation_id), Some(node_id)) =
                                (session.conversation_id.clone(), session.node_id.clone())
                        {
                            lapsed.push(LockExpiredPayload {
                                canvas_id: session.canvas_id.clone(),
                                conversation_id: Some(conversation_id),
                                node_id,
                                user_id: Some(session.user_id.clone()),
                            });
                        }
                    }
                },
                Err(err) => warn!(%err, canvas = %canvas_id, "durable session scan failed"),
            }
        }

        let cleared = self
            .sessions
            .clear_expired_locks(now)
            .await
            .map_err(Self::durable_err)?;

        for payload in lapsed {
            self.publish_event(CanvasEvent::LockExpired(payload)).await;
        }

        if cleared > 0 {
            info!(cleared, "expired durable locks released");
        }
        Ok(cleared)
    }

    /// The five-minute sweep: deactivate idle durable sessions, then scan
    /// every active canvas for stale presence and lapsed locks.
    ///
    /// # Errors
    ///
    /// Fails when the durable deactivation fails; per-canvas scan failures
    /// are logged and skipped.
    pub async fn run_hybrid_cleanup(&self) -> CollabResult<()> {
        let idle_cutoff = Utc::now()
            - ChronoDuration::from_std(self.config.session_timeout).unwrap_or(ChronoDuration::MAX);
        let deactivated = self
            .sessions
            .deactivate_stale(idle_cutoff)
            .await
            .map_err(Self::durable_err)?;
        if deactivated > 0 {
            info!(deactivated, "idle durable sessions deactivated");
        }

        for canvas_id in self.active_canvases().await.unwrap_or_default() {
            if let Err(err) = self.cleanup_stale_presence(&canvas_id).await {
                warn!(%err, canvas = %canvas_id, "stale presence scan failed");
            }
            if let Err(err) = self.clear_stale_locks_for_canvas(&canvas_id).await {
                warn!(%err, canvas = %canvas_id, "stale lock scan failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::CollabConfig;
    use crate::service::test_support::{service_with, user};
    use arbor_core::{ConversationId, NodeId, SessionId};
    use arbor_ephemeral::EphemeralStore as _;
    use arbor_session::SessionStore as _;
    use std::time::Duration;

    fn fast_config() -> CollabConfig {
        CollabConfig {
            heartbeat_ttl: Duration::from_millis(100),
            ..CollabConfig::default()
        }
    }

    #[tokio::test]
    async fn test_stale_presence_eviction() {
        let service = service_with(fast_config());
        let canvas = CanvasId::new("c1");

        service
            .join_canvas(canvas.clone(), UserId::new("u1"), user("u1"))
            .await
            .unwrap();
        service
            .join_canvas(canvas.clone(), UserId::new("u2"), user("u2"))
            .await
            .unwrap();

        // u2 keeps beating; u1 goes silent until its heartbeat key lapses.
        tokio::time::sleep(Duration::from_millis(80)).await;
        service
            .heartbeat(canvas.clone(), UserId::new("u2"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let evicted = service.cleanup_stale_presence(&canvas).await.unwrap();
        assert_eq!(evicted, vec![UserId::new("u1")]);

        let snapshot = service.get_canvas_presence(canvas).await.unwrap();
        let users: Vec<_> = snapshot.users.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(users, vec!["u2"]);
    }

    #[tokio::test]
    async fn test_eviction_publishes_user_left() {
        let service = service_with(fast_config());
        let canvas = CanvasId::new("c1");
        service
            .join_canvas(canvas.clone(), UserId::new("u1"), user("u1"))
            .await
            .unwrap();

        let mut rx = service
            .ephemeral()
            .pattern_subscribe("canvas:*:events")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        service.cleanup_stale_presence(&canvas).await.unwrap();

        let msg = rx.recv().await.unwrap();
        let envelope = arbor_events::EventEnvelope::from_json(&msg.payload).unwrap();
        assert_eq!(envelope.event.event_type(), "USER_LEFT");
    }

    #[tokio::test]
    async fn test_lapsed_lock_reaped_with_event() {
        let service = service_with(CollabConfig::default());
        let canvas = CanvasId::new("c1");

        // A short lock that lingers because the in-memory sweep has not
        // touched it: write it with a long physical TTL but a past expiry.
        let now = Utc::now();
        let lock = NodeLock {
            canvas_id: canvas.clone(),
            conversation_id: ConversationId::new("v1"),
            node_id: NodeId::new("n1"),
            user_id: UserId::new("a"),
            user: user("a"),
            locked_at: now - chrono::Duration::seconds(10),
            expires_at: now - chrono::Duration::seconds(1),
            session_id: SessionId::new(),
        };
        service
            .ephemeral()
            .set_string(
                &keys::node_lock(&canvas, &lock.conversation_id, &lock.node_id),
                &serde_json::to_string(&lock).unwrap(),
                arbor_ephemeral::SetOptions::with_ttl(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        let mut rx = service
            .ephemeral()
            .pattern_subscribe("canvas:*:events")
            .await
            .unwrap();

        let reaped = service.clear_stale_locks_for_canvas(&canvas).await.unwrap();
        assert_eq!(reaped, 1);

        let msg = rx.recv().await.unwrap();
        let envelope = arbor_events::EventEnvelope::from_json(&msg.payload).unwrap();
        match envelope.event {
            CanvasEvent::LockExpired(payload) => {
                assert_eq!(payload.node_id, NodeId::new("n1"));
                assert_eq!(payload.user_id, Some(UserId::new("a")));
            },
            other => panic!("expected LOCK_EXPIRED, got {other:?}"),
        }

        // The node is acquirable again.
        let lock = service
            .lock_node(
                canvas,
                ConversationId::new("v1"),
                NodeId::new("n1"),
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
    async fn test_hybrid_cleanup_deactivates_idle_sessions() {
        let service = service_with(CollabConfig {
            session_timeout: Duration::from_millis(10),
            ..CollabConfig::default()
        });
        let session = service
            .start_hybrid_session(crate::hybrid::StartSessionRequest {
                user: user("u1"),
                canvas_id: CanvasId::new("c1"),
                conversation_id: None,
                node_id: None,
                editing_type: arbor_session::EditingTargetKind::Canvas,
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        service.run_hybrid_cleanup().await.unwrap();

        let reloaded = service
            .durable()
            .get(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!reloaded.is_active);
    }

    #[tokio::test]
    async fn test_active_canvases_discovery() {
        let service = service_with(CollabConfig::default());
        service
            .join_canvas(CanvasId::new("c1"), UserId::new("u1"), user("u1"))
            .await
            .unwrap();
        service
            .join_canvas(CanvasId::new("c2"), UserId::new("u2"), user("u2"))
            .await
            .unwrap();

        let mut canvases = service.active_canvases().await.unwrap();
        canvases.sort();
        assert_eq!(canvases, vec![CanvasId::new("c1"), CanvasId::new("c2")]);
    }
}
