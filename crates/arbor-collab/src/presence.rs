//! Presence, conversation focus, and the aggregated canvas snapshot.

use std::collections::HashMap;

use arbor_core::{
    CanvasId, CanvasPresence, CollabResult, ConversationFocus, ConversationId, NodeLock,
    TypingIndicator, UserId, UserInfo, UserPresence,
};
use arbor_ephemeral::{EphemeralStore as _, PipelineOp, keys};
use arbor_events::{CanvasEvent, UserLeftPayload};
use chrono::Utc;
use tracing::{debug, warn};

use crate::codec;
use crate::service::CollaborationService;

impl CollaborationService {
    /// Join a canvas: write presence, set membership, and a fresh heartbeat,
    /// then publish `USER_JOINED`.
    ///
    /// Re-joining refreshes the TTLs and keeps the original `joinedAt`, so
    /// the operation is idempotent.
    ///
    /// # Errors
    ///
    /// Fails with the store-unavailable kind when the ephemeral store cannot
    /// be reached; callers may degrade to durable-only mode.
    pub async fn join_canvas(
        &self,
        canvas_id: CanvasId,
        user_id: UserId,
        user: UserInfo,
    ) -> CollabResult<UserPresence> {
        let now = Utc::now();
        let presence_key = keys::presence(&canvas_id, &user_id);

        // Keep the original join time on re-join.
        let existing = self
            .store
            .hash_get_all(&presence_key)
            .await
            .map_err(Self::store_err)?;
        let joined_at = codec::presence_from_hash(&existing)
            .ok()
            .map_or(now, |p| p.joined_at);

        let presence = UserPresence {
            canvas_id: canvas_id.clone(),
            user_id: user_id.clone(),
            user,
            joined_at,
            last_activity_at: now,
            is_active: true,
        };

        let fields = codec::presence_fields(&presence).map_err(arbor_core::CollabError::Internal)?;
        self.store
            .pipeline(vec![
                PipelineOp::HashSet {
                    key: presence_key,
                    fields,
                    ttl: Some(self.config.presence_ttl),
                },
                PipelineOp::SetAdd {
                    key: keys::presence_set(&canvas_id),
                    member: user_id.to_string(),
                },
                PipelineOp::SetString {
                    key: keys::heartbeat(&canvas_id, &user_id),
                    value: codec::epoch_millis(now),
                    ttl: Some(self.config.heartbeat_ttl),
                },
            ])
            .await
            .map_err(Self::store_err)?;

        self.publish_event(CanvasEvent::UserJoined(presence.clone()))
            .await;
        debug!(canvas = %canvas_id, user = %user_id, "user joined canvas");
        Ok(presence)
    }

    /// Leave a canvas: remove presence, heartbeat, cursor, and every focus
    /// and typing record this user holds, then publish `USER_LEFT`.
    ///
    /// Missing records are not an error; leaving twice is a no-op.
    ///
    /// # Errors
    ///
    /// Fails only when the ephemeral store is unreachable.
    pub async fn leave_canvas(&self, canvas_id: CanvasId, user_id: UserId) -> CollabResult<()> {
        // Read the presence record first so the outbound event can carry the
        // user object.
        let presence_key = keys::presence(&canvas_id, &user_id);
        let departing = self
            .store
            .hash_get_all(&presence_key)
            .await
            .map_err(Self::store_err)?;
        let user = codec::presence_from_hash(&departing).ok().map(|p| p.user);

        let mut ops = vec![
            PipelineOp::Delete { key: presence_key },
            PipelineOp::SetRemove {
                key: keys::presence_set(&canvas_id),
                member: user_id.to_string(),
            },
            PipelineOp::Delete {
                key: keys::heartbeat(&canvas_id, &user_id),
            },
            PipelineOp::Delete {
                key: keys::cursor(&canvas_id, &user_id),
            },
            PipelineOp::SetRemove {
                key: keys::cursor_set(&canvas_id),
                member: user_id.to_string(),
            },
        ];

        // Sweep this user's focus and typing records wherever they are.
        let focus_keys = self
            .store
            .keys_matching(&keys::user_focus_pattern(&canvas_id, &user_id))
            .await
            .map_err(Self::store_err)?;
        for key in focus_keys {
            if let Some((conversation_id, _)) = keys::parse_focus_key(&key) {
                ops.push(PipelineOp::SetRemove {
                    key: keys::focus_set(&canvas_id, &conversation_id),
                    member: user_id.to_string(),
                });
            }
            ops.push(PipelineOp::Delete { key });
        }

        let typing_keys = self
            .store
            .keys_matching(&keys::user_typing_pattern(&canvas_id, &user_id))
            .await
            .map_err(Self::store_err)?;
        for key in typing_keys {
            if let Some((node_id, _)) = keys::parse_typing_key(&key) {
                ops.push(PipelineOp::SetRemove {
                    key: keys::typing_set(&canvas_id, &node_id),
                    member: user_id.to_string(),
                });
            }
            ops.push(PipelineOp::Delete { key });
        }

        self.store.pipeline(ops).await.map_err(Self::store_err)?;

        self.publish_event(CanvasEvent::UserLeft(UserLeftPayload {
            canvas_id: canvas_id.clone(),
            user_id: user_id.clone(),
            user,
        }))
        .await;
        debug!(canvas = %canvas_id, user = %user_id, "user left canvas");
        Ok(())
    }

    /// Refresh a user's heartbeat and presence TTLs. No event is published.
    ///
    /// # Errors
    ///
    /// Fails only when the ephemeral store is unreachable.
    pub async fn heartbeat(&self, canvas_id: CanvasId, user_id: UserId) -> CollabResult<()> {
        let now = Utc::now();
        self.store
            .pipeline(vec![
                PipelineOp::SetString {
                    key: keys::heartbeat(&canvas_id, &user_id),
                    value: codec::epoch_millis(now),
                    ttl: Some(self.config.heartbeat_ttl),
                },
                PipelineOp::HashSet {
                    key: keys::presence(&canvas_id, &user_id),
                    fields: vec![("lastActivityAt".into(), now.to_rfc3339())],
                    ttl: Some(self.config.presence_ttl),
                },
            ])
            .await
            .map_err(Self::store_err)
    }

    /// Focus a conversation, atomically clearing any prior focus this user
    /// held on the canvas, then publish `CONVERSATION_FOCUSED`.
    ///
    /// # Errors
    ///
    /// Fails only when the ephemeral store is unreachable.
    pub async fn focus_conversation(
        &self,
        canvas_id: CanvasId,
        conversation_id: ConversationId,
        user_id: UserId,
        user: UserInfo,
    ) -> CollabResult<ConversationFocus> {
        let focus = ConversationFocus {
            canvas_id: canvas_id.clone(),
            conversation_id: conversation_id.clone(),
            user_id: user_id.clone(),
            user,
            focused_at: Utc::now(),
        };

        // One pipeline: drop every stale focus, then write the new one, so a
        // user never shows two focuses at once.
        let mut ops = Vec::new();
        let stale = self
            .store
            .keys_matching(&keys::user_focus_pattern(&canvas_id, &user_id))
            .await
            .map_err(Self::store_err)?;
        for key in stale {
            if let Some((old_conversation, _)) = keys::parse_focus_key(&key) {
                ops.push(PipelineOp::SetRemove {
                    key: keys::focus_set(&canvas_id, &old_conversation),
                    member: user_id.to_string(),
                });
            }
            ops.push(PipelineOp::Delete { key });
        }

        let fields = codec::focus_fields(&focus).map_err(arbor_core::CollabError::Internal)?;
        ops.push(PipelineOp::HashSet {
            key: keys::focus(&canvas_id, &conversation_id, &user_id),
            fields,
            ttl: Some(self.config.presence_ttl),
        });
        ops.push(PipelineOp::SetAdd {
            key: keys::focus_set(&canvas_id, &conversation_id),
            member: user_id.to_string(),
        });

        self.store.pipeline(ops).await.map_err(Self::store_err)?;

        self.publish_event(CanvasEvent::ConversationFocused(focus.clone()))
            .await;
        Ok(focus)
    }

    /// Assemble the full live snapshot of a canvas.
    ///
    /// Malformed entries are logged and skipped rather than failing the
    /// whole snapshot; lapsed locks are never included.
    ///
    /// # Errors
    ///
    /// Fails only when the ephemeral store is unreachable.
    pub async fn get_canvas_presence(&self, canvas_id: CanvasId) -> CollabResult<CanvasPresence> {
        let mut snapshot = CanvasPresence::empty(canvas_id.clone());

        // Users.
        let members = self
            .store
            .set_members(&keys::presence_set(&canvas_id))
            .await
            .map_err(Self::store_err)?;
        let reads = members.iter().map(|member| {
            let key = keys::presence(&canvas_id, &UserId::new(member.clone()));
            let store = &self.store;
            async move { store.hash_get_all(&key).await }
        });
        for (member, read) in members.iter().zip(futures::future::join_all(reads).await) {
            let map = read.map_err(Self::store_err)?;
            if map.is_empty() {
                // Lapsed record still in the set; the stale-presence scan
                // restores the invariant.
                continue;
            }
            match codec::presence_from_hash(&map) {
                Ok(presence) => snapshot.users.push(presence),
                Err(err) => warn!(%err, member, "malformed presence record skipped"),
            }
        }

        // Conversation focus, grouped by conversation.
        let focus_sets = self
            .store
            .keys_matching(&keys::focus_set_pattern(&canvas_id))
            .await
            .map_err(Self::store_err)?;
        for set_key in focus_sets {
            let users = self
                .store
                .set_members(&set_key)
                .await
                .map_err(Self::store_err)?;
            for member in users {
                let user_id = UserId::new(member.clone());
                // The set key has no trailing user segment, so rebuild the
                // record key from its conversation.
                let Some(conversation_id) = set_key
                    .strip_suffix(":focus")
                    .and_then(|prefix| prefix.rsplit(':').next())
                    .map(ConversationId::new)
                else {
                    continue;
                };
                let map = self
                    .store
                    .hash_get_all(&keys::focus(&canvas_id, &conversation_id, &user_id))
                    .await
                    .map_err(Self::store_err)?;
                if map.is_empty() {
                    continue;
                }
                match codec::focus_from_hash(&map) {
                    Ok(focus) => snapshot
                        .conversation_focus
                        .entry(conversation_id)
                        .or_default()
                        .push(focus),
                    Err(err) => warn!(%err, member, "malformed focus record skipped"),
                }
            }
        }

        // Node locks.
        let now = Utc::now();
        let lock_keys = self
            .store
            .keys_matching(&keys::lock_pattern(&canvas_id))
            .await
            .map_err(Self::store_err)?;
        for key in lock_keys {
            let Some(raw) = self.store.get_string(&key).await.map_err(Self::store_err)? else {
                continue;
            };
            match serde_json::from_str::<NodeLock>(&raw) {
                Ok(lock) if !lock.is_expired(now) => {
                    snapshot.node_locks.insert(lock.node_id.clone(), lock);
                },
                Ok(_) => {},
                Err(err) => warn!(%err, key, "malformed lock record skipped"),
            }
        }

        // Cursors.
        let cursor_members = self
            .store
            .set_members(&keys::cursor_set(&canvas_id))
            .await
            .map_err(Self::store_err)?;
        for member in cursor_members {
            let user_id = UserId::new(member.clone());
            let map = self
                .store
                .hash_get_all(&keys::cursor(&canvas_id, &user_id))
                .await
                .map_err(Self::store_err)?;
            if map.is_empty() {
                continue;
            }
            match codec::cursor_from_hash(&map) {
                Ok(cursor) => {
                    snapshot.cursors.insert(user_id, cursor);
                },
                Err(err) => warn!(%err, member, "malformed cursor record skipped"),
            }
        }

        // Typing indicators, grouped by node.
        let typing_sets = self
            .store
            .keys_matching(&keys::typing_set_pattern(&canvas_id))
            .await
            .map_err(Self::store_err)?;
        for set_key in typing_sets {
            let users = self
                .store
                .set_members(&set_key)
                .await
                .map_err(Self::store_err)?;
            for member in users {
                let record_key = format!("{set_key}:{member}");
                let Some(raw) = self
                    .store
                    .get_string(&record_key)
                    .await
                    .map_err(Self::store_err)?
                else {
                    continue;
                };
                match serde_json::from_str::<TypingIndicator>(&raw) {
                    Ok(indicator) => snapshot
                        .typing_indicators
                        .entry(indicator.node_id.clone())
                        .or_default()
                        .push(indicator),
                    Err(err) => warn!(%err, record_key, "malformed typing record skipped"),
                }
            }
        }

        snapshot.last_updated = Utc::now();
        Ok(snapshot)
    }

    /// The heartbeat timestamps for every member of a canvas's presence set.
    pub(crate) async fn heartbeats_for(
        &self,
        canvas_id: &CanvasId,
        members: &[String],
    ) -> CollabResult<HashMap<String, Option<chrono::DateTime<Utc>>>> {
        let mut result = HashMap::new();
        for member in members {
            let user_id = UserId::new(member.clone());
            let raw = self
                .store
                .get_string(&keys::heartbeat(canvas_id, &user_id))
                .await
                .map_err(Self::store_err)?;
            result.insert(
                member.clone(),
                raw.as_deref().and_then(codec::parse_epoch_millis),
            );
        }
        Ok(result)
    }
}
