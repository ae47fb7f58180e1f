//! Cursor positions and typing indicators.

use arbor_core::{
    CanvasId, CollabError, CollabResult, CursorPosition, NodeId, TypingIndicator, UserId, UserInfo,
};
use arbor_ephemeral::{EphemeralStore as _, PipelineOp, keys};
use arbor_events::{CanvasEvent, TypingStoppedPayload};
use chrono::Utc;
use tracing::debug;

use crate::codec;
use crate::service::CollaborationService;

impl CollaborationService {
    /// Record a cursor position, throttled to one write per user per
    /// throttle window.
    ///
    /// The `CURSOR_UPDATED` event is published without blocking the caller;
    /// cursor traffic is the hot path.
    ///
    /// # Errors
    ///
    /// [`CollabError::ThrottleLimitExceeded`] inside the throttle window —
    /// an expected rejection, logged at debug only.
    pub async fn update_cursor_position(
        &self,
        canvas_id: CanvasId,
        user_id: UserId,
        user: UserInfo,
        x: f64,
        y: f64,
    ) -> CollabResult<CursorPosition> {
        let throttle_key = keys::cursor_throttle(&user_id);
        if self
            .store
            .exists(&throttle_key)
            .await
            .map_err(Self::store_err)?
        {
            debug!(user = %user_id, "cursor update throttled");
            return Err(CollabError::ThrottleLimitExceeded);
        }

        let cursor = CursorPosition {
            canvas_id: canvas_id.clone(),
            user_id: user_id.clone(),
            user,
            x,
            y,
            updated_at: Utc::now(),
        };
        let fields = codec::cursor_fields(&cursor).map_err(CollabError::Internal)?;

        self.store
            .pipeline(vec![
                PipelineOp::HashSet {
                    key: keys::cursor(&canvas_id, &user_id),
                    fields,
                    ttl: Some(self.config.cursor_ttl),
                },
                PipelineOp::SetAdd {
                    key: keys::cursor_set(&canvas_id),
                    member: user_id.to_string(),
                },
                PipelineOp::SetString {
                    key: throttle_key,
                    value: "1".to_string(),
                    ttl: Some(self.config.cursor_throttle),
                },
            ])
            .await
            .map_err(Self::store_err)?;

        self.publish_event_detached(CanvasEvent::CursorUpdated(cursor.clone()));
        Ok(cursor)
    }

    /// Start or stop a typing indicator on a node.
    ///
    /// Starting writes a short-TTL record the client must renew; silence
    /// means stopped. Returns the indicator while typing, `None` after a
    /// stop.
    ///
    /// # Errors
    ///
    /// Fails only when the ephemeral store is unreachable.
    pub async fn update_typing_indicator(
        &self,
        canvas_id: CanvasId,
        node_id: NodeId,
        user_id: UserId,
        user: UserInfo,
        is_typing: bool,
    ) -> CollabResult<Option<TypingIndicator>> {
        let record_key = keys::typing(&canvas_id, &node_id, &user_id);
        let set_key = keys::typing_set(&canvas_id, &node_id);

        if is_typing {
            let indicator = TypingIndicator {
                canvas_id,
                node_id,
                user_id: user_id.clone(),
                user,
                started_at: Utc::now(),
            };
            let payload = serde_json::to_string(&indicator)
                .map_err(|e| CollabError::Internal(e.to_string()))?;
            self.store
                .pipeline(vec![
                    PipelineOp::SetString {
                        key: record_key,
                        value: payload,
                        ttl: Some(self.config.typing_ttl),
                    },
                    PipelineOp::SetAdd {
                        key: set_key,
                        member: user_id.to_string(),
                    },
                ])
                .await
                .map_err(Self::store_err)?;

            self.publish_event(CanvasEvent::TypingStarted(indicator.clone()))
                .await;
            Ok(Some(indicator))
        } else {
            self.store
                .pipeline(vec![
                    PipelineOp::Delete { key: record_key },
                    PipelineOp::SetRemove {
                        key: set_key,
                        member: user_id.to_string(),
                    },
                ])
                .await
                .map_err(Self::store_err)?;

            self.publish_event(CanvasEvent::TypingStopped(TypingStoppedPayload {
                canvas_id,
                node_id,
                user_id,
            }))
            .await;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::CollabConfig;
    use crate::service::test_support::{service, service_with, user};
    use arbor_ephemeral::EphemeralStore as _;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cursor_throttle_window() {
        let service = service_with(CollabConfig {
            cursor_throttle: Duration::from_millis(100),
            ..CollabConfig::default()
        });
        let canvas = CanvasId::new("c1");
        let uid = UserId::new("u1");

        service
            .update_cursor_position(canvas.clone(), uid.clone(), user("u1"), 1.0, 1.0)
            .await
            .unwrap();

        // Inside the window: rejected.
        let err = service
            .update_cursor_position(canvas.clone(), uid.clone(), user("u1"), 2.0, 2.0)
            .await
            .unwrap_err();
        assert!(matches!(err, CollabError::ThrottleLimitExceeded));

        // Past the window: accepted.
        tokio::time::sleep(Duration::from_millis(120)).await;
        let cursor = service
            .update_cursor_position(canvas, uid, user("u1"), 3.0, 3.0)
            .await
            .unwrap();
        assert!((cursor.x - 3.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_throttled_update_publishes_nothing() {
        let service = service();
        let canvas = CanvasId::new("c1");
        let uid = UserId::new("u1");
        let mut rx = service
            .ephemeral()
            .pattern_subscribe("canvas:*:events")
            .await
            .unwrap();

        service
            .update_cursor_position(canvas.clone(), uid.clone(), user("u1"), 1.0, 1.0)
            .await
            .unwrap();
        let _ = service
            .update_cursor_position(canvas, uid, user("u1"), 2.0, 2.0)
            .await
            .unwrap_err();

        // Exactly one CURSOR_UPDATED for the accepted write.
        let first = rx.recv().await.unwrap();
        let envelope = arbor_events::EventEnvelope::from_json(&first.payload).unwrap();
        assert_eq!(envelope.event.event_type(), "CURSOR_UPDATED");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_typing_start_stop() {
        let service = service();
        let canvas = CanvasId::new("c1");
        let node = NodeId::new("n1");
        let uid = UserId::new("u1");

        let started = service
            .update_typing_indicator(canvas.clone(), node.clone(), uid.clone(), user("u1"), true)
            .await
            .unwrap();
        assert!(started.is_some());

        let snapshot = service.get_canvas_presence(canvas.clone()).await.unwrap();
        assert_eq!(snapshot.typing_indicators[&node].len(), 1);

        let stopped = service
            .update_typing_indicator(canvas.clone(), node.clone(), uid, user("u1"), false)
            .await
            .unwrap();
        assert!(stopped.is_none());

        let snapshot = service.get_canvas_presence(canvas).await.unwrap();
        assert!(snapshot.typing_indicators.is_empty());
    }

    #[tokio::test]
    async fn test_typing_ttl_lapses_to_silence() {
        let service = service_with(CollabConfig {
            typing_ttl: Duration::from_millis(40),
            ..CollabConfig::default()
        });
        let canvas = CanvasId::new("c1");
        let node = NodeId::new("n1");

        service
            .update_typing_indicator(canvas.clone(), node, UserId::new("u1"), user("u1"), true)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let snapshot = service.get_canvas_presence(canvas).await.unwrap();
        assert!(snapshot.typing_indicators.is_empty());
    }
}
