//! Batch queues and the coalesced-record builder.

use arbor_core::{CanvasId, UserId};
use arbor_session::{Activity, ActivityType};
use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Activities coalesce per `(canvas, user, type)`.
pub(crate) fn batch_key(canvas_id: &CanvasId, user_id: &UserId, kind: ActivityType) -> String {
    format!("{canvas_id}|{user_id}|{}", kind.as_str())
}

/// A pending batch and the timer that will flush it.
pub(crate) struct BatchQueue {
    pub(crate) items: Vec<Activity>,
    pub(crate) timer: Option<JoinHandle<()>>,
}

impl Drop for BatchQueue {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Collapse a drained queue into one batch record.
///
/// The record keeps the newest item's scope, carries the member activities
/// in `metadata.activities`, and generates a per-type description.
pub(crate) fn coalesce(mut items: Vec<Activity>) -> Option<Activity> {
    let template = items.last().cloned()?;
    let count = items.len();

    let members: Vec<serde_json::Value> = items
        .drain(..)
        .map(|a| {
            serde_json::json!({
                "description": a.description,
                "metadata": a.metadata,
                "timestamp": a.timestamp,
                "conversationId": a.conversation_id,
                "nodeId": a.node_id,
            })
        })
        .collect();

    Some(Activity {
        id: Uuid::new_v4(),
        description: batch_description(&template.user_name, template.activity_type, count),
        metadata: serde_json::json!({
            "batchCount": count,
            "activities": members,
        }),
        timestamp: Utc::now(),
        batch_id: Some(Uuid::new_v4()),
        ..template
    })
}

fn batch_description(user_name: &str, kind: ActivityType, count: usize) -> String {
    match kind {
        ActivityType::NodeEdited => {
            if count == 1 {
                format!("{user_name} made 1 edit")
            } else {
                format!("{user_name} made {count} edits")
            }
        },
        ActivityType::ConversationMoved => {
            if count == 1 {
                format!("{user_name} moved 1 conversation")
            } else {
                format!("{user_name} moved {count} conversations")
            }
        },
        ActivityType::NodeLocked => {
            if count == 1 {
                format!("{user_name} locked 1 node")
            } else {
                format!("{user_name} locked {count} nodes")
            }
        },
        ActivityType::NodeUnlocked => {
            if count == 1 {
                format!("{user_name} unlocked 1 node")
            } else {
                format!("{user_name} unlocked {count} nodes")
            }
        },
        other => format!("{user_name} performed {count} {} actions", other.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_session::ActivityPriority;

    fn item(n: u32) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            canvas_id: CanvasId::new("c1"),
            conversation_id: None,
            node_id: Some(arbor_core::NodeId::new(format!("n{n}"))),
            user_id: UserId::new("u1"),
            user_name: "Ada".to_string(),
            activity_type: ActivityType::NodeEdited,
            description: format!("Ada edited node n{n}"),
            priority: ActivityPriority::Low,
            metadata: serde_json::json!({}),
            timestamp: Utc::now(),
            batch_id: None,
        }
    }

    #[test]
    fn test_coalesce_builds_batch_record() {
        let batch = coalesce(vec![item(1), item(2), item(3)]).unwrap();
        assert_eq!(batch.description, "Ada made 3 edits");
        assert!(batch.batch_id.is_some());
        assert_eq!(batch.metadata["batchCount"], 3);
        assert_eq!(batch.metadata["activities"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_coalesce_singular() {
        let batch = coalesce(vec![item(1)]).unwrap();
        assert_eq!(batch.description, "Ada made 1 edit");
        assert_eq!(batch.metadata["batchCount"], 1);
    }

    #[test]
    fn test_coalesce_empty_is_none() {
        assert!(coalesce(Vec::new()).is_none());
    }

    #[test]
    fn test_batch_key_shape() {
        let key = batch_key(
            &CanvasId::new("c1"),
            &UserId::new("u1"),
            ActivityType::NodeEdited,
        );
        assert_eq!(key, "c1|u1|node_edited");
    }
}
