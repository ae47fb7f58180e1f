//! Durable records: editing sessions and activities.
//!
//! Wire serialization is camelCase, matching the collection conventions of
//! the clusters this server shares data with.

use arbor_core::{CanvasId, ConversationId, NodeId, SessionId, UserId, UserInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a durable editing session is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditingTargetKind {
    /// Whole-canvas editing (layout, reorganization).
    Canvas,
    /// A conversation tree.
    Conversation,
    /// A single node.
    Node,
}

/// The authoritative record of one user's editing session.
///
/// One record exists per (user, target); the hybrid layer writes here first
/// and mirrors into the ephemeral store best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditingSession {
    /// Unique session identifier.
    pub session_id: SessionId,
    /// The editing user.
    pub user_id: UserId,
    /// Embedded user object for display.
    pub user: UserInfo,
    /// The canvas being edited.
    pub canvas_id: CanvasId,
    /// The conversation, for conversation- and node-scoped sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// The node, for node-scoped sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Scope of the session.
    pub editing_type: EditingTargetKind,
    /// Canonical target string, e.g. `canvas-1/conv-2/node-3`; lock conflict
    /// checks compare on this.
    pub editing_target: String,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// Last action inside this session.
    pub last_activity_at: DateTime<Utc>,
    /// False once ended or reaped.
    pub is_active: bool,
    /// Whether this session holds the durable lock on its target.
    pub has_lock: bool,
    /// When the durable lock lapses, while `has_lock`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_expiry: Option<DateTime<Utc>>,
    /// Optimistic-concurrency version, bumped on every update.
    pub version: u64,
}

impl EditingSession {
    /// Start a new active session for a target, stamped now.
    #[must_use]
    pub fn start(
        user: UserInfo,
        canvas_id: CanvasId,
        conversation_id: Option<ConversationId>,
        node_id: Option<NodeId>,
        editing_type: EditingTargetKind,
    ) -> Self {
        let now = Utc::now();
        let editing_target = Self::target_string(
            &canvas_id,
            conversation_id.as_ref(),
            node_id.as_ref(),
        );
        Self {
            session_id: SessionId::new(),
            user_id: user.id.clone(),
            user,
            canvas_id,
            conversation_id,
            node_id,
            editing_type,
            editing_target,
            started_at: now,
            last_activity_at: now,
            is_active: true,
            has_lock: false,
            lock_expiry: None,
            version: 0,
        }
    }

    /// The canonical target string for a scope.
    #[must_use]
    pub fn target_string(
        canvas_id: &CanvasId,
        conversation_id: Option<&ConversationId>,
        node_id: Option<&NodeId>,
    ) -> String {
        match (conversation_id, node_id) {
            (Some(conversation), Some(node)) => format!("{canvas_id}/{conversation}/{node}"),
            (Some(conversation), None) => format!("{canvas_id}/{conversation}"),
            _ => canvas_id.to_string(),
        }
    }

    /// Whether this session holds a live durable lock at `now`.
    #[must_use]
    pub fn holds_live_lock(&self, now: DateTime<Utc>) -> bool {
        self.has_lock && self.lock_expiry.is_some_and(|expiry| expiry > now)
    }
}

/// Priority band of an activity, driving feed styling and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityPriority {
    /// Routine, batchable noise.
    Low,
    /// Normal feed entries.
    Medium,
    /// Structural changes worth a toast.
    High,
    /// Conflicts and failures.
    Critical,
}

/// The closed set of domain activity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    /// A conversation tree was created.
    ConversationCreated,
    /// A conversation tree was deleted.
    ConversationDeleted,
    /// A conversation tree was moved on the canvas.
    ConversationMoved,
    /// A conversation tree was renamed.
    ConversationRenamed,
    /// A node was created.
    NodeCreated,
    /// A node's content was edited.
    NodeEdited,
    /// A node was deleted.
    NodeDeleted,
    /// A branch was forked off a node.
    BranchCreated,
    /// A file was uploaded to the canvas.
    FileUploaded,
    /// A user joined the canvas.
    UserJoinedCanvas,
    /// A user left the canvas.
    UserLeftCanvas,
    /// A node lock was acquired.
    NodeLocked,
    /// A node lock was released.
    NodeUnlocked,
    /// Multiple objects were deleted at once.
    BulkDelete,
    /// Multiple objects were moved at once.
    BulkMove,
    /// The canvas layout was reorganized.
    CanvasReorganized,
    /// Concurrent edits collided.
    ConflictDetected,
    /// A server-side operation failed.
    ErrorOccurred,
}

impl ActivityType {
    /// The priority band for this type.
    #[must_use]
    pub fn priority(self) -> ActivityPriority {
        match self {
            Self::ConflictDetected | Self::ErrorOccurred => ActivityPriority::Critical,
            Self::BranchCreated
            | Self::ConversationCreated
            | Self::ConversationDeleted
            | Self::BulkDelete
            | Self::UserJoinedCanvas
            | Self::UserLeftCanvas => ActivityPriority::High,
            Self::NodeCreated
            | Self::NodeDeleted
            | Self::ConversationMoved
            | Self::ConversationRenamed
            | Self::BulkMove
            | Self::CanvasReorganized
            | Self::FileUploaded => ActivityPriority::Medium,
            Self::NodeEdited | Self::NodeLocked | Self::NodeUnlocked => ActivityPriority::Low,
        }
    }

    /// Whether frequent occurrences of this type coalesce into one record.
    #[must_use]
    pub fn is_batchable(self) -> bool {
        matches!(
            self,
            Self::NodeEdited | Self::ConversationMoved | Self::NodeLocked | Self::NodeUnlocked
        )
    }

    /// Whether this type additionally triggers a notification toast.
    #[must_use]
    pub fn is_notification(self) -> bool {
        matches!(
            self,
            Self::BranchCreated
                | Self::ConflictDetected
                | Self::ErrorOccurred
                | Self::UserJoinedCanvas
                | Self::UserLeftCanvas
                | Self::ConversationCreated
        )
    }

    /// The wire name, e.g. `node_edited`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConversationCreated => "conversation_created",
            Self::ConversationDeleted => "conversation_deleted",
            Self::ConversationMoved => "conversation_moved",
            Self::ConversationRenamed => "conversation_renamed",
            Self::NodeCreated => "node_created",
            Self::NodeEdited => "node_edited",
            Self::NodeDeleted => "node_deleted",
            Self::BranchCreated => "branch_created",
            Self::FileUploaded => "file_uploaded",
            Self::UserJoinedCanvas => "user_joined_canvas",
            Self::UserLeftCanvas => "user_left_canvas",
            Self::NodeLocked => "node_locked",
            Self::NodeUnlocked => "node_unlocked",
            Self::BulkDelete => "bulk_delete",
            Self::BulkMove => "bulk_move",
            Self::CanvasReorganized => "canvas_reorganized",
            Self::ConflictDetected => "conflict_detected",
            Self::ErrorOccurred => "error_occurred",
        }
    }
}

/// A durable record of one domain event (or one flushed batch of them).
///
/// Activities are never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Record identifier.
    pub id: Uuid,
    /// The canvas the event happened on.
    pub canvas_id: CanvasId,
    /// The conversation, when the event is conversation-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// The node, when the event is node-scoped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// The acting user.
    pub user_id: UserId,
    /// The acting user's display name, denormalized for the feed.
    pub user_name: String,
    /// Domain event type.
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    /// Human-readable description.
    pub description: String,
    /// Priority band.
    pub priority: ActivityPriority,
    /// Free-form event payload; batch records carry `batchCount` and
    /// `activities` here.
    pub metadata: serde_json::Value,
    /// When the event happened (batch records: when the batch flushed).
    pub timestamp: DateTime<Utc>,
    /// Set when this record coalesces a batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
}

/// Query filter for the activity feed.
#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    /// Restrict to one canvas.
    pub canvas_id: Option<CanvasId>,
    /// Restrict to one conversation.
    pub conversation_id: Option<ConversationId>,
    /// Restrict to one user.
    pub user_id: Option<UserId>,
    /// Restrict to these types.
    pub activity_types: Option<Vec<ActivityType>>,
    /// Inclusive window start.
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive window end.
    pub end_date: Option<DateTime<Utc>>,
    /// Maximum records returned; `None` means unbounded (callers apply
    /// their own default).
    pub limit: Option<usize>,
    /// Records skipped, for paging.
    pub offset: usize,
}

impl ActivityFilter {
    /// Filter for one canvas.
    #[must_use]
    pub fn for_canvas(canvas_id: CanvasId) -> Self {
        Self {
            canvas_id: Some(canvas_id),
            ..Self::default()
        }
    }

    /// Whether `activity` passes every criterion except limit/offset.
    #[must_use]
    pub fn matches(&self, activity: &Activity) -> bool {
        if let Some(canvas) = &self.canvas_id
            && &activity.canvas_id != canvas
        {
            return false;
        }
        if let Some(conversation) = &self.conversation_id
            && activity.conversation_id.as_ref() != Some(conversation)
        {
            return false;
        }
        if let Some(user) = &self.user_id
            && &activity.user_id != user
        {
            return false;
        }
        if let Some(types) = &self.activity_types
            && !types.contains(&activity.activity_type)
        {
            return false;
        }
        if let Some(start) = self.start_date
            && activity.timestamp < start
        {
            return false;
        }
        if let Some(end) = self.end_date
            && activity.timestamp > end
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ActivityType::NodeEdited).unwrap(),
            "\"node_edited\""
        );
        assert_eq!(
            serde_json::to_string(&ActivityType::UserJoinedCanvas).unwrap(),
            "\"user_joined_canvas\""
        );
        assert_eq!(ActivityType::ConflictDetected.as_str(), "conflict_detected");
    }

    #[test]
    fn test_batchable_set() {
        for batchable in [
            ActivityType::NodeEdited,
            ActivityType::ConversationMoved,
            ActivityType::NodeLocked,
            ActivityType::NodeUnlocked,
        ] {
            assert!(batchable.is_batchable());
        }
        assert!(!ActivityType::BranchCreated.is_batchable());
        assert!(!ActivityType::ConversationCreated.is_batchable());
    }

    #[test]
    fn test_notification_set() {
        for notifying in [
            ActivityType::BranchCreated,
            ActivityType::ConflictDetected,
            ActivityType::ErrorOccurred,
            ActivityType::UserJoinedCanvas,
            ActivityType::UserLeftCanvas,
            ActivityType::ConversationCreated,
        ] {
            assert!(notifying.is_notification());
        }
        assert!(!ActivityType::NodeEdited.is_notification());
    }

    #[test]
    fn test_target_string_shapes() {
        let canvas = CanvasId::new("c1");
        let conversation = ConversationId::new("v1");
        let node = NodeId::new("n1");
        assert_eq!(EditingSession::target_string(&canvas, None, None), "c1");
        assert_eq!(
            EditingSession::target_string(&canvas, Some(&conversation), None),
            "c1/v1"
        );
        assert_eq!(
            EditingSession::target_string(&canvas, Some(&conversation), Some(&node)),
            "c1/v1/n1"
        );
    }

    #[test]
    fn test_holds_live_lock() {
        let user = UserInfo::new("u1", "Ada", "ada@example.com");
        let mut session = EditingSession::start(
            user,
            CanvasId::new("c1"),
            None,
            None,
            EditingTargetKind::Canvas,
        );
        let now = Utc::now();
        assert!(!session.holds_live_lock(now));
        session.has_lock = true;
        session.lock_expiry = Some(now + chrono::Duration::seconds(30));
        assert!(session.holds_live_lock(now));
        session.lock_expiry = Some(now - chrono::Duration::seconds(1));
        assert!(!session.holds_live_lock(now));
    }

    #[test]
    fn test_filter_matching() {
        let activity = Activity {
            id: Uuid::new_v4(),
            canvas_id: CanvasId::new("c1"),
            conversation_id: Some(ConversationId::new("v1")),
            node_id: None,
            user_id: UserId::new("u1"),
            user_name: "Ada".to_string(),
            activity_type: ActivityType::NodeEdited,
            description: "Ada edited a node".to_string(),
            priority: ActivityPriority::Low,
            metadata: serde_json::json!({}),
            timestamp: Utc::now(),
            batch_id: None,
        };

        assert!(ActivityFilter::for_canvas(CanvasId::new("c1")).matches(&activity));
        assert!(!ActivityFilter::for_canvas(CanvasId::new("c2")).matches(&activity));

        let typed = ActivityFilter {
            activity_types: Some(vec![ActivityType::NodeCreated]),
            ..ActivityFilter::default()
        };
        assert!(!typed.matches(&activity));
    }
}
