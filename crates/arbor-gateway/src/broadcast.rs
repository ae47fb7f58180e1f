//! Direct broadcast helpers for external collaborators.
//!
//! The node-edit RPC, file pipeline, and bulk operations call these after
//! committing their own writes; the frames go straight to already-joined
//! clients, not through the ephemeral store.

use arbor_core::{CanvasId, UserId};
use arbor_events::CanvasChangeKind;

use crate::Gateway;
use crate::frames::ServerFrame;

impl Gateway {
    fn canvas_change(&self, canvas_id: &CanvasId, kind: CanvasChangeKind, payload: serde_json::Value) {
        let frame = ServerFrame::new(
            "canvas_change",
            serde_json::json!({ "type": kind.as_str(), "payload": payload }),
        );
        self.rooms.broadcast_to_canvas(canvas_id, &frame);
    }

    /// Announce a created conversation tree to its canvas room.
    pub fn broadcast_tree_created(&self, canvas_id: &CanvasId, payload: serde_json::Value) {
        self.canvas_change(canvas_id, CanvasChangeKind::TreeCreated, payload);
    }

    /// Announce an updated conversation tree.
    pub fn broadcast_tree_updated(&self, canvas_id: &CanvasId, payload: serde_json::Value) {
        self.canvas_change(canvas_id, CanvasChangeKind::TreeUpdated, payload);
    }

    /// Announce a deleted conversation tree.
    pub fn broadcast_tree_deleted(&self, canvas_id: &CanvasId, payload: serde_json::Value) {
        self.canvas_change(canvas_id, CanvasChangeKind::TreeDeleted, payload);
    }

    /// Announce a created node.
    pub fn broadcast_node_created(&self, canvas_id: &CanvasId, payload: serde_json::Value) {
        self.canvas_change(canvas_id, CanvasChangeKind::NodeCreated, payload);
    }

    /// Announce an updated node.
    pub fn broadcast_node_updated(&self, canvas_id: &CanvasId, payload: serde_json::Value) {
        self.canvas_change(canvas_id, CanvasChangeKind::NodeUpdated, payload);
    }

    /// Announce a deleted node.
    pub fn broadcast_node_deleted(&self, canvas_id: &CanvasId, payload: serde_json::Value) {
        self.canvas_change(canvas_id, CanvasChangeKind::NodeDeleted, payload);
    }

    /// Push one activity record to its canvas room.
    pub fn broadcast_activity(&self, canvas_id: &CanvasId, activity: serde_json::Value) {
        self.rooms
            .broadcast_to_canvas(canvas_id, &ServerFrame::new("activity_update", activity));
    }

    /// Push a set of activity records (bulk operations) to a canvas room.
    pub fn broadcast_bulk_activity(
        &self,
        canvas_id: &CanvasId,
        activities: Vec<serde_json::Value>,
    ) {
        self.rooms.broadcast_to_canvas(
            canvas_id,
            &ServerFrame::new(
                "bulk_activity_update",
                serde_json::json!({ "activities": activities }),
            ),
        );
    }

    /// Send a frame to every connection one user holds.
    pub fn broadcast_to_user(&self, user_id: &UserId, event: &str, payload: serde_json::Value) {
        self.rooms
            .send_to_user(user_id, &ServerFrame::new(event, payload));
    }
}
