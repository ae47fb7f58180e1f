//! The canvas room registry.
//!
//! One entry per live socket, one room per canvas. All membership changes go
//! through these methods so tasks never race on the underlying maps; sends
//! that fail (a closing socket) drop that one recipient and leave the rest
//! of the room untouched.

use std::collections::HashSet;

use arbor_core::{CanvasId, SessionId, UserId};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use crate::frames::ServerFrame;

struct ConnectionEntry {
    user_id: UserId,
    canvas: Option<CanvasId>,
    sender: mpsc::UnboundedSender<ServerFrame>,
}

/// Registry of live connections and canvas rooms.
#[derive(Default)]
pub struct RoomRegistry {
    connections: DashMap<SessionId, ConnectionEntry>,
    rooms: DashMap<CanvasId, HashSet<SessionId>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly-authenticated connection, not yet in any room.
    pub fn register(
        &self,
        connection_id: SessionId,
        user_id: UserId,
        sender: mpsc::UnboundedSender<ServerFrame>,
    ) {
        self.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id,
                canvas: None,
                sender,
            },
        );
    }

    /// Drop a connection entirely, leaving its room first.
    ///
    /// Returns the canvas the connection was in, if any, so the caller can
    /// run the leave path.
    pub fn unregister(&self, connection_id: &SessionId) -> Option<CanvasId> {
        let canvas = self.leave(connection_id);
        self.connections.remove(connection_id);
        canvas
    }

    /// Move a connection into a canvas room, leaving any previous room.
    pub fn join(&self, connection_id: &SessionId, canvas_id: CanvasId) {
        self.leave(connection_id);
        if let Some(mut entry) = self.connections.get_mut(connection_id) {
            entry.canvas = Some(canvas_id.clone());
        } else {
            return;
        }
        self.rooms
            .entry(canvas_id.clone())
            .or_default()
            .insert(connection_id.clone());
        debug!(connection = %connection_id, canvas = %canvas_id, "connection joined room");
    }

    /// Remove a connection from its room, keeping the connection alive.
    ///
    /// Returns the canvas left, if any.
    pub fn leave(&self, connection_id: &SessionId) -> Option<CanvasId> {
        let canvas = {
            let mut entry = self.connections.get_mut(connection_id)?;
            entry.canvas.take()?
        };
        if let Some(mut room) = self.rooms.get_mut(&canvas) {
            room.remove(connection_id);
            if room.is_empty() {
                drop(room);
                self.rooms.remove_if(&canvas, |_, members| members.is_empty());
            }
        }
        Some(canvas)
    }

    /// The canvas a connection has joined, if any.
    #[must_use]
    pub fn canvas_of(&self, connection_id: &SessionId) -> Option<CanvasId> {
        self.connections
            .get(connection_id)?
            .canvas
            .clone()
    }

    /// Fan a frame out to every connection in a canvas room.
    ///
    /// Returns the number of recipients the frame was queued for.
    pub fn broadcast_to_canvas(&self, canvas_id: &CanvasId, frame: &ServerFrame) -> usize {
        let Some(room) = self.rooms.get(canvas_id) else {
            return 0;
        };
        let members: Vec<SessionId> = room.iter().cloned().collect();
        drop(room);

        let mut delivered = 0;
        for member in members {
            if let Some(entry) = self.connections.get(&member)
                && entry.sender.send(frame.clone()).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Send a frame to every connection a user holds, on any canvas.
    ///
    /// Returns the number of recipients the frame was queued for.
    pub fn send_to_user(&self, user_id: &UserId, frame: &ServerFrame) -> usize {
        let mut delivered = 0;
        for entry in &self.connections {
            if &entry.user_id == user_id && entry.sender.send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Number of connections currently in a room.
    #[must_use]
    pub fn room_size(&self, canvas_id: &CanvasId) -> usize {
        self.rooms.get(canvas_id).map_or(0, |room| room.len())
    }

    /// Total live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl std::fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRegistry")
            .field("connections", &self.connections.len())
            .field("rooms", &self.rooms.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> ServerFrame {
        ServerFrame::new("canvas_change", serde_json::json!({}))
    }

    fn register(
        registry: &RoomRegistry,
        user: &str,
    ) -> (SessionId, mpsc::UnboundedReceiver<ServerFrame>) {
        let id = SessionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(id.clone(), UserId::new(user), tx);
        (id, rx)
    }

    #[test]
    fn test_join_broadcast_leave() {
        let registry = RoomRegistry::new();
        let canvas = CanvasId::new("c1");
        let (a, mut rx_a) = register(&registry, "u1");
        let (b, mut rx_b) = register(&registry, "u2");

        registry.join(&a, canvas.clone());
        registry.join(&b, canvas.clone());
        assert_eq!(registry.room_size(&canvas), 2);

        assert_eq!(registry.broadcast_to_canvas(&canvas, &frame()), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());

        assert_eq!(registry.leave(&a), Some(canvas.clone()));
        assert_eq!(registry.broadcast_to_canvas(&canvas, &frame()), 1);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_rejoin_moves_rooms() {
        let registry = RoomRegistry::new();
        let (a, _rx) = register(&registry, "u1");

        registry.join(&a, CanvasId::new("c1"));
        registry.join(&a, CanvasId::new("c2"));

        assert_eq!(registry.room_size(&CanvasId::new("c1")), 0);
        assert_eq!(registry.room_size(&CanvasId::new("c2")), 1);
        assert_eq!(registry.canvas_of(&a), Some(CanvasId::new("c2")));
    }

    #[test]
    fn test_closed_receiver_drops_only_that_recipient() {
        let registry = RoomRegistry::new();
        let canvas = CanvasId::new("c1");
        let (a, rx_a) = register(&registry, "u1");
        let (b, mut rx_b) = register(&registry, "u2");
        registry.join(&a, canvas.clone());
        registry.join(&b, canvas.clone());

        drop(rx_a);
        assert_eq!(registry.broadcast_to_canvas(&canvas, &frame()), 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_send_to_user_reaches_all_their_connections() {
        let registry = RoomRegistry::new();
        let (_a, mut rx_a) = register(&registry, "u1");
        let (_b, mut rx_b) = register(&registry, "u1");
        let (_c, mut rx_c) = register(&registry, "u2");

        assert_eq!(registry.send_to_user(&UserId::new("u1"), &frame()), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_unregister_reports_canvas() {
        let registry = RoomRegistry::new();
        let (a, _rx) = register(&registry, "u1");
        registry.join(&a, CanvasId::new("c1"));

        assert_eq!(registry.unregister(&a), Some(CanvasId::new("c1")));
        assert_eq!(registry.connection_count(), 0);
    }
}
