//! Gateway fan-out: ephemeral store events and bus events reach room
//! members.

mod common;

use std::time::Duration;

use arbor_core::{CanvasId, SessionId, UserId};
use arbor_gateway::{Gateway, SchedulerConfig, ServerFrame};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use common::CollabHarness;

async fn started_gateway(harness: &CollabHarness) -> (Gateway, CancellationToken) {
    let gateway = Gateway::new(
        harness.collab.clone(),
        harness.activity.clone(),
        harness.bus.clone(),
    );
    let shutdown = CancellationToken::new();
    gateway
        .start_background(SchedulerConfig::default(), shutdown.clone())
        .await
        .expect("background tasks start over memory stores");
    (gateway, shutdown)
}

fn join_room(
    gateway: &Gateway,
    canvas: &CanvasId,
    user: &str,
) -> (SessionId, mpsc::UnboundedReceiver<ServerFrame>) {
    let connection = SessionId::new();
    let (tx, rx) = mpsc::unbounded_channel();
    gateway.rooms.register(connection.clone(), UserId::new(user), tx);
    gateway.rooms.join(&connection, canvas.clone());
    (connection, rx)
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<ServerFrame>) -> ServerFrame {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("connection channel closed")
}

#[tokio::test]
async fn test_store_events_fan_out_to_room() {
    let harness = CollabHarness::new();
    let (gateway, shutdown) = started_gateway(&harness).await;
    let canvas = CanvasId::new("canvas-1");
    let (_conn, mut rx) = join_room(&gateway, &canvas, "watcher");

    harness
        .collab
        .join_canvas(canvas.clone(), UserId::new("ada"), CollabHarness::user("ada"))
        .await
        .unwrap();

    let frame = next_frame(&mut rx).await;
    assert_eq!(frame.event, "USER_JOINED");
    assert_eq!(frame.data["userId"], "ada");

    // A room on another canvas hears nothing.
    let (_other, mut other_rx) = join_room(&gateway, &CanvasId::new("canvas-2"), "bystander");
    harness
        .collab
        .leave_canvas(canvas, UserId::new("ada"))
        .await
        .unwrap();
    let frame = next_frame(&mut rx).await;
    assert_eq!(frame.event, "USER_LEFT");
    assert!(other_rx.try_recv().is_err());

    shutdown.cancel();
}

#[tokio::test]
async fn test_activity_fan_out_and_notification() {
    let harness = CollabHarness::new();
    let (gateway, shutdown) = started_gateway(&harness).await;
    let canvas = CanvasId::new("canvas-1");
    let (_conn, mut rx) = join_room(&gateway, &canvas, "watcher");

    harness
        .activity
        .record(arbor_activity::ActivityInput {
            canvas_id: canvas,
            conversation_id: None,
            node_id: None,
            user_id: UserId::new("ada"),
            user_name: "ada".to_string(),
            activity_type: arbor_session::ActivityType::BranchCreated,
            description: "ada branched".to_string(),
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();

    let first = next_frame(&mut rx).await;
    assert_eq!(first.event, "activity_update");
    let second = next_frame(&mut rx).await;
    assert_eq!(second.event, "activity_notification");

    shutdown.cancel();
}

#[tokio::test]
async fn test_direct_broadcast_helpers() {
    let harness = CollabHarness::new();
    let (gateway, shutdown) = started_gateway(&harness).await;
    let canvas = CanvasId::new("canvas-1");
    let (_conn, mut rx) = join_room(&gateway, &canvas, "watcher");

    gateway.broadcast_node_created(&canvas, serde_json::json!({ "nodeId": "n1" }));
    let frame = next_frame(&mut rx).await;
    assert_eq!(frame.event, "canvas_change");
    assert_eq!(frame.data["type"], "node_created");
    assert_eq!(frame.data["payload"]["nodeId"], "n1");

    gateway.broadcast_to_user(
        &UserId::new("watcher"),
        "activity_notification",
        serde_json::json!({ "message": "hello" }),
    );
    let frame = next_frame(&mut rx).await;
    assert_eq!(frame.event, "activity_notification");

    shutdown.cancel();
}
