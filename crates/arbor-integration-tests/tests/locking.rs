//! Single-writer lock scenarios across the collaboration service.

mod common;

use std::time::Duration;

use arbor_core::{CanvasId, CollabError, ConversationId, NodeId, SessionId, UserId};
use common::{CollabHarness, next_event_types};

fn ids() -> (CanvasId, ConversationId, NodeId) {
    (
        CanvasId::new("canvas-1"),
        ConversationId::new("conv-1"),
        NodeId::new("node-1"),
    )
}

#[tokio::test]
async fn test_single_writer_handoff_with_event_order() {
    let harness = CollabHarness::new();
    let (canvas, conversation, node) = ids();
    let mut events = harness.events().await;

    // A acquires.
    let lock_a = harness
        .collab
        .lock_node(
            canvas.clone(),
            conversation.clone(),
            node.clone(),
            UserId::new("a"),
            CollabHarness::user("a"),
            SessionId::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(lock_a.user_id, UserId::new("a"));
    assert!(lock_a.expires_at > lock_a.locked_at);

    // B fails, and the error names the holder.
    let err = harness
        .collab
        .lock_node(
            canvas.clone(),
            conversation.clone(),
            node.clone(),
            UserId::new("b"),
            CollabHarness::user("b"),
            SessionId::new(),
            None,
        )
        .await
        .unwrap_err();
    match &err {
        CollabError::LockAlreadyHeld { current_lock } => {
            assert_eq!(current_lock.user_id, UserId::new("a"));
        },
        other => panic!("expected LockAlreadyHeld, got {other:?}"),
    }
    let details = err.details().unwrap();
    assert_eq!(details["currentLock"]["userId"], "a");

    // A releases; B retries and wins.
    assert!(
        harness
            .collab
            .unlock_node(canvas.clone(), conversation.clone(), node.clone(), UserId::new("a"))
            .await
            .unwrap()
    );
    let lock_b = harness
        .collab
        .lock_node(
            canvas,
            conversation,
            node,
            UserId::new("b"),
            CollabHarness::user("b"),
            SessionId::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(lock_b.user_id, UserId::new("b"));

    // Any one subscriber observes the per-node total order.
    assert_eq!(
        next_event_types(&mut events, 3).await,
        vec!["NODE_LOCKED", "NODE_UNLOCKED", "NODE_LOCKED"]
    );
}

#[tokio::test]
async fn test_lock_is_idempotent_for_owner() {
    let harness = CollabHarness::new();
    let (canvas, conversation, node) = ids();
    let uid = UserId::new("a");

    let first = harness
        .collab
        .lock_node(
            canvas.clone(),
            conversation.clone(),
            node.clone(),
            uid.clone(),
            CollabHarness::user("a"),
            SessionId::new(),
            None,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = harness
        .collab
        .lock_node(
            canvas,
            conversation,
            node,
            uid,
            CollabHarness::user("a"),
            SessionId::new(),
            None,
        )
        .await
        .unwrap();

    // Re-locking extends rather than replaces.
    assert_eq!(second.locked_at, first.locked_at);
    assert!(second.expires_at > first.expires_at);
}

#[tokio::test]
async fn test_lock_unlock_get_yields_nothing() {
    let harness = CollabHarness::new();
    let (canvas, conversation, node) = ids();
    let uid = UserId::new("a");

    harness
        .collab
        .lock_node(
            canvas.clone(),
            conversation.clone(),
            node.clone(),
            uid.clone(),
            CollabHarness::user("a"),
            SessionId::new(),
            None,
        )
        .await
        .unwrap();
    harness
        .collab
        .unlock_node(canvas.clone(), conversation.clone(), node.clone(), uid)
        .await
        .unwrap();

    assert!(
        harness
            .collab
            .get_node_lock(&canvas, &conversation, &node)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_expired_lock_reaped_and_reacquirable() {
    let harness = CollabHarness::new();
    let (canvas, conversation, node) = ids();

    // A holds a one-second lock and disappears.
    harness
        .collab
        .lock_node(
            canvas.clone(),
            conversation.clone(),
            node.clone(),
            UserId::new("a"),
            CollabHarness::user("a"),
            SessionId::new(),
            Some(Duration::from_secs(1)),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_100)).await;

    // The lapsed lock is never reported as live.
    assert!(
        harness
            .collab
            .get_node_lock(&canvas, &conversation, &node)
            .await
            .unwrap()
            .is_none()
    );

    // B acquires after expiry.
    let lock_b = harness
        .collab
        .lock_node(
            canvas,
            conversation,
            node,
            UserId::new("b"),
            CollabHarness::user("b"),
            SessionId::new(),
            None,
        )
        .await
        .unwrap();
    assert_eq!(lock_b.user_id, UserId::new("b"));
}

#[tokio::test]
async fn test_stress_hundred_acquirers_one_winner() {
    let harness = CollabHarness::new();
    let (canvas, conversation, node) = ids();

    let mut handles = Vec::new();
    for i in 0..100 {
        let collab = harness.collab.clone();
        let (canvas, conversation, node) = (canvas.clone(), conversation.clone(), node.clone());
        handles.push(tokio::spawn(async move {
            collab
                .lock_node(
                    canvas,
                    conversation,
                    node,
                    UserId::new(format!("u{i}")),
                    CollabHarness::user(&format!("u{i}")),
                    SessionId::new(),
                    None,
                )
                .await
        }));
    }

    let mut winners = Vec::new();
    let mut losses = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(lock) => winners.push(lock.user_id),
            Err(CollabError::LockAlreadyHeld { .. }) => losses += 1,
            Err(other) => panic!("unexpected error under contention: {other:?}"),
        }
    }
    assert_eq!(winners.len(), 1, "exactly one acquirer may win");
    assert_eq!(losses, 99);

    // The store agrees with the winner.
    let held = harness
        .collab
        .get_node_lock(&canvas, &conversation, &node)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(held.user_id, winners[0]);
}

#[tokio::test]
async fn test_realtime_status_follows_ephemeral_store() {
    let harness = CollabHarness::new();
    let (canvas, conversation, node) = ids();

    let absent = harness
        .collab
        .get_realtime_lock_status(&canvas, &conversation, &node)
        .await
        .unwrap();
    assert!(!absent.has_lock);
    assert_eq!(absent.source, "redis");

    harness
        .collab
        .lock_node(
            canvas.clone(),
            conversation.clone(),
            node.clone(),
            UserId::new("a"),
            CollabHarness::user("a"),
            SessionId::new(),
            None,
        )
        .await
        .unwrap();

    let held = harness
        .collab
        .get_realtime_lock_status(&canvas, &conversation, &node)
        .await
        .unwrap();
    assert!(held.has_lock);
    assert_eq!(held.lock.unwrap().user_id, UserId::new("a"));
}
