//! Bridges from the two event sources into canvas rooms.
//!
//! One pattern subscription (`canvas:*:events`) is established at startup;
//! every message it yields is parsed, matched to its canvas room, and
//! forwarded 1:1 under the event's own name. The in-process bus feeds
//! activity and domain-diff frames the services publish.

use arbor_ephemeral::{EphemeralStore as _, keys};
use arbor_events::{BusEvent, EventEnvelope};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Gateway;
use crate::frames::ServerFrame;

/// Subscribe to the ephemeral store's canvas channels and route events to
/// rooms until shutdown.
///
/// # Errors
///
/// Fails when the initial pattern subscription cannot be established (the
/// store is unreachable); the gateway then runs degraded, REST-only.
pub(crate) async fn spawn_event_bridge(
    gateway: Gateway,
    shutdown: CancellationToken,
) -> arbor_core::CollabResult<()> {
    let mut receiver = gateway
        .collab
        .ephemeral()
        .pattern_subscribe(keys::EVENTS_PATTERN)
        .await
        .map_err(|e| arbor_core::CollabError::StoreUnavailable(e.to_string()))?;
    info!(pattern = keys::EVENTS_PATTERN, "event bridge subscribed");

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("event bridge shutting down");
                    break;
                }
                message = receiver.recv() => {
                    let Some(message) = message else {
                        warn!("event channel closed, bridge exiting");
                        break;
                    };
                    let Some(canvas_id) = keys::parse_events_channel(&message.channel) else {
                        debug!(channel = %message.channel, "non-canvas channel ignored");
                        continue;
                    };
                    let envelope = match EventEnvelope::from_json(&message.payload) {
                        Ok(envelope) => envelope,
                        Err(err) => {
                            warn!(%err, channel = %message.channel, "malformed event skipped");
                            continue;
                        },
                    };

                    let Ok(body) = serde_json::to_value(&envelope) else {
                        continue;
                    };
                    let frame = ServerFrame {
                        event: envelope.event.event_type().to_string(),
                        data: body.get("data").cloned().unwrap_or_default(),
                        timestamp: envelope.timestamp,
                    };
                    gateway.rooms.broadcast_to_canvas(&canvas_id, &frame);
                }
            }
        }
    });
    Ok(())
}

/// Route in-process bus events (activities, domain diffs, per-user sends)
/// into rooms until shutdown.
pub(crate) fn spawn_bus_bridge(gateway: Gateway, shutdown: CancellationToken) {
    let mut receiver = gateway.bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("bus bridge shutting down");
                    break;
                }
                event = receiver.recv() => {
                    let Some(event) = event else { break };
                    match event.as_ref() {
                        BusEvent::Activity {
                            canvas_id,
                            activity,
                            notify,
                        } => {
                            gateway.rooms.broadcast_to_canvas(
                                canvas_id,
                                &ServerFrame::new("activity_update", activity.clone()),
                            );
                            if *notify {
                                gateway.rooms.broadcast_to_canvas(
                                    canvas_id,
                                    &ServerFrame::new("activity_notification", activity.clone()),
                                );
                            }
                        },
                        BusEvent::BulkActivity {
                            canvas_id,
                            activities,
                        } => {
                            gateway.rooms.broadcast_to_canvas(
                                canvas_id,
                                &ServerFrame::new(
                                    "bulk_activity_update",
                                    serde_json::json!({ "activities": activities }),
                                ),
                            );
                        },
                        BusEvent::CanvasChange {
                            canvas_id,
                            kind,
                            payload,
                        } => {
                            gateway.rooms.broadcast_to_canvas(
                                canvas_id,
                                &ServerFrame::new(
                                    "canvas_change",
                                    serde_json::json!({
                                        "type": kind.as_str(),
                                        "payload": payload,
                                    }),
                                ),
                            );
                        },
                        BusEvent::ToUser {
                            user_id,
                            event,
                            payload,
                        } => {
                            gateway
                                .rooms
                                .send_to_user(user_id, &ServerFrame::new(event.clone(), payload.clone()));
                        },
                    }
                }
            }
        }
    });
}
