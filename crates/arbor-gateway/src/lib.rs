//! Arbor Gateway - The socket-facing edge of the collaboration core.
//!
//! Accepts WebSocket connections, keeps a per-canvas room registry, bridges
//! the ephemeral store's `canvas:*:events` channels and the in-process bus
//! into those rooms, exposes the REST surface, and drives the periodic
//! cleanup jobs.
//!
//! The gateway depends on the services; the services never see the gateway.
//! Everything they want fanned out arrives through the ephemeral store's
//! pub/sub or the in-process bus.
//!
//! There is no replay protocol: a client that disconnects re-snapshots with
//! `get_canvas_presence` after rejoining.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod bridge;
mod broadcast;
mod connection;
mod frames;
mod rest;
mod rooms;
mod scheduler;

pub use frames::{ClientMessage, ServerFrame};
pub use rooms::RoomRegistry;
pub use scheduler::SchedulerConfig;

use std::sync::Arc;

use arbor_activity::ActivityService;
use arbor_collab::CollaborationService;
use arbor_events::EventBus;
use axum::Router;
use axum::routing::{delete, get, post};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct Gateway {
    /// The collaboration service.
    pub collab: CollaborationService,
    /// The activity service.
    pub activity: ActivityService,
    /// Room registry for connected sockets.
    pub rooms: Arc<RoomRegistry>,
    /// The in-process bus the services publish on.
    pub bus: EventBus,
}

impl Gateway {
    /// Assemble the gateway state.
    #[must_use]
    pub fn new(collab: CollaborationService, activity: ActivityService, bus: EventBus) -> Self {
        Self {
            collab,
            activity,
            rooms: Arc::new(RoomRegistry::new()),
            bus,
        }
    }

    /// Build the full HTTP router: REST surface plus the WebSocket endpoint.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/collaboration/ws", get(connection::ws_handler))
            .route("/collaboration/canvas/join", post(rest::join_canvas))
            .route("/collaboration/canvas/leave", post(rest::leave_canvas))
            .route("/collaboration/canvas/{id}/presence", get(rest::canvas_presence))
            .route("/collaboration/canvas/{id}/hybrid-state", get(rest::hybrid_state))
            .route("/collaboration/node/lock", post(rest::lock_node))
            .route("/collaboration/node/unlock", post(rest::unlock_node))
            .route(
                "/collaboration/node/{canvas_id}/{conversation_id}/{node_id}/extend-lock",
                post(rest::extend_lock),
            )
            .route(
                "/collaboration/node/{canvas_id}/{conversation_id}/{node_id}/lock",
                get(rest::get_lock),
            )
            .route(
                "/collaboration/node/{canvas_id}/{conversation_id}/{node_id}/lock/realtime",
                get(rest::get_lock_realtime),
            )
            .route("/collaboration/cursor/update", post(rest::update_cursor))
            .route("/collaboration/typing/update", post(rest::update_typing))
            .route("/collaboration/session/start", post(rest::start_session))
            .route("/collaboration/session/{session_id}", delete(rest::end_session))
            .route(
                "/collaboration/session/{session_id}/lock",
                post(rest::acquire_session_lock).delete(rest::release_session_lock),
            )
            .route("/collaboration/cleanup/presence", post(rest::cleanup_presence))
            .route("/collaboration/cleanup/locks", post(rest::cleanup_locks))
            .route("/collaboration/cleanup/sessions", post(rest::cleanup_sessions))
            .route("/collaboration/health", get(rest::health))
            .route("/collaboration/activities", post(rest::record_activity))
            .route(
                "/collaboration/activities/canvas/{id}",
                get(rest::activities_for_canvas),
            )
            .route(
                "/collaboration/activities/canvas/{id}/summary",
                get(rest::activity_summary),
            )
            .route(
                "/collaboration/activities/conversation/{id}",
                get(rest::activities_for_conversation),
            )
            .route(
                "/collaboration/activities/user/{id}",
                get(rest::activities_for_user),
            )
            .route("/collaboration/activities/cleanup", post(rest::cleanup_activities))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.clone())
    }

    /// Start the background halves of the gateway: the ephemeral-store
    /// bridge, the bus bridge, and the periodic jobs.
    ///
    /// # Errors
    ///
    /// Returns the collaboration error when the initial pattern
    /// subscription cannot be established.
    pub async fn start_background(
        &self,
        scheduler: SchedulerConfig,
        shutdown: CancellationToken,
    ) -> arbor_core::CollabResult<()> {
        bridge::spawn_event_bridge(self.clone(), shutdown.clone()).await?;
        bridge::spawn_bus_bridge(self.clone(), shutdown.clone());
        scheduler::spawn_periodic_jobs(self.clone(), scheduler, shutdown);
        info!("gateway background tasks started");
        Ok(())
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}
