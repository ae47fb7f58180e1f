//! The REST surface.
//!
//! Every response is `{ success, data?, error? }`. Collaboration errors map
//! to 400 with their wire code in the body; an unreachable ephemeral store
//! maps to 503 only when the durable store cannot answer either (read paths
//! that can degrade do so inside the service).

use std::time::Duration;

use arbor_activity::{ActivityInput, Recorded};
use arbor_core::{CanvasId, CollabError, ConversationId, NodeId, UserId, UserInfo};
use arbor_ephemeral::EphemeralStore as _;
use arbor_session::{ActivityFilter, ActivityType, EditingTargetKind, SessionStore as _};
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::Gateway;
use crate::scheduler;

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

fn ok<T: serde::Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "success": true, "data": data })),
    )
        .into_response()
}

fn fail(err: &CollabError) -> Response {
    if err.is_expected() {
        debug!(%err, "request rejected");
    } else {
        warn!(%err, "request failed");
    }
    let status = match err {
        CollabError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CollabError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    let mut error = json!({ "code": err.code(), "message": err.to_string() });
    if let Some(details) = err.details()
        && let Some(map) = error.as_object_mut()
    {
        map.insert("details".to_string(), details);
    }
    (
        status,
        Json(json!({ "success": false, "error": error })),
    )
        .into_response()
}

fn respond<T: serde::Serialize>(result: Result<T, CollabError>) -> Response {
    match result {
        Ok(data) => ok(data),
        Err(err) => fail(&err),
    }
}

fn durable(err: arbor_session::SessionError) -> CollabError {
    CollabError::Internal(err.to_string())
}

// ---------------------------------------------------------------------------
// Canvas presence
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JoinBody {
    canvas_id: CanvasId,
    user_id: UserId,
    user: UserInfo,
}

pub(crate) async fn join_canvas(
    State(gateway): State<Gateway>,
    Json(body): Json<JoinBody>,
) -> Response {
    respond(
        gateway
            .collab
            .join_canvas(body.canvas_id, body.user_id, body.user)
            .await,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LeaveBody {
    canvas_id: CanvasId,
    user_id: UserId,
}

pub(crate) async fn leave_canvas(
    State(gateway): State<Gateway>,
    Json(body): Json<LeaveBody>,
) -> Response {
    respond(
        gateway
            .collab
            .leave_canvas(body.canvas_id, body.user_id)
            .await
            .map(|()| json!({})),
    )
}

pub(crate) async fn canvas_presence(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
) -> Response {
    respond(gateway.collab.get_canvas_presence(CanvasId::new(id)).await)
}

pub(crate) async fn hybrid_state(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
) -> Response {
    respond(gateway.collab.hybrid_state(&CanvasId::new(id)).await)
}

// ---------------------------------------------------------------------------
// Node locks
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LockBody {
    canvas_id: CanvasId,
    conversation_id: ConversationId,
    node_id: NodeId,
    user_id: UserId,
    user: UserInfo,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    lock_duration: Option<u64>,
}

pub(crate) async fn lock_node(
    State(gateway): State<Gateway>,
    Json(body): Json<LockBody>,
) -> Response {
    let session_id = match body.session_id.as_deref() {
        Some(raw) => match arbor_collab::CollaborationService::parse_session_id(raw) {
            Ok(id) => id,
            Err(err) => return fail(&err),
        },
        None => arbor_core::SessionId::new(),
    };
    respond(
        gateway
            .collab
            .lock_node(
                body.canvas_id,
                body.conversation_id,
                body.node_id,
                body.user_id,
                body.user,
                session_id,
                body.lock_duration.map(Duration::from_secs),
            )
            .await,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UnlockBody {
    canvas_id: CanvasId,
    conversation_id: ConversationId,
    node_id: NodeId,
    user_id: UserId,
}

pub(crate) async fn unlock_node(
    State(gateway): State<Gateway>,
    Json(body): Json<UnlockBody>,
) -> Response {
    respond(
        gateway
            .collab
            .unlock_node(body.canvas_id, body.conversation_id, body.node_id, body.user_id)
            .await
            .map(|released| json!({ "released": released })),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExtendBody {
    user_id: UserId,
    #[serde(default)]
    lock_duration: Option<u64>,
}

pub(crate) async fn extend_lock(
    State(gateway): State<Gateway>,
    Path((canvas_id, conversation_id, node_id)): Path<(String, String, String)>,
    Json(body): Json<ExtendBody>,
) -> Response {
    respond(
        gateway
            .collab
            .extend_node_lock(
                CanvasId::new(canvas_id),
                ConversationId::new(conversation_id),
                NodeId::new(node_id),
                body.user_id,
                body.lock_duration.map(Duration::from_secs),
            )
            .await,
    )
}

pub(crate) async fn get_lock(
    State(gateway): State<Gateway>,
    Path((canvas_id, conversation_id, node_id)): Path<(String, String, String)>,
) -> Response {
    respond(
        gateway
            .collab
            .get_node_lock(
                &CanvasId::new(canvas_id),
                &ConversationId::new(conversation_id),
                &NodeId::new(node_id),
            )
            .await,
    )
}

pub(crate) async fn get_lock_realtime(
    State(gateway): State<Gateway>,
    Path((canvas_id, conversation_id, node_id)): Path<(String, String, String)>,
) -> Response {
    respond(
        gateway
            .collab
            .get_realtime_lock_status(
                &CanvasId::new(canvas_id),
                &ConversationId::new(conversation_id),
                &NodeId::new(node_id),
            )
            .await,
    )
}

// ---------------------------------------------------------------------------
// Cursor and typing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CursorBody {
    canvas_id: CanvasId,
    user_id: UserId,
    user: UserInfo,
    x: f64,
    y: f64,
}

pub(crate) async fn update_cursor(
    State(gateway): State<Gateway>,
    Json(body): Json<CursorBody>,
) -> Response {
    respond(
        gateway
            .collab
            .update_cursor_position(body.canvas_id, body.user_id, body.user, body.x, body.y)
            .await,
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TypingBody {
    canvas_id: CanvasId,
    node_id: NodeId,
    user_id: UserId,
    user: UserInfo,
    is_typing: bool,
}

pub(crate) async fn update_typing(
    State(gateway): State<Gateway>,
    Json(body): Json<TypingBody>,
) -> Response {
    respond(
        gateway
            .collab
            .update_typing_indicator(
                body.canvas_id,
                body.node_id,
                body.user_id,
                body.user,
                body.is_typing,
            )
            .await,
    )
}

// ---------------------------------------------------------------------------
// Hybrid sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartSessionBody {
    user: UserInfo,
    canvas_id: CanvasId,
    #[serde(default)]
    conversation_id: Option<ConversationId>,
    #[serde(default)]
    node_id: Option<NodeId>,
    editing_type: EditingTargetKind,
}

pub(crate) async fn start_session(
    State(gateway): State<Gateway>,
    Json(body): Json<StartSessionBody>,
) -> Response {
    respond(
        gateway
            .collab
            .start_hybrid_session(arbor_collab::StartSessionRequest {
                user: body.user,
                canvas_id: body.canvas_id,
                conversation_id: body.conversation_id,
                node_id: body.node_id,
                editing_type: body.editing_type,
            })
            .await,
    )
}

pub(crate) async fn end_session(
    State(gateway): State<Gateway>,
    Path(session_id): Path<String>,
) -> Response {
    let session_id = match arbor_collab::CollaborationService::parse_session_id(&session_id) {
        Ok(id) => id,
        Err(err) => return fail(&err),
    };
    respond(
        gateway
            .collab
            .end_hybrid_session(&session_id)
            .await
            .map(|ended| json!({ "ended": ended })),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionLockBody {
    #[serde(default)]
    lock_duration: Option<u64>,
}

pub(crate) async fn acquire_session_lock(
    State(gateway): State<Gateway>,
    Path(session_id): Path<String>,
    body: Option<Json<SessionLockBody>>,
) -> Response {
    let session_id = match arbor_collab::CollaborationService::parse_session_id(&session_id) {
        Ok(id) => id,
        Err(err) => return fail(&err),
    };
    let duration = body
        .map(|Json(b)| b)
        .unwrap_or_default()
        .lock_duration
        .map(Duration::from_secs);
    respond(gateway.collab.acquire_hybrid_lock(&session_id, duration).await)
}

pub(crate) async fn release_session_lock(
    State(gateway): State<Gateway>,
    Path(session_id): Path<String>,
) -> Response {
    let session_id = match arbor_collab::CollaborationService::parse_session_id(&session_id) {
        Ok(id) => id,
        Err(err) => return fail(&err),
    };
    respond(gateway.collab.release_hybrid_lock(&session_id).await)
}

// ---------------------------------------------------------------------------
// Cleanup and health
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CleanupBody {
    canvas_id: CanvasId,
}

pub(crate) async fn cleanup_presence(
    State(gateway): State<Gateway>,
    Json(body): Json<CleanupBody>,
) -> Response {
    respond(
        gateway
            .collab
            .cleanup_stale_presence(&body.canvas_id)
            .await
            .map(|evicted| json!({ "evicted": evicted })),
    )
}

pub(crate) async fn cleanup_locks(
    State(gateway): State<Gateway>,
    Json(body): Json<CleanupBody>,
) -> Response {
    respond(
        gateway
            .collab
            .clear_stale_locks_for_canvas(&body.canvas_id)
            .await
            .map(|reaped| json!({ "reaped": reaped })),
    )
}

pub(crate) async fn cleanup_sessions(State(gateway): State<Gateway>) -> Response {
    respond(
        scheduler::run_session_sweep(&gateway)
            .await
            .map(|locks| json!({ "expiredLocksCleared": locks })),
    )
}

pub(crate) async fn health(State(gateway): State<Gateway>) -> Response {
    let ephemeral_up = gateway.collab.ephemeral().ping().await.is_ok();
    let durable_up = gateway.collab.durable().ping().await.is_ok();

    let body = json!({
        "success": durable_up,
        "data": {
            "ephemeral": if ephemeral_up { "up" } else { "down" },
            "durable": if durable_up { "up" } else { "down" },
            "connections": gateway.rooms.connection_count(),
        },
    });
    // The durable store is authoritative; the gateway still serves reads
    // without the ephemeral store.
    let status = if durable_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Activities
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ActivityBody {
    canvas_id: CanvasId,
    #[serde(default)]
    conversation_id: Option<ConversationId>,
    #[serde(default)]
    node_id: Option<NodeId>,
    user_id: UserId,
    user_name: String,
    #[serde(rename = "type")]
    activity_type: ActivityType,
    description: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

pub(crate) async fn record_activity(
    State(gateway): State<Gateway>,
    Json(body): Json<ActivityBody>,
) -> Response {
    let result = gateway
        .activity
        .record(ActivityInput {
            canvas_id: body.canvas_id,
            conversation_id: body.conversation_id,
            node_id: body.node_id,
            user_id: body.user_id,
            user_name: body.user_name,
            activity_type: body.activity_type,
            description: body.description,
            metadata: body.metadata,
        })
        .await
        .map_err(durable);
    respond(result.map(|recorded| match recorded {
        Recorded::Immediate(activity) => json!({ "activity": activity }),
        Recorded::Batched => json!({ "batched": true }),
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeedQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
    /// Comma-separated activity type names.
    #[serde(default)]
    types: Option<String>,
    #[serde(default)]
    start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    end_date: Option<DateTime<Utc>>,
}

impl FeedQuery {
    fn into_filter(self) -> Result<ActivityFilter, CollabError> {
        let activity_types = self
            .types
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .filter(|name| !name.is_empty())
                    .map(|name| {
                        serde_json::from_value::<ActivityType>(json!(name)).map_err(|_| {
                            CollabError::InvalidInput(format!("unknown activity type: {name}"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;
        Ok(ActivityFilter {
            activity_types,
            start_date: self.start_date,
            end_date: self.end_date,
            limit: self.limit,
            offset: self.offset.unwrap_or(0),
            ..ActivityFilter::default()
        })
    }
}

pub(crate) async fn activities_for_canvas(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
    Query(query): Query<FeedQuery>,
) -> Response {
    let mut filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(err) => return fail(&err),
    };
    filter.canvas_id = Some(CanvasId::new(id));
    respond(gateway.activity.get_activities(filter).await.map_err(durable))
}

pub(crate) async fn activities_for_conversation(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
    Query(query): Query<FeedQuery>,
) -> Response {
    let mut filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(err) => return fail(&err),
    };
    filter.conversation_id = Some(ConversationId::new(id));
    respond(gateway.activity.get_activities(filter).await.map_err(durable))
}

pub(crate) async fn activities_for_user(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
    Query(query): Query<FeedQuery>,
) -> Response {
    let mut filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(err) => return fail(&err),
    };
    filter.user_id = Some(UserId::new(id));
    respond(gateway.activity.get_activities(filter).await.map_err(durable))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SummaryQuery {
    #[serde(default)]
    hours: Option<u32>,
}

pub(crate) async fn activity_summary(
    State(gateway): State<Gateway>,
    Path(id): Path<String>,
    Query(query): Query<SummaryQuery>,
) -> Response {
    respond(
        gateway
            .activity
            .get_activity_summary(CanvasId::new(id), query.hours)
            .await
            .map_err(durable),
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RetentionBody {
    #[serde(default)]
    days_to_keep: Option<u32>,
}

pub(crate) async fn cleanup_activities(
    State(gateway): State<Gateway>,
    body: Option<Json<RetentionBody>>,
) -> Response {
    let days = body.map(|Json(b)| b).unwrap_or_default().days_to_keep;
    respond(
        gateway
            .activity
            .cleanup_old_activities(days)
            .await
            .map(|deleted| json!({ "deleted": deleted }))
            .map_err(durable),
    )
}
