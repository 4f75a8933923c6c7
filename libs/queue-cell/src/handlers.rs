use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ws::WebSocketUpgrade, Extension, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::directory::PatientDirectory;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_staff;
use shared_utils::jwt::validate_token;

use crate::models::{
    AdmitTicketRequest, CreateQueueRequest, ListQueuesOptions, UpdateQueueRequest,
    UpdateTicketRequest,
};
use crate::services::websocket::serve_socket;
use crate::services::{QueueLifecycle, Scope, View, ViewProjector};

#[derive(Clone)]
pub struct QueueState {
    pub config: Arc<AppConfig>,
    pub lifecycle: Arc<QueueLifecycle>,
    pub patients: Arc<dyn PatientDirectory>,
}

// ==============================================================================
// QUEUES
// ==============================================================================

#[axum::debug_handler]
pub async fn open_queue(
    State(state): State<QueueState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateQueueRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_staff(&user)?;

    let queue = state.lifecycle.open(request.clinic_id).await?;
    Ok((StatusCode::CREATED, Json(json!(queue))))
}

#[axum::debug_handler]
pub async fn list_queues(
    State(state): State<QueueState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, AppError> {
    let options = ListQueuesOptions::from_query_pairs(&params)?;
    let page = state.lifecycle.list_queues(&options).await?;
    Ok(Json(json!(page)))
}

#[axum::debug_handler]
pub async fn get_queue(
    State(state): State<QueueState>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let queue = state.lifecycle.get_queue(queue_id).await?;
    Ok(Json(json!(queue)))
}

#[axum::debug_handler]
pub async fn update_queue(
    State(state): State<QueueState>,
    Path(queue_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateQueueRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let queue = state.lifecycle.update_queue(queue_id, request).await?;
    Ok(Json(json!(queue)))
}

#[axum::debug_handler]
pub async fn list_queue_tickets(
    State(state): State<QueueState>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let tickets = state.lifecycle.list_tickets(queue_id).await?;

    Ok(Json(json!({
        "tickets": tickets,
        "total": tickets.len()
    })))
}

#[axum::debug_handler]
pub async fn next_ticket(
    State(state): State<QueueState>,
    Path(queue_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let ticket = state.lifecycle.select_next(queue_id).await?;
    Ok(Json(json!({ "ticket": ticket })))
}

#[axum::debug_handler]
pub async fn call_next_ticket(
    State(state): State<QueueState>,
    Path(queue_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let ticket = state.lifecycle.call_next(queue_id).await?;
    Ok(Json(json!({ "ticket": ticket })))
}

// ==============================================================================
// TICKETS
// ==============================================================================

#[axum::debug_handler]
pub async fn admit_ticket(
    State(state): State<QueueState>,
    Extension(user): Extension<User>,
    Json(request): Json<AdmitTicketRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_staff(&user)?;

    let ticket = state.lifecycle.admit(request).await?;
    Ok((StatusCode::CREATED, Json(json!(ticket))))
}

#[axum::debug_handler]
pub async fn get_ticket(
    State(state): State<QueueState>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let ticket = state.lifecycle.get_ticket(ticket_id).await?;
    Ok(Json(json!(ticket)))
}

#[axum::debug_handler]
pub async fn update_ticket(
    State(state): State<QueueState>,
    Path(ticket_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateTicketRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let ticket = state.lifecycle.update_ticket(ticket_id, request).await?;
    Ok(Json(json!(ticket)))
}

// ==============================================================================
// REALTIME
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    #[serde(default)]
    pub view: View,
    pub access_token: Option<String>,
}

/// Display boards connect anonymously. The staff view needs a staff token,
/// either as a bearer header or an `access_token` query parameter.
fn authorize_view(
    config: &AppConfig,
    query: &SocketQuery,
    headers: &HeaderMap,
) -> Result<(), AppError> {
    if query.view == View::Display {
        return Ok(());
    }

    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .or(query.access_token.as_deref())
        .ok_or_else(|| AppError::Auth("Staff view requires a token".to_string()))?;

    let user = validate_token(token, &config.supabase_jwt_secret)
        .map_err(|e| AppError::Auth(e.to_string()))?;
    require_staff(&user)
}

fn upgrade(state: QueueState, ws: WebSocketUpgrade, scope: Scope, view: View) -> Response {
    let heartbeat = Duration::from_secs(state.config.realtime_heartbeat_seconds.max(1));
    let projector = ViewProjector::new(view, state.patients.clone());
    let lifecycle = state.lifecycle.clone();

    debug!("Upgrading realtime connection for {:?}", scope);
    ws.on_upgrade(move |socket| serve_socket(socket, lifecycle, scope, projector, heartbeat))
}

pub async fn queue_socket(
    State(state): State<QueueState>,
    Path(queue_id): Path<Uuid>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    authorize_view(&state.config, &query, &headers)?;
    state.lifecycle.get_queue(queue_id).await?;
    Ok(upgrade(state, ws, Scope::Queue(queue_id), query.view))
}

pub async fn clinic_socket(
    State(state): State<QueueState>,
    Path(clinic_id): Path<Uuid>,
    Query(query): Query<SocketQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    authorize_view(&state.config, &query, &headers)?;
    Ok(upgrade(state, ws, Scope::Clinic(clinic_id), query.view))
}
