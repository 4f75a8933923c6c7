use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_staff;
use uuid::Uuid;

use crate::models::{CreateScheduleRequest, UpdateScheduleRequest};
use crate::services::ScheduleService;

#[derive(Clone)]
pub struct ScheduleState {
    pub config: Arc<AppConfig>,
    pub schedules: Arc<ScheduleService>,
}

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
}

#[axum::debug_handler]
pub async fn create_schedule(
    State(state): State<ScheduleState>,
    Path(doctor_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_staff(&user)?;

    let window = state.schedules.create_schedule(doctor_id, request).await?;
    Ok((StatusCode::CREATED, Json(json!(window))))
}

#[axum::debug_handler]
pub async fn list_doctor_schedules(
    State(state): State<ScheduleState>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let windows = state.schedules.list_for_doctor(doctor_id).await?;

    Ok(Json(json!({
        "schedules": windows,
        "total": windows.len()
    })))
}

#[axum::debug_handler]
pub async fn get_schedule(
    State(state): State<ScheduleState>,
    Path(schedule_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let window = state.schedules.get_schedule(schedule_id).await?;
    Ok(Json(json!(window)))
}

#[axum::debug_handler]
pub async fn update_schedule(
    State(state): State<ScheduleState>,
    Path(schedule_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateScheduleRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&user)?;

    let window = state.schedules.update_schedule(schedule_id, request).await?;
    Ok(Json(json!(window)))
}

#[axum::debug_handler]
pub async fn delete_schedule(
    State(state): State<ScheduleState>,
    Path(schedule_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<StatusCode, AppError> {
    require_staff(&user)?;

    state.schedules.delete_schedule(schedule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
pub async fn get_available_slots(
    State(state): State<ScheduleState>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Value>, AppError> {
    let slots = state.schedules.slots_on(doctor_id, query.date).await?;

    Ok(Json(json!({
        "doctorId": doctor_id,
        "date": query.date,
        "slots": slots,
        "total": slots.len()
    })))
}
