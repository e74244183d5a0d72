use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use furrow_core::{RepeatPattern, ScheduleId, TriggerType, ZoneId};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::engine::IrrigationError;
use crate::storage::{IrrigationStore, ReadingStore, ScheduleUpdate};

const DEFAULT_USER: &str = "system";
const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Serialize)]
struct ErrorBody {
    error_code: &'static str,
    message: String,
}

/// Validation failures map to 400, missing resources to 404, everything the
/// safety engine refuses to 409. Internal failures stay 500.
fn error_response(err: IrrigationError) -> Response {
    let status = match &err {
        IrrigationError::InvalidZone { .. } | IrrigationError::InvalidDuration { .. } => {
            StatusCode::BAD_REQUEST
        }
        IrrigationError::ScheduleNotFound { .. } => StatusCode::NOT_FOUND,
        IrrigationError::ZoneAlreadyActive { .. }
        | IrrigationError::ZoneNotActive { .. }
        | IrrigationError::DailyLimitExceeded { .. }
        | IrrigationError::MoistureTooHigh { .. } => StatusCode::CONFLICT,
        IrrigationError::Time(_) | IrrigationError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error_code: err.error_code(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct ManualStartRequest {
    pub zone_id: u8,
    pub duration_minutes: i64,
    pub user_id: Option<String>,
}

pub async fn start_manual<St>(
    State(state): State<ApiState<St>>,
    Json(request): Json<ManualStartRequest>,
) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    let user = request.user_id.as_deref().unwrap_or(DEFAULT_USER);
    match state
        .engine
        .start_irrigation(
            ZoneId(request.zone_id),
            request.duration_minutes,
            TriggerType::Manual,
            user,
        )
        .await
    {
        Ok(receipt) => (StatusCode::CREATED, Json(receipt)).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub struct StopRequest {
    pub user_id: Option<String>,
}

pub async fn stop<St>(
    State(state): State<ApiState<St>>,
    Path(zone_id): Path<u8>,
    body: Option<Json<StopRequest>>,
) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    let user = body
        .as_ref()
        .and_then(|b| b.user_id.as_deref())
        .unwrap_or(DEFAULT_USER)
        .to_owned();
    match state.engine.stop_irrigation(ZoneId(zone_id), &user).await {
        Ok(receipt) => Json(receipt).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn emergency_stop<St>(
    State(state): State<ApiState<St>>,
    body: Option<Json<StopRequest>>,
) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    let user = body
        .as_ref()
        .and_then(|b| b.user_id.as_deref())
        .unwrap_or(DEFAULT_USER)
        .to_owned();
    let report = state.engine.emergency_stop_all(&user).await;
    Json(report).into_response()
}

pub async fn all_status<St>(State(state): State<ApiState<St>>) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    match state.engine.all_zones_status().await {
        Ok(status) => Json(status).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn zone_status<St>(
    State(state): State<ApiState<St>>,
    Path(zone_id): Path<u8>,
) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    match state.engine.zone_status(ZoneId(zone_id)).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub zone_id: Option<u8>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

pub async fn history<St>(
    State(state): State<ApiState<St>>,
    Query(query): Query<HistoryQuery>,
) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    match state
        .engine
        .history(
            query.zone_id.map(ZoneId),
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub struct CreateScheduleRequest {
    pub zone_id: u8,
    pub schedule_time: Timestamp,
    pub duration_minutes: i64,
    pub repeat_pattern: Option<RepeatPattern>,
    pub user_id: Option<String>,
}

pub async fn create_schedule<St>(
    State(state): State<ApiState<St>>,
    Json(request): Json<CreateScheduleRequest>,
) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    let user = request.user_id.as_deref().unwrap_or(DEFAULT_USER);
    match state
        .engine
        .create_schedule(
            ZoneId(request.zone_id),
            request.schedule_time,
            request.duration_minutes,
            request.repeat_pattern.unwrap_or(RepeatPattern::None),
            user,
        )
        .await
    {
        Ok(schedule) => (StatusCode::CREATED, Json(schedule)).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub struct UpdateScheduleRequest {
    pub schedule_time: Option<Timestamp>,
    pub duration_minutes: Option<i64>,
    pub repeat_pattern: Option<RepeatPattern>,
    pub is_active: Option<bool>,
}

pub async fn update_schedule<St>(
    State(state): State<ApiState<St>>,
    Path(schedule_id): Path<i64>,
    Json(request): Json<UpdateScheduleRequest>,
) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    let update = ScheduleUpdate {
        schedule_time: request.schedule_time,
        duration_minutes: request.duration_minutes,
        repeat: request.repeat_pattern,
        is_active: request.is_active,
    };
    match state
        .engine
        .update_schedule(ScheduleId(schedule_id), update)
        .await
    {
        Ok(schedule) => Json(schedule).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub struct ListSchedulesQuery {
    pub zone_id: Option<u8>,
    #[serde(default)]
    pub active_only: bool,
}

pub async fn list_schedules<St>(
    State(state): State<ApiState<St>>,
    Query(query): Query<ListSchedulesQuery>,
) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    match state
        .engine
        .list_schedules(query.zone_id.map(ZoneId), query.active_only)
        .await
    {
        Ok(schedules) => Json(schedules).into_response(),
        Err(err) => error_response(err),
    }
}
