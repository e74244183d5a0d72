use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use furrow_core::{Reading, SensorId, SensorStatus, Zone, ZoneId, ZONES};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::storage::{IrrigationStore, ReadingQuery, ReadingStore};

const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Serialize)]
struct ErrorBody {
    error_code: &'static str,
    message: String,
}

fn storage_error_response(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error_code: "STORAGE_ERROR",
            message,
        }),
    )
        .into_response()
}

/// One row of the sensor catalog: the zone's moisture sensor together with
/// its health projection and most recent reading.
#[derive(Debug, Clone, Serialize)]
pub struct SensorOverview {
    pub sensor_id: SensorId,
    pub name: String,
    pub zone_id: ZoneId,
    pub zone_name: &'static str,
    pub status: SensorStatus,
    pub last_seen: Option<Timestamp>,
    pub latest_reading: Option<Reading>,
}

async fn overview_for_zone<R: ReadingStore>(
    store: &R,
    zone: &'static Zone,
    now: Timestamp,
) -> Result<SensorOverview, R::Error> {
    let sensor_id = zone.moisture_sensor();
    let latest_reading = store.latest_reading(&sensor_id).await?;
    let last_seen = latest_reading.as_ref().map(|r| r.timestamp);
    Ok(SensorOverview {
        sensor_id,
        name: format!("{} Sensor", zone.name),
        zone_id: zone.id,
        zone_name: zone.name,
        status: SensorStatus::from_last_seen(last_seen, now),
        last_seen,
        latest_reading,
    })
}

/// Catalog projection over every configured zone sensor.
pub async fn sensor_catalog<R: ReadingStore>(
    store: &R,
    now: Timestamp,
) -> Result<Vec<SensorOverview>, R::Error> {
    let mut rows = Vec::with_capacity(ZONES.len());
    for zone in &ZONES {
        rows.push(overview_for_zone(store, zone, now).await?);
    }
    Ok(rows)
}

#[derive(Serialize)]
struct SensorInfo {
    sensor_id: SensorId,
    name: String,
    zone_id: ZoneId,
    zone_name: &'static str,
    status: SensorStatus,
    last_seen: Option<Timestamp>,
}

#[derive(Serialize)]
struct SensorListResponse {
    sensors: Vec<SensorInfo>,
    count: usize,
}

pub async fn list<St>(State(state): State<ApiState<St>>) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    match sensor_catalog(&state.readings, Timestamp::now()).await {
        Ok(rows) => {
            let sensors: Vec<SensorInfo> = rows
                .into_iter()
                .map(|row| SensorInfo {
                    sensor_id: row.sensor_id,
                    name: row.name,
                    zone_id: row.zone_id,
                    zone_name: row.zone_name,
                    status: row.status,
                    last_seen: row.last_seen,
                })
                .collect();
            let count = sensors.len();
            Json(SensorListResponse { sensors, count }).into_response()
        }
        Err(err) => storage_error_response(err.to_string()),
    }
}

#[derive(Serialize)]
struct SensorSummaryEntry {
    sensor_id: SensorId,
    name: String,
    zone_id: ZoneId,
    status: SensorStatus,
    latest_reading: Option<Reading>,
}

#[derive(Serialize)]
struct SensorSummaryResponse {
    summary: Vec<SensorSummaryEntry>,
    count: usize,
    timestamp: Timestamp,
}

/// Dashboard grid view: every sensor with its latest reading in one call.
pub async fn summary<St>(State(state): State<ApiState<St>>) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    let now = Timestamp::now();
    match sensor_catalog(&state.readings, now).await {
        Ok(rows) => {
            let summary: Vec<SensorSummaryEntry> = rows
                .into_iter()
                .map(|row| SensorSummaryEntry {
                    sensor_id: row.sensor_id,
                    name: row.name,
                    zone_id: row.zone_id,
                    status: row.status,
                    latest_reading: row.latest_reading,
                })
                .collect();
            let count = summary.len();
            Json(SensorSummaryResponse {
                summary,
                count,
                timestamp: now,
            })
            .into_response()
        }
        Err(err) => storage_error_response(err.to_string()),
    }
}

pub async fn detail<St>(
    State(state): State<ApiState<St>>,
    Path(sensor_id): Path<String>,
) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    let sensor_id = SensorId::from(sensor_id);
    let Some(zone) = Zone::for_sensor(&sensor_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error_code: "SENSOR_NOT_FOUND",
                message: format!("sensor {sensor_id} is not in the catalog"),
            }),
        )
            .into_response();
    };
    match overview_for_zone(&state.readings, zone, Timestamp::now()).await {
        Ok(row) => Json(row).into_response(),
        Err(err) => storage_error_response(err.to_string()),
    }
}

pub async fn latest<St>(
    State(state): State<ApiState<St>>,
    Path(sensor_id): Path<String>,
) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    let sensor_id = SensorId::from(sensor_id);
    match state.readings.latest_reading(&sensor_id).await {
        Ok(Some(reading)) => Json(reading).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error_code: "SENSOR_NOT_FOUND",
                message: format!("no readings for sensor {sensor_id}"),
            }),
        )
            .into_response(),
        Err(err) => storage_error_response(err.to_string()),
    }
}

#[derive(Deserialize)]
pub struct SensorHistoryQuery {
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
    pub limit: Option<usize>,
}

pub async fn history<St>(
    State(state): State<ApiState<St>>,
    Path(sensor_id): Path<String>,
    Query(query): Query<SensorHistoryQuery>,
) -> Response
where
    St: IrrigationStore + ReadingStore,
{
    let request = ReadingQuery {
        sensor_id: Some(SensorId::from(sensor_id)),
        from: query.from,
        to: query.to,
        limit: query
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(MAX_HISTORY_LIMIT),
    };
    match state.readings.query_readings(request).await {
        Ok(readings) => Json(readings).into_response(),
        Err(err) => storage_error_response(err.to_string()),
    }
}
