//! HTTP and WebSocket surface. Handlers stay thin: decode, delegate to the
//! engine or stores, encode.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;

use crate::broadcast::{BroadcastRegistry, RegistryStats};
use crate::engine::IrrigationEngine;
use crate::mqtt::MqttHandle;
use crate::storage::{IrrigationStore, ReadingStore, ZoneMoistureProbe};

pub mod irrigation;
pub mod sensors;
pub mod ws;

pub use ws::WsSink;

pub struct ApiState<St>
where
    St: IrrigationStore + ReadingStore,
{
    pub engine: IrrigationEngine<St, MqttHandle, ZoneMoistureProbe<St>>,
    pub readings: St,
    pub registry: Arc<BroadcastRegistry<WsSink>>,
    pub mqtt: MqttHandle,
}

impl<St> Clone for ApiState<St>
where
    St: IrrigationStore + ReadingStore,
{
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            readings: self.readings.clone(),
            registry: Arc::clone(&self.registry),
            mqtt: self.mqtt.clone(),
        }
    }
}

pub fn api_router<St>(state: ApiState<St>) -> Router
where
    St: IrrigationStore + ReadingStore,
{
    Router::new()
        .route("/health", get(health::<St>))
        .route("/api/irrigation/manual", post(irrigation::start_manual::<St>))
        .route("/api/irrigation/stop/{zone_id}", post(irrigation::stop::<St>))
        .route(
            "/api/irrigation/emergency-stop",
            post(irrigation::emergency_stop::<St>),
        )
        .route("/api/irrigation/status", get(irrigation::all_status::<St>))
        .route(
            "/api/irrigation/status/{zone_id}",
            get(irrigation::zone_status::<St>),
        )
        .route("/api/irrigation/history", get(irrigation::history::<St>))
        .route(
            "/api/irrigation/schedule",
            post(irrigation::create_schedule::<St>),
        )
        .route(
            "/api/irrigation/schedule/{schedule_id}",
            put(irrigation::update_schedule::<St>),
        )
        .route(
            "/api/irrigation/schedules",
            get(irrigation::list_schedules::<St>),
        )
        .route("/api/sensors", get(sensors::list::<St>))
        .route("/api/sensors/summary", get(sensors::summary::<St>))
        .route("/api/sensors/{sensor_id}", get(sensors::detail::<St>))
        .route("/api/sensors/{sensor_id}/latest", get(sensors::latest::<St>))
        .route(
            "/api/sensors/{sensor_id}/history",
            get(sensors::history::<St>),
        )
        .route("/ws/sensors", get(ws::subscribe_global::<St>))
        .route("/ws/sensors/{sensor_id}", get(ws::subscribe_sensor::<St>))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    mqtt_connected: bool,
    active_irrigations: usize,
    subscriptions: RegistryStats,
}

async fn health<St>(State(state): State<ApiState<St>>) -> impl IntoResponse
where
    St: IrrigationStore + ReadingStore,
{
    Json(HealthResponse {
        status: "ok",
        mqtt_connected: state.mqtt.is_connected(),
        active_irrigations: state.engine.active_count().await,
        subscriptions: state.registry.stats().await,
    })
}
