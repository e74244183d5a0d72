//! Persistence facade. The engine and API are written against these traits;
//! `memory` is the reference implementation, `sqlite` the durable one.

use async_trait::async_trait;
use furrow_core::{
    EventId, IrrigationEvent, IrrigationSchedule, IrrigationStatus, Reading, RepeatPattern,
    ScheduleId, SensorId, TriggerType, Zone, ZoneId,
};
use jiff::Timestamp;
use tracing::warn;

use crate::engine::MoistureProbe;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Fields of an irrigation event known at start time.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub zone_id: ZoneId,
    pub start_time: Timestamp,
    pub planned_minutes: i64,
    pub trigger: TriggerType,
    pub user_id: Box<str>,
    pub status: IrrigationStatus,
}

#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub zone_id: ZoneId,
    pub schedule_time: Timestamp,
    pub duration_minutes: i64,
    pub repeat: RepeatPattern,
    pub user_id: Box<str>,
}

/// Partial schedule update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub schedule_time: Option<Timestamp>,
    pub duration_minutes: Option<i64>,
    pub repeat: Option<RepeatPattern>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct EventQuery {
    pub zone_id: Option<ZoneId>,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone)]
pub struct ReadingQuery {
    pub sensor_id: Option<SensorId>,
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
    pub limit: usize,
}

#[async_trait]
pub trait IrrigationStore: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn insert_event(&self, event: NewEvent) -> Result<IrrigationEvent, Self::Error>;

    /// Records the end of a run. An event is finalized exactly once.
    async fn finalize_event(
        &self,
        id: EventId,
        end_time: Timestamp,
        actual_minutes: i64,
        status: IrrigationStatus,
    ) -> Result<(), Self::Error>;

    /// Events whose `start_time` falls in `[from, to)`, for daily accounting.
    async fn events_started_between(
        &self,
        zone_id: ZoneId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<IrrigationEvent>, Self::Error>;

    /// Paginated history, newest first. Returns the page and the total count.
    async fn list_events(
        &self,
        query: EventQuery,
    ) -> Result<(Vec<IrrigationEvent>, usize), Self::Error>;

    async fn insert_schedule(
        &self,
        schedule: NewSchedule,
    ) -> Result<IrrigationSchedule, Self::Error>;

    /// Applies a partial update; `None` if no such schedule exists.
    async fn update_schedule(
        &self,
        id: ScheduleId,
        update: ScheduleUpdate,
    ) -> Result<Option<IrrigationSchedule>, Self::Error>;

    async fn list_schedules(
        &self,
        zone_id: Option<ZoneId>,
        active_only: bool,
    ) -> Result<Vec<IrrigationSchedule>, Self::Error>;
}

#[async_trait]
pub trait ReadingStore: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn store_reading(&self, reading: Reading) -> Result<(), Self::Error>;

    async fn latest_reading(&self, sensor_id: &SensorId) -> Result<Option<Reading>, Self::Error>;

    /// Filtered readings, newest first, capped at `query.limit`.
    async fn query_readings(&self, query: ReadingQuery) -> Result<Vec<Reading>, Self::Error>;
}

/// Maps a zone to its moisture sensor over the reading store. Store errors
/// fail open: saturation cannot be checked, so the check is skipped.
#[derive(Debug, Clone)]
pub struct ZoneMoistureProbe<R> {
    store: R,
}

impl<R> ZoneMoistureProbe<R> {
    pub fn new(store: R) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: ReadingStore> MoistureProbe for ZoneMoistureProbe<R> {
    async fn latest_moisture(&self, zone: &Zone) -> Option<f64> {
        let sensor_id = zone.moisture_sensor();
        match self.store.latest_reading(&sensor_id).await {
            Ok(Some(reading)) => reading.moisture.map(|m| m.into_inner()),
            Ok(None) => None,
            Err(e) => {
                warn!(
                    zone_id = %zone.id,
                    sensor_id = %sensor_id,
                    error = %e,
                    "moisture lookup failed, skipping saturation check"
                );
                None
            }
        }
    }
}
