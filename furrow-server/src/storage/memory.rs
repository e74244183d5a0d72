//! In-memory store. Reference implementation for tests and single-node runs
//! where durability is not needed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use furrow_core::{
    EventId, IrrigationEvent, IrrigationSchedule, IrrigationStatus, Reading, ScheduleId, SensorId,
    ZoneId,
};
use jiff::Timestamp;
use tokio::sync::RwLock;

use super::{
    EventQuery, IrrigationStore, NewEvent, NewSchedule, ReadingQuery, ReadingStore, ScheduleUpdate,
};

#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    #[error("no irrigation event with id {0}")]
    EventNotFound(i64),
}

#[derive(Default)]
struct State {
    events: Vec<IrrigationEvent>,
    schedules: Vec<IrrigationSchedule>,
    readings: HashMap<SensorId, Vec<Reading>>,
    next_event_id: i64,
    next_schedule_id: i64,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IrrigationStore for InMemoryStore {
    type Error = InMemoryError;

    async fn insert_event(&self, event: NewEvent) -> Result<IrrigationEvent, Self::Error> {
        let mut state = self.state.write().await;
        state.next_event_id += 1;
        let record = IrrigationEvent {
            id: EventId(state.next_event_id),
            zone_id: event.zone_id,
            start_time: event.start_time,
            end_time: None,
            planned_minutes: event.planned_minutes,
            actual_minutes: None,
            trigger: event.trigger,
            user_id: event.user_id,
            status: event.status,
            created_at: Timestamp::now(),
        };
        state.events.push(record.clone());
        Ok(record)
    }

    async fn finalize_event(
        &self,
        id: EventId,
        end_time: Timestamp,
        actual_minutes: i64,
        status: IrrigationStatus,
    ) -> Result<(), Self::Error> {
        let mut state = self.state.write().await;
        let event = state
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(InMemoryError::EventNotFound(id.0))?;
        event.end_time = Some(end_time);
        event.actual_minutes = Some(actual_minutes);
        event.status = status;
        Ok(())
    }

    async fn events_started_between(
        &self,
        zone_id: ZoneId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<IrrigationEvent>, Self::Error> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.zone_id == zone_id && e.start_time >= from && e.start_time < to)
            .cloned()
            .collect())
    }

    async fn list_events(
        &self,
        query: EventQuery,
    ) -> Result<(Vec<IrrigationEvent>, usize), Self::Error> {
        let state = self.state.read().await;
        let mut matching: Vec<IrrigationEvent> = state
            .events
            .iter()
            .filter(|e| query.zone_id.is_none_or(|z| e.zone_id == z))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(query.page.saturating_sub(1) * query.page_size)
            .take(query.page_size)
            .collect();
        Ok((page, total))
    }

    async fn insert_schedule(
        &self,
        schedule: NewSchedule,
    ) -> Result<IrrigationSchedule, Self::Error> {
        let mut state = self.state.write().await;
        state.next_schedule_id += 1;
        let now = Timestamp::now();
        let record = IrrigationSchedule {
            id: ScheduleId(state.next_schedule_id),
            zone_id: schedule.zone_id,
            schedule_time: schedule.schedule_time,
            duration_minutes: schedule.duration_minutes,
            repeat: schedule.repeat,
            is_active: true,
            user_id: schedule.user_id,
            created_at: now,
            updated_at: now,
        };
        state.schedules.push(record.clone());
        Ok(record)
    }

    async fn update_schedule(
        &self,
        id: ScheduleId,
        update: ScheduleUpdate,
    ) -> Result<Option<IrrigationSchedule>, Self::Error> {
        let mut state = self.state.write().await;
        let Some(schedule) = state.schedules.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        if let Some(schedule_time) = update.schedule_time {
            schedule.schedule_time = schedule_time;
        }
        if let Some(duration_minutes) = update.duration_minutes {
            schedule.duration_minutes = duration_minutes;
        }
        if let Some(repeat) = update.repeat {
            schedule.repeat = repeat;
        }
        if let Some(is_active) = update.is_active {
            schedule.is_active = is_active;
        }
        schedule.updated_at = Timestamp::now();
        Ok(Some(schedule.clone()))
    }

    async fn list_schedules(
        &self,
        zone_id: Option<ZoneId>,
        active_only: bool,
    ) -> Result<Vec<IrrigationSchedule>, Self::Error> {
        let state = self.state.read().await;
        Ok(state
            .schedules
            .iter()
            .filter(|s| zone_id.is_none_or(|z| s.zone_id == z))
            .filter(|s| !active_only || s.is_active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReadingStore for InMemoryStore {
    type Error = InMemoryError;

    async fn store_reading(&self, reading: Reading) -> Result<(), Self::Error> {
        let mut state = self.state.write().await;
        state
            .readings
            .entry(reading.sensor_id.clone())
            .or_default()
            .push(reading);
        Ok(())
    }

    async fn latest_reading(&self, sensor_id: &SensorId) -> Result<Option<Reading>, Self::Error> {
        let state = self.state.read().await;
        Ok(state
            .readings
            .get(sensor_id)
            .and_then(|readings| readings.iter().max_by_key(|r| r.timestamp))
            .cloned())
    }

    async fn query_readings(&self, query: ReadingQuery) -> Result<Vec<Reading>, Self::Error> {
        let state = self.state.read().await;
        let mut matching: Vec<Reading> = state
            .readings
            .iter()
            .filter(|(sensor_id, _)| query.sensor_id.as_ref().is_none_or(|s| s == *sensor_id))
            .flat_map(|(_, readings)| readings.iter())
            .filter(|r| query.from.is_none_or(|from| r.timestamp >= from))
            .filter(|r| query.to.is_none_or(|to| r.timestamp < to))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(query.limit);
        Ok(matching)
    }
}
