//! Irrigation safety engine. Guards valve actuation against conflicting,
//! excessive, or unsafe commands and owns the per-zone Idle/Running state.
//!
//! Safety checks are authoritative over tracked state; actuation commands
//! are best-effort and never roll state back.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use furrow_core::{
    ActiveIrrigation, DAILY_CAP_MINUTES, EventId, IrrigationEvent, IrrigationSchedule,
    IrrigationStatus, MAX_RUN_MINUTES, RepeatPattern, SATURATION_THRESHOLD_PCT, ScheduleId,
    TriggerType, Zone, ZoneId, ZoneKind, ZONES, elapsed_minutes,
};
use jiff::Timestamp;
use jiff::tz::TimeZone;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::storage::{EventQuery, IrrigationStore, NewEvent, NewSchedule, ScheduleUpdate};

/// Actuation message for a zone valve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveCommand {
    Start { duration_minutes: i64 },
    Stop,
}

/// Best-effort actuation sink. Returns whether the command was accepted;
/// failures are reported, never retried.
#[async_trait]
pub trait CommandPublisher: Send + Sync + 'static {
    async fn publish(&self, zone_id: ZoneId, command: ValveCommand) -> bool;
}

/// Latest soil moisture for a zone, if any is known.
#[async_trait]
pub trait MoistureProbe: Send + Sync + 'static {
    async fn latest_moisture(&self, zone: &Zone) -> Option<f64>;
}

#[derive(Debug, thiserror::Error)]
pub enum IrrigationError {
    #[error("invalid zone {zone_id}; valid zones are 1..=5")]
    InvalidZone { zone_id: u8 },
    #[error("invalid duration {minutes} minutes; must be 1..={MAX_RUN_MINUTES}")]
    InvalidDuration { minutes: i64 },
    #[error("zone {zone_id} is already irrigating ({active_minutes} minutes elapsed)")]
    ZoneAlreadyActive {
        zone_id: ZoneId,
        active_minutes: i64,
    },
    #[error("zone {zone_id} is not currently irrigating")]
    ZoneNotActive { zone_id: ZoneId },
    #[error(
        "zone {zone_id} would exceed the daily cap of {DAILY_CAP_MINUTES} minutes: \
         {spent_minutes} spent, {requested_minutes} requested, {remaining_minutes} remaining"
    )]
    DailyLimitExceeded {
        zone_id: ZoneId,
        spent_minutes: i64,
        requested_minutes: i64,
        remaining_minutes: i64,
    },
    #[error("zone {zone_id} soil moisture {moisture:.1}% is above the {threshold:.1}% threshold")]
    MoistureTooHigh {
        zone_id: ZoneId,
        moisture: f64,
        threshold: f64,
    },
    #[error("no irrigation schedule with id {schedule_id}")]
    ScheduleNotFound { schedule_id: i64 },
    #[error("time computation failed: {0}")]
    Time(#[from] jiff::Error),
    #[error("storage error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl IrrigationError {
    /// Stable machine-readable code for API clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            IrrigationError::InvalidZone { .. } => "INVALID_ZONE",
            IrrigationError::InvalidDuration { .. } => "INVALID_DURATION",
            IrrigationError::ZoneAlreadyActive { .. } => "ZONE_ALREADY_ACTIVE",
            IrrigationError::ZoneNotActive { .. } => "ZONE_NOT_ACTIVE",
            IrrigationError::DailyLimitExceeded { .. } => "DAILY_LIMIT_EXCEEDED",
            IrrigationError::MoistureTooHigh { .. } => "MOISTURE_TOO_HIGH",
            IrrigationError::ScheduleNotFound { .. } => "SCHEDULE_NOT_FOUND",
            IrrigationError::Time(_) => "INTERNAL",
            IrrigationError::Store(_) => "STORAGE_ERROR",
        }
    }
}

fn store_err<E: std::error::Error + Send + Sync + 'static>(e: E) -> IrrigationError {
    IrrigationError::Store(Box::new(e))
}

#[derive(Debug, Clone, Serialize)]
pub struct StartReceipt {
    pub event_id: EventId,
    pub zone_id: ZoneId,
    pub zone_name: &'static str,
    pub duration_minutes: i64,
    pub status: IrrigationStatus,
    pub command_published: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopReceipt {
    pub event_id: EventId,
    pub zone_id: ZoneId,
    pub zone_name: &'static str,
    pub actual_minutes: i64,
    pub status: IrrigationStatus,
    pub command_published: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmergencyStopReport {
    pub success: bool,
    pub stopped_zones: Vec<ZoneId>,
    pub failed_zones: Vec<ZoneId>,
    pub commands_published: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneStatus {
    pub zone_id: ZoneId,
    pub zone_name: &'static str,
    pub zone_kind: ZoneKind,
    pub is_active: bool,
    pub current_minutes: Option<i64>,
    pub remaining_minutes: Option<i64>,
    pub started_at: Option<Timestamp>,
    pub moisture: Option<f64>,
    pub daily_minutes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub zones: Vec<ZoneStatus>,
    pub active_count: usize,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub events: Vec<IrrigationEvent>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// Half-open `[midnight, next midnight)` bounds of the UTC day containing `now`.
pub fn utc_day_bounds(now: Timestamp) -> Result<(Timestamp, Timestamp), jiff::Error> {
    let date = now.to_zoned(TimeZone::UTC).date();
    let start = date.to_zoned(TimeZone::UTC)?.timestamp();
    let end = date.tomorrow()?.to_zoned(TimeZone::UTC)?.timestamp();
    Ok((start, end))
}

#[derive(Clone)]
pub struct IrrigationEngine<S, C, M> {
    store: S,
    publisher: C,
    probe: M,
    active: Arc<Mutex<HashMap<ZoneId, ActiveIrrigation>>>,
}

impl<S, C, M> IrrigationEngine<S, C, M>
where
    S: IrrigationStore,
    C: CommandPublisher + Clone,
    M: MoistureProbe,
{
    pub fn new(store: S, publisher: C, probe: M) -> Self {
        Self {
            store,
            publisher,
            probe,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Minutes of irrigation already spent by the zone in the UTC day of
    /// `now`. Finalized events contribute recorded minutes; a running event
    /// contributes its live elapsed time.
    async fn daily_total(&self, zone_id: ZoneId, now: Timestamp) -> Result<i64, IrrigationError> {
        let (day_start, day_end) = utc_day_bounds(now)?;
        let events = self
            .store
            .events_started_between(zone_id, day_start, day_end)
            .await
            .map_err(store_err)?;
        Ok(events
            .iter()
            .map(|event| match event.status {
                IrrigationStatus::Running => elapsed_minutes(event.start_time, now),
                _ => event.actual_minutes.unwrap_or(0),
            })
            .sum())
    }

    /// Runs every safety check, then persists and actuates. The active map
    /// is held across the whole check-then-act sequence, so concurrent
    /// starts on one zone serialize and at most one passes.
    pub async fn start_irrigation(
        &self,
        zone_id: ZoneId,
        duration_minutes: i64,
        trigger: TriggerType,
        user_id: &str,
    ) -> Result<StartReceipt, IrrigationError> {
        let zone = Zone::lookup(zone_id).ok_or(IrrigationError::InvalidZone { zone_id: zone_id.0 })?;
        if !(1..=MAX_RUN_MINUTES).contains(&duration_minutes) {
            return Err(IrrigationError::InvalidDuration {
                minutes: duration_minutes,
            });
        }

        let mut active = self.active.lock().await;
        let now = Timestamp::now();

        if let Some(session) = active.get(&zone_id) {
            return Err(IrrigationError::ZoneAlreadyActive {
                zone_id,
                active_minutes: elapsed_minutes(session.start_time, now),
            });
        }

        let spent_minutes = self.daily_total(zone_id, now).await?;
        if spent_minutes + duration_minutes > DAILY_CAP_MINUTES {
            return Err(IrrigationError::DailyLimitExceeded {
                zone_id,
                spent_minutes,
                requested_minutes: duration_minutes,
                remaining_minutes: (DAILY_CAP_MINUTES - spent_minutes).max(0),
            });
        }

        // no moisture data means the check is skipped, not failed: a
        // telemetry gap must not block irrigation
        if let Some(moisture) = self.probe.latest_moisture(zone).await {
            if moisture > SATURATION_THRESHOLD_PCT {
                return Err(IrrigationError::MoistureTooHigh {
                    zone_id,
                    moisture,
                    threshold: SATURATION_THRESHOLD_PCT,
                });
            }
        }

        let event = self
            .store
            .insert_event(NewEvent {
                zone_id,
                start_time: now,
                planned_minutes: duration_minutes,
                trigger,
                user_id: user_id.into(),
                status: IrrigationStatus::Running,
            })
            .await
            .map_err(store_err)?;

        active.insert(
            zone_id,
            ActiveIrrigation {
                zone_id,
                start_time: now,
                planned_minutes: duration_minutes,
                trigger,
                user_id: user_id.into(),
                event_id: event.id,
            },
        );
        drop(active);

        let command_published = self
            .publisher
            .publish(zone_id, ValveCommand::Start { duration_minutes })
            .await;
        info!(
            zone_id = %zone_id,
            zone_name = zone.name,
            duration_minutes,
            trigger = trigger.as_str(),
            user = user_id,
            command_published,
            "irrigation started"
        );

        Ok(StartReceipt {
            event_id: event.id,
            zone_id,
            zone_name: zone.name,
            duration_minutes,
            status: IrrigationStatus::Running,
            command_published,
        })
    }

    /// Finalizes the event before releasing the zone; if the store rejects
    /// the finalization the zone stays active and the valve is untouched.
    pub async fn stop_irrigation(
        &self,
        zone_id: ZoneId,
        user_id: &str,
    ) -> Result<StopReceipt, IrrigationError> {
        let zone = Zone::lookup(zone_id).ok_or(IrrigationError::InvalidZone { zone_id: zone_id.0 })?;

        let mut active = self.active.lock().await;
        let session = active
            .get(&zone_id)
            .ok_or(IrrigationError::ZoneNotActive { zone_id })?;
        let event_id = session.event_id;
        let start_time = session.start_time;

        let now = Timestamp::now();
        let actual_minutes = elapsed_minutes(start_time, now);
        self.store
            .finalize_event(event_id, now, actual_minutes, IrrigationStatus::Stopped)
            .await
            .map_err(store_err)?;
        active.remove(&zone_id);
        drop(active);

        let command_published = self.publisher.publish(zone_id, ValveCommand::Stop).await;
        info!(
            zone_id = %zone_id,
            zone_name = zone.name,
            actual_minutes,
            user = user_id,
            command_published,
            "irrigation stopped"
        );

        Ok(StopReceipt {
            event_id,
            zone_id,
            zone_name: zone.name,
            actual_minutes,
            status: IrrigationStatus::Stopped,
            command_published,
        })
    }

    /// Stops every running zone, then commands every configured zone to
    /// stop regardless of tracked state, as defense against state drift.
    pub async fn emergency_stop_all(&self, user_id: &str) -> EmergencyStopReport {
        let mut running: Vec<ZoneId> = {
            let active = self.active.lock().await;
            active.keys().copied().collect()
        };
        running.sort();

        let mut stopped_zones = Vec::new();
        let mut failed_zones = Vec::new();
        for zone_id in running {
            match self.stop_irrigation(zone_id, user_id).await {
                Ok(_) => stopped_zones.push(zone_id),
                Err(e) => {
                    warn!(zone_id = %zone_id, error = %e, "emergency stop failed for zone");
                    failed_zones.push(zone_id);
                }
            }
        }

        let mut commands_published = true;
        for zone in &ZONES {
            if !self.publisher.publish(zone.id, ValveCommand::Stop).await {
                commands_published = false;
            }
        }

        warn!(
            stopped = ?stopped_zones,
            failed = ?failed_zones,
            commands_published,
            user = user_id,
            "emergency stop executed"
        );

        EmergencyStopReport {
            success: failed_zones.is_empty(),
            stopped_zones,
            failed_zones,
            commands_published,
        }
    }

    pub async fn zone_status(&self, zone_id: ZoneId) -> Result<ZoneStatus, IrrigationError> {
        let zone = Zone::lookup(zone_id).ok_or(IrrigationError::InvalidZone { zone_id: zone_id.0 })?;
        let now = Timestamp::now();
        let session = {
            let active = self.active.lock().await;
            active.get(&zone_id).cloned()
        };
        let daily_minutes = self.daily_total(zone_id, now).await?;
        let moisture = self.probe.latest_moisture(zone).await;

        let (current_minutes, remaining_minutes, started_at) = match &session {
            Some(session) => {
                let current = elapsed_minutes(session.start_time, now);
                (
                    Some(current),
                    Some((session.planned_minutes - current).max(0)),
                    Some(session.start_time),
                )
            }
            None => (None, None, None),
        };

        Ok(ZoneStatus {
            zone_id,
            zone_name: zone.name,
            zone_kind: zone.kind,
            is_active: session.is_some(),
            current_minutes,
            remaining_minutes,
            started_at,
            moisture,
            daily_minutes,
        })
    }

    pub async fn all_zones_status(&self) -> Result<FleetStatus, IrrigationError> {
        let mut zones = Vec::with_capacity(ZONES.len());
        for zone in &ZONES {
            zones.push(self.zone_status(zone.id).await?);
        }
        let active_count = zones.iter().filter(|z| z.is_active).count();
        Ok(FleetStatus {
            zones,
            active_count,
            timestamp: Timestamp::now(),
        })
    }

    pub async fn history(
        &self,
        zone_id: Option<ZoneId>,
        page: usize,
        page_size: usize,
    ) -> Result<HistoryPage, IrrigationError> {
        if let Some(zone_id) = zone_id {
            Zone::lookup(zone_id).ok_or(IrrigationError::InvalidZone { zone_id: zone_id.0 })?;
        }
        let page = page.max(1);
        let page_size = page_size.clamp(1, 500);
        let (events, total) = self
            .store
            .list_events(EventQuery {
                zone_id,
                page,
                page_size,
            })
            .await
            .map_err(store_err)?;
        Ok(HistoryPage {
            events,
            total,
            page,
            page_size,
        })
    }

    pub async fn create_schedule(
        &self,
        zone_id: ZoneId,
        schedule_time: Timestamp,
        duration_minutes: i64,
        repeat: RepeatPattern,
        user_id: &str,
    ) -> Result<IrrigationSchedule, IrrigationError> {
        Zone::lookup(zone_id).ok_or(IrrigationError::InvalidZone { zone_id: zone_id.0 })?;
        if !(1..=MAX_RUN_MINUTES).contains(&duration_minutes) {
            return Err(IrrigationError::InvalidDuration {
                minutes: duration_minutes,
            });
        }
        let schedule = self
            .store
            .insert_schedule(NewSchedule {
                zone_id,
                schedule_time,
                duration_minutes,
                repeat,
                user_id: user_id.into(),
            })
            .await
            .map_err(store_err)?;
        info!(
            schedule_id = schedule.id.0,
            zone_id = %zone_id,
            duration_minutes,
            repeat = repeat.as_str(),
            "schedule created"
        );
        Ok(schedule)
    }

    /// Absent fields are left unchanged; `is_active = false` disables the
    /// schedule without deleting it.
    pub async fn update_schedule(
        &self,
        schedule_id: ScheduleId,
        update: ScheduleUpdate,
    ) -> Result<IrrigationSchedule, IrrigationError> {
        if let Some(minutes) = update.duration_minutes {
            if !(1..=MAX_RUN_MINUTES).contains(&minutes) {
                return Err(IrrigationError::InvalidDuration { minutes });
            }
        }
        self.store
            .update_schedule(schedule_id, update)
            .await
            .map_err(store_err)?
            .ok_or(IrrigationError::ScheduleNotFound {
                schedule_id: schedule_id.0,
            })
    }

    pub async fn list_schedules(
        &self,
        zone_id: Option<ZoneId>,
        active_only: bool,
    ) -> Result<Vec<IrrigationSchedule>, IrrigationError> {
        if let Some(zone_id) = zone_id {
            Zone::lookup(zone_id).ok_or(IrrigationError::InvalidZone { zone_id: zone_id.0 })?;
        }
        self.store
            .list_schedules(zone_id, active_only)
            .await
            .map_err(store_err)
    }
}
