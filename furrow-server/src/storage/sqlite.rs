use std::path::Path;

use async_trait::async_trait;
use furrow_core::{
    EventId, IrrigationEvent, IrrigationSchedule, IrrigationStatus, ParseEnumError, Reading,
    ScheduleId, SensorId, ZoneId,
};
use jiff::Timestamp;
use ordered_float::NotNan;
use sqlx::sqlite::SqliteRow;
use sqlx::{Error as SqlxError, Row, SqlitePool};
use thiserror::Error;

use super::{
    EventQuery, IrrigationStore, NewEvent, NewSchedule, ReadingQuery, ReadingStore, ScheduleUpdate,
};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] SqlxError),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt timestamp: {0}")]
    Time(#[from] jiff::Error),
    #[error(transparent)]
    Parse(#[from] ParseEnumError),
    #[error("no irrigation event with id {0}")]
    EventNotFound(i64),
    #[error("zone id {0} out of range")]
    CorruptZoneId(i64),
}

fn zone_id_from_raw(raw: i64) -> Result<ZoneId, SqliteStoreError> {
    u8::try_from(raw)
        .map(ZoneId)
        .map_err(|_| SqliteStoreError::CorruptZoneId(raw))
}

impl SqliteStore {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, SqliteStoreError> {
        // mode=rwc creates the database file on first run
        let database_url = format!("sqlite:{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePool::connect(&database_url).await?;

        // enable WAL for better concurrency
        sqlx::query("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .execute(&pool)
            .await?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteStoreError> {
        sqlx::migrate!("./migrations").run(pool).await?;
        Ok(())
    }

    fn event_from_row(row: &SqliteRow) -> Result<IrrigationEvent, SqliteStoreError> {
        let end_ms: Option<i64> = row.try_get("end_time_ms")?;
        Ok(IrrigationEvent {
            id: EventId(row.try_get("id")?),
            zone_id: zone_id_from_raw(row.try_get("zone_id")?)?,
            start_time: Timestamp::from_millisecond(row.try_get("start_time_ms")?)?,
            end_time: end_ms.map(Timestamp::from_millisecond).transpose()?,
            planned_minutes: row.try_get("planned_minutes")?,
            actual_minutes: row.try_get("actual_minutes")?,
            trigger: row.try_get::<String, _>("trigger_type")?.parse()?,
            user_id: row.try_get::<String, _>("user_id")?.into_boxed_str(),
            status: row.try_get::<String, _>("status")?.parse()?,
            created_at: Timestamp::from_millisecond(row.try_get("created_at_ms")?)?,
        })
    }

    fn schedule_from_row(row: &SqliteRow) -> Result<IrrigationSchedule, SqliteStoreError> {
        Ok(IrrigationSchedule {
            id: ScheduleId(row.try_get("id")?),
            zone_id: zone_id_from_raw(row.try_get("zone_id")?)?,
            schedule_time: Timestamp::from_millisecond(row.try_get("schedule_time_ms")?)?,
            duration_minutes: row.try_get("duration_minutes")?,
            repeat: row.try_get::<String, _>("repeat_pattern")?.parse()?,
            is_active: row.try_get("is_active")?,
            user_id: row.try_get::<String, _>("user_id")?.into_boxed_str(),
            created_at: Timestamp::from_millisecond(row.try_get("created_at_ms")?)?,
            updated_at: Timestamp::from_millisecond(row.try_get("updated_at_ms")?)?,
        })
    }

    fn reading_from_row(row: &SqliteRow) -> Result<Reading, SqliteStoreError> {
        let not_nan = |v: Option<f64>| v.and_then(|v| NotNan::new(v).ok());
        Ok(Reading {
            sensor_id: SensorId::from(row.try_get::<String, _>("sensor_id")?),
            moisture: not_nan(row.try_get("moisture")?),
            temperature: not_nan(row.try_get("temperature")?),
            humidity: not_nan(row.try_get("humidity")?),
            light: not_nan(row.try_get("light")?),
            timestamp: Timestamp::from_millisecond(row.try_get("timestamp_ms")?)?,
        })
    }
}

#[async_trait]
impl IrrigationStore for SqliteStore {
    type Error = SqliteStoreError;

    async fn insert_event(&self, event: NewEvent) -> Result<IrrigationEvent, Self::Error> {
        let created_at = Timestamp::now();
        let result = sqlx::query(
            "INSERT INTO irrigation_events \
             (zone_id, start_time_ms, planned_minutes, trigger_type, user_id, status, created_at_ms) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.zone_id.0 as i64)
        .bind(event.start_time.as_millisecond())
        .bind(event.planned_minutes)
        .bind(event.trigger.as_str())
        .bind(&*event.user_id)
        .bind(event.status.as_str())
        .bind(created_at.as_millisecond())
        .execute(&self.pool)
        .await?;

        Ok(IrrigationEvent {
            id: EventId(result.last_insert_rowid()),
            zone_id: event.zone_id,
            start_time: event.start_time,
            end_time: None,
            planned_minutes: event.planned_minutes,
            actual_minutes: None,
            trigger: event.trigger,
            user_id: event.user_id,
            status: event.status,
            created_at,
        })
    }

    async fn finalize_event(
        &self,
        id: EventId,
        end_time: Timestamp,
        actual_minutes: i64,
        status: IrrigationStatus,
    ) -> Result<(), Self::Error> {
        let affected = sqlx::query(
            "UPDATE irrigation_events SET end_time_ms = ?, actual_minutes = ?, status = ? \
             WHERE id = ?",
        )
        .bind(end_time.as_millisecond())
        .bind(actual_minutes)
        .bind(status.as_str())
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(SqliteStoreError::EventNotFound(id.0));
        }
        Ok(())
    }

    async fn events_started_between(
        &self,
        zone_id: ZoneId,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<IrrigationEvent>, Self::Error> {
        let rows = sqlx::query(
            "SELECT * FROM irrigation_events \
             WHERE zone_id = ? AND start_time_ms >= ? AND start_time_ms < ?",
        )
        .bind(zone_id.0 as i64)
        .bind(from.as_millisecond())
        .bind(to.as_millisecond())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::event_from_row).collect()
    }

    async fn list_events(
        &self,
        query: EventQuery,
    ) -> Result<(Vec<IrrigationEvent>, usize), Self::Error> {
        let offset = (query.page.saturating_sub(1) * query.page_size) as i64;
        let limit = query.page_size as i64;

        let (total, rows) = match query.zone_id {
            Some(zone_id) => {
                let total: (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM irrigation_events WHERE zone_id = ?")
                        .bind(zone_id.0 as i64)
                        .fetch_one(&self.pool)
                        .await?;
                let rows = sqlx::query(
                    "SELECT * FROM irrigation_events WHERE zone_id = ? \
                     ORDER BY start_time_ms DESC LIMIT ? OFFSET ?",
                )
                .bind(zone_id.0 as i64)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
                (total.0, rows)
            }
            None => {
                let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM irrigation_events")
                    .fetch_one(&self.pool)
                    .await?;
                let rows = sqlx::query(
                    "SELECT * FROM irrigation_events ORDER BY start_time_ms DESC LIMIT ? OFFSET ?",
                )
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
                (total.0, rows)
            }
        };

        let events = rows
            .iter()
            .map(Self::event_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((events, total as usize))
    }

    async fn insert_schedule(
        &self,
        schedule: NewSchedule,
    ) -> Result<IrrigationSchedule, Self::Error> {
        let now = Timestamp::now();
        let result = sqlx::query(
            "INSERT INTO irrigation_schedules \
             (zone_id, schedule_time_ms, duration_minutes, repeat_pattern, is_active, user_id, \
              created_at_ms, updated_at_ms) \
             VALUES (?, ?, ?, ?, 1, ?, ?, ?)",
        )
        .bind(schedule.zone_id.0 as i64)
        .bind(schedule.schedule_time.as_millisecond())
        .bind(schedule.duration_minutes)
        .bind(schedule.repeat.as_str())
        .bind(&*schedule.user_id)
        .bind(now.as_millisecond())
        .bind(now.as_millisecond())
        .execute(&self.pool)
        .await?;

        Ok(IrrigationSchedule {
            id: ScheduleId(result.last_insert_rowid()),
            zone_id: schedule.zone_id,
            schedule_time: schedule.schedule_time,
            duration_minutes: schedule.duration_minutes,
            repeat: schedule.repeat,
            is_active: true,
            user_id: schedule.user_id,
            created_at: now,
            updated_at: now,
        })
    }

    async fn update_schedule(
        &self,
        id: ScheduleId,
        update: ScheduleUpdate,
    ) -> Result<Option<IrrigationSchedule>, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query("SELECT * FROM irrigation_schedules WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        let mut schedule = Self::schedule_from_row(&row)?;

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

        sqlx::query(
            "UPDATE irrigation_schedules \
             SET schedule_time_ms = ?, duration_minutes = ?, repeat_pattern = ?, is_active = ?, \
                 updated_at_ms = ? \
             WHERE id = ?",
        )
        .bind(schedule.schedule_time.as_millisecond())
        .bind(schedule.duration_minutes)
        .bind(schedule.repeat.as_str())
        .bind(schedule.is_active)
        .bind(schedule.updated_at.as_millisecond())
        .bind(id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(schedule))
    }

    async fn list_schedules(
        &self,
        zone_id: Option<ZoneId>,
        active_only: bool,
    ) -> Result<Vec<IrrigationSchedule>, Self::Error> {
        let rows = match zone_id {
            Some(zone_id) => {
                sqlx::query(
                    "SELECT * FROM irrigation_schedules \
                     WHERE zone_id = ? AND (is_active = 1 OR ? = 0) \
                     ORDER BY schedule_time_ms",
                )
                .bind(zone_id.0 as i64)
                .bind(active_only)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM irrigation_schedules \
                     WHERE (is_active = 1 OR ? = 0) \
                     ORDER BY schedule_time_ms",
                )
                .bind(active_only)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::schedule_from_row).collect()
    }
}

#[async_trait]
impl ReadingStore for SqliteStore {
    type Error = SqliteStoreError;

    async fn store_reading(&self, reading: Reading) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO sensor_readings \
             (sensor_id, moisture, temperature, humidity, light, timestamp_ms) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(reading.sensor_id.as_str())
        .bind(reading.moisture.map(NotNan::into_inner))
        .bind(reading.temperature.map(NotNan::into_inner))
        .bind(reading.humidity.map(NotNan::into_inner))
        .bind(reading.light.map(NotNan::into_inner))
        .bind(reading.timestamp.as_millisecond())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_reading(&self, sensor_id: &SensorId) -> Result<Option<Reading>, Self::Error> {
        let row = sqlx::query(
            "SELECT * FROM sensor_readings WHERE sensor_id = ? \
             ORDER BY timestamp_ms DESC LIMIT 1",
        )
        .bind(sensor_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::reading_from_row).transpose()
    }

    async fn query_readings(&self, query: ReadingQuery) -> Result<Vec<Reading>, Self::Error> {
        // fixed shape with sentinel-free optional filters keeps this to one statement
        let rows = sqlx::query(
            "SELECT * FROM sensor_readings \
             WHERE (? IS NULL OR sensor_id = ?) \
               AND (? IS NULL OR timestamp_ms >= ?) \
               AND (? IS NULL OR timestamp_ms < ?) \
             ORDER BY timestamp_ms DESC LIMIT ?",
        )
        .bind(query.sensor_id.as_ref().map(|s| s.as_str().to_owned()))
        .bind(query.sensor_id.as_ref().map(|s| s.as_str().to_owned()))
        .bind(query.from.map(|t| t.as_millisecond()))
        .bind(query.from.map(|t| t.as_millisecond()))
        .bind(query.to.map(|t| t.as_millisecond()))
        .bind(query.to.map(|t| t.as_millisecond()))
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::reading_from_row).collect()
    }
}
