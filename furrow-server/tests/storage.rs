use furrow_core::{
    IrrigationStatus, Reading, RepeatPattern, SensorId, TriggerType, ZoneId,
};
use furrow_server::storage::{
    EventQuery, InMemoryStore, IrrigationStore, NewEvent, NewSchedule, ReadingQuery, ReadingStore,
    ScheduleUpdate, SqliteStore,
};
use jiff::{Timestamp, ToSpan};
use ordered_float::NotNan;
use tempfile::NamedTempFile;

fn new_event(zone_id: ZoneId, start_time: Timestamp) -> NewEvent {
    NewEvent {
        zone_id,
        start_time,
        planned_minutes: 30,
        trigger: TriggerType::Manual,
        user_id: "test".into(),
        status: IrrigationStatus::Running,
    }
}

fn new_reading(sensor: &str, moisture: f64, timestamp: Timestamp) -> Reading {
    Reading {
        sensor_id: SensorId::from(sensor),
        moisture: NotNan::new(moisture).ok(),
        temperature: NotNan::new(21.5).ok(),
        humidity: None,
        light: None,
        timestamp,
    }
}

#[tokio::test]
async fn memory_event_lifecycle() {
    let store = InMemoryStore::new();
    let now = Timestamp::now();

    let event = store.insert_event(new_event(ZoneId(1), now)).await.unwrap();
    assert_eq!(event.status, IrrigationStatus::Running);
    assert!(event.end_time.is_none());

    store
        .finalize_event(event.id, now + 25.minutes(), 25, IrrigationStatus::Completed)
        .await
        .unwrap();

    let (events, total) = store
        .list_events(EventQuery {
            zone_id: Some(ZoneId(1)),
            page: 1,
            page_size: 10,
        })
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(events[0].status, IrrigationStatus::Completed);
    assert_eq!(events[0].actual_minutes, Some(25));
}

#[tokio::test]
async fn memory_finalize_unknown_event_errors() {
    let store = InMemoryStore::new();
    let result = store
        .finalize_event(
            furrow_core::EventId(42),
            Timestamp::now(),
            5,
            IrrigationStatus::Stopped,
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn memory_day_window_filters_by_start_time() {
    let store = InMemoryStore::new();
    let day_start: Timestamp = "2026-08-24T00:00:00Z".parse().unwrap();
    let day_end: Timestamp = "2026-08-25T00:00:00Z".parse().unwrap();

    // one event yesterday, one today, one for another zone
    store
        .insert_event(new_event(ZoneId(1), day_start - 2.hours()))
        .await
        .unwrap();
    let today = store
        .insert_event(new_event(ZoneId(1), day_start + 10.hours()))
        .await
        .unwrap();
    store
        .insert_event(new_event(ZoneId(2), day_start + 11.hours()))
        .await
        .unwrap();

    let events = store
        .events_started_between(ZoneId(1), day_start, day_end)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, today.id);
}

#[tokio::test]
async fn memory_readings_latest_and_query() {
    let store = InMemoryStore::new();
    let base: Timestamp = "2026-08-24T10:00:00Z".parse().unwrap();
    for i in 0..5 {
        store
            .store_reading(new_reading("V1", 40.0 + i as f64, base + (i as i64).minutes()))
            .await
            .unwrap();
    }
    store
        .store_reading(new_reading("V2", 70.0, base))
        .await
        .unwrap();

    let latest = store
        .latest_reading(&SensorId::from("V1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.moisture.map(NotNan::into_inner), Some(44.0));

    let readings = store
        .query_readings(ReadingQuery {
            sensor_id: Some(SensorId::from("V1")),
            from: Some(base + 1.minute()),
            to: Some(base + 4.minutes()),
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(readings.len(), 3);
    assert!(readings[0].timestamp > readings[1].timestamp);

    let limited = store
        .query_readings(ReadingQuery {
            sensor_id: None,
            from: None,
            to: None,
            limit: 2,
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);

    assert!(
        store
            .latest_reading(&SensorId::from("V9"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn sqlite_event_lifecycle() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteStore::new(temp_file.path()).await.unwrap();
    let now = Timestamp::now();

    let event = store.insert_event(new_event(ZoneId(3), now)).await.unwrap();
    store
        .finalize_event(event.id, now + 12.minutes(), 12, IrrigationStatus::Stopped)
        .await
        .unwrap();

    let (events, total) = store
        .list_events(EventQuery {
            zone_id: Some(ZoneId(3)),
            page: 1,
            page_size: 10,
        })
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(events[0].id, event.id);
    assert_eq!(events[0].zone_id, ZoneId(3));
    assert_eq!(events[0].status, IrrigationStatus::Stopped);
    assert_eq!(events[0].actual_minutes, Some(12));
    assert_eq!(events[0].trigger, TriggerType::Manual);

    // finalizing a missing id is an error
    assert!(
        store
            .finalize_event(
                furrow_core::EventId(999),
                now,
                1,
                IrrigationStatus::Stopped
            )
            .await
            .is_err()
    );
}

#[tokio::test]
async fn sqlite_day_window_and_pagination() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteStore::new(temp_file.path()).await.unwrap();
    let day_start: Timestamp = "2026-08-24T00:00:00Z".parse().unwrap();
    let day_end: Timestamp = "2026-08-25T00:00:00Z".parse().unwrap();

    store
        .insert_event(new_event(ZoneId(1), day_start - 1.hour()))
        .await
        .unwrap();
    for i in 0..3 {
        store
            .insert_event(new_event(ZoneId(1), day_start + (i + 1).hours()))
            .await
            .unwrap();
    }

    let events = store
        .events_started_between(ZoneId(1), day_start, day_end)
        .await
        .unwrap();
    assert_eq!(events.len(), 3);

    let (page, total) = store
        .list_events(EventQuery {
            zone_id: Some(ZoneId(1)),
            page: 1,
            page_size: 2,
        })
        .await
        .unwrap();
    assert_eq!(total, 4);
    assert_eq!(page.len(), 2);
    assert!(page[0].start_time > page[1].start_time);

    let (page, _) = store
        .list_events(EventQuery {
            zone_id: Some(ZoneId(1)),
            page: 2,
            page_size: 2,
        })
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn sqlite_schedule_partial_update() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteStore::new(temp_file.path()).await.unwrap();
    let schedule_time: Timestamp = "2026-09-01T05:30:00Z".parse().unwrap();

    let schedule = store
        .insert_schedule(NewSchedule {
            zone_id: ZoneId(4),
            schedule_time,
            duration_minutes: 40,
            repeat: RepeatPattern::Weekly,
            user_id: "test".into(),
        })
        .await
        .unwrap();
    assert!(schedule.is_active);

    let updated = store
        .update_schedule(
            schedule.id,
            ScheduleUpdate {
                duration_minutes: Some(15),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.duration_minutes, 15);
    assert_eq!(updated.schedule_time, schedule_time);
    assert_eq!(updated.repeat, RepeatPattern::Weekly);

    let missing = store
        .update_schedule(furrow_core::ScheduleId(999), ScheduleUpdate::default())
        .await
        .unwrap();
    assert!(missing.is_none());

    store
        .update_schedule(
            schedule.id,
            ScheduleUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let active = store.list_schedules(Some(ZoneId(4)), true).await.unwrap();
    assert!(active.is_empty());
    let all = store.list_schedules(None, false).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn sqlite_readings_round_trip() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteStore::new(temp_file.path()).await.unwrap();
    let base: Timestamp = "2026-08-24T10:00:00Z".parse().unwrap();

    store
        .store_reading(new_reading("V5", 63.5, base))
        .await
        .unwrap();
    store
        .store_reading(new_reading("V5", 64.0, base + 1.minute()))
        .await
        .unwrap();

    let latest = store
        .latest_reading(&SensorId::from("V5"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.moisture.map(NotNan::into_inner), Some(64.0));
    assert_eq!(latest.temperature.map(NotNan::into_inner), Some(21.5));
    assert!(latest.humidity.is_none());
    assert_eq!(latest.timestamp, base + 1.minute());

    let readings = store
        .query_readings(ReadingQuery {
            sensor_id: Some(SensorId::from("V5")),
            from: None,
            to: None,
            limit: 10,
        })
        .await
        .unwrap();
    assert_eq!(readings.len(), 2);
}

#[tokio::test]
async fn sqlite_rejects_out_of_range_zone_id() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteStore::new(temp_file.path()).await.unwrap();

    // write a row the store itself would never produce
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}", temp_file.path().display()))
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO irrigation_events \
         (zone_id, start_time_ms, planned_minutes, trigger_type, user_id, status, created_at_ms) \
         VALUES (999, 0, 10, 'manual', 'test', 'completed', 0)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let result = store
        .list_events(EventQuery {
            zone_id: None,
            page: 1,
            page_size: 10,
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn sqlite_persistence_across_instances() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path();

    let event_id = {
        let store = SqliteStore::new(db_path).await.unwrap();
        let event = store
            .insert_event(new_event(ZoneId(2), Timestamp::now()))
            .await
            .unwrap();
        event.id
    };

    {
        let store = SqliteStore::new(db_path).await.unwrap();
        let (events, total) = store
            .list_events(EventQuery {
                zone_id: None,
                page: 1,
                page_size: 10,
            })
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(events[0].id, event_id);
        assert_eq!(events[0].user_id.as_ref(), "test");
    }
}
