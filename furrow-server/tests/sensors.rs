use furrow_core::{Reading, SensorId, SensorStatus, ZoneId};
use furrow_server::api::sensors::sensor_catalog;
use furrow_server::storage::{InMemoryStore, ReadingStore};
use jiff::{Timestamp, ToSpan};
use ordered_float::NotNan;

fn reading(sensor: &str, timestamp: Timestamp) -> Reading {
    Reading {
        sensor_id: SensorId::from(sensor),
        moisture: NotNan::new(55.0).ok(),
        temperature: None,
        humidity: None,
        light: None,
        timestamp,
    }
}

#[tokio::test]
async fn catalog_covers_every_zone_sensor() {
    let store = InMemoryStore::new();
    let now = Timestamp::now();

    let rows = sensor_catalog(&store, now).await.unwrap();
    assert_eq!(rows.len(), 5);
    let ids: Vec<&str> = rows.iter().map(|r| r.sensor_id.as_str()).collect();
    assert_eq!(ids, vec!["V1", "V2", "V3", "V4", "V5"]);
    assert!(rows.iter().all(|r| r.status == SensorStatus::Inactive));
    assert!(rows.iter().all(|r| r.latest_reading.is_none()));
}

#[tokio::test]
async fn catalog_status_tracks_reading_age() {
    let store = InMemoryStore::new();
    let now = Timestamp::now();

    // V1 just reported, V3 went silent two hours ago
    store.store_reading(reading("V1", now - 1.minute())).await.unwrap();
    store.store_reading(reading("V3", now - 2.hours())).await.unwrap();

    let rows = sensor_catalog(&store, now).await.unwrap();
    let by_id = |id: &str| rows.iter().find(|r| r.sensor_id.as_str() == id).unwrap();

    assert_eq!(by_id("V1").status, SensorStatus::Active);
    assert_eq!(by_id("V1").last_seen, Some(now - 1.minute()));
    assert!(by_id("V1").latest_reading.is_some());

    assert_eq!(by_id("V3").status, SensorStatus::Error);
    assert_eq!(by_id("V2").status, SensorStatus::Inactive);
    assert!(by_id("V2").last_seen.is_none());
}

#[tokio::test]
async fn catalog_rows_carry_zone_metadata() {
    let store = InMemoryStore::new();
    let rows = sensor_catalog(&store, Timestamp::now()).await.unwrap();

    let potato = rows.iter().find(|r| r.zone_id == ZoneId(5)).unwrap();
    assert_eq!(potato.sensor_id, SensorId::from("V5"));
    assert_eq!(potato.zone_name, "Potato Field");
    assert_eq!(potato.name, "Potato Field Sensor");
}
