use std::fmt;
use std::str::FromStr;

use ordered_float::NotNan;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

type BoxStr = Box<str>;

/// Single-run duration bound for one irrigation command, in minutes.
pub const MAX_RUN_MINUTES: i64 = 120;

/// Cumulative irrigation cap per zone per UTC calendar day, in minutes.
pub const DAILY_CAP_MINUTES: i64 = 120;

/// Soil moisture percentage above which irrigation is blocked.
pub const SATURATION_THRESHOLD_PCT: f64 = 85.0;

/// A sensor is considered active if it reported within this window.
pub const SENSOR_ACTIVE_SECS: i64 = 600;

/// Past this silence a sensor is presumed faulty rather than idle.
pub const SENSOR_STALE_SECS: i64 = 3_600;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorId(pub BoxStr);

impl SensorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SensorId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for SensorId {
    fn from(s: String) -> Self {
        Self(s.into_boxed_str())
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub u8);

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Ulid);

/// A normalized sensor reading. Each measurement is independently optional;
/// NaN inputs are rejected at the adapter boundary via [`NotNan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor_id: SensorId,
    pub moisture: Option<NotNan<f64>>,
    pub temperature: Option<NotNan<f64>>,
    pub humidity: Option<NotNan<f64>>,
    pub light: Option<NotNan<f64>>,
    pub timestamp: jiff::Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    Orchard,
    Potato,
}

/// Static zone configuration, fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: &'static str,
    pub kind: ZoneKind,
    pub description: &'static str,
}

pub const ZONES: [Zone; 5] = [
    Zone {
        id: ZoneId(1),
        name: "Orchard A",
        kind: ZoneKind::Orchard,
        description: "Apple trees section",
    },
    Zone {
        id: ZoneId(2),
        name: "Orchard B",
        kind: ZoneKind::Orchard,
        description: "Pear trees section",
    },
    Zone {
        id: ZoneId(3),
        name: "Orchard C",
        kind: ZoneKind::Orchard,
        description: "Cherry trees section",
    },
    Zone {
        id: ZoneId(4),
        name: "Orchard D",
        kind: ZoneKind::Orchard,
        description: "Mixed fruit section",
    },
    Zone {
        id: ZoneId(5),
        name: "Potato Field",
        kind: ZoneKind::Potato,
        description: "Main potato cultivation",
    },
];

impl Zone {
    pub fn lookup(id: ZoneId) -> Option<&'static Zone> {
        ZONES.iter().find(|z| z.id == id)
    }

    /// The moisture sensor wired to this zone (zone n reports as "V{n}").
    pub fn moisture_sensor(&self) -> SensorId {
        SensorId::from(format!("V{}", self.id))
    }

    /// Reverse of [`Zone::moisture_sensor`]: the zone a catalog sensor
    /// belongs to, `None` for ids outside the catalog.
    pub fn for_sensor(sensor_id: &SensorId) -> Option<&'static Zone> {
        ZONES.iter().find(|z| z.moisture_sensor() == *sensor_id)
    }
}

/// Health of a sensor derived from the age of its last reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    Active,
    Inactive,
    Error,
}

impl SensorStatus {
    /// Fresh readings mean active, a short silence means inactive, and a
    /// long one means error. A sensor that never reported is inactive,
    /// not broken.
    pub fn from_last_seen(last_seen: Option<jiff::Timestamp>, now: jiff::Timestamp) -> Self {
        let Some(seen) = last_seen else {
            return SensorStatus::Inactive;
        };
        let age_secs = (now.as_millisecond() - seen.as_millisecond()) / 1_000;
        if age_secs < SENSOR_ACTIVE_SECS {
            SensorStatus::Active
        } else if age_secs < SENSOR_STALE_SECS {
            SensorStatus::Inactive
        } else {
            SensorStatus::Error
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Automated,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
            TriggerType::Automated => "automated",
        }
    }
}

impl FromStr for TriggerType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(TriggerType::Manual),
            "scheduled" => Ok(TriggerType::Scheduled),
            "automated" => Ok(TriggerType::Automated),
            _ => Err(ParseEnumError {
                kind: "trigger type",
                value: s.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IrrigationStatus {
    Running,
    Completed,
    Stopped,
    Failed,
}

impl IrrigationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IrrigationStatus::Running => "running",
            IrrigationStatus::Completed => "completed",
            IrrigationStatus::Stopped => "stopped",
            IrrigationStatus::Failed => "failed",
        }
    }

    /// Whether this status carries a final `actual_minutes` figure.
    pub fn is_final(&self) -> bool {
        !matches!(self, IrrigationStatus::Running)
    }
}

impl FromStr for IrrigationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(IrrigationStatus::Running),
            "completed" => Ok(IrrigationStatus::Completed),
            "stopped" => Ok(IrrigationStatus::Stopped),
            "failed" => Ok(IrrigationStatus::Failed),
            _ => Err(ParseEnumError {
                kind: "irrigation status",
                value: s.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatPattern {
    Daily,
    Weekly,
    None,
}

impl RepeatPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatPattern::Daily => "daily",
            RepeatPattern::Weekly => "weekly",
            RepeatPattern::None => "none",
        }
    }
}

impl FromStr for RepeatPattern {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(RepeatPattern::Daily),
            "weekly" => Ok(RepeatPattern::Weekly),
            "none" => Ok(RepeatPattern::None),
            _ => Err(ParseEnumError {
                kind: "repeat pattern",
                value: s.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: BoxStr,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// An irrigation session currently running for a zone. At most one exists
/// per zone at any instant.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveIrrigation {
    pub zone_id: ZoneId,
    pub start_time: jiff::Timestamp,
    pub planned_minutes: i64,
    pub trigger: TriggerType,
    pub user_id: BoxStr,
    pub event_id: EventId,
}

/// Append-only irrigation history record. Finalized exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct IrrigationEvent {
    pub id: EventId,
    pub zone_id: ZoneId,
    pub start_time: jiff::Timestamp,
    pub end_time: Option<jiff::Timestamp>,
    pub planned_minutes: i64,
    pub actual_minutes: Option<i64>,
    pub trigger: TriggerType,
    pub user_id: BoxStr,
    pub status: IrrigationStatus,
    pub created_at: jiff::Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct IrrigationSchedule {
    pub id: ScheduleId,
    pub zone_id: ZoneId,
    pub schedule_time: jiff::Timestamp,
    pub duration_minutes: i64,
    pub repeat: RepeatPattern,
    pub is_active: bool,
    pub user_id: BoxStr,
    pub created_at: jiff::Timestamp,
    pub updated_at: jiff::Timestamp,
}

/// Whole elapsed minutes between two instants, floored, never negative.
pub fn elapsed_minutes(start: jiff::Timestamp, now: jiff::Timestamp) -> i64 {
    let ms = now.as_millisecond() - start.as_millisecond();
    if ms <= 0 { 0 } else { ms / 60_000 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_lookup_valid_and_invalid() {
        assert!(Zone::lookup(ZoneId(1)).is_some());
        assert!(Zone::lookup(ZoneId(5)).is_some());
        assert!(Zone::lookup(ZoneId(0)).is_none());
        assert!(Zone::lookup(ZoneId(6)).is_none());
    }

    #[test]
    fn zone_moisture_sensor_mapping() {
        let zone = Zone::lookup(ZoneId(3)).unwrap();
        assert_eq!(zone.moisture_sensor(), SensorId::from("V3"));
    }

    #[test]
    fn elapsed_minutes_floors() {
        let start: jiff::Timestamp = "2026-08-24T10:00:00Z".parse().unwrap();
        let now: jiff::Timestamp = "2026-08-24T10:30:59Z".parse().unwrap();
        assert_eq!(elapsed_minutes(start, now), 30);
    }

    #[test]
    fn elapsed_minutes_never_negative() {
        let start: jiff::Timestamp = "2026-08-24T10:00:00Z".parse().unwrap();
        let now: jiff::Timestamp = "2026-08-24T09:00:00Z".parse().unwrap();
        assert_eq!(elapsed_minutes(start, now), 0);
    }

    #[test]
    fn zone_for_sensor_reverses_mapping() {
        let zone = Zone::for_sensor(&SensorId::from("V5")).unwrap();
        assert_eq!(zone.name, "Potato Field");
        assert!(Zone::for_sensor(&SensorId::from("V9")).is_none());
        assert!(Zone::for_sensor(&SensorId::from("pump-1")).is_none());
    }

    #[test]
    fn sensor_status_from_reading_age() {
        let now: jiff::Timestamp = "2026-08-24T12:00:00Z".parse().unwrap();
        let at = |s: &str| s.parse::<jiff::Timestamp>().unwrap();

        assert_eq!(SensorStatus::from_last_seen(None, now), SensorStatus::Inactive);
        assert_eq!(
            SensorStatus::from_last_seen(Some(at("2026-08-24T11:51:00Z")), now),
            SensorStatus::Active
        );
        // exactly ten minutes old is no longer active
        assert_eq!(
            SensorStatus::from_last_seen(Some(at("2026-08-24T11:50:00Z")), now),
            SensorStatus::Inactive
        );
        assert_eq!(
            SensorStatus::from_last_seen(Some(at("2026-08-24T11:01:00Z")), now),
            SensorStatus::Inactive
        );
        // exactly an hour of silence tips into error
        assert_eq!(
            SensorStatus::from_last_seen(Some(at("2026-08-24T11:00:00Z")), now),
            SensorStatus::Error
        );
        // a clock-skewed future reading still counts as active
        assert_eq!(
            SensorStatus::from_last_seen(Some(at("2026-08-24T12:05:00Z")), now),
            SensorStatus::Active
        );
    }

    #[test]
    fn trigger_type_round_trip() {
        for t in [
            TriggerType::Manual,
            TriggerType::Scheduled,
            TriggerType::Automated,
        ] {
            assert_eq!(t.as_str().parse::<TriggerType>().unwrap(), t);
        }
        assert!("valve".parse::<TriggerType>().is_err());
    }
}
