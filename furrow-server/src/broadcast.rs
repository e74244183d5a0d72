//! Connection registry fanning sensor readings out to WebSocket subscribers.
//!
//! The registry owns every subscription and the per-sensor rate-limit state.
//! Sends happen outside the lock; a subscription whose sink fails is torn
//! down and never retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use furrow_core::{ConnectionId, Reading, SensorId};
use jiff::Timestamp;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

pub const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(1);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// What a subscription wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionScope {
    /// Every sensor.
    Global,
    /// One sensor only.
    Sensor(SensorId),
}

impl SubscriptionScope {
    fn matches(&self, sensor_id: &SensorId) -> bool {
        match self {
            SubscriptionScope::Global => true,
            SubscriptionScope::Sensor(id) => id == sensor_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    SensorReading,
    ConnectionStatus,
    Heartbeat,
    Error,
}

/// Wire envelope pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub data: serde_json::Value,
    pub timestamp: Timestamp,
}

impl Envelope {
    fn new(kind: MessageKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Timestamp::now(),
        }
    }

    pub fn sensor_reading(reading: &Reading) -> Self {
        let data = serde_json::to_value(reading).unwrap_or(serde_json::Value::Null);
        Self::new(MessageKind::SensorReading, data)
    }

    pub fn connection_status(id: ConnectionId, active_connections: usize) -> Self {
        Self::new(
            MessageKind::ConnectionStatus,
            serde_json::json!({
                "status": "connected",
                "connection_id": id.0.to_string(),
                "active_connections": active_connections,
            }),
        )
    }

    pub fn heartbeat() -> Self {
        Self::new(MessageKind::Heartbeat, serde_json::json!({}))
    }

    pub fn error(code: &str, message: &str) -> Self {
        Self::new(
            MessageKind::Error,
            serde_json::json!({ "code": code, "message": message }),
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("subscriber send failed: {0}")]
pub struct SendError(pub String);

/// Transport half of a subscription. Implementations must not block; a
/// returned error marks the subscription dead.
#[async_trait]
pub trait SubscriberSink: Send + Sync + 'static {
    async fn send(&self, envelope: &Envelope) -> Result<(), SendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connection registry at capacity ({limit})")]
    AtCapacity { limit: usize },
}

/// Per-call summary of a `broadcast`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Suppressed by the per-sensor rate limit; the reading is dropped.
    RateLimited,
    Delivered { delivered: usize, dropped: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub global: usize,
    pub per_sensor: HashMap<SensorId, usize>,
    pub total: usize,
}

struct Subscription<S> {
    scope: SubscriptionScope,
    sink: Arc<S>,
}

struct Inner<S> {
    subscriptions: HashMap<ConnectionId, Subscription<S>>,
    last_broadcast: HashMap<SensorId, Timestamp>,
}

pub struct BroadcastRegistry<S> {
    inner: RwLock<Inner<S>>,
    max_connections: usize,
    rate_limit: Duration,
}

impl<S: SubscriberSink> BroadcastRegistry<S> {
    pub fn new(max_connections: usize, rate_limit: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                subscriptions: HashMap::new(),
                last_broadcast: HashMap::new(),
            }),
            max_connections,
            rate_limit,
        }
    }

    pub async fn connect(
        &self,
        scope: SubscriptionScope,
        sink: S,
    ) -> Result<ConnectionId, ConnectError> {
        let mut inner = self.inner.write().await;
        if inner.subscriptions.len() >= self.max_connections {
            return Err(ConnectError::AtCapacity {
                limit: self.max_connections,
            });
        }
        let id = ConnectionId(Ulid::new());
        inner.subscriptions.insert(
            id,
            Subscription {
                scope: scope.clone(),
                sink: Arc::new(sink),
            },
        );
        info!(
            connection_id = %id.0,
            scope = ?scope,
            active = inner.subscriptions.len(),
            "subscriber connected"
        );
        Ok(id)
    }

    /// Idempotent; unknown ids are ignored.
    pub async fn disconnect(&self, id: ConnectionId) {
        let mut inner = self.inner.write().await;
        if inner.subscriptions.remove(&id).is_some() {
            info!(
                connection_id = %id.0,
                active = inner.subscriptions.len(),
                "subscriber disconnected"
            );
        }
    }

    /// Fan a reading out to every matching subscription. At most one delivery
    /// per sensor per rate-limit window; suppressed readings are dropped.
    pub async fn broadcast(&self, reading: &Reading) -> BroadcastOutcome {
        let now = Timestamp::now();
        let limit_ms = self.rate_limit.as_millis() as i64;
        let targets: Vec<(ConnectionId, Arc<S>)> = {
            let mut inner = self.inner.write().await;
            if let Some(last) = inner.last_broadcast.get(&reading.sensor_id) {
                if now.as_millisecond() - last.as_millisecond() < limit_ms {
                    debug!(sensor_id = %reading.sensor_id, "broadcast rate limited");
                    return BroadcastOutcome::RateLimited;
                }
            }
            inner.last_broadcast.insert(reading.sensor_id.clone(), now);
            inner
                .subscriptions
                .iter()
                .filter(|(_, sub)| sub.scope.matches(&reading.sensor_id))
                .map(|(id, sub)| (*id, Arc::clone(&sub.sink)))
                .collect()
        };

        let envelope = Envelope::sensor_reading(reading);
        self.deliver(&envelope, targets).await
    }

    /// Push a heartbeat to every subscription, tearing down dead ones.
    pub async fn heartbeat(&self) -> BroadcastOutcome {
        let targets: Vec<(ConnectionId, Arc<S>)> = {
            let inner = self.inner.read().await;
            inner
                .subscriptions
                .iter()
                .map(|(id, sub)| (*id, Arc::clone(&sub.sink)))
                .collect()
        };
        self.deliver(&Envelope::heartbeat(), targets).await
    }

    async fn deliver(
        &self,
        envelope: &Envelope,
        targets: Vec<(ConnectionId, Arc<S>)>,
    ) -> BroadcastOutcome {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sink) in targets {
            match sink.send(envelope).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection_id = %id.0, error = %e, "send failed, tearing down subscriber");
                    dead.push(id);
                }
            }
        }
        let dropped = dead.len();
        if !dead.is_empty() {
            let mut inner = self.inner.write().await;
            for id in dead {
                inner.subscriptions.remove(&id);
            }
        }
        BroadcastOutcome::Delivered { delivered, dropped }
    }

    /// Best-effort direct send to one subscription. Tears it down on failure.
    pub async fn send_personal(&self, id: ConnectionId, envelope: &Envelope) -> bool {
        let sink = {
            let inner = self.inner.read().await;
            inner.subscriptions.get(&id).map(|sub| Arc::clone(&sub.sink))
        };
        match sink {
            Some(sink) => match sink.send(envelope).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(connection_id = %id.0, error = %e, "personal send failed");
                    self.disconnect(id).await;
                    false
                }
            },
            None => false,
        }
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        let mut global = 0;
        let mut per_sensor: HashMap<SensorId, usize> = HashMap::new();
        for sub in inner.subscriptions.values() {
            match &sub.scope {
                SubscriptionScope::Global => global += 1,
                SubscriptionScope::Sensor(id) => *per_sensor.entry(id.clone()).or_default() += 1,
            }
        }
        RegistryStats {
            global,
            per_sensor,
            total: inner.subscriptions.len(),
        }
    }

}

/// Periodic heartbeat driver. Exits cleanly on cancellation.
pub async fn run_heartbeat<S: SubscriberSink>(
    registry: Arc<BroadcastRegistry<S>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // first tick is immediate
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("heartbeat task shutting down");
                return;
            }
            _ = ticker.tick() => {
                let outcome = registry.heartbeat().await;
                if let BroadcastOutcome::Delivered { delivered, dropped } = outcome {
                    debug!(delivered, dropped, "heartbeat sent");
                }
            }
        }
    }
}
