use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use furrow_core::{Reading, SensorId};
use furrow_server::broadcast::{
    BroadcastOutcome, BroadcastRegistry, ConnectError, Envelope, MessageKind, SendError,
    SubscriberSink, SubscriptionScope,
};
use ordered_float::NotNan;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
struct MockSink {
    received: Arc<Mutex<Vec<Envelope>>>,
    fail: Arc<AtomicBool>,
}

impl MockSink {
    fn failing() -> Self {
        let sink = Self::default();
        sink.fail.store(true, Ordering::Relaxed);
        sink
    }

    async fn received_kinds(&self) -> Vec<MessageKind> {
        self.received.lock().await.iter().map(|e| e.kind).collect()
    }
}

#[async_trait]
impl SubscriberSink for MockSink {
    async fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(SendError("mock sink closed".into()));
        }
        self.received.lock().await.push(envelope.clone());
        Ok(())
    }
}

fn reading(sensor: &str) -> Reading {
    Reading {
        sensor_id: SensorId::from(sensor),
        moisture: NotNan::new(50.0).ok(),
        temperature: None,
        humidity: None,
        light: None,
        timestamp: jiff::Timestamp::now(),
    }
}

fn registry(rate_limit: Duration) -> BroadcastRegistry<MockSink> {
    BroadcastRegistry::new(16, rate_limit)
}

#[tokio::test]
async fn fan_out_respects_scopes() {
    let registry = registry(Duration::ZERO);
    let global = MockSink::default();
    let v1_only = MockSink::default();
    registry
        .connect(SubscriptionScope::Global, global.clone())
        .await
        .unwrap();
    registry
        .connect(
            SubscriptionScope::Sensor(SensorId::from("V1")),
            v1_only.clone(),
        )
        .await
        .unwrap();

    let outcome = registry.broadcast(&reading("V1")).await;
    assert_eq!(
        outcome,
        BroadcastOutcome::Delivered {
            delivered: 2,
            dropped: 0
        }
    );

    let outcome = registry.broadcast(&reading("V2")).await;
    assert_eq!(
        outcome,
        BroadcastOutcome::Delivered {
            delivered: 1,
            dropped: 0
        }
    );

    assert_eq!(global.received.lock().await.len(), 2);
    assert_eq!(v1_only.received.lock().await.len(), 1);
}

#[tokio::test]
async fn rate_limit_suppresses_second_broadcast() {
    let registry = registry(Duration::from_secs(1));
    let global = MockSink::default();
    registry
        .connect(SubscriptionScope::Global, global.clone())
        .await
        .unwrap();

    let first = registry.broadcast(&reading("V1")).await;
    let second = registry.broadcast(&reading("V1")).await;
    assert!(matches!(first, BroadcastOutcome::Delivered { delivered: 1, .. }));
    assert_eq!(second, BroadcastOutcome::RateLimited);
    assert_eq!(global.received.lock().await.len(), 1);

    // another sensor has its own window
    let other = registry.broadcast(&reading("V2")).await;
    assert!(matches!(other, BroadcastOutcome::Delivered { delivered: 1, .. }));
}

#[tokio::test]
async fn rate_limit_window_reopens() {
    let registry = registry(Duration::from_millis(50));
    let global = MockSink::default();
    registry
        .connect(SubscriptionScope::Global, global.clone())
        .await
        .unwrap();

    registry.broadcast(&reading("V1")).await;
    assert_eq!(
        registry.broadcast(&reading("V1")).await,
        BroadcastOutcome::RateLimited
    );

    tokio::time::sleep(Duration::from_millis(80)).await;
    let outcome = registry.broadcast(&reading("V1")).await;
    assert!(matches!(outcome, BroadcastOutcome::Delivered { delivered: 1, .. }));
    assert_eq!(global.received.lock().await.len(), 2);
}

#[tokio::test]
async fn dead_subscriber_does_not_block_healthy_one() {
    let registry = registry(Duration::ZERO);
    let healthy_global = MockSink::default();
    let dead_v2 = MockSink::failing();
    registry
        .connect(SubscriptionScope::Global, healthy_global.clone())
        .await
        .unwrap();
    registry
        .connect(SubscriptionScope::Sensor(SensorId::from("V2")), dead_v2)
        .await
        .unwrap();

    let outcome = registry.broadcast(&reading("V2")).await;
    assert_eq!(
        outcome,
        BroadcastOutcome::Delivered {
            delivered: 1,
            dropped: 1
        }
    );

    // the dead subscription is gone, the healthy one still receives
    assert_eq!(registry.stats().await.total, 1);
    let outcome = registry.broadcast(&reading("V2")).await;
    assert_eq!(
        outcome,
        BroadcastOutcome::Delivered {
            delivered: 1,
            dropped: 0
        }
    );
    assert_eq!(healthy_global.received.lock().await.len(), 2);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let registry = registry(Duration::ZERO);
    let id = registry
        .connect(SubscriptionScope::Global, MockSink::default())
        .await
        .unwrap();
    assert_eq!(registry.stats().await.total, 1);

    registry.disconnect(id).await;
    registry.disconnect(id).await;
    assert_eq!(registry.stats().await.total, 0);
}

#[tokio::test]
async fn heartbeat_reaches_all_and_tears_down_dead() {
    let registry = registry(Duration::ZERO);
    let healthy = MockSink::default();
    registry
        .connect(SubscriptionScope::Global, healthy.clone())
        .await
        .unwrap();
    registry
        .connect(
            SubscriptionScope::Sensor(SensorId::from("V1")),
            MockSink::failing(),
        )
        .await
        .unwrap();

    let outcome = registry.heartbeat().await;
    assert_eq!(
        outcome,
        BroadcastOutcome::Delivered {
            delivered: 1,
            dropped: 1
        }
    );
    assert_eq!(registry.stats().await.total, 1);
    assert_eq!(healthy.received_kinds().await, vec![MessageKind::Heartbeat]);
}

#[tokio::test]
async fn connect_rejected_at_capacity() {
    let registry = BroadcastRegistry::new(1, Duration::ZERO);
    registry
        .connect(SubscriptionScope::Global, MockSink::default())
        .await
        .unwrap();
    let err = registry
        .connect(SubscriptionScope::Global, MockSink::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectError::AtCapacity { limit: 1 }));
}

#[tokio::test]
async fn send_personal_hits_one_subscriber() {
    let registry = registry(Duration::ZERO);
    let first = MockSink::default();
    let second = MockSink::default();
    let first_id = registry
        .connect(SubscriptionScope::Global, first.clone())
        .await
        .unwrap();
    registry
        .connect(SubscriptionScope::Global, second.clone())
        .await
        .unwrap();

    assert!(
        registry
            .send_personal(first_id, &Envelope::connection_status(first_id, 2))
            .await
    );
    assert_eq!(
        first.received_kinds().await,
        vec![MessageKind::ConnectionStatus]
    );
    assert!(second.received.lock().await.is_empty());

    registry.disconnect(first_id).await;
    assert!(!registry.send_personal(first_id, &Envelope::heartbeat()).await);
}

#[tokio::test]
async fn stats_split_by_scope() {
    let registry = registry(Duration::ZERO);
    registry
        .connect(SubscriptionScope::Global, MockSink::default())
        .await
        .unwrap();
    registry
        .connect(
            SubscriptionScope::Sensor(SensorId::from("V1")),
            MockSink::default(),
        )
        .await
        .unwrap();
    registry
        .connect(
            SubscriptionScope::Sensor(SensorId::from("V1")),
            MockSink::default(),
        )
        .await
        .unwrap();

    let stats = registry.stats().await;
    assert_eq!(stats.global, 1);
    assert_eq!(stats.per_sensor.get(&SensorId::from("V1")), Some(&2));
    assert_eq!(stats.total, 3);
}
