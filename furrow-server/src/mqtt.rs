//! MQTT adapter: inbound sensor readings, outbound valve commands.
//!
//! One `AsyncClient` carries both directions. The ingest task normalizes
//! publishes into readings and hands them to the store and the broadcast
//! registry; the `CommandPublisher` impl writes valve commands to
//! `{prefix}/{zone_id}` at QoS 1.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use furrow_core::{Reading, SensorId, ZoneId};
use jiff::Timestamp;
use ordered_float::NotNan;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::{BroadcastRegistry, SubscriberSink};
use crate::config::MqttConfig;
use crate::engine::{CommandPublisher, ValveCommand};
use crate::storage::ReadingStore;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct MqttHandle {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    command_topic_prefix: Arc<str>,
}

impl MqttHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

pub fn connect(config: &MqttConfig) -> (MqttHandle, EventLoop) {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(60));
    let (client, eventloop) = AsyncClient::new(options, 64);
    let handle = MqttHandle {
        client,
        connected: Arc::new(AtomicBool::new(false)),
        command_topic_prefix: config.command_topic_prefix.clone().into(),
    };
    (handle, eventloop)
}

#[async_trait]
impl CommandPublisher for MqttHandle {
    async fn publish(&self, zone_id: ZoneId, command: ValveCommand) -> bool {
        let topic = format!("{}/{}", self.command_topic_prefix, zone_id);
        let payload = match command {
            ValveCommand::Start { duration_minutes } => {
                serde_json::json!({ "action": "start", "duration": duration_minutes })
            }
            ValveCommand::Stop => serde_json::json!({ "action": "stop" }),
        };
        match self
            .client
            .publish(&topic, QoS::AtLeastOnce, false, payload.to_string())
            .await
        {
            Ok(()) => {
                debug!(topic, "valve command published");
                true
            }
            Err(e) => {
                error!(topic, error = %e, "failed to publish valve command");
                false
            }
        }
    }
}

/// Consumes the broker event loop until cancelled: resubscribes on every
/// (re)connect, stores and fans out each parseable reading.
pub async fn run_ingest<R, S>(
    handle: MqttHandle,
    mut eventloop: EventLoop,
    topic_filter: String,
    readings: R,
    registry: Arc<BroadcastRegistry<S>>,
    cancel: CancellationToken,
) where
    R: ReadingStore,
    S: SubscriberSink,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("mqtt ingest shutting down");
                return;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    handle.connected.store(true, Ordering::Relaxed);
                    match handle.client.subscribe(&topic_filter, QoS::AtMostOnce).await {
                        Ok(()) => info!(topic = %topic_filter, "subscribed to sensor topics"),
                        Err(e) => error!(error = %e, "failed to subscribe to sensor topics"),
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match parse_reading(&publish.topic, &publish.payload) {
                        Some(reading) => {
                            if let Err(e) = readings.store_reading(reading.clone()).await {
                                error!(sensor_id = %reading.sensor_id, error = %e, "failed to store reading");
                            }
                            let outcome = registry.broadcast(&reading).await;
                            debug!(sensor_id = %reading.sensor_id, ?outcome, "reading ingested");
                        }
                        None => {
                            warn!(topic = %publish.topic, "unparseable sensor message dropped");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    handle.connected.store(false, Ordering::Relaxed);
                    warn!("mqtt broker disconnected");
                }
                Ok(_) => {}
                Err(e) => {
                    handle.connected.store(false, Ordering::Relaxed);
                    warn!(error = %e, "mqtt connection error, retrying");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    }
}

/// Normalizes an inbound publish into a [`Reading`].
///
/// Two payload shapes are accepted: a JSON object with optional measurement
/// fields (sensor id from the payload, falling back to the second topic
/// segment), and a bare numeric value on `sensors/{id}/{measurement}`.
pub fn parse_reading(topic: &str, payload: &[u8]) -> Option<Reading> {
    if let Ok(serde_json::Value::Object(fields)) = serde_json::from_slice(payload) {
        let sensor_id = fields
            .get("sensor_id")
            .and_then(|v| v.as_str())
            .or_else(|| topic.split('/').nth(1))?;
        let measurement = |key: &str| {
            fields
                .get(key)
                .and_then(|v| v.as_f64())
                .and_then(|v| NotNan::new(v).ok())
        };
        let timestamp = fields
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| Timestamp::from_str(s).ok())
            .unwrap_or_else(Timestamp::now);
        return Some(Reading {
            sensor_id: SensorId::from(sensor_id),
            moisture: measurement("moisture"),
            temperature: measurement("temperature"),
            humidity: measurement("humidity"),
            light: measurement("light"),
            timestamp,
        });
    }

    // bare numeric payload on sensors/{id}/{measurement}
    let mut parts = topic.split('/');
    let (_, sensor_id, measurement) = (parts.next()?, parts.next()?, parts.next()?);
    let value = std::str::from_utf8(payload).ok()?.trim().parse::<f64>().ok()?;
    let value = NotNan::new(value).ok()?;
    let mut reading = Reading {
        sensor_id: SensorId::from(sensor_id),
        moisture: None,
        temperature: None,
        humidity: None,
        light: None,
        timestamp: Timestamp::now(),
    };
    match measurement {
        "moisture" => reading.moisture = Some(value),
        "temperature" => reading.temperature = Some(value),
        "humidity" => reading.humidity = Some(value),
        "light" => reading.light = Some(value),
        _ => return None,
    }
    Some(reading)
}
