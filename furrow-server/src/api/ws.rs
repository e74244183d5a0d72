//! WebSocket subscription endpoints. Each socket is bridged to the broadcast
//! registry through an unbounded channel; the registry never touches the
//! socket directly.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use furrow_core::SensorId;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ApiState;
use crate::broadcast::{
    BroadcastRegistry, Envelope, SendError, SubscriberSink, SubscriptionScope,
};
use crate::storage::{IrrigationStore, ReadingStore};

/// Registry-facing half of a WebSocket connection. Sending fails once the
/// socket task has exited, which marks the subscription for teardown.
pub struct WsSink {
    tx: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl SubscriberSink for WsSink {
    async fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        let json = serde_json::to_string(envelope).map_err(|e| SendError(e.to_string()))?;
        self.tx
            .send(Message::Text(json.into()))
            .map_err(|_| SendError("websocket closed".into()))
    }
}

pub async fn subscribe_global<St>(
    ws: WebSocketUpgrade,
    State(state): State<ApiState<St>>,
) -> impl IntoResponse
where
    St: IrrigationStore + ReadingStore,
{
    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| handle_socket(socket, registry, SubscriptionScope::Global))
}

pub async fn subscribe_sensor<St>(
    ws: WebSocketUpgrade,
    Path(sensor_id): Path<String>,
    State(state): State<ApiState<St>>,
) -> impl IntoResponse
where
    St: IrrigationStore + ReadingStore,
{
    let registry = Arc::clone(&state.registry);
    let scope = SubscriptionScope::Sensor(SensorId::from(sensor_id));
    ws.on_upgrade(move |socket| handle_socket(socket, registry, scope))
}

async fn handle_socket(
    mut socket: WebSocket,
    registry: Arc<BroadcastRegistry<WsSink>>,
    scope: SubscriptionScope,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection_id = match registry.connect(scope, WsSink { tx }).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "rejecting websocket subscriber");
            let envelope = Envelope::error("AT_CAPACITY", &e.to_string());
            if let Ok(json) = serde_json::to_string(&envelope) {
                let _ = socket.send(Message::Text(json.into())).await;
            }
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let total = registry.stats().await.total;
    registry
        .send_personal(connection_id, &Envelope::connection_status(connection_id, total))
        .await;

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(message) => {
                    if socket.send(message).await.is_err() {
                        break;
                    }
                }
                // registry tore the subscription down
                None => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(data))) => {
                    if socket.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                // server-push only; client frames are ignored
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(error = %e, "websocket receive error");
                    break;
                }
            },
        }
    }

    registry.disconnect(connection_id).await;
}
