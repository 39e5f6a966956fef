//! WebSocket endpoints for the admin push channel.
//!
//! One route per topic. Each connection runs its own loop: an immediate
//! snapshot on connect, change-detected pushes on the topic cadence, and a
//! heartbeat ping. External components can also push an out-of-band update
//! to every subscriber of a topic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::connections::{ConnectionManager, CLOSE_CHANNEL_FULL};
use super::topics::Topic;

/// Anything that can produce a topic snapshot. The supervisor implements
/// this; the server never reaches into components directly.
#[async_trait]
pub trait SnapshotSource: Send + Sync + std::fmt::Debug {
    async fn snapshot(&self, topic: Topic) -> serde_json::Value;
}

#[derive(Debug, Clone)]
pub struct RealtimeState {
    pub manager: Arc<ConnectionManager>,
    pub source: Arc<dyn SnapshotSource>,
    pub heartbeat_interval: Duration,
    pub poll_floor: Duration,
}

impl RealtimeState {
    pub fn new(
        manager: Arc<ConnectionManager>,
        source: Arc<dyn SnapshotSource>,
        heartbeat_interval: Duration,
        poll_floor: Duration,
    ) -> Self {
        Self {
            manager,
            source,
            heartbeat_interval,
            poll_floor,
        }
    }

    /// Out-of-band push: snapshot now and fan out to every subscriber.
    pub async fn push_update(&self, topic: Topic) -> usize {
        let snapshot = self.source.snapshot(topic).await;
        let frame = frame(topic.frame_type(), &snapshot);
        self.manager.broadcast(topic, &frame)
    }
}

/// Routes for the push channel plus the stats endpoint.
pub fn realtime_router(state: RealtimeState) -> Router {
    Router::new()
        .route("/ws/admin/hive", get(ws_hive))
        .route("/ws/admin/analytics", get(ws_analytics))
        .route("/ws/admin/bees", get(ws_bees))
        .route("/api/realtime/stats", get(stats))
        .with_state(state)
}

async fn ws_hive(ws: WebSocketUpgrade, State(state): State<RealtimeState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Topic::Hive))
}

async fn ws_analytics(
    ws: WebSocketUpgrade,
    State(state): State<RealtimeState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Topic::Analytics))
}

async fn ws_bees(ws: WebSocketUpgrade, State(state): State<RealtimeState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, Topic::Bees))
}

async fn stats(State(state): State<RealtimeState>) -> impl IntoResponse {
    Json(state.manager.stats())
}

/// Frame envelope every push uses.
fn frame(frame_type: &str, data: &serde_json::Value) -> String {
    serde_json::json!({
        "type": frame_type,
        "data": data,
        "timestamp": chrono::Utc::now().timestamp_millis(),
    })
    .to_string()
}

fn snapshot_hash(data: &serde_json::Value) -> [u8; 32] {
    Sha256::digest(data.to_string().as_bytes()).into()
}

async fn handle_socket(mut socket: WebSocket, state: RealtimeState, topic: Topic) {
    let Some((client_id, mut outbound)) = state.manager.connect(topic) else {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_CHANNEL_FULL,
                reason: "Channel full".into(),
            })))
            .await;
        return;
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Forward task: everything queued for this client goes to the wire.
    let send_task = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Initial snapshot before the first poll tick.
    let snapshot = state.source.snapshot(topic).await;
    let mut last_hash = snapshot_hash(&snapshot);
    if !state
        .manager
        .send_to(topic, client_id, &frame(topic.frame_type(), &snapshot))
    {
        state.manager.disconnect(topic, client_id);
        send_task.abort();
        return;
    }

    let poll_every = Duration::from_secs(topic.poll_interval_s()).max(state.poll_floor);
    let mut poll = tokio::time::interval(poll_every);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    poll.tick().await; // the immediate first tick; the snapshot above covered it

    let mut heartbeat = tokio::time::interval(state.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let snapshot = state.source.snapshot(topic).await;
                let hash = snapshot_hash(&snapshot);
                if hash != last_hash {
                    last_hash = hash;
                    if !state.manager.send_to(
                        topic,
                        client_id,
                        &frame(topic.frame_type(), &snapshot),
                    ) {
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                let ping = frame("ping", &serde_json::Value::Null);
                if !state.manager.send_to(topic, client_id, &ping) {
                    debug!(topic = topic.as_str(), client = client_id, "ping undeliverable");
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Text(text))) => {
                        // Client keepalives are accepted and ignored.
                        debug!(topic = topic.as_str(), client = client_id, len = text.len(), "client frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(topic = topic.as_str(), client = client_id, error = %e, "socket error");
                        break;
                    }
                }
            }
        }
    }

    state.manager.disconnect(topic, client_id);
    send_task.abort();
    info!(topic = topic.as_str(), client = client_id, "connection closed");
}
