//! operator.rs — snapshot pusher + ground-control WebSocket
//!
//! The operator sink is a WebSocket carrying UTF-8 JSON both ways:
//!   - outbound, once per second: `{"type":"rovers_update","data":[…]}`
//!     with a snapshot of every rover that changed since the last push
//!   - inbound: `{"type":"assign_mission",…}` enqueues a manual mission
//!     for one rover; manual missions outrank the automatic queue
//!
//! Push fan-out uses a broadcast channel so the pusher never blocks on a
//! slow sink; a sink that fails to accept a send is disconnected. While no
//! sink is connected, dirty flags are left set so the first connected
//! operator receives the accumulated state.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use rover_proto::MissionSpec;

use crate::dispatcher::ManualQueues;
use crate::fleet::SharedFleet;

/// Manual task numbers start above every automatic task number.
const MANUAL_TASK_BASE: u16 = 1000;

pub struct OperatorState {
    pub fleet: SharedFleet,
    pub manual: ManualQueues,
    pub updates: broadcast::Sender<String>,
    manual_task_counter: AtomicU16,
}

pub type SharedOperator = Arc<OperatorState>;

impl OperatorState {
    pub fn new(
        fleet: SharedFleet,
        manual: ManualQueues,
        updates: broadcast::Sender<String>,
    ) -> SharedOperator {
        Arc::new(Self {
            fleet,
            manual,
            updates,
            manual_task_counter: AtomicU16::new(MANUAL_TASK_BASE),
        })
    }
}

pub fn router(state: SharedOperator) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

async fn health(State(state): State<SharedOperator>) -> axum::Json<Value> {
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rovers": state.fleet.len(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedOperator>) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: SharedOperator) {
    info!("🖥 ground control connected");
    let mut updates = state.updates.subscribe();

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(msg) => {
                    if socket.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("operator sink lagged, {n} updates skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(raw))) => handle_command(&state, &raw).await,
                Some(Ok(_)) => {} // ping/pong/binary: nothing to do
                _ => break,
            },
        }
    }
    info!("ground control disconnected");
}

#[derive(Debug, serde::Deserialize)]
struct AssignMission {
    rover_id: u16,
    mission_id: u8,
    x: i32,
    y: i32,
    #[serde(default = "default_radius")]
    radius: f32,
    #[serde(default = "default_duration", rename = "duracao")]
    duration_s: u32,
}

fn default_radius() -> f32 {
    2.0
}

fn default_duration() -> u32 {
    60
}

/// Process one inbound operator message. Anything malformed or unknown is
/// logged and discarded; this path must never take the pusher down.
pub async fn handle_command(state: &OperatorState, raw: &str) {
    let v: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!("operator message is not JSON: {e}");
            return;
        }
    };

    match v["type"].as_str() {
        Some("assign_mission") => {
            let cmd: AssignMission = match serde_json::from_value(v) {
                Ok(c) => c,
                Err(e) => {
                    warn!("malformed assign_mission: {e}");
                    return;
                }
            };
            if !(1..=6).contains(&cmd.mission_id) {
                warn!("assign_mission with out-of-range mission_id {}", cmd.mission_id);
                return;
            }
            if state.fleet.get(cmd.rover_id).is_none() {
                warn!("assign_mission for unknown rover {}", cmd.rover_id);
                return;
            }

            let task_number = state.manual_task_counter.fetch_add(1, Ordering::Relaxed) + 1;
            let mission = MissionSpec {
                mission_id: cmd.mission_id,
                task_number,
                x: cmd.x as f32,
                y: cmd.y as f32,
                radius: cmd.radius,
                duration_s: cmd.duration_s as f32,
            };
            state
                .manual
                .lock()
                .await
                .entry(cmd.rover_id)
                .or_default()
                .push_back(mission);
            info!(
                "manual mission queued for rover {}: {} (task {}) at ({}, {})",
                cmd.rover_id,
                mission.kind_name(),
                task_number,
                cmd.x,
                cmd.y
            );
        }
        Some(other) => warn!("unknown operator message type: {other}"),
        None => warn!("operator message without a type field"),
    }
}

/// Once-per-second publication sweep of the fleet mirror.
pub async fn run_pusher(
    fleet: SharedFleet,
    updates: broadcast::Sender<String>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {}
        }

        // No sink connected: keep the dirty flags so the next operator to
        // connect gets the accumulated changes.
        if updates.receiver_count() == 0 {
            continue;
        }

        let batch = fleet.collect_dirty().await;
        if batch.is_empty() {
            continue;
        }

        let msg = json!({ "type": "rovers_update", "data": batch }).to_string();
        if updates.send(msg).is_ok() {
            debug!("pushed {} rover snapshot(s)", batch.len());
        }
    }
    debug!("snapshot pusher stopped");
}
