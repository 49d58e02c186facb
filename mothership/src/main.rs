//! main.rs — mothership entry point
//!
//! Binds three sockets and spawns one task per surface:
//!   - TCP telemetry listener (TS frames from rovers)
//!   - UDP MissionLink dispatcher (mission assignment protocol)
//!   - snapshot pusher + ground-control WebSocket (axum)
//!
//! All sockets are bound before anything is spawned; a bind failure exits
//! non-zero immediately. A watch channel carries the stop flag; ctrl-c
//! flips it and every loop drains within about a second.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::info;

use mothership::dispatcher::{self, Dispatcher, ManualQueues};
use mothership::fleet::Fleet;
use mothership::missions::Scenario;
use mothership::operator::{self, OperatorState};
use mothership::telemetry_server;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "mothership",
    about = "Fleet coordinator: telemetry, MissionLink, ground control"
)]
struct Args {
    /// Listen address for all services
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// TCP telemetry port
    #[arg(long, default_value_t = 6000)]
    port: u16,
    /// Mission scenario
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=4))]
    scenario: u8,
    /// Number of rover mirror records
    #[arg(long, default_value_t = 3)]
    rovers: u16,
    /// UDP MissionLink port (falls back to ML_PORT, then 50000)
    #[arg(long)]
    ml_port: Option<u16>,
    /// Ground-control WebSocket port (falls back to WS_PORT, then 2900)
    #[arg(long)]
    ws_port: Option<u16>,
}

fn env_port(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mothership=info".into()),
        )
        .init();

    let args = Args::parse();
    let scenario =
        Scenario::from_number(args.scenario).context("scenario must be between 1 and 4")?;
    let ml_port = args.ml_port.unwrap_or_else(|| env_port("ML_PORT", 50000));
    let ws_port = args.ws_port.unwrap_or_else(|| env_port("WS_PORT", 2900));

    info!(
        "🚀 Mothership v{} starting — scenario {}, {} rover(s)",
        env!("CARGO_PKG_VERSION"),
        scenario.number(),
        args.rovers
    );

    // Bind everything up front; any failure is fatal and exits non-zero.
    let telemetry_listener = TcpListener::bind(format!("{}:{}", args.host, args.port))
        .await
        .with_context(|| format!("binding telemetry tcp {}:{}", args.host, args.port))?;
    let ml_socket = UdpSocket::bind(format!("{}:{}", args.host, ml_port))
        .await
        .with_context(|| format!("binding MissionLink udp {}:{}", args.host, ml_port))?;
    let ws_listener = TcpListener::bind(format!("{}:{}", args.host, ws_port))
        .await
        .with_context(|| format!("binding ground-control tcp {}:{}", args.host, ws_port))?;

    let fleet = Arc::new(Fleet::new(args.rovers));
    let manual: ManualQueues = Arc::new(Mutex::new(HashMap::new()));
    let (updates_tx, _) = broadcast::channel(64);
    let (stop_tx, stop_rx) = watch::channel(false);

    let telemetry = tokio::spawn(telemetry_server::run(
        fleet.clone(),
        telemetry_listener,
        stop_rx.clone(),
    ));

    let disp = Dispatcher::new(scenario, fleet.clone(), manual.clone());
    let missions = tokio::spawn(dispatcher::run(disp, ml_socket, stop_rx.clone()));

    let pusher = tokio::spawn(operator::run_pusher(
        fleet.clone(),
        updates_tx.clone(),
        stop_rx.clone(),
    ));

    let op_state = OperatorState::new(fleet, manual, updates_tx);
    let app = operator::router(op_state);
    info!("🖥 Ground control at ws://{}:{}/ws", args.host, ws_port);
    let mut ws_stop = stop_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(ws_listener, app)
            .with_graceful_shutdown(async move {
                let _ = ws_stop.changed().await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("Mothership shutting down");
    let _ = stop_tx.send(true);

    // Bounded join: every loop polls the stop flag at least once a second.
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        let _ = telemetry.await;
        let _ = missions.await;
        let _ = pusher.await;
        let _ = server.await;
    })
    .await;

    info!("Mothership stopped");
    Ok(())
}
