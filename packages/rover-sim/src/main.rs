//! main.rs — rover process entry point
//!
//! Runs two concurrent loops over one shared rover state:
//!   1. Telemetry loop: advances the simulation every tick and streams
//!      TS frames to the mothership over TCP (HELLO once, then INFO)
//!   2. Mission loop: the MissionLink UDP agent — READY → MISSION →
//!      PROGRESS → DONE, with acknowledgements and retransmission
//!
//! The two loops share the rover record behind a single mutex; the mission
//! loop writes assignments into it, the telemetry loop drives the physics
//! and reports whatever is current. A watch channel distributes the stop
//! signal so ctrl-c shuts both loops down within a tick.

mod mission_loop;
mod telemetry_tx;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{watch, Mutex};
use tracing::info;

use rover_proto::RoverState;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rover-sim", about = "Autonomous rover: telemetry + MissionLink agent")]
struct Args {
    /// Unique rover id (doubles as the MissionLink stream id)
    #[arg(long)]
    id: u16,
    /// Mothership host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Mothership TCP telemetry port
    #[arg(long, default_value_t = 6000)]
    port: u16,
    /// Mothership UDP MissionLink port (falls back to ML_PORT, then 50000)
    #[arg(long)]
    ml_port: Option<u16>,
    /// Initial destination
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], default_values_t = [0.0, 0.0, 0.0])]
    dest: Vec<f32>,
    /// Initial velocity, m/s
    #[arg(long, default_value_t = 0.0)]
    vel: f32,
    /// Simulation tick, seconds
    #[arg(long, default_value_t = 1.0)]
    tick: f32,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rover_sim=info".into()),
        )
        .init();

    let args = Args::parse();
    let ml_port = args.ml_port.unwrap_or_else(|| {
        std::env::var("ML_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50000)
    });

    let tick_seconds = args.tick.max(0.05);
    let mut rover = RoverState::new(args.id, tick_seconds);
    rover.set_destination([args.dest[0], args.dest[1], args.dest[2]]);
    rover.set_velocity(args.vel);
    let tick = Duration::from_secs_f32(tick_seconds);

    info!(
        "🛰 Rover {} starting — mothership {}:{} (ML udp {}), dest=({:.1},{:.1},{:.1}) vel={} tick={}s",
        args.id, args.host, args.port, ml_port,
        args.dest[0], args.dest[1], args.dest[2], args.vel, args.tick
    );

    let rover = Arc::new(Mutex::new(rover));
    let (stop_tx, stop_rx) = watch::channel(false);

    let telemetry = tokio::spawn(telemetry_tx::run(
        rover.clone(),
        format!("{}:{}", args.host, args.port),
        tick,
        stop_rx.clone(),
    ));

    let missions = tokio::spawn(mission_loop::run(
        rover.clone(),
        format!("{}:{}", args.host, ml_port),
        args.id,
        stop_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("Rover {} shutting down", args.id);
    let _ = stop_tx.send(true);

    // Bounded join: the loops poll the stop flag at least once a second.
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        let _ = telemetry.await;
        let _ = missions.await;
    })
    .await;

    Ok(())
}
