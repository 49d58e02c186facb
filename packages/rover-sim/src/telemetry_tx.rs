//! telemetry_tx.rs — TS client: streams rover state to the mothership
//!
//! Maintains a single TCP connection. HELLO is sent once at startup; every
//! tick afterwards advances the simulation and sends one INFO frame. A
//! failed write drops the connection and the next tick reconnects after a
//! short backoff. All frame writes go through this one task, so frame
//! bytes are never interleaved on the stream.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use rover_proto::rover::RoverState;
use rover_proto::ts::{self, FrameType};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

struct TelemetryClient {
    addr: String,
    stream: Option<TcpStream>,
}

impl TelemetryClient {
    fn new(addr: String) -> Self {
        Self { addr, stream: None }
    }

    /// Connect if disconnected. Returns false if the stop flag fired while
    /// backing off.
    async fn ensure_connected(&mut self, stop: &watch::Receiver<bool>) -> bool {
        while self.stream.is_none() {
            if *stop.borrow() {
                return false;
            }
            match TcpStream::connect(&self.addr).await {
                Ok(stream) => {
                    info!("telemetry link up → {}", self.addr);
                    self.stream = Some(stream);
                }
                Err(e) => {
                    warn!("telemetry connect to {} failed: {e}", self.addr);
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
        true
    }

    /// Write one frame; on failure the connection is dropped so the next
    /// call reconnects.
    async fn send(&mut self, frame: &Bytes) {
        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.write_all(frame).await {
                warn!("telemetry write failed: {e} — reconnecting");
                self.stream = None;
            }
        }
    }
}

/// Telemetry loop: step the simulation and report, once per tick.
pub async fn run(
    rover: Arc<Mutex<RoverState>>,
    addr: String,
    tick: Duration,
    stop: watch::Receiver<bool>,
) {
    let mut client = TelemetryClient::new(addr);
    let freq = {
        let r = rover.lock().await;
        r.report_hz
    };

    // HELLO once at startup; not repeated on reconnect.
    if !client.ensure_connected(&stop).await {
        return;
    }
    let hello = {
        let r = rover.lock().await;
        ts::encode_frame(FrameType::Hello, &r, freq)
    };
    client.send(&hello).await;

    let mut ticker = tokio::time::interval(tick);
    loop {
        ticker.tick().await;
        if *stop.borrow() {
            break;
        }

        let frame = {
            let mut r = rover.lock().await;
            r.step();
            ts::encode_frame(FrameType::Info, &r, freq)
        };

        if !client.ensure_connected(&stop).await {
            break;
        }
        client.send(&frame).await;
        debug!("sent INFO frame ({} bytes)", frame.len());
    }

    // Best-effort goodbye so the mothership logs a clean disconnect.
    let fin = {
        let r = rover.lock().await;
        ts::encode_frame(FrameType::Fin, &r, freq)
    };
    client.send(&fin).await;
}
