//! telemetry_server.rs — TS stream receiver
//!
//! Accepts one TCP connection per rover and reads length-prefixed TS
//! frames: exactly 16 header bytes, then exactly `payload_len` payload
//! bytes. Framing is trusted only as far as the declared lengths and CRC
//! check out; any decode failure drops the connection — there is no
//! resynchronization on a byte stream.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use rover_proto::ts::{self, FrameType, HEADER_LEN};

use crate::fleet::SharedFleet;

/// Per-read timeout so the stop flag is honored within a second.
const READ_TIMEOUT: Duration = Duration::from_secs(1);
/// Upper bound on a declared payload; anything bigger is a framing error.
const MAX_PAYLOAD: u32 = 1024;

/// Accept loop. One reader task per connection.
pub async fn run(fleet: SharedFleet, listener: TcpListener, mut stop: watch::Receiver<bool>) {
    match listener.local_addr() {
        Ok(addr) => info!("📡 Telemetry listening on tcp {addr}"),
        Err(_) => info!("📡 Telemetry listener running"),
    }

    loop {
        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("telemetry connection from {addr}");
                    tokio::spawn(serve_connection(fleet.clone(), stream, addr, stop.clone()));
                }
                Err(e) => warn!("telemetry accept failed: {e}"),
            }
        }
    }
    debug!("telemetry listener stopped");
}

/// Read frames until EOF, decode failure, or shutdown.
async fn serve_connection(
    fleet: SharedFleet,
    mut stream: TcpStream,
    addr: SocketAddr,
    stop: watch::Receiver<bool>,
) {
    let mut buf = BytesMut::with_capacity(256);

    loop {
        match fill(&mut stream, &mut buf, HEADER_LEN, &stop).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                debug!("telemetry read from {addr} failed: {e}");
                break;
            }
        }
        let header_bytes = buf.split_to(HEADER_LEN);
        let header = match ts::decode_header(&header_bytes) {
            Ok(h) => h,
            Err(e) => {
                warn!("bad TS header from {addr}: {e} — closing");
                break;
            }
        };
        if header.payload_len > MAX_PAYLOAD {
            warn!(
                "TS header from {addr} declares {} payload bytes — closing",
                header.payload_len
            );
            break;
        }

        match fill(&mut stream, &mut buf, header.payload_len as usize, &stop).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                debug!("telemetry read from {addr} failed: {e}");
                break;
            }
        }
        let payload = buf.split_to(header.payload_len as usize);

        let frame = match ts::decode_frame(header, &payload) {
            Ok(f) => f,
            Err(e) => {
                warn!("bad TS frame from {addr}: {e} — closing");
                break;
            }
        };

        match frame.header.kind() {
            Some(FrameType::Hello) => {
                info!("Rover {} joined ({addr})", frame.header.rover_id);
            }
            Some(FrameType::Info) => {
                if let Some(payload) = frame.payload.as_ref() {
                    fleet.apply_report(&frame.header, payload).await;
                }
            }
            Some(FrameType::End | FrameType::Fin) => {
                info!("Rover {} signed off ({addr})", frame.header.rover_id);
                break;
            }
            None => {
                debug!(
                    "unknown TS frame type {} from rover {} ({addr})",
                    frame.header.frame_type, frame.header.rover_id
                );
            }
        }
    }

    info!("telemetry connection {addr} closed");
}

/// Accumulate at least `n` bytes into `buf`. Individual reads are bounded
/// by [`READ_TIMEOUT`] so shutdown stays prompt; a timeout just re-checks
/// the stop flag. Returns Ok(false) on EOF or stop.
async fn fill(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    n: usize,
    stop: &watch::Receiver<bool>,
) -> std::io::Result<bool> {
    while buf.len() < n {
        if *stop.borrow() {
            return Ok(false);
        }
        match timeout(READ_TIMEOUT, stream.read_buf(buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => return Ok(false),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e),
        }
    }
    Ok(true)
}
