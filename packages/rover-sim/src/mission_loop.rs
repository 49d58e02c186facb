//! mission_loop.rs — MissionLink agent
//!
//! The rover side of the mission protocol, one long-lived UDP task:
//!
//!   1. READY: ask for work; retransmit (RETX, same seq) until a reply
//!   2. NOMISSION → ack, back off 2 s, ask again
//!   3. MISSION → ack, retarget the rover, enter the progress phase
//!   4. PROGRESS every 300 ms (reliable), until within `radius` of the
//!      target or the work hits 100%
//!   5. DONE (reliable), reset, back to READY
//!
//! Reliability: `send_reliable` waits 500 ms for a matching ACK and
//! retransmits the identical bytes with the RETX flag; after 5 unanswered
//! sends the current phase is abandoned and the loop falls back to READY.
//! Losing the mothership never crashes the agent.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use rover_proto::mission::MissionSpec;
use rover_proto::ml::{
    self, DoneReport, MlHeader, MlType, ProgressReport, FLAG_ACK_ONLY, FLAG_NEEDS_ACK,
    MAX_DATAGRAM,
};
use rover_proto::rover::RoverState;

const RECV_TIMEOUT: Duration = Duration::from_millis(500);
const READY_RETRY_DELAY: Duration = Duration::from_secs(1);
const NO_MISSION_BACKOFF: Duration = Duration::from_secs(2);
const PROGRESS_PERIOD: Duration = Duration::from_millis(300);
const MAX_RETRIES: u32 = 5;

struct MissionAgent {
    socket: UdpSocket,
    peer: String,
    stream_id: u16,
    next_seq: u32,
    rover: Arc<Mutex<RoverState>>,
    stop: watch::Receiver<bool>,
    buf: Vec<u8>,
}

/// Agent entry point, spawned once per rover process.
pub async fn run(
    rover: Arc<Mutex<RoverState>>,
    peer: String,
    stream_id: u16,
    stop: watch::Receiver<bool>,
) {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(s) => s,
        Err(e) => {
            warn!("MissionLink: could not bind UDP socket: {e}");
            return;
        }
    };

    let mut agent = MissionAgent {
        socket,
        peer,
        stream_id,
        next_seq: 1,
        rover,
        stop,
        buf: vec![0u8; MAX_DATAGRAM],
    };

    info!("📡 MissionLink agent up (rover {stream_id}) → {}", agent.peer);

    while !*agent.stop.borrow() {
        let Some((header, payload)) = agent.request_mission().await else {
            break;
        };

        match header.kind() {
            Some(MlType::NoMission) => {
                agent.send_ack(header.seq).await;
                debug!("rover {stream_id}: no mission available, backing off");
                if agent.sleep_or_stop(NO_MISSION_BACKOFF).await {
                    break;
                }
            }
            Some(MlType::Mission) => {
                let mission = match ml::decode_mission(&payload) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("rover {stream_id}: undecodable MISSION payload: {e}");
                        continue;
                    }
                };
                info!(
                    "rover {stream_id}: assigned {} (task {}) at ({:.1}, {:.1}) r={:.1} d={:.0}s",
                    mission.kind_name(),
                    mission.task_number,
                    mission.x,
                    mission.y,
                    mission.radius,
                    mission.duration_s,
                );
                {
                    let mut r = agent.rover.lock().await;
                    r.assign_mission(&mission);
                }
                agent.send_ack(header.seq).await;
                agent.execute(&mission).await;
            }
            _ => {}
        }
    }

    debug!("MissionLink agent for rover {stream_id} stopped");
}

impl MissionAgent {
    fn fresh_seq(&mut self) -> u32 {
        let s = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        s
    }

    /// READY phase. Returns the MISSION or NOMISSION reply, or None when
    /// stopping. Timeouts retransmit the *same* READY (same seq, RETX set)
    /// so the dispatcher's pending-reply cache recognizes the retry.
    async fn request_mission(&mut self) -> Option<(MlHeader, Bytes)> {
        let seq = self.fresh_seq();
        let mut msg = ml::build_message(MlType::Ready, seq, 0, self.stream_id, FLAG_NEEDS_ACK, &[]);

        loop {
            if *self.stop.borrow() {
                return None;
            }
            if let Err(e) = self.socket.send_to(&msg, &self.peer).await {
                warn!("READY send failed: {e}");
                if self.sleep_or_stop(READY_RETRY_DELAY).await {
                    return None;
                }
                continue;
            }
            debug!("→ READY (seq={seq})");

            match self.recv_reply().await {
                Some((header, payload))
                    if matches!(header.kind(), Some(MlType::Mission | MlType::NoMission)) =>
                {
                    return Some((header, payload));
                }
                Some(_) => {
                    // Stray datagram (late ACK etc) — ask again immediately.
                }
                None => {
                    debug!("rover {}: no reply to READY, retrying", self.stream_id);
                    if self.sleep_or_stop(READY_RETRY_DELAY).await {
                        return None;
                    }
                    if let Ok(retx) = ml::set_retx(&msg) {
                        msg = retx;
                    }
                }
            }
        }
    }

    /// Mission execution: periodic PROGRESS until the rover is on target
    /// or the work is complete, then DONE. Both use the reliable path.
    async fn execute(&mut self, mission: &MissionSpec) {
        let mut ticker = tokio::time::interval(PROGRESS_PERIOD);
        loop {
            ticker.tick().await;
            if *self.stop.borrow() {
                return;
            }

            let (report, dist, pct) = {
                let r = self.rover.lock().await;
                let report = ProgressReport {
                    mission_id: mission.mission_id,
                    status: 0,
                    percent: r.progress_pct,
                    battery: r.battery_pct as u8,
                    x: r.position[0],
                    y: r.position[1],
                };
                (report, r.distance_to(mission.x, mission.y), r.progress_pct)
            };

            let seq = self.fresh_seq();
            let msg = ml::build_message(
                MlType::Progress,
                seq,
                0,
                self.stream_id,
                FLAG_NEEDS_ACK,
                &ml::encode_progress(&report),
            );
            if !self.send_reliable(msg, seq).await {
                warn!(
                    "rover {}: PROGRESS unacknowledged after {MAX_RETRIES} sends — abandoning task {}",
                    self.stream_id, mission.task_number
                );
                self.rover.lock().await.clear_mission();
                return;
            }
            debug!("rover {}: PROGRESS {}% acked", self.stream_id, report.percent);

            if dist <= mission.radius || pct >= 100 {
                break;
            }
        }

        let seq = self.fresh_seq();
        let done = DoneReport {
            mission_id: mission.mission_id,
            result_code: 0,
        };
        let msg = ml::build_message(
            MlType::Done,
            seq,
            0,
            self.stream_id,
            FLAG_NEEDS_ACK,
            &ml::encode_done(&done),
        );
        if !self.send_reliable(msg, seq).await {
            warn!(
                "rover {}: DONE unacknowledged after {MAX_RETRIES} sends",
                self.stream_id
            );
        }

        self.rover.lock().await.clear_mission();
        info!(
            "rover {}: task {} finished, returning to READY",
            self.stream_id, mission.task_number
        );
    }

    /// Send and wait for an ACK carrying `ack == seq`. Every timeout
    /// retransmits the identical message with RETX set; after
    /// [`MAX_RETRIES`] unanswered sends, gives up.
    async fn send_reliable(&mut self, msg: Bytes, seq: u32) -> bool {
        let mut msg = msg;
        for attempt in 0..MAX_RETRIES {
            if *self.stop.borrow() {
                return false;
            }
            if let Err(e) = self.socket.send_to(&msg, &self.peer).await {
                warn!("MissionLink send failed: {e}");
            }

            loop {
                match self.recv_reply().await {
                    Some((header, _))
                        if header.kind() == Some(MlType::Ack) && header.ack == seq =>
                    {
                        return true;
                    }
                    // Unrelated datagram — keep waiting for our ACK.
                    Some(_) => continue,
                    None => break,
                }
            }

            if attempt + 1 < MAX_RETRIES {
                if let Ok(retx) = ml::set_retx(&msg) {
                    msg = retx;
                }
            }
        }
        false
    }

    /// One bounded receive. None on timeout or undecodable datagram.
    async fn recv_reply(&mut self) -> Option<(MlHeader, Bytes)> {
        match timeout(RECV_TIMEOUT, self.socket.recv_from(&mut self.buf)).await {
            Ok(Ok((len, _))) => match ml::parse_message(&self.buf[..len]) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!("rover {}: invalid MissionLink datagram: {e}", self.stream_id);
                    None
                }
            },
            Ok(Err(e)) => {
                warn!("rover {}: recv error: {e}", self.stream_id);
                None
            }
            Err(_) => None,
        }
    }

    async fn send_ack(&mut self, ack: u32) {
        let seq = self.fresh_seq();
        let msg = ml::build_message(MlType::Ack, seq, ack, self.stream_id, FLAG_ACK_ONLY, &[]);
        if let Err(e) = self.socket.send_to(&msg, &self.peer).await {
            warn!("ACK send failed: {e}");
        }
    }

    /// Sleep, returning early (true) if the stop flag fires.
    async fn sleep_or_stop(&mut self, d: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(d) => false,
            _ = self.stop.changed() => *self.stop.borrow(),
        }
    }
}
