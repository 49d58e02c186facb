//! dispatcher.rs — MissionLink dispatcher
//!
//! One UDP socket serves every rover; datagrams are demultiplexed by the
//! `stream_id` header field (== rover id). The dispatcher owns all mission
//! protocol state. The only cross-task surface is the manual-mission map,
//! which the operator channel appends to behind its own lock.
//!
//! Reliability rules, in order of importance:
//! - **Idempotent replies.** The last MISSION/NOMISSION sent to a rover is
//!   cached as raw bytes until acknowledged; a re-received READY gets the
//!   identical bytes back, so a rover can never observe two different
//!   assignments for one request.
//! - **ACK-driven consumption.** A queued mission is only popped when its
//!   assignment ACK arrives. Lost replies therefore never leak work.
//! - **Duplicate suppression.** PROGRESS/DONE with `seq` at or below the
//!   highest seen for that rover are acknowledged but change nothing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use rover_proto::ml::{
    self, MlHeader, MlType, ProgressReport, FLAG_ACK_ONLY, FLAG_NEEDS_ACK, MAX_DATAGRAM,
};
use rover_proto::MissionSpec;

use crate::fleet::SharedFleet;
use crate::missions::{self, Scenario};

/// Operator-injected mission queues, keyed by rover id. Manual missions
/// always outrank the automatic queue.
pub type ManualQueues = Arc<Mutex<HashMap<u16, VecDeque<MissionSpec>>>>;

/// Per-rover mission tracking. Created on first READY, never removed;
/// `done` is the only terminal marker.
#[derive(Debug, Default)]
pub struct MissionRecord {
    pub current: Option<MissionSpec>,
    pub last_progress: Option<ProgressReport>,
    pub done: bool,
}

/// The un-acknowledged last reply to a rover. `reply_bytes` are the exact
/// bytes originally sent — replayed verbatim, never rebuilt, so retransmits
/// are bit-identical.
struct PendingReply {
    mission_seq: Option<u32>,
    reply_bytes: Bytes,
    mission: Option<MissionSpec>,
}

pub struct Dispatcher {
    scenario: Scenario,
    auto_queue: VecDeque<MissionSpec>,
    manual: ManualQueues,
    records: HashMap<u16, MissionRecord>,
    pending: HashMap<u16, PendingReply>,
    last_seq_seen: HashMap<u16, u32>,
    next_seq: u32,
    task_counter: u16,
    fleet: SharedFleet,
}

impl Dispatcher {
    pub fn new(scenario: Scenario, fleet: SharedFleet, manual: ManualQueues) -> Self {
        Self {
            scenario,
            auto_queue: missions::seed_queue(scenario),
            manual,
            records: HashMap::new(),
            pending: HashMap::new(),
            last_seq_seen: HashMap::new(),
            next_seq: 1,
            task_counter: 0,
            fleet,
        }
    }

    fn fresh_seq(&mut self) -> u32 {
        let s = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        s
    }

    /// Bare acknowledgement for `header.seq`.
    fn ack_for(&mut self, header: &MlHeader) -> Bytes {
        let seq = self.fresh_seq();
        ml::build_message(MlType::Ack, seq, header.seq, header.stream_id, FLAG_ACK_ONLY, &[])
    }

    /// `seq` at or below the rover's highest seen is a duplicate.
    fn is_duplicate(&self, stream_id: u16, seq: u32) -> bool {
        self.last_seq_seen
            .get(&stream_id)
            .is_some_and(|&last| seq <= last)
    }

    /// Process one datagram; the returned bytes (if any) go back to the
    /// sender. Malformed datagrams are dropped with a log line and no
    /// reply — the sender's retry logic owns recovery.
    pub async fn handle_datagram(&mut self, data: &[u8]) -> Option<Bytes> {
        let (header, payload) = match ml::parse_message(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("dropping invalid MissionLink datagram: {e}");
                return None;
            }
        };

        match header.kind() {
            Some(MlType::Ready) => self.handle_ready(&header).await,
            Some(MlType::Progress) => self.handle_progress(&header, &payload).await,
            Some(MlType::Done) => self.handle_done(&header, &payload).await,
            Some(MlType::Ack) => {
                self.handle_ack(&header).await;
                None
            }
            Some(other) => {
                debug!("ignoring unexpected {other:?} from rover {}", header.stream_id);
                None
            }
            None => {
                warn!(
                    "unknown MissionLink type {} from rover {}",
                    header.msg_type, header.stream_id
                );
                None
            }
        }
    }

    async fn handle_ready(&mut self, header: &MlHeader) -> Option<Bytes> {
        let sid = header.stream_id;
        debug!("READY from rover {sid} (seq={})", header.seq);

        // Idempotence: a rover that retries READY gets the identical reply
        // until it acknowledges the previous one.
        if let Some(pending) = self.pending.get(&sid) {
            debug!("rover {sid} has an unacknowledged reply — replaying");
            return Some(pending.reply_bytes.clone());
        }

        // Selection: manual queue first, then the scenario's source.
        // Either way the queue is only peeked; consumption happens on ACK.
        let mut mission = {
            let manual = self.manual.lock().await;
            manual.get(&sid).and_then(|q| q.front().copied())
        };
        if let Some(m) = mission {
            info!("rover {sid}: offering manual mission (task {})", m.task_number);
        } else {
            mission = match self.scenario {
                Scenario::OnDemand => Some(missions::generate(self.task_counter + 1)),
                _ => self.auto_queue.front().copied(),
            };
            if let Some(m) = mission {
                info!(
                    "rover {sid}: offering automatic mission (task {}, scenario {})",
                    m.task_number,
                    self.scenario.number()
                );
            }
        }

        let Some(mission) = mission else {
            let seq = self.fresh_seq();
            let msg =
                ml::build_message(MlType::NoMission, seq, header.seq, sid, FLAG_NEEDS_ACK, &[]);
            self.pending.insert(
                sid,
                PendingReply {
                    mission_seq: None,
                    reply_bytes: msg.clone(),
                    mission: None,
                },
            );
            debug!("rover {sid}: no mission available → NOMISSION");
            return Some(msg);
        };

        // Track the assignment *before* replying, so PROGRESS is accepted
        // even if the rover's assignment ACK is lost in transit.
        let record = self.records.entry(sid).or_default();
        record.current = Some(mission);
        record.last_progress = None;
        record.done = false;
        self.fleet.set_assigned_mission(sid, mission.mission_id).await;

        let seq = self.fresh_seq();
        let msg = ml::build_message(
            MlType::Mission,
            seq,
            header.seq,
            sid,
            FLAG_NEEDS_ACK,
            &ml::encode_mission(&mission),
        );
        self.pending.insert(
            sid,
            PendingReply {
                mission_seq: Some(seq),
                reply_bytes: msg.clone(),
                mission: Some(mission),
            },
        );
        info!(
            "→ MISSION {} (task {}) to rover {sid} (seq={seq})",
            mission.kind_name(),
            mission.task_number
        );
        Some(msg)
    }

    async fn handle_progress(&mut self, header: &MlHeader, payload: &[u8]) -> Option<Bytes> {
        let sid = header.stream_id;
        let report = match ml::decode_progress(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!("invalid PROGRESS from rover {sid}: {e}");
                return None;
            }
        };

        let active = self
            .records
            .get(&sid)
            .and_then(|r| r.current.as_ref())
            .map(|m| m.mission_id);
        if active != Some(report.mission_id) {
            // Out of context: acknowledge so the rover stops retrying, but
            // change nothing.
            warn!(
                "PROGRESS for mission {} from rover {sid}, but active is {active:?}",
                report.mission_id
            );
            return Some(self.ack_for(header));
        }

        if self.is_duplicate(sid, header.seq) {
            debug!("duplicate PROGRESS from rover {sid} (seq={})", header.seq);
            return Some(self.ack_for(header));
        }

        self.last_seq_seen.insert(sid, header.seq);
        if let Some(record) = self.records.get_mut(&sid) {
            record.last_progress = Some(report);
        }
        debug!(
            "PROGRESS rover {sid}: {}% battery={} at ({:.1}, {:.1})",
            report.percent, report.battery, report.x, report.y
        );
        Some(self.ack_for(header))
    }

    async fn handle_done(&mut self, header: &MlHeader, payload: &[u8]) -> Option<Bytes> {
        let sid = header.stream_id;
        let report = match ml::decode_done(payload) {
            Ok(r) => r,
            Err(e) => {
                warn!("invalid DONE from rover {sid}: {e}");
                return None;
            }
        };

        let active = self
            .records
            .get(&sid)
            .and_then(|r| r.current.as_ref())
            .map(|m| m.mission_id);
        if active != Some(report.mission_id) {
            warn!(
                "DONE for mission {} from rover {sid}, but active is {active:?}",
                report.mission_id
            );
            return Some(self.ack_for(header));
        }

        let already_done = self.records.get(&sid).map(|r| r.done).unwrap_or(false);
        if already_done || self.is_duplicate(sid, header.seq) {
            debug!("duplicate DONE from rover {sid} (seq={})", header.seq);
            return Some(self.ack_for(header));
        }

        self.last_seq_seen.insert(sid, header.seq);
        if let Some(record) = self.records.get_mut(&sid) {
            record.done = true;
        }
        info!(
            "rover {sid} completed mission {} (result={})",
            report.mission_id, report.result_code
        );
        self.fleet.clear_mission(sid).await;
        Some(self.ack_for(header))
    }

    async fn handle_ack(&mut self, header: &MlHeader) {
        let sid = header.stream_id;
        debug!("ACK from rover {sid} (ack={})", header.ack);

        let Some(pending) = self.pending.get(&sid) else {
            return;
        };

        match pending.mission_seq {
            Some(mission_seq) if header.ack == mission_seq => {
                let mission = pending.mission;
                self.pending.remove(&sid);
                self.consume_acknowledged(sid, mission).await;
            }
            // A NOMISSION reply has no mission sequence to match; any ACK
            // from the rover clears it.
            None => {
                self.pending.remove(&sid);
            }
            _ => {}
        }
    }

    /// The rover has confirmed an assignment: consume its queue entry,
    /// exactly once. Manual queues outrank scenario bookkeeping.
    async fn consume_acknowledged(&mut self, sid: u16, mission: Option<MissionSpec>) {
        {
            let mut manual = self.manual.lock().await;
            if let Some(queue) = manual.get_mut(&sid) {
                if queue.front() == mission.as_ref() {
                    queue.pop_front();
                    if queue.is_empty() {
                        manual.remove(&sid);
                    }
                    info!("rover {sid}: manual mission confirmed and consumed");
                    return;
                }
            }
        }

        match self.scenario {
            Scenario::TwoRandom | Scenario::FixedFour => {
                if self.auto_queue.front() == mission.as_ref() {
                    self.auto_queue.pop_front();
                    debug!(
                        "rover {sid}: automatic mission consumed, {} left",
                        self.auto_queue.len()
                    );
                }
            }
            Scenario::OnDemand => {
                self.task_counter += 1;
            }
            Scenario::OneLong => {}
        }
    }

    // ── Introspection (operator diagnostics + tests) ─────────────────────────

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn auto_remaining(&self) -> usize {
        self.auto_queue.len()
    }

    pub fn task_counter(&self) -> u16 {
        self.task_counter
    }

    pub fn record(&self, stream_id: u16) -> Option<&MissionRecord> {
        self.records.get(&stream_id)
    }

    pub fn last_seq_seen(&self, stream_id: u16) -> Option<u32> {
        self.last_seq_seen.get(&stream_id).copied()
    }
}

/// UDP receive loop. Single socket, all rovers; never exits on a bad
/// datagram, only on the stop signal.
pub async fn run(mut dispatcher: Dispatcher, socket: UdpSocket, mut stop: watch::Receiver<bool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    match socket.local_addr() {
        Ok(addr) => info!("🛸 MissionLink dispatcher on udp {addr}"),
        Err(_) => info!("🛸 MissionLink dispatcher running"),
    }

    loop {
        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
            recv = socket.recv_from(&mut buf) => match recv {
                Ok((len, addr)) => {
                    if let Some(reply) = dispatcher.handle_datagram(&buf[..len]).await {
                        if let Err(e) = socket.send_to(&reply, addr).await {
                            warn!("MissionLink send to {addr} failed: {e}");
                        }
                    }
                }
                Err(e) => warn!("MissionLink recv error: {e}"),
            }
        }
    }
    debug!("MissionLink dispatcher stopped");
}
