//! fleet.rs — mothership-side mirror of every rover
//!
//! Each rover has exactly one mirror record, and each record is its own
//! lock domain: the TS readers write telemetry fields, the MissionLink
//! dispatcher writes assignment fields, and the snapshot pusher reads
//! whole records. Nothing holds two record locks at once.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use rover_proto::rover::{RoverSnapshot, RoverState};
use rover_proto::ts::{InfoPayload, TsHeader};

pub type SharedFleet = Arc<Fleet>;

pub struct Fleet {
    rovers: Vec<Mutex<RoverState>>,
}

impl Fleet {
    /// Build mirrors for rover ids 1..=count.
    pub fn new(count: u16) -> Self {
        let rovers = (1..=count).map(|id| Mutex::new(RoverState::new(id, 1.0))).collect();
        Self { rovers }
    }

    pub fn len(&self) -> usize {
        self.rovers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rovers.is_empty()
    }

    /// Look up a record by rover id (1-based). `None` for unknown ids.
    pub fn get(&self, rover_id: u16) -> Option<&Mutex<RoverState>> {
        if rover_id == 0 {
            return None;
        }
        self.rovers.get(rover_id as usize - 1)
    }

    /// Apply a received INFO frame to the matching mirror record.
    pub async fn apply_report(&self, header: &TsHeader, payload: &InfoPayload) {
        match self.get(header.rover_id as u16) {
            Some(record) => record.lock().await.apply_report(header, payload),
            None => warn!("telemetry for unknown rover id {}", header.rover_id),
        }
    }

    /// Record a dispatcher-side mission assignment on the mirror.
    pub async fn set_assigned_mission(&self, rover_id: u16, mission_id: u8) {
        if let Some(record) = self.get(rover_id) {
            let mut r = record.lock().await;
            if r.assigned_mission_id != mission_id {
                r.assigned_mission_id = mission_id;
                r.dirty = true;
            }
        }
    }

    /// Clear the mirror's mission fields after a confirmed DONE.
    pub async fn clear_mission(&self, rover_id: u16) {
        if let Some(record) = self.get(rover_id) {
            record.lock().await.clear_mission();
        }
    }

    /// One publication sweep: snapshot every dirty rover, then clear all
    /// dirty flags so the batch represents a single consistent pass.
    pub async fn collect_dirty(&self) -> Vec<RoverSnapshot> {
        let mut batch = Vec::new();
        for record in &self.rovers {
            let r = record.lock().await;
            if r.dirty {
                batch.push(r.snapshot());
            }
        }
        if !batch.is_empty() {
            for record in &self.rovers {
                record.lock().await.dirty = false;
            }
        }
        batch
    }
}
