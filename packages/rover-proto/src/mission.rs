//! Mission descriptors.
//!
//! A mission is a unit of work at a target coordinate: drive inside
//! `radius` of `(x, y)` and stay on target for `duration_s` seconds.
//! `mission_id` classifies the kind of work; `task_number` uniquely
//! identifies this instance within the dispatcher's namespace. The two are
//! deliberately separate — retransmitted assignments must compare equal on
//! the instance, not just the kind.

use serde::{Deserialize, Serialize};

/// One mission assignment. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MissionSpec {
    /// Work kind, 1..=6. 0 is reserved for "no mission".
    pub mission_id: u8,
    /// Unique instance id within the dispatcher.
    pub task_number: u16,
    /// Target coordinate (world frame, meters).
    pub x: f32,
    pub y: f32,
    /// Arrival tolerance around the target, meters. 0 means exact match.
    pub radius: f32,
    /// Seconds of on-target work required for completion.
    pub duration_s: f32,
}

impl MissionSpec {
    /// Human-readable name of the work kind, for logs only.
    pub fn kind_name(&self) -> &'static str {
        kind_name(self.mission_id)
    }
}

/// Work-kind table. Unknown ids map to a placeholder rather than an error;
/// the wire carries the raw id either way.
pub fn kind_name(mission_id: u8) -> &'static str {
    match mission_id {
        0 => "none",
        1 => "photo survey",
        2 => "soil sample",
        3 => "audio capture",
        4 => "subsurface mapping",
        5 => "time-lapse",
        6 => "atmosphere analysis",
        _ => "unknown",
    }
}
