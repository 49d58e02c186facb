//! Rover state model.
//!
//! One `RoverState` exists per rover on *both* endpoints: the rover process
//! owns the authoritative copy and advances it with [`RoverState::step`];
//! the mothership keeps a mirror updated from telemetry frames with
//! [`RoverState::apply_report`]. The `dirty` flag marks "something
//! observable changed since the last published snapshot" and is cleared by
//! the snapshot pusher, never by the model itself.
//!
//! Invariants:
//! - `progress_pct` stays in 0..=100
//! - `progress_pct == 100` resets to Idle at the top of the next step
//! - `assigned_mission_id == 0` ⇔ `progress_pct == 0` and not Working

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::mission::MissionSpec;
use crate::ts::{InfoPayload, TsHeader};

/// Battery drain per movement tick, percent. A tunable, not protocol.
const BATTERY_DRAIN_PER_TICK: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoverStatus {
    Idle = 0,
    Working = 1,
    Moving = 2,
    Error = 3,
}

impl RoverStatus {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Working,
            2 => Self::Moving,
            3 => Self::Error,
            _ => Self::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoverState {
    /// Unique id, 1..N. Doubles as the MissionLink stream id.
    pub id: u16,
    pub position: [f32; 3],
    pub destination: [f32; 3],
    /// Commanded speed, m/s. Jittered ±1 per tick while moving.
    pub velocity: f32,
    /// Travel direction, degrees in 0..360.
    pub heading: f32,
    pub battery_pct: f32,
    pub status: RoverStatus,
    pub proc_use: u8,
    pub storage: u8,
    pub sensors: u8,
    /// Simulation step period, seconds.
    pub tick_seconds: f32,
    /// Telemetry report rate carried in TS headers, Hz.
    pub report_hz: u8,
    /// Current mission kind, 0 = none.
    pub assigned_mission_id: u8,
    pub progress_pct: u8,
    /// Ticks of on-target work accrued for the current mission.
    pub work_elapsed: u32,
    /// Work required for 100%, in seconds.
    pub duration_required: u32,
    pub dirty: bool,
}

impl RoverState {
    pub fn new(id: u16, tick_seconds: f32) -> Self {
        let report_hz = if tick_seconds > 0.0 {
            (1.0 / tick_seconds) as u8
        } else {
            0
        };
        Self {
            id,
            position: [0.0; 3],
            destination: [0.0; 3],
            velocity: 0.0,
            heading: 0.0,
            battery_pct: 100.0,
            status: RoverStatus::Idle,
            proc_use: 0,
            storage: 0,
            sensors: 0,
            tick_seconds,
            report_hz,
            assigned_mission_id: 0,
            progress_pct: 0,
            work_elapsed: 0,
            duration_required: 60,
            dirty: false,
        }
    }

    pub fn set_destination(&mut self, destination: [f32; 3]) {
        if self.destination != destination {
            self.destination = destination;
            self.dirty = true;
        }
    }

    pub fn set_velocity(&mut self, velocity: f32) {
        let velocity = velocity.max(0.0);
        if self.velocity != velocity {
            self.velocity = velocity;
            self.dirty = true;
        }
    }

    /// Accept a mission assignment: retarget to `(x, y)` at the current
    /// altitude and reset the work counters.
    pub fn assign_mission(&mut self, mission: &MissionSpec) {
        self.destination = [mission.x, mission.y, self.position[2]];
        self.assigned_mission_id = mission.mission_id;
        self.duration_required = (mission.duration_s as u32).max(1);
        self.progress_pct = 0;
        self.work_elapsed = 0;
        self.status = RoverStatus::Working;
        self.dirty = true;
    }

    /// Drop the current mission and return to Idle.
    pub fn clear_mission(&mut self) {
        self.assigned_mission_id = 0;
        self.progress_pct = 0;
        self.work_elapsed = 0;
        self.status = RoverStatus::Idle;
        self.dirty = true;
    }

    /// 2D distance from the current position to `(x, y)`.
    pub fn distance_to(&self, x: f32, y: f32) -> f32 {
        let dx = self.position[0] - x;
        let dy = self.position[1] - y;
        (dx * dx + dy * dy).sqrt()
    }

    fn set_status(&mut self, status: RoverStatus) {
        if self.status != status {
            self.status = status;
            self.dirty = true;
        }
    }

    /// Advance the simulation by one tick.
    ///
    /// At the destination, assigned work accrues one tick at a time until
    /// `progress_pct` hits 100; the reset to Idle happens at the top of the
    /// *following* tick so a 100% report is observable on the wire. Away
    /// from the destination the rover moves a clamped straight-line step
    /// and its instrumentation jitters.
    pub fn step(&mut self) {
        if self.position == self.destination {
            if self.progress_pct == 100 {
                self.clear_mission();
            }
            if self.assigned_mission_id != 0 {
                self.set_status(RoverStatus::Working);
                self.work_elapsed += 1;
                let pct = (self.work_elapsed as u64 * 100 / self.duration_required.max(1) as u64)
                    .min(100) as u8;
                if pct != self.progress_pct {
                    self.progress_pct = pct;
                    self.dirty = true;
                }
            } else if self.status == RoverStatus::Moving {
                // Arrived with nothing to do.
                self.set_status(RoverStatus::Idle);
            }
            return;
        }

        self.advance();
        self.set_status(RoverStatus::Moving);
    }

    fn advance(&mut self) {
        let dx = self.destination[0] - self.position[0];
        let dy = self.destination[1] - self.position[1];
        let dz = self.destination[2] - self.position[2];
        let dist = (dx * dx + dy * dy + dz * dz).sqrt();
        let step = self.velocity * self.tick_seconds;

        if dist > 0.0 && step >= dist {
            self.position = self.destination;
        } else if dist > 0.0 {
            let ratio = step / dist;
            self.position[0] += dx * ratio;
            self.position[1] += dy * ratio;
            self.position[2] += dz * ratio;
        }

        let mut heading = dy.atan2(dx).to_degrees();
        if heading < 0.0 {
            heading += 360.0;
        }
        self.heading = heading;
        self.battery_pct = (self.battery_pct - BATTERY_DRAIN_PER_TICK).max(0.0);

        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(-1i32..=1) as f32;
        self.velocity = (self.velocity + jitter).max(0.0);

        // Instrumentation noise: processor load is uniform; storage drifts
        // upward while driving; sensor count reacts to the same draw.
        self.proc_use = rng.gen_range(1..=100);
        let draw: u8 = rng.gen_range(1..=100);
        self.storage = self.storage.saturating_add(draw / 7);
        if draw < 15 {
            self.sensors = self.sensors.saturating_add(1);
        } else if draw > 90 && self.sensors > 0 {
            self.sensors -= 1;
        }

        self.dirty = true;
    }

    /// Mirror update from a received telemetry frame. Compares field by
    /// field so `dirty` only flips on actual change, and leaves the
    /// mothership-owned `assigned_mission_id` untouched (the wire does not
    /// carry it).
    pub fn apply_report(&mut self, header: &TsHeader, payload: &InfoPayload) {
        let mut dirty = self.dirty;

        update(&mut self.position[0], header.pos_x as f32, &mut dirty);
        update(&mut self.position[1], header.pos_y as f32, &mut dirty);
        update(&mut self.position[2], header.pos_z as f32, &mut dirty);
        update(&mut self.battery_pct, header.battery as f32, &mut dirty);
        update(
            &mut self.status,
            RoverStatus::from_u8(header.state),
            &mut dirty,
        );
        update(&mut self.report_hz, header.freq, &mut dirty);

        update(&mut self.destination[0], payload.dest_x as f32, &mut dirty);
        update(&mut self.destination[1], payload.dest_y as f32, &mut dirty);
        update(&mut self.destination[2], payload.dest_z as f32, &mut dirty);
        update(&mut self.velocity, payload.velocity as f32, &mut dirty);
        update(&mut self.heading, payload.heading as f32, &mut dirty);
        update(&mut self.proc_use, payload.proc_use, &mut dirty);
        update(&mut self.storage, payload.storage, &mut dirty);
        update(&mut self.sensors, payload.sensors, &mut dirty);
        update(&mut self.progress_pct, payload.progress, &mut dirty);

        self.dirty = dirty;
    }

    pub fn snapshot(&self) -> RoverSnapshot {
        RoverSnapshot {
            id: self.id,
            pos: self.position,
            dest: self.destination,
            velocity: self.velocity,
            heading: self.heading,
            battery: self.battery_pct,
            state: self.status as u8,
            proc_use: self.proc_use,
            storage: self.storage,
            sensors: self.sensors,
            freq: self.report_hz,
            mission: self.assigned_mission_id,
            progress: self.progress_pct,
        }
    }
}

fn update<T: PartialEq>(field: &mut T, value: T, dirty: &mut bool) {
    if *field != value {
        *field = value;
        *dirty = true;
    }
}

/// JSON shape pushed to the operator channel, one per dirty rover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoverSnapshot {
    pub id: u16,
    pub pos: [f32; 3],
    pub dest: [f32; 3],
    pub velocity: f32,
    pub heading: f32,
    pub battery: f32,
    pub state: u8,
    pub proc_use: u8,
    pub storage: u8,
    pub sensors: u8,
    pub freq: u8,
    pub mission: u8,
    pub progress: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mission(duration_s: f32) -> MissionSpec {
        MissionSpec {
            mission_id: 2,
            task_number: 1,
            x: 10.0,
            y: 0.0,
            radius: 2.0,
            duration_s,
        }
    }

    #[test]
    fn moves_toward_destination_without_overshoot() {
        let mut rover = RoverState::new(1, 1.0);
        rover.set_destination([3.0, 0.0, 0.0]);
        rover.velocity = 2.0;

        rover.step();
        assert!(rover.position[0] > 0.0 && rover.position[0] <= 3.0);
        assert_eq!(rover.status, RoverStatus::Moving);

        // Velocity jitter never exceeds +1/tick, so two more steps suffice.
        rover.step();
        rover.step();
        // Final approach is clamped to the destination, never past it.
        assert!(rover.position[0] <= 3.0);
    }

    #[test]
    fn arrival_snaps_exactly_when_step_covers_distance() {
        let mut rover = RoverState::new(1, 1.0);
        rover.set_destination([1.0, 1.0, 0.0]);
        rover.velocity = 100.0;
        rover.step();
        assert_eq!(rover.position, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn zero_velocity_never_moves() {
        let mut rover = RoverState::new(1, 1.0);
        rover.set_destination([5.0, 0.0, 0.0]);
        rover.velocity = 0.0;
        rover.step();
        // rng may bump velocity afterwards, but this tick covered no ground
        assert_eq!(rover.position, [0.0, 0.0, 0.0]);
        assert_eq!(rover.status, RoverStatus::Moving);
    }

    #[test]
    fn work_accrues_and_completes() {
        let mut rover = RoverState::new(1, 1.0);
        rover.assign_mission(&mission(4.0));
        rover.position = rover.destination;

        rover.step();
        assert_eq!(rover.progress_pct, 25);
        assert_eq!(rover.status, RoverStatus::Working);
        rover.step();
        rover.step();
        rover.step();
        assert_eq!(rover.progress_pct, 100);
        assert_eq!(rover.status, RoverStatus::Working);

        // Reset happens at the top of the next step.
        rover.step();
        assert_eq!(rover.assigned_mission_id, 0);
        assert_eq!(rover.progress_pct, 0);
        assert_eq!(rover.status, RoverStatus::Idle);
    }

    #[test]
    fn progress_never_exceeds_100() {
        let mut rover = RoverState::new(1, 1.0);
        rover.assign_mission(&mission(2.0));
        rover.position = rover.destination;
        for _ in 0..10 {
            rover.step();
        }
        assert!(rover.progress_pct <= 100);
    }

    #[test]
    fn battery_drains_while_moving_and_floors_at_zero() {
        let mut rover = RoverState::new(1, 1.0);
        rover.battery_pct = 0.7;
        rover.set_destination([100.0, 0.0, 0.0]);
        rover.velocity = 1.0;
        rover.step();
        assert!((rover.battery_pct - 0.2).abs() < 1e-6);
        rover.step();
        assert_eq!(rover.battery_pct, 0.0);
        rover.step();
        assert_eq!(rover.battery_pct, 0.0);
    }

    #[test]
    fn apply_report_tracks_changes_and_preserves_mission() {
        let mut mirror = RoverState::new(1, 1.0);
        mirror.assigned_mission_id = 5;
        mirror.dirty = false;

        let header = TsHeader {
            frame_type: 2,
            rover_id: 1,
            battery: 99,
            pos_x: 4,
            pos_y: 2,
            pos_z: 0,
            state: 2,
            checksum: 0,
            payload_len: 9,
            freq: 1,
        };
        let payload = InfoPayload {
            proc_use: 10,
            storage: 20,
            velocity: 1,
            heading: 45,
            sensors: 3,
            progress: 40,
            dest_x: 9,
            dest_y: 9,
            dest_z: 0,
        };

        mirror.apply_report(&header, &payload);
        assert!(mirror.dirty);
        assert_eq!(mirror.position, [4.0, 2.0, 0.0]);
        assert_eq!(mirror.status, RoverStatus::Moving);
        assert_eq!(mirror.progress_pct, 40);
        assert_eq!(mirror.assigned_mission_id, 5);

        // Identical report leaves dirty untouched.
        mirror.dirty = false;
        mirror.apply_report(&header, &payload);
        assert!(!mirror.dirty);
    }

    #[test]
    fn assign_then_clear_restores_idle_invariant() {
        let mut rover = RoverState::new(1, 1.0);
        rover.position = [2.0, 2.0, 1.0];
        rover.assign_mission(&mission(30.0));
        assert_eq!(rover.destination, [10.0, 0.0, 1.0]);
        assert_eq!(rover.status, RoverStatus::Working);
        assert_eq!(rover.assigned_mission_id, 2);

        rover.clear_mission();
        assert_eq!(rover.assigned_mission_id, 0);
        assert_eq!(rover.progress_pct, 0);
        assert_eq!(rover.status, RoverStatus::Idle);
    }
}
