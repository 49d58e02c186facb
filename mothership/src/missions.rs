//! missions.rs — mission scenarios and generation
//!
//! Four startup scenarios control the automatic queue:
//!   1. one long-duration mission (120–300 s)
//!   2. two randomly generated missions, then idle
//!   3. unbounded — a fresh mission is synthesized per request
//!   4. four fixed missions at set coordinates
//!
//! Operator-injected missions live in separate per-rover queues and always
//! take priority over the automatic queue (see the dispatcher).

use std::collections::VecDeque;

use rand::Rng;

use rover_proto::MissionSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// One long mission.
    OneLong,
    /// Two random missions, then nothing.
    TwoRandom,
    /// Fresh missions generated on demand, forever.
    OnDemand,
    /// Four fixed missions.
    FixedFour,
}

impl Scenario {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::OneLong),
            2 => Some(Self::TwoRandom),
            3 => Some(Self::OnDemand),
            4 => Some(Self::FixedFour),
            _ => None,
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            Self::OneLong => 1,
            Self::TwoRandom => 2,
            Self::OnDemand => 3,
            Self::FixedFour => 4,
        }
    }
}

/// Seed the automatic queue for a scenario.
pub fn seed_queue(scenario: Scenario) -> VecDeque<MissionSpec> {
    match scenario {
        Scenario::OneLong => VecDeque::from([generate_long(1)]),
        Scenario::TwoRandom => VecDeque::from([generate(1), generate(2)]),
        Scenario::OnDemand => VecDeque::new(),
        Scenario::FixedFour => VecDeque::from([
            MissionSpec { mission_id: 1, task_number: 1, x: 2.0, y: 2.0, radius: 2.0, duration_s: 30.0 },
            MissionSpec { mission_id: 2, task_number: 2, x: 8.0, y: 3.0, radius: 2.0, duration_s: 35.0 },
            MissionSpec { mission_id: 3, task_number: 3, x: 12.0, y: 10.0, radius: 2.0, duration_s: 40.0 },
            MissionSpec { mission_id: 4, task_number: 4, x: 5.0, y: 12.0, radius: 2.0, duration_s: 45.0 },
        ]),
    }
}

/// Random mission in the standard working area. The duration draw is
/// two-banded: roughly a third of missions come out short.
pub fn generate(task_number: u16) -> MissionSpec {
    let mut rng = rand::thread_rng();
    let duration_s: f32 = if rng.gen_range(1..=3) == 1 {
        rng.gen_range(30..=60) as f32
    } else {
        rng.gen_range(45..=60) as f32
    };

    MissionSpec {
        mission_id: rng.gen_range(1..=6),
        task_number,
        x: rng.gen_range(0..=15) as f32,
        y: rng.gen_range(0..=15) as f32,
        radius: 2.0,
        duration_s,
    }
}

/// Long-haul variant used by scenario 1.
fn generate_long(task_number: u16) -> MissionSpec {
    let mut rng = rand::thread_rng();
    MissionSpec {
        duration_s: rng.gen_range(120..=300) as f32,
        ..generate(task_number)
    }
}
