//! # rover-proto
//!
//! Shared wire formats and rover model for the rover fleet system.
//!
//! These types are used by:
//! - `mothership`: decoding TS telemetry frames, running the MissionLink
//!   dispatcher, mirroring rover state for the operator channel
//! - `rover-sim`: encoding telemetry, running the MissionLink agent,
//!   advancing the rover simulation
//!
//! ## Wire formats
//!
//! - **TS (Telemetry Stream)**: unidirectional, length-prefixed binary
//!   frames over TCP. Fixed 16-byte header + small fixed payload, CRC32
//!   over the payload. See [`ts`].
//! - **ML (MissionLink)**: bidirectional request/response datagrams over
//!   UDP. Fixed 20-byte header + typed payload, explicit sequence numbers,
//!   piggyback acks, CRC32 over the payload. See [`ml`].
//!
//! Both formats are big-endian. All parsing is bounds-checked; a malformed
//! buffer yields a typed error, never a panic.

pub mod mission;
pub mod ml;
pub mod rover;
pub mod ts;

pub use mission::MissionSpec;
pub use rover::{RoverSnapshot, RoverState, RoverStatus};
