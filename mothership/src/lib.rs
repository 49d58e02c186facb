//! Mothership — the fleet coordinator.
//!
//! Three network surfaces feed one shared mirror of the fleet:
//! - [`telemetry_server`]: TS frames over TCP update the mirror records
//! - [`dispatcher`]: MissionLink datagrams over UDP assign and track work
//! - [`operator`]: a WebSocket channel pushes dirty-rover snapshots to the
//!   ground-control UI and accepts manual mission injections
//!
//! Exposed as a library so the integration tests can drive the dispatcher
//! state machine directly, without sockets.

pub mod dispatcher;
pub mod fleet;
pub mod missions;
pub mod operator;
pub mod telemetry_server;
