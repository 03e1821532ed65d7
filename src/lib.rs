//! # Mining Truck Fleet Simulator
//!
//! A fleet-scale mining truck simulation library providing per-truck
//! kinematic/thermal modeling, noisy telemetry generation, and a
//! supervisory control layer, all synchronized over a topic-based
//! publish/subscribe bus.
//!
//! ## Features
//!
//! - **Per-truck simulation**: fixed-rate kinematic and thermal integration
//!   with saturation on every bound
//! - **Telemetry codec**: noisy JSON sensor snapshots, lenient partial-field
//!   command decoding
//! - **Supervisory registry**: id-keyed observed records, staleness tracking,
//!   bounded position history
//! - **Manual-drive heartbeat**: keeps a manually driven truck alive across
//!   the simulator's command watchdog
//! - **File relay**: bridges the bus to a transport-incapable peer through
//!   one JSON file per message
//!
//! ## Quick Start
//!
//! ```rust
//! use fleetbus::truck::{TruckAgent, TruckParams};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let mut agent = TruckAgent::new(1, 100.0, 200.0, TruckParams::default());
//! let mut rng = StdRng::seed_from_u64(7);
//!
//! // One simulation step at t = 1000 ms; telemetry is cadence-gated.
//! let outputs = agent.tick(1000, &mut rng);
//! if let Some(sensors) = outputs.sensors {
//!     println!("truck {} at ({}, {})", sensors.truck_id, sensors.position_x, sensors.position_y);
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`kinematics`] - pure per-tick state transition
//! - [`protocol`] - wire frames, topics, and protocol errors
//! - [`codec`] - telemetry encoding and lenient command decoding
//! - [`truck`] - simulator-side truck state, navigation, and agent
//! - [`sim`] - fleet orchestration over tokio tasks
//! - [`registry`] - supervisor-side observed records
//! - [`supervisor`] - command issuance and the manual-drive heartbeat
//! - [`bus`] - transport seam and the in-process bus
//! - [`relay`] - file-based relay for cross-process operation
//! - [`clock`] - injectable time base

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod clock;
pub mod codec;
pub mod kinematics;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod sim;
pub mod supervisor;
pub mod truck;

// Re-export main public types for convenience
pub use bus::LocalBus;
pub use codec::TelemetryCodec;
pub use kinematics::KinematicModel;
pub use registry::TruckRegistry;
pub use sim::FleetSimulator;
pub use supervisor::SupervisoryController;
pub use truck::{TruckAgent, TruckParams, TruckState};
