//! `rovercore-hal` – capability-based hardware abstractions.
//!
//! Three traits — [`ScanSource`], [`Actuator`], [`SlamEngine`] — are the
//! only way anything above this crate touches hardware. Each has a real
//! serial-backed adapter and a deterministic simulated fake in [`sim`].

pub mod actuator;
pub mod scan_source;
pub mod sim;
pub mod slam_engine;

pub use actuator::{Actuator, ActuatorKinematics, SerialActuator};
pub use scan_source::{ScanReadOutcome, ScanSource, SerialScanSource};
pub use slam_engine::{SlamEngine, SlamTunables};
