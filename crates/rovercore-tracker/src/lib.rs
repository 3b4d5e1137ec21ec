//! `rovercore-tracker` – the path-tracking state machine and the
//! MANUAL/EXPLORE mode arbiter that owns the single `Actuator` slot.

pub mod mode_arbiter;
pub mod tracker;

pub use mode_arbiter::{ModeArbiter, TrackerGeometry};
pub use tracker::{collision_check, PathTracker, TrackOutcome};
