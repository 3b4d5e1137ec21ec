//! The SLAM estimator boundary.
//!
//! `SlamEngine` is an external collaborator: this workspace defines the
//! trait its internals are consumed through, and ships only a
//! deterministic fake (`sim::SimSlamEngine`) for tests. A real estimator
//! is expected to implement this trait; its particle-filter/scan-matching
//! internals are out of scope here.

use rovercore_types::{Pose, RobotError};

/// Tunables carried by a concrete `SlamEngine`, not the trait itself —
/// these configure the estimator's internal search, not its interface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlamTunables {
    pub map_quality: u8,
    pub hole_width_mm: u32,
    pub max_search_iter: u32,
    pub sigma_xy_mm: f64,
    pub sigma_theta_deg: f64,
}

impl Default for SlamTunables {
    fn default() -> Self {
        Self {
            map_quality: 5,
            hole_width_mm: 400,
            max_search_iter: 2000,
            sigma_xy_mm: 250.0,
            sigma_theta_deg: 60.0,
        }
    }
}

pub trait SlamEngine: Send {
    /// Fold one fixed-length ranges array (one entry per angular bin)
    /// into the estimator's pose/map state.
    fn update(&mut self, distances_mm: &[u16]) -> Result<(), RobotError>;

    fn get_pose(&self) -> Pose;

    /// Fill `out` with the current `side_px * side_px` occupancy bytes.
    fn get_map(&self, out: &mut [u8]);
}
