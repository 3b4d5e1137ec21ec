//! `rovercore-types` – shared data model for the robot control core.
//!
//! Every other crate in this workspace depends on this one and nothing
//! else upstream: scans, poses, occupancy maps, planning grids, plans,
//! the operating mode, and the crate-wide error currency all live here so
//! that trait boundaries in `rovercore-hal` and the algorithms in
//! `rovercore-planner`/`rovercore-tracker` share one vocabulary.

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Scan
// ─────────────────────────────────────────────────────────────────────────────

/// One polar sample from a LiDAR sweep.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanPoint {
    /// Azimuth in degrees, `[0, 360)`.
    pub angle_deg: f32,
    /// Range in millimetres.
    pub distance_mm: u16,
    /// Returned signal strength, device-defined units.
    pub intensity: u8,
    /// Monotonic capture time in nanoseconds.
    pub timestamp_ns: u64,
    /// Derived Cartesian X in the robot frame, millimetres.
    pub x_mm: f32,
    /// Derived Cartesian Y in the robot frame, millimetres.
    pub y_mm: f32,
}

impl ScanPoint {
    /// Build a point from polar data, deriving the Cartesian fields.
    pub fn from_polar(angle_deg: f32, distance_mm: u16, intensity: u8, timestamp_ns: u64) -> Self {
        let angle_rad = angle_deg.to_radians();
        Self {
            angle_deg,
            distance_mm,
            intensity,
            timestamp_ns,
            x_mm: distance_mm as f32 * angle_rad.cos(),
            y_mm: distance_mm as f32 * angle_rad.sin(),
        }
    }
}

/// A single LiDAR sweep, in capture order. Produced by a `ScanSource`,
/// consumed read-only by everything downstream.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Scan {
    pub points: Vec<ScanPoint>,
}

impl Scan {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Resample into a fixed `rays`-length distance array by nearest-angle
    /// binning, one bin per `360 / rays` degrees. Bins with no contributing
    /// sample default to `max_range_mm` (the estimator's convention for
    /// "nothing seen at this azimuth").
    ///
    /// This exists because the device reports a variable number of points
    /// per sweep (it tracks rotation speed), while the SLAM estimator this
    /// system targets expects one range per fixed angular bin.
    pub fn resample_fixed(&self, rays: usize, max_range_mm: u16) -> Vec<u16> {
        let mut out = vec![max_range_mm; rays];
        let mut seen = vec![false; rays];
        let bin_width = 360.0 / rays as f32;
        for p in &self.points {
            let mut bin = (p.angle_deg / bin_width).round() as i64 % rays as i64;
            if bin < 0 {
                bin += rays as i64;
            }
            let bin = bin as usize;
            if !seen[bin] || p.distance_mm < out[bin] {
                out[bin] = p.distance_mm;
                seen[bin] = true;
            }
        }
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pose
// ─────────────────────────────────────────────────────────────────────────────

/// Robot pose in the map frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Pose {
    pub x_mm: f64,
    pub y_mm: f64,
    pub theta_degrees: f64,
}

impl Pose {
    /// Convert to a pixel coordinate using the corner-origin convention:
    /// `(0, 0)` is the map's top-left corner, matching the external
    /// estimator's own pixel indexing.
    pub fn to_pixel(&self, map_meters: f64, map_pixels: u32) -> (i64, i64) {
        let scale = map_meters * 1000.0 / map_pixels as f64;
        (
            (self.x_mm / scale).round() as i64,
            (self.y_mm / scale).round() as i64,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OccupancyMap
// ─────────────────────────────────────────────────────────────────────────────

/// A square raster of occupancy bytes. Higher byte values mean "more
/// likely free", per the external estimator's convention (see GLOSSARY).
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyMap {
    pub side_px: u32,
    pub bytes: Vec<u8>,
}

impl OccupancyMap {
    pub fn blank(side_px: u32) -> Self {
        Self {
            side_px,
            bytes: vec![255u8; (side_px as usize) * (side_px as usize)],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.bytes[(y as usize) * (self.side_px as usize) + x as usize]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PlanningGrid
// ─────────────────────────────────────────────────────────────────────────────

/// A coarse-grid cell label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CellLabel {
    Free,
    Blocked,
    Unknown,
}

/// A downsampled, three-valued planning representation derived from an
/// `OccupancyMap` by tile-averaging. Non-persistent, recomputed on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanningGrid {
    pub side_cells: u32,
    pub cell_px: u32,
    pub labels: Vec<CellLabel>,
}

impl PlanningGrid {
    pub fn label(&self, cx: u32, cy: u32) -> CellLabel {
        self.labels[(cy as usize) * (self.side_cells as usize) + cx as usize]
    }

    pub fn in_bounds(&self, cx: i64, cy: i64) -> bool {
        cx >= 0 && cy >= 0 && (cx as u32) < self.side_cells && (cy as u32) < self.side_cells
    }
}

/// One cell address in a `PlanningGrid`.
pub type Cell = (u32, u32);

/// An ordered, 4-connected sequence of planning-grid cells from the
/// robot's current cell to the goal cell. Every cell is FREE or UNKNOWN;
/// never BLOCKED.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub cells: Vec<Cell>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.cells.len() <= 1
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mode
// ─────────────────────────────────────────────────────────────────────────────

/// Process-wide operating mode. Only one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Manual,
    Explore,
}

// ─────────────────────────────────────────────────────────────────────────────
// RobotError
// ─────────────────────────────────────────────────────────────────────────────

/// Crate-wide error currency. Every fallible boundary in this system
/// returns `Result<_, RobotError>`.
#[derive(thiserror::Error, Debug)]
pub enum RobotError {
    #[error("device unavailable: {device}: {source}")]
    DeviceUnavailable { device: &'static str, source: String },

    #[error("transport failure on {device}: {source}")]
    TransportFailure { device: &'static str, source: String },

    #[error("timeout waiting for {operation}")]
    Timeout { operation: &'static str },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("mode conflict: not in manual mode")]
    ModeConflict,

    #[error("no path to goal")]
    NoPath,

    #[error("planner exhausted after {attempts} re-plan attempts")]
    PlannerExhausted { attempts: u32 },
}

/// Timeout used by `ScanSource::read_scan` in production wiring.
pub const SCAN_READ_TIMEOUT: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_point_from_polar_derives_cartesian() {
        let p = ScanPoint::from_polar(0.0, 1000, 200, 1);
        assert!((p.x_mm - 1000.0).abs() < 1e-3);
        assert!(p.y_mm.abs() < 1e-3);

        let p90 = ScanPoint::from_polar(90.0, 1000, 200, 1);
        assert!(p90.x_mm.abs() < 1e-2);
        assert!((p90.y_mm - 1000.0).abs() < 1e-2);
    }

    #[test]
    fn resample_fixed_defaults_empty_bins_to_max_range() {
        let scan = Scan { points: vec![ScanPoint::from_polar(0.0, 500, 100, 0)] };
        let ranges = scan.resample_fixed(360, 8000);
        assert_eq!(ranges[0], 500);
        assert_eq!(ranges[180], 8000);
        assert_eq!(ranges.len(), 360);
    }

    #[test]
    fn resample_fixed_wraps_angle_to_bin_zero() {
        let scan = Scan { points: vec![ScanPoint::from_polar(359.6, 700, 100, 0)] };
        let ranges = scan.resample_fixed(360, 8000);
        assert_eq!(ranges[0], 700);
    }

    #[test]
    fn resample_fixed_keeps_nearest_when_two_points_share_a_bin() {
        let scan = Scan {
            points: vec![
                ScanPoint::from_polar(1.0, 900, 100, 0),
                ScanPoint::from_polar(1.2, 300, 100, 1),
            ],
        };
        let ranges = scan.resample_fixed(360, 8000);
        assert_eq!(ranges[1], 300);
    }

    #[test]
    fn pose_to_pixel_uses_corner_origin() {
        let pose = Pose { x_mm: 0.0, y_mm: 0.0, theta_degrees: 0.0 };
        assert_eq!(pose.to_pixel(15.0, 800), (0, 0));

        let centre = Pose { x_mm: 7500.0, y_mm: 7500.0, theta_degrees: 0.0 };
        assert_eq!(centre.to_pixel(15.0, 800), (400, 400));
    }

    #[test]
    fn occupancy_map_blank_is_all_free() {
        let map = OccupancyMap::blank(4);
        assert_eq!(map.bytes.len(), 16);
        assert!(map.bytes.iter().all(|&b| b == 255));
        assert_eq!(map.get(1, 1), 255);
    }

    #[test]
    fn plan_of_length_one_is_empty() {
        let plan = Plan { cells: vec![(3, 3)] };
        assert!(plan.is_empty());
        let plan = Plan { cells: vec![] };
        assert!(plan.is_empty());
        let plan = Plan { cells: vec![(0, 0), (1, 0)] };
        assert!(!plan.is_empty());
    }

    #[test]
    fn mode_serializes_lowercase() {
        let json = serde_json::to_string(&Mode::Explore).unwrap();
        assert_eq!(json, "\"explore\"");
        let mode: Mode = serde_json::from_str("\"manual\"").unwrap();
        assert_eq!(mode, Mode::Manual);
    }

    #[test]
    fn robot_error_messages_are_human_readable() {
        let err = RobotError::PlannerExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "planner exhausted after 5 re-plan attempts");
    }
}
