//! [`PathTracker`] – drives the robot along a precomputed [`Plan`],
//! replanning on collision and aborting on stuck or exhausted re-plans.
//!
//! Two variants share the segment-walking machinery
//! (`Align -> Drive -> Settle -> Verify -> {next | Replan | Abort}`) but
//! differ in their inner controller: [`PathTracker::run_goal_directed`]
//! drives one timed open-loop move per segment; [`PathTracker::run_reactive`]
//! re-issues the closest primitive every 100 ms tick with no settle delay.
//! Both always call `stop` on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rovercore_hal::{Actuator, ActuatorKinematics};
use rovercore_planner::{coarsen, CoarseGridThresholds, Planner};
use rovercore_slam::SlamCoordinator;
use rovercore_types::{Cell, CellLabel, Plan, PlanningGrid, Pose, Scan};

/// Any scan point closer than this to the robot origin trips
/// `collision_check`.
pub const COLLISION_MM: f64 = 250.0;
pub const ALIGN_THRESHOLD_GOAL_DEG: f64 = 15.0;
pub const ALIGN_THRESHOLD_EXPLORE_DEG: f64 = 20.0;
pub const SETTLE: Duration = Duration::from_millis(200);
pub const STUCK_LIMIT: u32 = 100;
pub const REPLAN_BUDGET: u32 = 5;
pub const MAP_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
/// Maximum age of the SLAM cache a tracker may plan against (§3 invariant).
pub const MAP_MAX_AGE: Duration = Duration::from_secs(1);
pub const REACTIVE_TICK: Duration = Duration::from_millis(100);

/// Why a tracker run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Reached,
    Aborted,
    Cancelled,
}

/// True iff any scan point lies within [`COLLISION_MM`] of the robot
/// origin. An empty scan never trips collision.
pub fn collision_check(scan: &Scan) -> bool {
    scan.points.iter().any(|p| (p.distance_mm as f64) < COLLISION_MM)
}

/// Geometry and collaborators a tracker run needs besides the
/// `Actuator` it drives directly (held separately so callers keep a
/// single, exclusive borrow of the actuator for the run's lifetime).
pub struct PathTracker<'a> {
    pub coordinator: &'a SlamCoordinator,
    pub kinematics: ActuatorKinematics,
    pub thresholds: CoarseGridThresholds,
    pub map_meters: f64,
    pub map_pixels: u32,
}

impl<'a> PathTracker<'a> {
    pub fn new(
        coordinator: &'a SlamCoordinator,
        kinematics: ActuatorKinematics,
        thresholds: CoarseGridThresholds,
        map_meters: f64,
        map_pixels: u32,
    ) -> Self {
        Self { coordinator, kinematics, thresholds, map_meters, map_pixels }
    }

    fn cell_px(&self) -> u32 {
        rovercore_planner::cell_px(self.map_meters, self.map_pixels)
    }

    fn fresh_grid(&self) -> PlanningGrid {
        if !self.coordinator.is_map_fresh(MAP_MAX_AGE) {
            tracing::warn!("slam cache older than 1s; planning against last known snapshot");
        }
        let bytes = self.coordinator.map();
        coarsen(&bytes, self.map_meters, self.map_pixels, self.thresholds)
    }

    fn pose_cell(&self, pose: Pose) -> Cell {
        let (px, py) = pose.to_pixel(self.map_meters, self.map_pixels);
        let cell_px = self.cell_px() as i64;
        ((px.max(0) / cell_px) as u32, (py.max(0) / cell_px) as u32)
    }

    /// Desired-heading error, in degrees, normalised to `[-180, 180]`,
    /// from `pose` to the centre of `target`.
    fn heading_diff_deg(&self, pose: Pose, target: Cell) -> f64 {
        let scale = self.map_meters * 1000.0 / self.map_pixels as f64;
        let cell_px = self.cell_px() as f64;
        let target_x_mm = (target.0 as f64 + 0.5) * cell_px * scale;
        let target_y_mm = (target.1 as f64 + 0.5) * cell_px * scale;
        let dx = target_x_mm - pose.x_mm;
        let dy = target_y_mm - pose.y_mm;
        normalize_deg(dy.atan2(dx).to_degrees() - pose.theta_degrees)
    }

    fn segment_length_mm(&self, pose: Pose, target: Cell) -> f64 {
        let scale = self.map_meters * 1000.0 / self.map_pixels as f64;
        let cell_px = self.cell_px() as f64;
        let target_x_mm = (target.0 as f64 + 0.5) * cell_px * scale;
        let target_y_mm = (target.1 as f64 + 0.5) * cell_px * scale;
        ((target_x_mm - pose.x_mm).powi(2) + (target_y_mm - pose.y_mm).powi(2)).sqrt()
    }

    /// Re-plan from the robot's current cell to `goal` against a freshly
    /// coarsened grid. Returns `None` if the replan itself is empty.
    fn replan(&self, goal: Cell) -> Option<(PlanningGrid, Plan)> {
        let grid = self.fresh_grid();
        let pose = self.coordinator.position();
        let current = self.pose_cell(pose);
        let mut planner = Planner::new();
        let plan = planner.plan(&grid, current, goal);
        if plan.is_empty() {
            None
        } else {
            Some((grid, plan))
        }
    }

    /// Variant A: timed open-loop, goal-directed. Drives `plan` to its
    /// final cell (`goal`), re-planning on collision.
    pub fn run_goal_directed(
        &self,
        actuator: &mut dyn Actuator,
        mut plan: Plan,
        goal: Cell,
        cancel: &AtomicBool,
    ) -> TrackOutcome {
        if plan.is_empty() {
            let _ = actuator.stop();
            return TrackOutcome::Reached;
        }

        let mut replans = 0u32;
        let mut grid = self.fresh_grid();
        let mut last_refresh = Instant::now();
        let mut seg = 1usize;

        loop {
            if cancel.load(Ordering::Acquire) {
                let _ = actuator.stop();
                return TrackOutcome::Cancelled;
            }
            if seg >= plan.cells.len() {
                let _ = actuator.stop();
                return TrackOutcome::Reached;
            }

            if last_refresh.elapsed() >= MAP_REFRESH_INTERVAL {
                grid = self.fresh_grid();
                last_refresh = Instant::now();
            }

            let (_, _, scan) = self.coordinator.snapshot();
            let next_cell = plan.cells[seg];
            let blocked_ahead = grid.in_bounds(next_cell.0 as i64, next_cell.1 as i64)
                && grid.label(next_cell.0, next_cell.1) == CellLabel::Blocked;
            if collision_check(&scan) || blocked_ahead {
                replans += 1;
                if replans > REPLAN_BUDGET {
                    let _ = actuator.stop();
                    return TrackOutcome::Aborted;
                }
                match self.replan(goal) {
                    Some((fresh_grid, replanned)) => {
                        grid = fresh_grid;
                        plan = replanned;
                        seg = 1;
                        continue;
                    }
                    None => continue,
                }
            }

            let mut stuck = 0u32;
            loop {
                if cancel.load(Ordering::Acquire) {
                    let _ = actuator.stop();
                    return TrackOutcome::Cancelled;
                }
                stuck += 1;
                if stuck > STUCK_LIMIT {
                    let _ = actuator.stop();
                    return TrackOutcome::Aborted;
                }

                let pose = self.coordinator.position();
                let (_, _, scan) = self.coordinator.snapshot();
                if collision_check(&scan) {
                    break;
                }

                let diff = self.heading_diff_deg(pose, next_cell);
                if diff.abs() > ALIGN_THRESHOLD_GOAL_DEG {
                    if diff > 0.0 {
                        let _ = actuator.turn_left();
                    } else {
                        let _ = actuator.turn_right();
                    }
                    std::thread::sleep(Duration::from_secs_f64(self.kinematics.turn_time(diff.abs())));
                } else {
                    let _ = actuator.forward();
                    let length = self.segment_length_mm(pose, next_cell);
                    std::thread::sleep(Duration::from_secs_f64(self.kinematics.forward_time(length)));
                }
                let _ = actuator.stop();
                std::thread::sleep(SETTLE);

                let pose_after = self.coordinator.position();
                if self.pose_cell(pose_after) == next_cell {
                    seg += 1;
                    break;
                }
            }
        }
    }

    /// Variant B: reactive, used for exploration. 100 ms ticks, no
    /// settle, cooperatively cancelled by `cancel` (the mode flag).
    pub fn run_reactive(
        &self,
        actuator: &mut dyn Actuator,
        mut plan: Plan,
        goal: Cell,
        cancel: &AtomicBool,
    ) -> TrackOutcome {
        if plan.is_empty() {
            let _ = actuator.stop();
            return TrackOutcome::Reached;
        }

        let mut replans = 0u32;
        let mut grid = self.fresh_grid();
        let mut last_refresh = Instant::now();
        let mut seg = 1usize;

        loop {
            if cancel.load(Ordering::Acquire) {
                let _ = actuator.stop();
                return TrackOutcome::Cancelled;
            }
            if seg >= plan.cells.len() {
                let _ = actuator.stop();
                return TrackOutcome::Reached;
            }

            if last_refresh.elapsed() >= MAP_REFRESH_INTERVAL {
                grid = self.fresh_grid();
                last_refresh = Instant::now();
            }

            let (pose, _, scan) = self.coordinator.snapshot();
            let next_cell = plan.cells[seg];
            let blocked_ahead = grid.in_bounds(next_cell.0 as i64, next_cell.1 as i64)
                && grid.label(next_cell.0, next_cell.1) == CellLabel::Blocked;
            if collision_check(&scan) || blocked_ahead {
                replans += 1;
                if replans > REPLAN_BUDGET {
                    let _ = actuator.stop();
                    return TrackOutcome::Aborted;
                }
                match self.replan(goal) {
                    Some((fresh_grid, replanned)) => {
                        grid = fresh_grid;
                        plan = replanned;
                        seg = 1;
                        std::thread::sleep(REACTIVE_TICK);
                        continue;
                    }
                    None => {
                        std::thread::sleep(REACTIVE_TICK);
                        continue;
                    }
                }
            }

            if self.pose_cell(pose) == next_cell {
                seg += 1;
                std::thread::sleep(REACTIVE_TICK);
                continue;
            }

            let diff = self.heading_diff_deg(pose, next_cell);
            if diff.abs() < ALIGN_THRESHOLD_EXPLORE_DEG {
                let _ = actuator.forward();
            } else if diff > 0.0 {
                let _ = actuator.turn_left();
            } else {
                let _ = actuator.turn_right();
            }
            std::thread::sleep(REACTIVE_TICK);
        }
    }
}

fn normalize_deg(mut deg: f64) -> f64 {
    while deg > 180.0 {
        deg -= 360.0;
    }
    while deg < -180.0 {
        deg += 360.0;
    }
    deg
}
