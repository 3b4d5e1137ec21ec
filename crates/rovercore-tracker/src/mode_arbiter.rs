//! [`ModeArbiter`] – enforces MANUAL vs. EXPLORE exclusivity and owns the
//! single tracker slot.
//!
//! Unlike a thread-per-request design, this arbiter keeps exactly one
//! active tracker at a time: activating MANUAL or posting a new
//! `/robot/target` cancels whatever tracker is currently running and
//! joins it before taking ownership of the `Actuator` for the next one
//! (the redesign flag in the distilled spec's design notes, applied).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use rovercore_hal::{Actuator, ActuatorKinematics};
use rovercore_planner::{coarsen, CoarseGridThresholds, Planner};
use rovercore_slam::SlamCoordinator;
use rovercore_types::{Cell, CellLabel, Mode, PlanningGrid, RobotError};

use crate::tracker::PathTracker;

const MODE_MANUAL: u8 = 0;
const MODE_EXPLORE: u8 = 1;

/// A running tracker's cancellation handle and join handle. The thread
/// always hands the `Actuator` back on exit so the next activation can
/// reuse it without re-wiring the serial port.
struct ActiveTracker {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Box<dyn Actuator>>,
}

/// Geometry shared by every tracker the arbiter spawns.
#[derive(Debug, Clone, Copy)]
pub struct TrackerGeometry {
    pub kinematics: ActuatorKinematics,
    pub thresholds: CoarseGridThresholds,
    pub map_meters: f64,
    pub map_pixels: u32,
}

/// Owns the single `Actuator` slot and arbitrates MANUAL/EXPLORE.
pub struct ModeArbiter {
    mode: AtomicU8,
    slot: Mutex<Option<ActiveTracker>>,
    actuator: Mutex<Option<Box<dyn Actuator>>>,
    coordinator: Arc<SlamCoordinator>,
    geometry: TrackerGeometry,
}

impl ModeArbiter {
    pub fn new(coordinator: Arc<SlamCoordinator>, actuator: Box<dyn Actuator>, geometry: TrackerGeometry) -> Self {
        Self {
            mode: AtomicU8::new(MODE_MANUAL),
            slot: Mutex::new(None),
            actuator: Mutex::new(Some(actuator)),
            coordinator,
            geometry,
        }
    }

    pub fn mode(&self) -> Mode {
        if self.mode.load(Ordering::Acquire) == MODE_EXPLORE {
            Mode::Explore
        } else {
            Mode::Manual
        }
    }

    /// Cancel any running tracker, reclaim the `Actuator`, and set
    /// MANUAL. Idempotent: calling this twice in a row leaves no
    /// dangling worker and both calls succeed.
    pub fn set_manual(&self) {
        self.cancel_active();
        self.mode.store(MODE_MANUAL, Ordering::Release);
        tracing::info!("mode -> manual");
    }

    /// Cancel any running tracker and spawn a fresh exploration worker
    /// that runs until no `UNKNOWN` cells remain, the actuator send
    /// fails, or mode changes back to MANUAL (by itself, on exit, or by
    /// a concurrent `set_manual`).
    pub fn set_explore(self: &Arc<Self>) {
        self.cancel_active();
        self.mode.store(MODE_EXPLORE, Ordering::Release);
        tracing::info!("mode -> explore");

        let Some(actuator) = self.actuator.lock().expect("actuator mutex poisoned").take() else {
            // No actuator available (already owned by a tracker that
            // hasn't handed it back yet); nothing to spawn against.
            self.mode.store(MODE_MANUAL, Ordering::Release);
            return;
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let this = Arc::clone(self);
        let worker_cancel = Arc::clone(&cancel);

        let handle = std::thread::spawn(move || this.run_explore_worker(actuator, &worker_cancel));
        *self.slot.lock().expect("slot mutex poisoned") = Some(ActiveTracker { cancel, handle });
    }

    /// Submit a goal-directed target (occupancy-pixel coordinates,
    /// already converted to a planning-grid cell by the caller). Cancels
    /// any in-flight tracker first. Returns `ModeConflict` if mode is
    /// not MANUAL.
    pub fn drive_to(self: &Arc<Self>, goal: Cell) -> Result<(), RobotError> {
        if self.mode() != Mode::Manual {
            return Err(RobotError::ModeConflict);
        }
        self.cancel_active();

        let Some(actuator) = self.actuator.lock().expect("actuator mutex poisoned").take() else {
            return Err(RobotError::DeviceUnavailable { device: "actuator", source: "not available".to_string() });
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let this = Arc::clone(self);
        let worker_cancel = Arc::clone(&cancel);

        let handle = std::thread::spawn(move || this.run_target_worker(actuator, goal, &worker_cancel));
        *self.slot.lock().expect("slot mutex poisoned") = Some(ActiveTracker { cancel, handle });
        Ok(())
    }

    /// Send a raw command straight to the actuator outside of any
    /// tracker. Requires MANUAL mode and cancels whatever tracker is
    /// running first, since the actuator would otherwise be owned by
    /// its worker thread.
    pub fn send_raw(&self, raw: &str) -> Result<(), RobotError> {
        if self.mode() != Mode::Manual {
            return Err(RobotError::ModeConflict);
        }
        self.cancel_active();
        let mut guard = self.actuator.lock().expect("actuator mutex poisoned");
        match guard.as_mut() {
            Some(actuator) => actuator.send(raw),
            None => Err(RobotError::DeviceUnavailable { device: "actuator", source: "not available".to_string() }),
        }
    }

    fn fresh_grid(&self) -> PlanningGrid {
        let bytes = self.coordinator.map();
        coarsen(&bytes, self.geometry.map_meters, self.geometry.map_pixels, self.geometry.thresholds)
    }

    fn current_cell(&self) -> Cell {
        let pose = self.coordinator.position();
        let (px, py) = pose.to_pixel(self.geometry.map_meters, self.geometry.map_pixels);
        let cell_px = rovercore_planner::cell_px(self.geometry.map_meters, self.geometry.map_pixels) as i64;
        ((px.max(0) / cell_px) as u32, (py.max(0) / cell_px) as u32)
    }

    fn run_target_worker(&self, mut actuator: Box<dyn Actuator>, goal: Cell, cancel: &AtomicBool) -> Box<dyn Actuator> {
        let grid = self.fresh_grid();
        let start = self.current_cell();
        let mut planner = Planner::new();
        let plan = planner.plan(&grid, start, goal);

        let tracker = PathTracker::new(
            &self.coordinator,
            self.geometry.kinematics,
            self.geometry.thresholds,
            self.geometry.map_meters,
            self.geometry.map_pixels,
        );
        let _ = tracker.run_goal_directed(actuator.as_mut(), plan, goal, cancel);
        actuator
    }

    fn run_explore_worker(&self, mut actuator: Box<dyn Actuator>, cancel: &AtomicBool) -> Box<dyn Actuator> {
        loop {
            if cancel.load(Ordering::Acquire) {
                break;
            }
            let grid = self.fresh_grid();
            let current = self.current_cell();

            let Some(target) = nearest_unknown(&grid, current) else {
                break;
            };

            let mut planner = Planner::new();
            let plan = planner.plan(&grid, current, target);
            if plan.is_empty() {
                continue;
            }

            let tracker = PathTracker::new(
                &self.coordinator,
                self.geometry.kinematics,
                self.geometry.thresholds,
                self.geometry.map_meters,
                self.geometry.map_pixels,
            );
            tracker.run_reactive(actuator.as_mut(), plan, target, cancel);
        }
        let _ = actuator.stop();
        self.mode.store(MODE_MANUAL, Ordering::Release);
        tracing::info!("explore worker finished; mode -> manual");
        actuator
    }

    /// Cancel any running tracker and issue a final `stop` to the
    /// actuator before process exit. The actuator's own `Drop`
    /// (for a real serial port) additionally issues `stop` before
    /// releasing the handle, so this is belt-and-braces for the common
    /// path where the process exits cleanly rather than via unwind.
    pub fn shutdown(&self) {
        self.cancel_active();
        if let Some(actuator) = self.actuator.lock().expect("actuator mutex poisoned").as_mut() {
            if let Err(e) = actuator.stop() {
                tracing::warn!(error = %e, "failed to stop actuator during shutdown");
            }
        }
    }

    /// Cancel and join whatever tracker is active, recovering its
    /// `Actuator` into the idle slot. No-op if nothing is running.
    fn cancel_active(&self) {
        let active = self.slot.lock().expect("slot mutex poisoned").take();
        if let Some(active) = active {
            active.cancel.store(true, Ordering::Release);
            if let Ok(actuator) = active.handle.join() {
                *self.actuator.lock().expect("actuator mutex poisoned") = Some(actuator);
            }
        }
    }
}

/// The `UNKNOWN` cell closest to `from` by Manhattan distance, or `None`
/// if the grid has none left to explore.
fn nearest_unknown(grid: &PlanningGrid, from: Cell) -> Option<Cell> {
    let mut best: Option<(Cell, i64)> = None;
    for cy in 0..grid.side_cells {
        for cx in 0..grid.side_cells {
            if grid.label(cx, cy) != CellLabel::Unknown {
                continue;
            }
            let dist = (cx as i64 - from.0 as i64).abs() + (cy as i64 - from.1 as i64).abs();
            if best.is_none_or(|(_, best_dist)| dist < best_dist) {
                best = Some(((cx, cy), dist));
            }
        }
    }
    best.map(|(cell, _)| cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rovercore_hal::sim::{SimActuator, SimScanSource, SimSlamEngine};

    fn geometry() -> TrackerGeometry {
        TrackerGeometry {
            kinematics: ActuatorKinematics::default(),
            thresholds: CoarseGridThresholds::default(),
            map_meters: 1.0,
            map_pixels: 40,
        }
    }

    fn arbiter() -> Arc<ModeArbiter> {
        let src = SimScanSource::new();
        let engine = SimSlamEngine::new(40);
        let coordinator = Arc::new(SlamCoordinator::new(Box::new(src), Box::new(engine), 40));
        Arc::new(ModeArbiter::new(coordinator, Box::new(SimActuator::new()), geometry()))
    }

    #[test]
    fn starts_in_manual_mode() {
        let arb = arbiter();
        assert_eq!(arb.mode(), Mode::Manual);
    }

    #[test]
    fn two_consecutive_set_manual_calls_are_idempotent() {
        let arb = arbiter();
        arb.set_manual();
        arb.set_manual();
        assert_eq!(arb.mode(), Mode::Manual);
        assert!(arb.slot.lock().unwrap().is_none());
    }

    #[test]
    fn nearest_unknown_picks_closest_by_manhattan_distance() {
        let mut grid = PlanningGrid {
            side_cells: 4,
            cell_px: 1,
            labels: vec![CellLabel::Free; 16],
        };
        let idx = |x: u32, y: u32| (y as usize) * 4 + x as usize;
        grid.labels[idx(3, 3)] = CellLabel::Unknown;
        grid.labels[idx(1, 1)] = CellLabel::Unknown;
        let nearest = nearest_unknown(&grid, (0, 0));
        assert_eq!(nearest, Some((1, 1)));
    }

    #[test]
    fn nearest_unknown_is_none_when_grid_fully_known() {
        let grid = PlanningGrid { side_cells: 3, cell_px: 1, labels: vec![CellLabel::Free; 9] };
        assert_eq!(nearest_unknown(&grid, (0, 0)), None);
    }

    #[test]
    fn drive_to_rejects_when_not_manual() {
        let arb = arbiter();
        arb.set_explore();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let result = arb.drive_to((1, 1));
        assert!(matches!(result, Err(RobotError::ModeConflict)));
        arb.set_manual();
    }

    #[test]
    fn drive_to_accepts_in_manual_mode() {
        let arb = arbiter();
        let result = arb.drive_to((0, 0));
        assert!(result.is_ok());
        // cell (0,0) is the no-op case (start==goal), so the worker
        // reaches immediately and hands the actuator back.
        std::thread::sleep(std::time::Duration::from_millis(50));
        arb.set_manual();
    }
}
