//! In-process simulated hardware for headless tests.
//!
//! These fakes let the full stack — `SlamCoordinator`, `PathTracker`,
//! `ModeArbiter` — run in tests without any physical device, following
//! the same always-succeed-and-record-what-happened shape used for every
//! simulated driver in this codebase's hardware abstraction layer.

use std::collections::VecDeque;
use std::time::Duration;

use rovercore_types::{Pose, RobotError, Scan};

use crate::actuator::Actuator;
use crate::scan_source::{ScanReadOutcome, ScanSource};
use crate::slam_engine::SlamEngine;

// ────────────────────────────────────────────────────────────────────────────
// SimActuator
// ────────────────────────────────────────────────────────────────────────────

/// A simulated actuator that records every command it was sent. Always
/// succeeds unless `fail_next` has been armed.
#[derive(Debug, Default)]
pub struct SimActuator {
    pub history: Vec<String>,
    pub fail_next: bool,
}

impl SimActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&str> {
        self.history.last().map(|s| s.as_str())
    }
}

impl Actuator for SimActuator {
    fn connect(&mut self) -> Result<(), RobotError> {
        Ok(())
    }

    fn send(&mut self, raw: &str) -> Result<(), RobotError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(RobotError::TransportFailure {
                device: "sim-actuator",
                source: "forced test failure".to_string(),
            });
        }
        self.history.push(raw.to_string());
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimScanSource
// ────────────────────────────────────────────────────────────────────────────

/// A simulated LiDAR that replays a scripted queue of outcomes. Once the
/// queue is drained, every further read returns `Timeout`.
#[derive(Debug, Default)]
pub struct SimScanSource {
    pub script: VecDeque<ScanReadOutcome>,
    pub started: bool,
}

impl SimScanSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: ScanReadOutcome) {
        self.script.push_back(outcome);
    }

    /// Convenience constructor: always yields a sweep with a single point
    /// at the given distance, forever. Useful for collision-check tests.
    pub fn always_point_at(distance_mm: u16) -> Self {
        let mut s = Self::new();
        for _ in 0..10_000 {
            s.push(ScanReadOutcome::Normal(Scan {
                points: vec![rovercore_types::ScanPoint::from_polar(0.0, distance_mm, 200, 0)],
            }));
        }
        s
    }
}

impl ScanSource for SimScanSource {
    fn connect(&mut self) -> Result<(), RobotError> {
        Ok(())
    }

    fn start(&mut self) -> Result<(), RobotError> {
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn read_scan(&mut self, _timeout: Duration) -> Result<ScanReadOutcome, RobotError> {
        if !self.started {
            return Ok(ScanReadOutcome::Wait);
        }
        Ok(self.script.pop_front().unwrap_or(ScanReadOutcome::Timeout))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimSlamEngine
// ────────────────────────────────────────────────────────────────────────────

/// A deterministic fake estimator: integrates pose linearly from the
/// count of `update` calls (no real scan matching) and returns a
/// synthetic all-free map unless told otherwise. Good enough to exercise
/// `SlamCoordinator`, `CoarseGrid`, and `PathTracker` without a real
/// particle filter.
pub struct SimSlamEngine {
    pub pose: Pose,
    pub map_side_px: u32,
    pub map_bytes: Vec<u8>,
    pub update_count: u32,
}

impl SimSlamEngine {
    pub fn new(map_side_px: u32) -> Self {
        Self {
            pose: Pose::default(),
            map_side_px,
            map_bytes: vec![255u8; (map_side_px as usize) * (map_side_px as usize)],
            update_count: 0,
        }
    }

    pub fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    pub fn block_region(&mut self, x0: u32, y0: u32, x1: u32, y1: u32) {
        for y in y0..y1.min(self.map_side_px) {
            for x in x0..x1.min(self.map_side_px) {
                let idx = (y as usize) * (self.map_side_px as usize) + x as usize;
                self.map_bytes[idx] = 0;
            }
        }
    }
}

impl SlamEngine for SimSlamEngine {
    fn update(&mut self, _distances_mm: &[u16]) -> Result<(), RobotError> {
        self.update_count += 1;
        Ok(())
    }

    fn get_pose(&self) -> Pose {
        self.pose
    }

    fn get_map(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.map_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_actuator_records_history() {
        let mut act = SimActuator::new();
        act.forward().unwrap();
        act.stop().unwrap();
        assert_eq!(act.history, vec!["50;50;50;50", "0;0;0;0"]);
    }

    #[test]
    fn sim_actuator_honours_fail_next() {
        let mut act = SimActuator::new();
        act.fail_next = true;
        assert!(act.forward().is_err());
        assert!(act.history.is_empty());
        assert!(act.forward().is_ok());
    }

    #[test]
    fn sim_scan_source_replays_script_then_times_out() {
        let mut src = SimScanSource::new();
        src.push(ScanReadOutcome::Normal(Scan::default()));
        src.start().unwrap();
        match src.read_scan(Duration::from_millis(1)).unwrap() {
            ScanReadOutcome::Normal(_) => {}
            _ => panic!("expected Normal"),
        }
        match src.read_scan(Duration::from_millis(1)).unwrap() {
            ScanReadOutcome::Timeout => {}
            _ => panic!("expected Timeout once script drains"),
        }
    }

    #[test]
    fn sim_scan_source_waits_until_started() {
        let mut src = SimScanSource::new();
        src.push(ScanReadOutcome::Normal(Scan::default()));
        match src.read_scan(Duration::from_millis(1)).unwrap() {
            ScanReadOutcome::Wait => {}
            _ => panic!("expected Wait before start()"),
        }
    }

    #[test]
    fn sim_slam_engine_returns_configured_map_and_pose() {
        let mut engine = SimSlamEngine::new(4);
        engine.set_pose(Pose { x_mm: 10.0, y_mm: 20.0, theta_degrees: 90.0 });
        engine.block_region(0, 0, 2, 2);
        engine.update(&[]).unwrap();
        assert_eq!(engine.update_count, 1);
        assert_eq!(engine.get_pose().x_mm, 10.0);
        let mut out = vec![0u8; 16];
        engine.get_map(&mut out);
        assert_eq!(out[0], 0);
        assert_eq!(out[15], 255);
    }
}
