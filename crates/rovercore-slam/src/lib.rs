//! `rovercore-slam` – owns the SLAM ingestion thread and the shared
//! map/pose/scan cache.
//!
//! [`SlamCoordinator`] is the only writer of pose/map/scan state. A
//! single mutex guards the cache; every reader takes the lock only long
//! enough to clone out an owned copy — no internal buffer is ever handed
//! out by reference, which is what lets `map()` return a fresh
//! allocation every time instead of aliasing the worker's buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rovercore_hal::{ScanReadOutcome, ScanSource, SlamEngine};
use rovercore_types::{Pose, Scan, SCAN_READ_TIMEOUT};

const SLAM_TICK_INTERVAL: Duration = Duration::from_millis(166);
const RESAMPLE_RAYS: usize = 360;
const RESAMPLE_MAX_RANGE_MM: u16 = 8000;

struct Cache {
    scan: Scan,
    pose: Pose,
    map: Vec<u8>,
    last_update: Option<Instant>,
}

/// Owns one dedicated worker thread driving `ScanSource` → `SlamEngine`
/// and caching the result for concurrent readers.
pub struct SlamCoordinator {
    scan_source: Arc<Mutex<Box<dyn ScanSource>>>,
    engine: Arc<Mutex<Box<dyn SlamEngine>>>,
    cache: Arc<Mutex<Cache>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    map_side_px: u32,
}

impl SlamCoordinator {
    pub fn new(scan_source: Box<dyn ScanSource>, engine: Box<dyn SlamEngine>, map_side_px: u32) -> Self {
        Self {
            scan_source: Arc::new(Mutex::new(scan_source)),
            engine: Arc::new(Mutex::new(engine)),
            cache: Arc::new(Mutex::new(Cache {
                scan: Scan::default(),
                pose: Pose::default(),
                map: vec![255u8; (map_side_px as usize) * (map_side_px as usize)],
                last_update: None,
            })),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
            map_side_px,
        }
    }

    /// Idempotent: does nothing if already running.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let scan_source = self.scan_source.clone();
        let engine = self.engine.clone();
        let cache = self.cache.clone();
        let running = self.running.clone();

        let join = std::thread::spawn(move || {
            tracing::info!("slam worker started");
            while running.load(Ordering::Acquire) {
                let outcome = {
                    let mut src = scan_source.lock().expect("scan source mutex poisoned");
                    src.read_scan(SCAN_READ_TIMEOUT)
                };
                match outcome {
                    Ok(ScanReadOutcome::Normal(scan)) => {
                        let ranges = scan.resample_fixed(RESAMPLE_RAYS, RESAMPLE_MAX_RANGE_MM);
                        let mut eng = engine.lock().expect("engine mutex poisoned");
                        if let Err(e) = eng.update(&ranges) {
                            tracing::warn!(error = %e, "slam engine update failed");
                        }
                        let pose = eng.get_pose();
                        let mut c = cache.lock().expect("cache mutex poisoned");
                        eng.get_map(&mut c.map);
                        c.pose = pose;
                        c.scan = scan;
                        c.last_update = Some(Instant::now());
                        drop(c);
                        std::thread::sleep(SLAM_TICK_INTERVAL);
                    }
                    Ok(ScanReadOutcome::Wait) => continue,
                    Ok(ScanReadOutcome::Timeout) => {
                        tracing::error!("scan source timed out; stopping slam worker");
                        scan_source.lock().expect("scan source mutex poisoned").stop();
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "scan source read failed; stopping slam worker");
                        scan_source.lock().expect("scan source mutex poisoned").stop();
                        break;
                    }
                }
            }
            running.store(false, Ordering::Release);
            tracing::info!("slam worker stopped");
        });

        *self.handle.lock().expect("handle mutex poisoned") = Some(join);
    }

    /// Idempotent: does nothing if not running. Flips the run flag; the
    /// worker exits after its current iteration.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(h) = self.handle.lock().expect("handle mutex poisoned").take() {
            let _ = h.join();
        }
        self.scan_source.lock().expect("scan source mutex poisoned").stop();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn latest_scan(&self) -> Scan {
        self.cache.lock().expect("cache mutex poisoned").scan.clone()
    }

    pub fn position(&self) -> Pose {
        self.cache.lock().expect("cache mutex poisoned").pose
    }

    /// A fresh, independently owned copy — never aliases the worker's
    /// internal buffer.
    pub fn map(&self) -> Vec<u8> {
        self.cache.lock().expect("cache mutex poisoned").map.clone()
    }

    /// Combined read of pose, map, and scan from a single lock
    /// acquisition, so callers needing all three together get values from
    /// the same SLAM iteration.
    pub fn snapshot(&self) -> (Pose, Vec<u8>, Scan) {
        let c = self.cache.lock().expect("cache mutex poisoned");
        (c.pose, c.map.clone(), c.scan.clone())
    }

    /// True if the cache has been refreshed within `max_age`. A tracker
    /// must not plan against a stale map while active (see the 1 s
    /// freshness invariant).
    pub fn is_map_fresh(&self, max_age: Duration) -> bool {
        match self.cache.lock().expect("cache mutex poisoned").last_update {
            Some(t) => t.elapsed() <= max_age,
            None => false,
        }
    }

    pub fn map_side_px(&self) -> u32 {
        self.map_side_px
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rovercore_hal::sim::{SimScanSource, SimSlamEngine};
    use rovercore_hal::ScanSource as _;
    use rovercore_types::ScanPoint;

    fn coordinator_with_one_sweep() -> SlamCoordinator {
        let mut src = SimScanSource::new();
        src.start().unwrap();
        src.push(ScanReadOutcome::Normal(Scan {
            points: vec![ScanPoint::from_polar(0.0, 1000, 200, 0)],
        }));
        let engine = SimSlamEngine::new(4);
        SlamCoordinator::new(Box::new(src), Box::new(engine), 4)
    }

    #[test]
    fn map_returns_exact_side_squared_bytes() {
        let coord = coordinator_with_one_sweep();
        assert_eq!(coord.map().len(), 16);
    }

    #[test]
    fn not_running_until_started() {
        let coord = coordinator_with_one_sweep();
        assert!(!coord.is_running());
    }

    #[test]
    fn is_map_fresh_false_before_any_update() {
        let coord = coordinator_with_one_sweep();
        assert!(!coord.is_map_fresh(Duration::from_secs(1)));
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let coord = coordinator_with_one_sweep();
        coord.start();
        // second start is a no-op, not a second thread.
        coord.start();
        coord.stop();
        coord.stop();
        assert!(!coord.is_running());
    }

    #[test]
    fn worker_processes_one_sweep_then_times_out_and_stops() {
        let coord = coordinator_with_one_sweep();
        coord.start();
        // scan source drains its one scripted sweep then returns Timeout,
        // which the worker treats as a terminal condition.
        std::thread::sleep(Duration::from_millis(50));
        coord.stop();
        assert!(!coord.is_running());
        let (_, map, scan) = coord.snapshot();
        assert_eq!(map.len(), 16);
        assert_eq!(scan.points.len(), 1);
    }

    #[test]
    fn snapshot_returns_same_iteration_pose_map_scan() {
        let coord = coordinator_with_one_sweep();
        coord.start();
        std::thread::sleep(Duration::from_millis(50));
        coord.stop();
        let (pose, map, scan) = coord.snapshot();
        assert_eq!(pose, coord.position());
        assert_eq!(map, coord.map());
        assert_eq!(scan, coord.latest_scan());
    }
}
