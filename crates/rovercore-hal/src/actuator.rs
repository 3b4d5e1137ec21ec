//! The wheel controller abstraction.
//!
//! Every primitive is a thin wrapper over [`Actuator::send`] transmitting a
//! fixed four-wheel velocity tuple over a line-terminated serial channel.
//! The open-loop timing model lives alongside the trait since both the
//! production serial adapter and every simulated fake need the same
//! formulas to compute how long to hold a primitive.

use std::io::Write;
use std::time::Duration;

use rovercore_types::RobotError;

/// Differential-drive kinematics used to convert distances/angles into
/// hold times for the open-loop timing model.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActuatorKinematics {
    pub wheel_diameter_mm: f64,
    pub rpm: f64,
    pub track_mm: f64,
}

impl Default for ActuatorKinematics {
    fn default() -> Self {
        Self {
            wheel_diameter_mm: 60.0,
            rpm: 100.0,
            track_mm: 225.0,
        }
    }
}

impl ActuatorKinematics {
    /// Seconds to travel `d_mm` forward at the configured wheel speed.
    pub fn forward_time(&self, d_mm: f64) -> f64 {
        let wheel_circumference_mm = std::f64::consts::PI * self.wheel_diameter_mm;
        let rotations = d_mm / wheel_circumference_mm;
        rotations / (self.rpm / 60.0)
    }

    /// Seconds to rotate in place by `angle_deg`, modeled as the
    /// equivalent forward distance traced by a wheel at `track_mm` radius.
    pub fn turn_time(&self, angle_deg: f64) -> f64 {
        let arc_mm = std::f64::consts::PI * self.track_mm * (angle_deg / 360.0);
        self.forward_time(arc_mm)
    }
}

/// Capability-based abstraction over the wheel controller. Implementors
/// may be a real serial adapter or a deterministic test fake; callers
/// never depend on the concrete type.
pub trait Actuator: Send {
    fn connect(&mut self) -> Result<(), RobotError>;

    /// Transmit a raw, newline-terminated payload verbatim.
    fn send(&mut self, raw: &str) -> Result<(), RobotError>;

    fn forward(&mut self) -> Result<(), RobotError> {
        self.send("50;50;50;50")
    }

    fn backward(&mut self) -> Result<(), RobotError> {
        self.send("-50;-50;-50;-50")
    }

    fn turn_left(&mut self) -> Result<(), RobotError> {
        self.send("50;-50;50;-50")
    }

    fn turn_right(&mut self) -> Result<(), RobotError> {
        self.send("-50;50;-50;50")
    }

    fn stop(&mut self) -> Result<(), RobotError> {
        self.send("0;0;0;0")
    }
}

/// Production adapter speaking the fixed-tuple ASCII protocol over a real
/// serial port: 8N1, no flow control, one `"<v1>;<v2>;<v3>;<v4>\n"` line
/// per command.
pub struct SerialActuator {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialActuator {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            port: None,
        }
    }
}

impl Actuator for SerialActuator {
    fn connect(&mut self) -> Result<(), RobotError> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(200))
            .open()
            .map_err(|e| RobotError::DeviceUnavailable {
                device: "actuator",
                source: e.to_string(),
            })?;
        self.port = Some(port);
        tracing::info!(port = %self.port_name, baud = self.baud_rate, "actuator connected");
        Ok(())
    }

    fn send(&mut self, raw: &str) -> Result<(), RobotError> {
        let port = self.port.as_mut().ok_or(RobotError::DeviceUnavailable {
            device: "actuator",
            source: "not connected".to_string(),
        })?;
        let mut msg = raw.to_string();
        msg.push('\n');
        port.write_all(msg.as_bytes()).map_err(|e| RobotError::TransportFailure {
            device: "actuator",
            source: e.to_string(),
        })
    }
}

impl Drop for SerialActuator {
    fn drop(&mut self) {
        if self.port.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "failed to send stop before actuator disconnect");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_time_zero_distance_is_zero() {
        let k = ActuatorKinematics::default();
        assert_eq!(k.forward_time(0.0), 0.0);
    }

    #[test]
    fn turn_time_zero_angle_is_zero() {
        let k = ActuatorKinematics::default();
        assert_eq!(k.turn_time(0.0), 0.0);
    }

    #[test]
    fn forward_time_scales_linearly_with_distance() {
        let k = ActuatorKinematics::default();
        let t1 = k.forward_time(100.0);
        let t2 = k.forward_time(200.0);
        assert!((t2 - 2.0 * t1).abs() < 1e-9);
    }

    #[test]
    fn turn_time_matches_forward_time_of_equivalent_arc() {
        let k = ActuatorKinematics::default();
        let arc = std::f64::consts::PI * k.track_mm * (90.0 / 360.0);
        assert!((k.turn_time(90.0) - k.forward_time(arc)).abs() < 1e-9);
    }
}
