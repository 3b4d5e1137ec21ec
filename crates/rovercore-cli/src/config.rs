//! Runtime configuration – reads/writes `~/.rovercore/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use rovercore_hal::ActuatorKinematics;
use rovercore_planner::CoarseGridThresholds;

/// Serial port + baud rate for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialDevice {
    pub port: String,
    pub baud: u32,
}

/// Persisted runtime configuration, stored in `~/.rovercore/config.toml`.
/// Every tunable named in this system's design (serial ports/bauds, map
/// geometry, coarse-grid thresholds, actuator kinematics, server port)
/// lives here; timing constants internal to the tracker's state machine
/// (stuck limit, replan budget, collision distance) are not — they are
/// part of the state machine's definition, not deployment-site tuning.
#[derive(Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_lidar")]
    pub lidar: SerialDevice,

    #[serde(default = "default_actuator")]
    pub actuator: SerialDevice,

    /// Map span in metres, edge to edge.
    #[serde(default = "default_map_meters")]
    pub map_meters: f64,

    /// Map side length in pixels.
    #[serde(default = "default_map_pixels")]
    pub map_pixels: u32,

    #[serde(default)]
    pub coarse_grid: CoarseGridThresholds,

    #[serde(default)]
    pub kinematics: ActuatorKinematics,

    /// HTTP/WebSocket server port.
    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_lidar() -> SerialDevice {
    SerialDevice { port: "/dev/ttyUSB0".to_string(), baud: 230_400 }
}
fn default_actuator() -> SerialDevice {
    SerialDevice { port: "/dev/ttyACM0".to_string(), baud: 9600 }
}
fn default_map_meters() -> f64 {
    15.0
}
fn default_map_pixels() -> u32 {
    800
}
fn default_server_port() -> u16 {
    18080
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // No secrets live in this config, but the redacted-`Debug` shape
        // is kept for parity with how the rest of this codebase's
        // config structs are always written.
        f.debug_struct("RuntimeConfig")
            .field("lidar", &self.lidar)
            .field("actuator", &self.actuator)
            .field("map_meters", &self.map_meters)
            .field("map_pixels", &self.map_pixels)
            .field("coarse_grid", &self.coarse_grid)
            .field("kinematics", &self.kinematics)
            .field("server_port", &self.server_port)
            .finish()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            lidar: default_lidar(),
            actuator: default_actuator(),
            map_meters: default_map_meters(),
            map_pixels: default_map_pixels(),
            coarse_grid: CoarseGridThresholds::default(),
            kinematics: ActuatorKinematics::default(),
            server_port: default_server_port(),
        }
    }
}

/// Return the configured path, `$ROVERCORE_CONFIG` if set, otherwise
/// `~/.rovercore/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("ROVERCORE_CONFIG") {
        return PathBuf::from(p);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".rovercore").join("config.toml")
}

/// Load the config from disk, applying `ROVERCORE_*` overrides. Falls
/// back to `RuntimeConfig::default()` (logging that it did so) if the
/// file does not exist; first run does not require a wizard.
pub fn load() -> RuntimeConfig {
    match load_from(&config_path()) {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            tracing::info!("no config file found, running with defaults");
            let mut cfg = RuntimeConfig::default();
            apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, running with defaults");
            let mut cfg = RuntimeConfig::default();
            apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<RuntimeConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: RuntimeConfig = toml::from_str(&raw).map_err(|e| format!("failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ROVERCORE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ROVERCORE_LIDAR_PORT` | `lidar.port` |
/// | `ROVERCORE_LIDAR_BAUD` | `lidar.baud` |
/// | `ROVERCORE_ACTUATOR_PORT` | `actuator.port` |
/// | `ROVERCORE_ACTUATOR_BAUD` | `actuator.baud` |
/// | `ROVERCORE_MAP_METERS` | `map_meters` |
/// | `ROVERCORE_MAP_PIXELS` | `map_pixels` |
/// | `ROVERCORE_SERVER_PORT` | `server_port` |
pub fn apply_env_overrides(cfg: &mut RuntimeConfig) {
    if let Ok(v) = std::env::var("ROVERCORE_LIDAR_PORT") {
        cfg.lidar.port = v;
    }
    if let Ok(v) = std::env::var("ROVERCORE_LIDAR_BAUD")
        && let Ok(baud) = v.parse::<u32>()
    {
        cfg.lidar.baud = baud;
    }
    if let Ok(v) = std::env::var("ROVERCORE_ACTUATOR_PORT") {
        cfg.actuator.port = v;
    }
    if let Ok(v) = std::env::var("ROVERCORE_ACTUATOR_BAUD")
        && let Ok(baud) = v.parse::<u32>()
    {
        cfg.actuator.baud = baud;
    }
    if let Ok(v) = std::env::var("ROVERCORE_MAP_METERS")
        && let Ok(m) = v.parse::<f64>()
    {
        cfg.map_meters = m;
    }
    if let Ok(v) = std::env::var("ROVERCORE_MAP_PIXELS")
        && let Ok(px) = v.parse::<u32>()
    {
        cfg.map_pixels = px;
    }
    if let Ok(v) = std::env::var("ROVERCORE_SERVER_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.server_port = port;
    }
}

/// Save the config to disk, creating `~/.rovercore/` if necessary.
pub fn save(cfg: &RuntimeConfig) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &RuntimeConfig, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
