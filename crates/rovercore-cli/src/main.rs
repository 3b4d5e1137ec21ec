//! `rovercore-cli` – process entrypoint for the robot control core.
//!
//! Brings up the LiDAR and actuator serial adapters, starts the SLAM
//! worker and the mode arbiter, and serves the HTTP/WebSocket transport
//! until the process receives Ctrl-C.

mod config;

use std::sync::Arc;

use rovercore_hal::{Actuator, ScanSource, SerialActuator, SerialScanSource};
use rovercore_hal::sim::SimSlamEngine;
use rovercore_slam::SlamCoordinator;
use rovercore_server::RoverServer;
use rovercore_tracker::{ModeArbiter, TrackerGeometry};

#[tokio::main]
async fn main() {
    init_logging();

    let cfg = config::load();
    tracing::info!(?cfg, "loaded runtime configuration");

    let mut scan_source = SerialScanSource::new(cfg.lidar.port.clone(), cfg.lidar.baud);
    if let Err(e) = scan_source.connect() {
        tracing::error!(error = %e, "lidar connect failed, exiting");
        std::process::exit(1);
    }
    if let Err(e) = scan_source.start() {
        tracing::error!(error = %e, "lidar start failed, exiting");
        std::process::exit(1);
    }

    let mut actuator = SerialActuator::new(cfg.actuator.port.clone(), cfg.actuator.baud);
    if let Err(e) = actuator.connect() {
        // Non-fatal: the process still serves HTTP so a caller can
        // observe the degraded state via /robot/position and
        // /lidar/data, even though /arduino/send and /robot/target
        // will then fail at the send boundary.
        tracing::warn!(error = %e, "actuator connect failed, continuing without it");
    }

    // rovercore-hal ships only a deterministic SimSlamEngine fake; the
    // real estimator's scan-matching internals are out of scope here
    // and production wiring is expected to substitute a real
    // implementation of the same SlamEngine trait.
    let engine = SimSlamEngine::new(cfg.map_pixels);

    let coordinator = Arc::new(SlamCoordinator::new(Box::new(scan_source), Box::new(engine), cfg.map_pixels));
    coordinator.start();

    let geometry = TrackerGeometry {
        kinematics: cfg.kinematics,
        thresholds: cfg.coarse_grid,
        map_meters: cfg.map_meters,
        map_pixels: cfg.map_pixels,
    };
    let arbiter = Arc::new(ModeArbiter::new(Arc::clone(&coordinator), Box::new(actuator), geometry));

    install_shutdown_handler(Arc::clone(&coordinator), Arc::clone(&arbiter));

    let server = RoverServer::new(Arc::clone(&coordinator), Arc::clone(&arbiter), cfg.map_meters, cfg.map_pixels)
        .with_port(cfg.server_port);

    tracing::info!(port = server.port(), "starting http/ws transport");
    if let Err(e) = server.run().await {
        tracing::error!(error = %e, "http/ws transport failed");
        std::process::exit(1);
    }
}

/// Initialise `tracing-subscriber` from `RUST_LOG` (default `info`),
/// with an optional newline-delimited JSON formatter toggled by
/// `ROVERCORE_LOG_FORMAT=json` for log aggregators.
fn init_logging() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("ROVERCORE_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).with_target(true).compact().init();
    }
}

/// On Ctrl-C, cancel any in-flight tracker and stop the actuator first,
/// then stop the SLAM/LiDAR worker, then exit. Devices are acquired
/// LiDAR-then-actuator at startup, so shutdown releases them in the
/// reverse order: actuator first, LiDAR second.
fn install_shutdown_handler(coordinator: Arc<SlamCoordinator>, arbiter: Arc<ModeArbiter>) {
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Ctrl-C received, shutting down");
        arbiter.shutdown();
        coordinator.stop();
        std::process::exit(0);
    }) {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }
}
