//! `rovercore-server` – the HTTP + WebSocket transport for the robot
//! control core.
//!
//! Boots a lightweight HTTP + WebSocket server (default port `18080`,
//! see [`DEFAULT_PORT`]) that exposes the REST routes and streaming
//! WebSocket endpoints external clients use to read telemetry and issue
//! commands:
//!
//! * `GET /lidar/data`, `GET /robot/position` — point-in-time reads
//!   from the [`rovercore_slam::SlamCoordinator`] cache.
//! * `POST /arduino/send`, `POST /robot/target`, `POST /robot/mode` —
//!   dispatched to the [`rovercore_tracker::ModeArbiter`].
//! * `/ws/map` (500 ms) and `/ws/lidar` (166 ms) — per-client push
//!   streams built on the same cache reads.
//!
//! The server speaks raw HTTP/1.1 over `tokio::net::TcpListener`
//! rather than pulling in a web framework: a connection is peeked to
//! decide whether it is a WebSocket upgrade, and plain requests are
//! parsed by hand (request line, headers, `Content-Length` body).

pub mod server;

pub use server::{RoverServer, DEFAULT_PORT};
