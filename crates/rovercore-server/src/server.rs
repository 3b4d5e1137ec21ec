//! [`RoverServer`] – HTTP + WebSocket transport for the robot control
//! core.
//!
//! Listens on `0.0.0.0:18080` (configurable via [`RoverServer::with_port`]).
//!
//! * Plain HTTP requests are dispatched by method + path to one of the
//!   five REST routes.
//! * WebSocket upgrades are routed by path to either the `/ws/map` or
//!   `/ws/lidar` push loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

use rovercore_slam::SlamCoordinator;
use rovercore_tracker::ModeArbiter;
use rovercore_types::RobotError;

/// Default TCP port for the robot control core's HTTP/WebSocket server.
pub const DEFAULT_PORT: u16 = 18080;

const WS_MAP_INTERVAL: Duration = Duration::from_millis(500);
const WS_LIDAR_INTERVAL: Duration = Duration::from_millis(166);

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Everything a connection handler needs to answer a request. Cheap to
/// clone (an `Arc` and two `Copy` floats/ints) so each accepted
/// connection gets its own owned copy.
struct AppState {
    coordinator: Arc<SlamCoordinator>,
    arbiter: Arc<ModeArbiter>,
    map_meters: f64,
    map_pixels: u32,
}

// ---------------------------------------------------------------------------
// RoverServer
// ---------------------------------------------------------------------------

/// HTTP + WebSocket server bridging external clients to the
/// [`SlamCoordinator`] cache and the [`ModeArbiter`] command surface.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use rovercore_server::RoverServer;
///
/// # async fn example(coordinator: Arc<rovercore_slam::SlamCoordinator>, arbiter: Arc<rovercore_tracker::ModeArbiter>) {
/// RoverServer::new(coordinator, arbiter, 15.0, 800)
///     .run()
///     .await
///     .expect("server failed");
/// # }
/// ```
pub struct RoverServer {
    state: Arc<AppState>,
    port: u16,
}

impl RoverServer {
    /// Create a server backed by `coordinator`/`arbiter` on the
    /// [`DEFAULT_PORT`]. `map_meters`/`map_pixels` describe the same
    /// map geometry the coarse grid and pose-to-pixel conversions use.
    pub fn new(coordinator: Arc<SlamCoordinator>, arbiter: Arc<ModeArbiter>, map_meters: f64, map_pixels: u32) -> Self {
        Self {
            state: Arc::new(AppState { coordinator, arbiter, map_meters, map_pixels }),
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Return the configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Start the server. Runs until the process is terminated; accept
    /// errors are logged and do not stop the loop.
    pub async fn run(self) -> Result<(), RobotError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RobotError::TransportFailure { device: "http", source: format!("bind error on {addr}: {e}") })?;

        tracing::info!(%addr, "rovercore-server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, state).await {
                            tracing::warn!(%peer, error = %e, "connection error");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept error");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection dispatch
// ---------------------------------------------------------------------------

async fn handle_connection(stream: TcpStream, peer: SocketAddr, state: Arc<AppState>) -> Result<(), RobotError> {
    // Peek so the handshake (if any) still sees the full request; `peek`
    // does not consume the socket's buffer.
    let mut buf = [0u8; 1024];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| RobotError::TransportFailure { device: "http", source: format!("peek error from {peer}: {e}") })?;

    let preview = String::from_utf8_lossy(&buf[..n]);
    let mut lines = preview.lines();
    let request_line = lines.next().unwrap_or("");
    let path = request_line.split_whitespace().nth(1).unwrap_or("/").to_string();
    let is_ws_upgrade = preview
        .lines()
        .any(|line| line.to_lowercase().starts_with("upgrade:") && line.to_lowercase().contains("websocket"));

    if is_ws_upgrade {
        match path.as_str() {
            "/ws/map" => handle_ws_map(stream, peer, state).await,
            "/ws/lidar" => handle_ws_lidar(stream, peer, state).await,
            _ => Ok(()),
        }
    } else {
        serve_http(stream, state).await
    }
}

// ---------------------------------------------------------------------------
// Plain HTTP: request parsing + route dispatch
// ---------------------------------------------------------------------------

async fn serve_http(mut stream: TcpStream, state: Arc<AppState>) -> Result<(), RobotError> {
    let (method, path, body) = read_request(&mut stream).await?;
    let (status, body) = dispatch_http(&method, &path, &body, &state);
    let response = http_response(status, &body);
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| RobotError::TransportFailure { device: "http", source: format!("write error: {e}") })?;
    Ok(())
}

/// Read the request line, headers, and (if `Content-Length` is
/// present) the body off `stream`. Returns `(method, path, body)`.
async fn read_request(stream: &mut TcpStream) -> Result<(String, String, Vec<u8>), RobotError> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .await
        .map_err(|e| RobotError::TransportFailure { device: "http", source: format!("request line read error: {e}") })?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("/").to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| RobotError::TransportFailure { device: "http", source: format!("header read error: {e}") })?;
        if read == 0 || line == "\r\n" || line == "\n" {
            break;
        }
        if let Some(value) = line.split_once(':') {
            if value.0.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.1.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader
            .read_exact(&mut body)
            .await
            .map_err(|e| RobotError::TransportFailure { device: "http", source: format!("body read error: {e}") })?;
    }

    Ok((method, path, body))
}

/// Route a parsed request to its handler. Returns `(status, json body)`.
fn dispatch_http(method: &str, path: &str, body: &[u8], state: &AppState) -> (u16, String) {
    match (method, path) {
        ("GET", "/lidar/data") => lidar_data(state),
        ("GET", "/robot/position") => robot_position(state),
        ("POST", "/arduino/send") => arduino_send(body, state),
        ("POST", "/robot/target") => robot_target(body, state),
        ("POST", "/robot/mode") => robot_mode(body, state),
        _ => error_response(404, "not found"),
    }
}

fn lidar_data(state: &AppState) -> (u16, String) {
    let scan = state.coordinator.latest_scan();
    let points: Vec<Value> = scan.points.iter().map(|p| json!({"x": p.x_mm, "y": p.y_mm})).collect();
    (200, json!({"points": points}).to_string())
}

fn robot_position(state: &AppState) -> (u16, String) {
    let pose = state.coordinator.position();
    (200, serde_json::to_string(&pose).unwrap_or_else(|_| "{}".to_string()))
}

fn arduino_send(body: &[u8], state: &AppState) -> (u16, String) {
    let Ok(json) = serde_json::from_slice::<Value>(body) else {
        return error_response(400, "invalid JSON");
    };
    let Some(data) = json.get("data").and_then(Value::as_str) else {
        return error_response(400, "missing `data` field");
    };
    match state.arbiter.send_raw(data) {
        Ok(()) => (200, json!({"status": "ok"}).to_string()),
        Err(e) => robot_error_response(&e),
    }
}

fn robot_target(body: &[u8], state: &AppState) -> (u16, String) {
    let Ok(json) = serde_json::from_slice::<Value>(body) else {
        return error_response(400, "invalid JSON");
    };
    let (Some(x_pixel), Some(y_pixel)) = (
        json.get("x_pixel").and_then(Value::as_i64),
        json.get("y_pixel").and_then(Value::as_i64),
    ) else {
        return error_response(400, "missing `x_pixel`/`y_pixel`");
    };
    if x_pixel < 0 || y_pixel < 0 || x_pixel as u32 >= state.map_pixels || y_pixel as u32 >= state.map_pixels {
        return error_response(400, "target out of map bounds");
    }

    let cell_px = rovercore_planner::cell_px(state.map_meters, state.map_pixels).max(1);
    let goal = ((x_pixel as u32) / cell_px, (y_pixel as u32) / cell_px);

    match state.arbiter.drive_to(goal) {
        Ok(()) => (200, json!({"status": "ok"}).to_string()),
        Err(e) => robot_error_response(&e),
    }
}

fn robot_mode(body: &[u8], state: &AppState) -> (u16, String) {
    let Ok(json) = serde_json::from_slice::<Value>(body) else {
        return error_response(400, "invalid JSON");
    };
    match json.get("mode").and_then(Value::as_str) {
        Some("manual") => {
            state.arbiter.set_manual();
            (200, json!({"mode": "manual"}).to_string())
        }
        Some("explore") => {
            state.arbiter.set_explore();
            (200, json!({"mode": "explore"}).to_string())
        }
        _ => error_response(400, "mode must be \"manual\" or \"explore\""),
    }
}

fn robot_error_response(e: &RobotError) -> (u16, String) {
    let status = match e {
        RobotError::ModeConflict => 403,
        RobotError::InvalidInput { .. } => 400,
        _ => 500,
    };
    error_response(status, &e.to_string())
}

fn error_response(status: u16, reason: &str) -> (u16, String) {
    (status, json!({"status": "error", "reason": reason}).to_string())
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

fn http_response(status: u16, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        reason_phrase(status),
        body.len(),
        body
    )
}

// ---------------------------------------------------------------------------
// WebSocket: per-client push streams
// ---------------------------------------------------------------------------

async fn handle_ws_map(stream: TcpStream, peer: SocketAddr, state: Arc<AppState>) -> Result<(), RobotError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| RobotError::TransportFailure { device: "ws/map", source: format!("handshake from {peer}: {e}") })?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut ticker = tokio::time::interval(WS_MAP_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let (pose, map_bytes, _scan) = state.coordinator.snapshot();
                let side = state.coordinator.map_side_px() as usize;
                let rows: Vec<&[u8]> = if side == 0 { Vec::new() } else { map_bytes.chunks(side).collect() };
                let (x_pixel, y_pixel) = pose.to_pixel(state.map_meters, state.map_pixels);
                let payload = json!({
                    "map": rows,
                    "position": {"x_pixel": x_pixel, "y_pixel": y_pixel, "theta_degrees": pose.theta_degrees},
                });
                if ws_tx.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(other)) => tracing::debug!(?other, "ignoring inbound ws message"),
                }
            }
        }
    }
    Ok(())
}

async fn handle_ws_lidar(stream: TcpStream, peer: SocketAddr, state: Arc<AppState>) -> Result<(), RobotError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| RobotError::TransportFailure { device: "ws/lidar", source: format!("handshake from {peer}: {e}") })?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut ticker = tokio::time::interval(WS_LIDAR_INTERVAL);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let scan = state.coordinator.latest_scan();
                let points: Vec<Value> = scan.points.iter().map(|p| json!({"x": p.x_mm, "y": p.y_mm})).collect();
                let payload = json!({"points": points});
                if ws_tx.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(other)) => tracing::debug!(?other, "ignoring inbound ws message"),
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rovercore_hal::sim::{SimActuator, SimScanSource, SimSlamEngine};
    use rovercore_tracker::TrackerGeometry;
    use rovercore_hal::ActuatorKinematics;
    use rovercore_planner::CoarseGridThresholds;

    fn make_state() -> AppState {
        let src = SimScanSource::new();
        let engine = SimSlamEngine::new(40);
        let coordinator = Arc::new(SlamCoordinator::new(Box::new(src), Box::new(engine), 40));
        let geometry = TrackerGeometry {
            kinematics: ActuatorKinematics::default(),
            thresholds: CoarseGridThresholds::default(),
            map_meters: 1.0,
            map_pixels: 40,
        };
        let arbiter = Arc::new(ModeArbiter::new(Arc::clone(&coordinator), Box::new(SimActuator::new()), geometry));
        AppState { coordinator, arbiter, map_meters: 1.0, map_pixels: 40 }
    }

    #[test]
    fn default_port_is_18080() {
        let state = make_state();
        let server = RoverServer { state: Arc::new(state), port: DEFAULT_PORT };
        assert_eq!(server.port(), 18080);
    }

    #[test]
    fn with_port_overrides_default() {
        let state = make_state();
        let server = RoverServer { state: Arc::new(state), port: DEFAULT_PORT }.with_port(9999);
        assert_eq!(server.port(), 9999);
    }

    #[test]
    fn lidar_data_returns_empty_points_before_any_scan() {
        let state = make_state();
        let (status, body) = lidar_data(&state);
        assert_eq!(status, 200);
        assert_eq!(body, json!({"points": []}).to_string());
    }

    #[test]
    fn robot_position_serializes_pose_fields() {
        let state = make_state();
        let (status, body) = robot_position(&state);
        assert_eq!(status, 200);
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert!(parsed.get("x_mm").is_some());
        assert!(parsed.get("y_mm").is_some());
        assert!(parsed.get("theta_degrees").is_some());
    }

    #[test]
    fn arduino_send_rejects_invalid_json() {
        let state = make_state();
        let (status, _) = arduino_send(b"not json", &state);
        assert_eq!(status, 400);
    }

    #[test]
    fn arduino_send_succeeds_in_manual_mode() {
        let state = make_state();
        let (status, body) = arduino_send(br#"{"data":"0;0;0;0"}"#, &state);
        assert_eq!(status, 200);
        assert_eq!(body, json!({"status": "ok"}).to_string());
    }

    #[test]
    fn arduino_send_rejects_when_not_manual() {
        let state = make_state();
        state.arbiter.set_explore();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let (status, _) = arduino_send(br#"{"data":"0;0;0;0"}"#, &state);
        assert_eq!(status, 403);
        state.arbiter.set_manual();
    }

    #[test]
    fn robot_target_rejects_out_of_bounds_pixels() {
        let state = make_state();
        let (status, _) = robot_target(br#"{"x_pixel":9999,"y_pixel":0}"#, &state);
        assert_eq!(status, 400);
    }

    #[test]
    fn robot_target_accepts_in_bounds_pixels() {
        let state = make_state();
        let (status, body) = robot_target(br#"{"x_pixel":0,"y_pixel":0}"#, &state);
        assert_eq!(status, 200);
        assert_eq!(body, json!({"status": "ok"}).to_string());
        std::thread::sleep(std::time::Duration::from_millis(20));
        state.arbiter.set_manual();
    }

    #[test]
    fn robot_mode_rejects_unknown_mode_string() {
        let state = make_state();
        let (status, _) = robot_mode(br#"{"mode":"sideways"}"#, &state);
        assert_eq!(status, 400);
    }

    #[test]
    fn robot_mode_switches_to_explore_and_back() {
        let state = make_state();
        let (status, body) = robot_mode(br#"{"mode":"explore"}"#, &state);
        assert_eq!(status, 200);
        assert_eq!(body, json!({"mode": "explore"}).to_string());
        let (status, body) = robot_mode(br#"{"mode":"manual"}"#, &state);
        assert_eq!(status, 200);
        assert_eq!(body, json!({"mode": "manual"}).to_string());
    }

    #[test]
    fn dispatch_unknown_route_is_404() {
        let state = make_state();
        let (status, _) = dispatch_http("GET", "/unknown", b"", &state);
        assert_eq!(status, 404);
    }

    #[test]
    fn http_response_includes_content_length_and_status_line() {
        let resp = http_response(400, r#"{"status":"error"}"#);
        assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(resp.contains("Content-Length: 19"));
    }
}
