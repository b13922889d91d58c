//! REST API endpoints for the pmsense service.
//!
//! Handlers never touch the serial port. Controls (`pause`, `resume`,
//! `port`) set flags the sampler applies on its next tick, so a response
//! reflects the request, not yet the device. The connection check is the
//! one exception: it releases the port, probes, and hands the port back.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`].

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use pmsense_core::{ProbeReport, SamplerStatus, probe, probe_candidates};
use pmsense_store::{TimeWindow, WindowStats};
use pmsense_types::Sample;

use crate::config::{AUTO_PORT, normalize_port};
use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health and status
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        // Data
        .route("/api/samples", get(get_samples))
        .route("/api/stats", get(get_stats))
        // Ports and sampler control
        .route("/api/ports", get(list_ports))
        .route("/api/port", put(set_port))
        .route("/api/pause", post(pause))
        .route("/api/resume", post(resume))
        .route("/api/check", post(check_connection))
}

/// The full application: API routes with tracing and CORS layers.
pub fn app(state: Arc<AppState>) -> Router {
    router()
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Service version.
    pub version: &'static str,
    /// Current timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Seconds since the service started.
    pub uptime_seconds: u64,
    /// Sampler connection and control state.
    pub sampler: SamplerStatus,
    /// Samples held in memory.
    pub samples_retained: usize,
    /// Most recent sample.
    pub latest: Option<Sample>,
}

/// Get sampler status and the latest sample.
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        uptime_seconds: state.uptime_seconds(),
        sampler: state.sampler.status(),
        samples_retained: state.store.len(),
        latest: state.store.latest(),
    })
}

/// Query parameters selecting a window preset.
#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    /// `1h`, `3h`, `12h`, `24h`, or `all`. Defaults to `1h`.
    pub window: Option<String>,
}

impl WindowQuery {
    /// Parse the requested window.
    pub fn window(&self) -> Result<TimeWindow, AppError> {
        match &self.window {
            None => Ok(TimeWindow::default()),
            Some(raw) => raw.parse().map_err(AppError::BadRequest),
        }
    }
}

/// Samples in a window.
#[derive(Debug, Serialize)]
pub struct SamplesResponse {
    pub window: TimeWindow,
    pub count: usize,
    pub samples: Vec<Sample>,
}

/// Get samples for a window, oldest first.
async fn get_samples(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<SamplesResponse>, AppError> {
    let window = query.window()?;
    let samples = state.store.samples(window);
    Ok(Json(SamplesResponse {
        window,
        count: samples.len(),
        samples,
    }))
}

/// Get now/avg/max statistics for a window.
async fn get_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<WindowStats>, AppError> {
    let window = query.window()?;
    Ok(Json(state.store.stats(window)))
}

/// Port choices for operators.
#[derive(Debug, Serialize)]
pub struct PortsResponse {
    /// `"auto"` followed by discovered ports.
    pub ports: Vec<String>,
    /// Current target (`"auto"` when scanning).
    pub selected: String,
}

/// List discovered ports plus the `auto` choice.
async fn list_ports(State(state): State<Arc<AppState>>) -> Json<PortsResponse> {
    let discovered = state.backend.ports.list_ports().await;
    let mut ports = Vec::with_capacity(discovered.len() + 1);
    ports.push(AUTO_PORT.to_string());
    ports.extend(discovered);
    Json(PortsResponse {
        ports,
        selected: selected_port(&state),
    })
}

fn selected_port(state: &AppState) -> String {
    state
        .sampler
        .target_port()
        .unwrap_or_else(|| AUTO_PORT.to_string())
}

/// Request to change the target port.
#[derive(Debug, Deserialize)]
pub struct SetPortRequest {
    /// Port name, `"auto"`, or `null`.
    pub port: Option<String>,
}

/// Result of a control action.
#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    pub paused: bool,
    pub selected: String,
}

impl ControlResponse {
    fn new(state: &AppState, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            paused: state.sampler.is_paused(),
            selected: selected_port(state),
        }
    }
}

/// Change the target port. The sampler reconnects on its next tick.
async fn set_port(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SetPortRequest>,
) -> Result<Json<ControlResponse>, AppError> {
    if request.port.as_deref().is_some_and(|p| p.trim().is_empty()) {
        return Err(AppError::BadRequest(
            "port cannot be empty (use \"auto\" instead)".to_string(),
        ));
    }
    let port = normalize_port(request.port.as_deref());
    state.sampler.set_port(port);
    let response = ControlResponse::new(&state, "Port selection updated");
    Ok(Json(response))
}

/// Pause sampling. The port stays open.
async fn pause(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    state.sampler.pause();
    Json(ControlResponse::new(&state, "Sampling paused"))
}

/// Resume sampling.
async fn resume(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    state.sampler.resume();
    Json(ControlResponse::new(&state, "Sampling resumed"))
}

/// Probe for a sensor while the sampler has released the port.
///
/// Tries the selected port, or every discovered port on `auto`. Checks are
/// serialized so each one sees the pause state the user left.
async fn check_connection(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ProbeReport>, AppError> {
    let _check = state.check_lock.lock().await;
    let was_paused = state.sampler.is_paused();
    if !state.sampler.release().await {
        warn!("Checking while the sampler may still hold the port");
    }

    let backend = &state.backend;
    let target = state.sampler.target_port();
    let candidates = probe_candidates(backend.ports.as_ref(), target.as_deref()).await;
    info!("Connection check on {:?}", candidates);
    let result = probe(backend.transport.as_ref(), &backend.drivers, &candidates).await;

    state.sampler.resume();
    if was_paused {
        state.sampler.pause();
    }

    match result {
        Ok(report) => Ok(Json(report)),
        Err(pmsense_core::Error::DriverUnavailable) => Err(AppError::Unavailable(
            "No compatible sensor driver available".to_string(),
        )),
        Err(e) => Err(AppError::NotFound(format!("No working port found: {}", e))),
    }
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
