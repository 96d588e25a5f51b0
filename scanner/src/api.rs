use std::sync::Arc;

use attendance_common::scan::AutoScanInterval;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::orchestrator::{ScanOrchestrator, ScanOutcome, ScannerSnapshot};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectDevice {
    device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutoScanRequest {
    enabled: bool,
    /// Keeps the current interval when omitted.
    interval_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ScanResponse {
    #[serde(flatten)]
    outcome: ScanOutcome,
    snapshot: ScannerSnapshot,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /state
async fn get_state(State(scanner): State<Arc<ScanOrchestrator>>) -> Json<ScannerSnapshot> {
    Json(scanner.snapshot())
}

/// GET /devices
async fn list_devices(State(scanner): State<Arc<ScanOrchestrator>>) -> impl IntoResponse {
    Json(scanner.snapshot().devices)
}

/// POST /devices/refresh
async fn refresh_devices(State(scanner): State<Arc<ScanOrchestrator>>) -> impl IntoResponse {
    scanner.refresh_devices().await;
    Json(scanner.snapshot().devices)
}

/// PUT /device
/// Body: { "deviceId": "..." }
async fn select_device(
    State(scanner): State<Arc<ScanOrchestrator>>,
    Json(body): Json<SelectDevice>,
) -> impl IntoResponse {
    let known = scanner
        .snapshot()
        .devices
        .iter()
        .any(|d| d.id == body.device_id);
    if !known {
        warn!(device_id = body.device_id, "unknown device requested");
        return (StatusCode::NOT_FOUND, format!("unknown device {}", body.device_id))
            .into_response();
    }
    scanner.on_device_change(&body.device_id).await;
    Json(scanner.snapshot()).into_response()
}

/// POST /camera/restart
async fn restart_camera(State(scanner): State<Arc<ScanOrchestrator>>) -> Json<ScannerSnapshot> {
    scanner.start_camera().await;
    Json(scanner.snapshot())
}

/// POST /camera/stop
async fn stop_camera(State(scanner): State<Arc<ScanOrchestrator>>) -> Json<ScannerSnapshot> {
    scanner.stop_camera().await;
    Json(scanner.snapshot())
}

/// POST /scan
async fn scan(State(scanner): State<Arc<ScanOrchestrator>>) -> Json<ScanResponse> {
    let outcome = scanner.scan_once().await;
    Json(ScanResponse {
        outcome,
        snapshot: scanner.snapshot(),
    })
}

/// PUT /auto-scan
/// Body: { "enabled": true, "intervalMs": 2500 }
async fn set_auto_scan(
    State(scanner): State<Arc<ScanOrchestrator>>,
    Json(body): Json<AutoScanRequest>,
) -> impl IntoResponse {
    let interval = match body.interval_ms {
        Some(ms) => match AutoScanInterval::try_from(ms) {
            Ok(i) => i,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        },
        None => scanner.snapshot().interval_ms,
    };
    info!(enabled = body.enabled, interval_ms = interval.as_millis(), "auto-scan updated");
    scanner.set_auto_scan(body.enabled, interval);
    Json(scanner.snapshot()).into_response()
}

pub fn router(scanner: Arc<ScanOrchestrator>) -> Router {
    Router::new()
        .route("/state", get(get_state))
        .route("/devices", get(list_devices))
        .route("/devices/refresh", post(refresh_devices))
        .route("/device", put(select_device))
        .route("/camera/restart", post(restart_camera))
        .route("/camera/stop", post(stop_camera))
        .route("/scan", post(scan))
        .route("/auto-scan", put(set_auto_scan))
        .layer(TraceLayer::new_for_http())
        .with_state(scanner)
}
