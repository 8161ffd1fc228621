use crate::camera::{CameraController, Quality};
use crate::error::HomewatchError;
use crate::motion::MotionDetector;
use crate::station::{MeasurementLogger, TemperatureUnit, WeatherStation};
use crate::streaming::MJPEG_CONTENT_TYPE;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

/// Shared state for the dashboard API.
#[derive(Clone)]
pub struct WebState {
    pub camera: Arc<CameraController>,
    pub motion: Arc<MotionDetector>,
    pub station: Arc<WeatherStation>,
    pub logger: Arc<MeasurementLogger>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/stream.mjpg", get(mjpeg_stream_handler))
        .route("/snapshot", get(snapshot_handler))
        .route("/status", get(status_handler))
        .route("/measurements/current", get(current_measurement_handler))
        .route("/recording/start", post(start_recording_handler))
        .route("/recording/stop", post(stop_recording_handler))
        .with_state(state)
}

async fn mjpeg_stream_handler(State(state): State<WebState>) -> Response {
    info!("New MJPEG stream client connected");
    match state.camera.start_capture_stream() {
        Ok(stream) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)
            .header(header::CACHE_CONTROL, "no-cache, private")
            .header(header::PRAGMA, "no-cache")
            .body(axum::body::Body::from_stream(stream.into_mjpeg_body()))
            .unwrap(),
        Err(e) => {
            error!("Failed to start capture stream: {e}");
            error_response(&e)
        }
    }
}

async fn snapshot_handler(State(state): State<WebState>) -> Response {
    match state.camera.capture_picture() {
        Ok(jpeg) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/jpeg")],
            jpeg,
        )
            .into_response(),
        Err(e) => {
            error!("Snapshot capture failed: {e}");
            error_response(&e)
        }
    }
}

async fn status_handler(State(state): State<WebState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "is_recording": state.camera.is_recording(),
        "is_streaming": state.camera.is_streaming(),
        "is_logging": state.logger.is_logging(),
        "is_motion_capturing": state.motion.is_motion_capturing(),
    }))
}

#[derive(Deserialize)]
struct MeasurementParams {
    unit: Option<String>,
}

async fn current_measurement_handler(
    Query(params): Query<MeasurementParams>,
    State(state): State<WebState>,
) -> Response {
    let unit = TemperatureUnit::from_symbol(params.unit.as_deref().unwrap_or("C"));
    Json(state.station.present_measure_or_na(1, unit)).into_response()
}

async fn start_recording_handler(State(state): State<WebState>) -> Response {
    match state.camera.start_default_recording(Quality::Low) {
        Ok(path) => Json(serde_json::json!({
            "recording": path.display().to_string(),
        }))
        .into_response(),
        Err(e) => {
            error!("Failed to start recording: {e}");
            error_response(&e)
        }
    }
}

async fn stop_recording_handler(State(state): State<WebState>) -> Response {
    match state.camera.stop_recording_to_file() {
        Ok(()) => Json(serde_json::json!({ "stopped": true })).into_response(),
        Err(e) => {
            error!("Failed to stop recording: {e}");
            error_response(&e)
        }
    }
}

fn error_response(error: &HomewatchError) -> Response {
    let status = match error {
        HomewatchError::AlreadyActive { .. } | HomewatchError::Conflict { .. } => {
            StatusCode::CONFLICT
        }
        HomewatchError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}
