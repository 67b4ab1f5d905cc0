use crate::pipeline::error::PipelineError;
use crate::pipeline::queue::FrameProducer;
use crate::pipeline::types::{FramePayload, PipelineState};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// State shared by the ingest handlers. The producer is the only link to
/// the detection worker.
pub struct AppState {
    pub producer: FrameProducer,
    pub pipeline: Arc<PipelineState>,
}

/// `POST /detect`: queue one encoded frame for detection.
///
/// Never waits on the queue; a full queue answers 503 so the uploader can
/// back off.
pub async fn detect_handler(State(app): State<Arc<AppState>>, body: Bytes) -> Response {
    let outcome =
        FramePayload::new(Vec::from(body)).and_then(|payload| app.producer.try_enqueue(payload));

    match outcome {
        Ok(()) => {
            app.pipeline.frames_accepted.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Frame queued ({} waiting)", app.producer.len());
            (StatusCode::OK, Json(json!({"status": "queued"}))).into_response()
        }
        Err(PipelineError::EmptyPayload) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "no frame data"})),
        )
            .into_response(),
        Err(PipelineError::QueueSaturated) => {
            app.pipeline.frames_rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Frame queue full, dropping frame");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "queue_full", "message": "frame dropped"})),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Error queueing frame: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

/// `GET /status`: queue depth and pipeline counters.
pub async fn status_handler(State(app): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(
        app.pipeline
            .to_status_json(app.producer.len(), app.producer.capacity()),
    )
}

/// `GET /health`: 503 once the detection worker has stopped, since queued
/// frames would never be processed.
pub async fn health_handler(State(app): State<Arc<AppState>>) -> Response {
    if app.pipeline.is_active() {
        (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "worker_stopped"})),
        )
            .into_response()
    }
}
