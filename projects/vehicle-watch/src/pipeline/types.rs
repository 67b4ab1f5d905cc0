use crate::pipeline::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

/// One encoded image frame as received from the ingest endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePayload(Vec<u8>);

impl FramePayload {
    /// Wraps raw frame bytes. Empty bodies are the only thing rejected here;
    /// whether the bytes form an image is decided by the detection step.
    pub fn new(data: Vec<u8>) -> Result<Self, PipelineError> {
        if data.is_empty() {
            return Err(PipelineError::EmptyPayload);
        }
        Ok(Self(data))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A detected instance with the track id assigned by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedObject {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub label: String,
    pub track_id: u64,
    pub confidence: f32,
}

/// Per-frame summary delivered downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionResult {
    #[serde(rename = "car_count")]
    pub object_count: usize,
    #[serde(rename = "has_ambulance")]
    pub flagged_present: bool,
    /// Hex-encoded JPEG with the overlays drawn.
    #[serde(rename = "frame")]
    pub annotated_frame: String,
}

/// Counters shared between the ingest handlers and the detection worker.
#[derive(Debug)]
pub struct PipelineState {
    /// Cleared to ask the worker to stop, and by the worker when it exits.
    pub is_active: AtomicBool,
    pub frames_accepted: AtomicU64,
    pub frames_rejected: AtomicU64,
    pub frames_processed: AtomicU64,
    pub frames_failed: AtomicU64,
    pub results_dispatched: AtomicU64,
    pub dispatch_failures: AtomicU64,
    /// Smoothed detection time per frame
    pub ms_per_frame: RwLock<f64>,
    pub started_at: DateTime<Utc>,
    pub start_time: Instant,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            is_active: AtomicBool::new(true),
            frames_accepted: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            frames_failed: AtomicU64::new(0),
            results_dispatched: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            ms_per_frame: RwLock::new(0.0),
            started_at: Utc::now(),
            start_time: Instant::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.is_active.store(false, Ordering::Relaxed);
    }

    pub fn record_processed(&self, ms: f64) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut avg) = self.ms_per_frame.write() {
            // Simple exponential moving average for smoothing durations
            if *avg == 0.0 {
                *avg = ms;
            } else {
                *avg = *avg * 0.9 + ms * 0.1;
            }
        }
    }

    pub fn to_status_json(&self, queue_len: usize, queue_capacity: usize) -> serde_json::Value {
        let ms_per_frame = self.ms_per_frame.read().map(|v| *v).unwrap_or(0.0);
        serde_json::json!({
            "is_active": self.is_active(),
            "started_at": self.started_at,
            "uptime_secs": self.start_time.elapsed().as_secs(),
            "queue_len": queue_len,
            "queue_capacity": queue_capacity,
            "frames_accepted": self.frames_accepted.load(Ordering::Relaxed),
            "frames_rejected": self.frames_rejected.load(Ordering::Relaxed),
            "frames_processed": self.frames_processed.load(Ordering::Relaxed),
            "frames_failed": self.frames_failed.load(Ordering::Relaxed),
            "results_dispatched": self.results_dispatched.load(Ordering::Relaxed),
            "dispatch_failures": self.dispatch_failures.load(Ordering::Relaxed),
            "ms_per_frame": ms_per_frame,
            "fps": if ms_per_frame > 0.0 { 1000.0 / ms_per_frame } else { 0.0 },
        })
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
