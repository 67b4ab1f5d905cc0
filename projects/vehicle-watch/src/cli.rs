use anyhow::{bail, Result};
use clap::Parser;
use std::net::IpAddr;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host to bind to
    #[arg(long, env = "DETECTION_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, env = "DETECTION_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Path to the RT-DETR ONNX model artifact
    #[arg(long, env = "YOLO_MODEL_PATH", default_value = "model/best.onnx")]
    pub model_path: String,

    /// Class names emitted by the model, in class-id order (COCO-80 when empty)
    #[arg(long, env = "DETECTION_CLASS_NAMES", value_delimiter = ',')]
    pub class_names: Vec<String>,

    /// Base URL of the server receiving detection results
    #[arg(long, env = "SERVER_URL", default_value = "http://localhost:5000")]
    pub server_url: String,

    /// Maximum number of frames waiting for detection
    #[arg(long, env = "DETECTION_QUEUE_CAPACITY", default_value_t = 10)]
    pub queue_capacity: usize,

    /// Minimum confidence for a detection to be tracked
    #[arg(long, env = "DETECTION_CONFIDENCE", default_value_t = 0.5)]
    pub confidence: f32,

    /// Class-name substrings raising the flag overlay (case-insensitive)
    #[arg(
        long,
        env = "DETECTION_FLAGGED_CLASSES",
        value_delimiter = ',',
        default_value = "ambulance"
    )]
    pub flagged_classes: Vec<String>,

    /// Timeout for delivering one detection result, in seconds
    #[arg(long, env = "DISPATCH_TIMEOUT_SECS", default_value_t = 5)]
    pub dispatch_timeout_secs: u64,

    /// How long the worker waits on an empty queue before re-checking shutdown
    #[arg(long, env = "DETECTION_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// How long shutdown waits for queued frames to drain, in seconds
    #[arg(long, env = "DETECTION_SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// Largest accepted frame body, in bytes
    #[arg(long, env = "DETECTION_MAX_FRAME_BYTES", default_value_t = 16 * 1024 * 1024)]
    pub max_frame_bytes: usize,
}

impl Args {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            bail!("Queue capacity must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            bail!(
                "Confidence threshold must be within [0, 1], got {}",
                self.confidence
            );
        }
        if self.flagged_classes.iter().all(|c| c.trim().is_empty()) {
            bail!("At least one flagged class substring is required");
        }
        if self.server_url.trim().is_empty() {
            bail!("Server URL must not be empty");
        }
        Ok(())
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["vehicle-watch"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = parse(&["--flagged-classes", "ambulance", "--port", "8000"]);
        assert_eq!(args.port, 8000);
        assert_eq!(args.flagged_classes, vec!["ambulance".to_string()]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_comma_separated_lists() {
        let args = parse(&[
            "--flagged-classes",
            "ambulance,fire_truck",
            "--class-names",
            "car,ambulance,truck",
        ]);
        assert_eq!(args.flagged_classes.len(), 2);
        assert_eq!(args.class_names, vec!["car", "ambulance", "truck"]);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let args = parse(&["--queue-capacity", "0"]);
        assert!(args.validate().is_err());

        let args = parse(&["--confidence", "1.5"]);
        assert!(args.validate().is_err());

        let args = parse(&["--flagged-classes", " "]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_durations() {
        let args = parse(&["--dispatch-timeout-secs", "3", "--poll-interval-ms", "250"]);
        assert_eq!(args.dispatch_timeout(), Duration::from_secs(3));
        assert_eq!(args.poll_interval(), Duration::from_millis(250));
        assert_eq!(args.shutdown_grace(), Duration::from_secs(10));
    }
}
