//! Best-effort delivery of detection results.
//!
//! [`HttpDispatcher`] POSTs each [`DetectionResult`] as JSON to
//! `{base_url}/detection_results`, once, with a fixed timeout. There is no
//! retry and no buffering of failed deliveries.

use crate::pipeline::error::PipelineError;
use crate::pipeline::types::DetectionResult;
use std::time::Duration;

/// Receives every successfully analysed frame, in processing order.
pub trait ResultSink: Send {
    fn dispatch(&self, result: &DetectionResult) -> Result<(), PipelineError>;
}

pub struct HttpDispatcher {
    agent: ureq::Agent,
    url: String,
}

impl HttpDispatcher {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            url: results_url(base_url),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ResultSink for HttpDispatcher {
    fn dispatch(&self, result: &DetectionResult) -> Result<(), PipelineError> {
        match self.agent.post(&self.url).send_json(result) {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(PipelineError::DispatchStatus(code)),
            Err(ureq::Error::Transport(t)) => Err(PipelineError::Dispatch(t.to_string())),
        }
    }
}

fn results_url(base_url: &str) -> String {
    format!("{}/detection_results", base_url.trim_end_matches('/'))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use crossbeam::channel::Sender;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Instant;
    use tokio::sync::mpsc;

    /// Collects dispatched results in memory.
    pub(crate) struct ChannelSink(pub(crate) Sender<DetectionResult>);

    impl ResultSink for ChannelSink {
        fn dispatch(&self, result: &DetectionResult) -> Result<(), PipelineError> {
            self.0
                .send(result.clone())
                .map_err(|e| PipelineError::Dispatch(e.to_string()))
        }
    }

    fn result() -> DetectionResult {
        DetectionResult {
            object_count: 4,
            flagged_present: true,
            annotated_frame: "ffd8ffd9".to_string(),
        }
    }

    #[test]
    fn test_results_url() {
        assert_eq!(
            results_url("http://localhost:5000"),
            "http://localhost:5000/detection_results"
        );
        assert_eq!(
            results_url("http://localhost:5000/"),
            "http://localhost:5000/detection_results"
        );
    }

    #[test]
    fn test_unreachable_endpoint_fails_fast() {
        let dispatcher = HttpDispatcher::new("http://127.0.0.1:1", Duration::from_secs(5));
        let start = Instant::now();
        let err = dispatcher.dispatch(&result()).unwrap_err();
        assert!(matches!(err, PipelineError::Dispatch(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_silent_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept the connection and never answer
        thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(3));
        });

        let dispatcher =
            HttpDispatcher::new(&format!("http://{}", addr), Duration::from_millis(200));
        let start = Instant::now();
        let err = dispatcher.dispatch(&result()).unwrap_err();
        assert!(matches!(err, PipelineError::Dispatch(_)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_posts_result_json() {
        let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();
        let app = Router::new().route(
            "/detection_results",
            post(move |Json(body): Json<serde_json::Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                    StatusCode::OK
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let outcome = tokio::task::spawn_blocking(move || {
            HttpDispatcher::new(&format!("http://{}", addr), Duration::from_secs(5))
                .dispatch(&result())
        })
        .await
        .unwrap();
        assert!(outcome.is_ok());

        let body = rx.recv().await.unwrap();
        assert_eq!(body["car_count"], 4);
        assert_eq!(body["has_ambulance"], true);
        assert_eq!(body["frame"], "ffd8ffd9");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_non_success_status() {
        let app = Router::new().route(
            "/detection_results",
            post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let outcome = tokio::task::spawn_blocking(move || {
            HttpDispatcher::new(&format!("http://{}/", addr), Duration::from_secs(5))
                .dispatch(&result())
        })
        .await
        .unwrap();
        assert!(matches!(outcome, Err(PipelineError::DispatchStatus(503))));
    }
}
