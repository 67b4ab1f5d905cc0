use crate::cli::Args;
use crate::pipeline::analysis::FlaggedClasses;
use crate::pipeline::dispatch::HttpDispatcher;
use crate::pipeline::orchestrator::{spawn_detection_worker, DetectionControl};
use crate::pipeline::queue::frame_queue;
use crate::pipeline::tracker::RtDetrTracker;
use crate::pipeline::types::PipelineState;
use crate::web::api::{detect_handler, health_handler, status_handler, AppState};
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn router(app: Arc<AppState>, max_frame_bytes: usize) -> Router {
    Router::new()
        .route("/detect", post(detect_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(max_frame_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

pub async fn run_server(args: Args) -> Result<()> {
    let pipeline = Arc::new(PipelineState::new());
    let (producer, consumer) = frame_queue(args.queue_capacity);

    let dispatcher = HttpDispatcher::new(&args.server_url, args.dispatch_timeout());
    info!("Detection results will be sent to {}", dispatcher.url());

    let model_path = args.model_path.clone();
    let class_names = args.class_names.clone();
    let control = DetectionControl {
        flagged: FlaggedClasses::new(&args.flagged_classes),
        min_confidence: args.confidence,
        poll_interval: args.poll_interval(),
    };
    let worker = spawn_detection_worker(
        producer.clone(),
        consumer,
        move || RtDetrTracker::new(&model_path, &class_names),
        control,
        dispatcher,
        pipeline.clone(),
    )?;

    let addr = SocketAddr::new(args.host, args.port);
    let listener =
        TcpListener::bind(addr).with_context(|| format!("Failed to bind to {}", addr))?;
    // Set non-blocking before registering with Tokio
    listener.set_nonblocking(true)?;
    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Detection server started on http://{:?} (queue capacity {})",
        tokio_listener.local_addr()?,
        args.queue_capacity
    );

    let app = router(
        Arc::new(AppState {
            producer,
            pipeline: pipeline.clone(),
        }),
        args.max_frame_bytes,
    );

    axum::serve(tokio_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, draining detection queue (Ctrl-C again to skip)");
    let grace = args.shutdown_grace();
    let drain = tokio::task::spawn_blocking(move || worker.shutdown(grace));
    tokio::select! {
        res = drain => res??,
        _ = shutdown_signal() => {
            warn!("Second interrupt, abandoning queued frames");
            pipeline.request_stop();
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
