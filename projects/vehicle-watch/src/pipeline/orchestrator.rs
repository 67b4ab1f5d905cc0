// Pipeline orchestrator: owns the detection worker's lifecycle
//
// The tracker is built on the worker thread itself and never leaves it.
// Startup waits for the model to load so a bad model path fails the process
// before the ingest endpoint starts accepting frames.

use crate::pipeline::analysis::{DetectionStep, FlaggedClasses};
use crate::pipeline::detection_worker::detection_worker;
use crate::pipeline::dispatch::ResultSink;
use crate::pipeline::error::PipelineError;
use crate::pipeline::queue::{FrameConsumer, FrameProducer};
use crate::pipeline::tracker::ObjectTracker;
use crate::pipeline::types::PipelineState;
use anyhow::{anyhow, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Detection settings handed to the worker.
#[derive(Debug, Clone)]
pub struct DetectionControl {
    pub flagged: FlaggedClasses,
    pub min_confidence: f32,
    pub poll_interval: Duration,
}

/// Handle to the running detection worker.
pub struct WorkerHandle {
    producer: FrameProducer,
    state: Arc<PipelineState>,
    /// Disconnects when the worker thread ends, whether it returned or panicked.
    done: Receiver<()>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Queues the shutdown sentinel behind pending frames and waits up to
    /// `grace` for the worker to drain them.
    ///
    /// Past the deadline the stop flag is raised: the frame in progress
    /// finishes (at most one inference plus one dispatch timeout) and the
    /// rest of the queue is abandoned.
    pub fn shutdown(self, grace: Duration) -> Result<()> {
        let deadline = Instant::now() + grace;
        if !self.producer.is_empty() {
            tracing::info!("Draining {} queued frames", self.producer.len());
        }
        match self.producer.send_shutdown(grace) {
            Ok(()) => {}
            Err(PipelineError::QueueClosed) => tracing::warn!("Detection worker already stopped"),
            Err(e) => tracing::warn!("Could not queue shutdown sentinel: {}", e),
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Err(RecvTimeoutError::Timeout) = self.done.recv_timeout(remaining) {
            tracing::warn!(
                "Detection worker still busy after {:?}, abandoning queued frames",
                grace
            );
            self.state.request_stop();
        }

        self.join
            .join()
            .map_err(|_| anyhow!("Detection worker panicked"))?;
        tracing::info!("Detection worker finished");
        Ok(())
    }
}

/// Starts the single detection worker.
///
/// `load_tracker` runs on the worker thread; its error is returned from here
/// and the thread exits without touching the queue.
pub fn spawn_detection_worker<T, F, S>(
    producer: FrameProducer,
    consumer: FrameConsumer,
    load_tracker: F,
    control: DetectionControl,
    sink: S,
    state: Arc<PipelineState>,
) -> Result<WorkerHandle>
where
    T: ObjectTracker,
    F: FnOnce() -> Result<T> + Send + 'static,
    S: ResultSink + 'static,
{
    let (ready_tx, ready_rx) = channel::bounded::<Result<()>>(1);
    let (done_tx, done_rx) = channel::bounded::<()>(0);
    let worker_state = state.clone();

    let join = thread::Builder::new()
        .name("detection-worker".to_string())
        .spawn(move || {
            let _done = done_tx;
            let tracker = match load_tracker() {
                Ok(tracker) => {
                    let _ = ready_tx.send(Ok(()));
                    tracker
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            drop(ready_tx);

            tracing::info!("Detection worker started");
            let step = DetectionStep::new(tracker, control.flagged, control.min_confidence);
            detection_worker(consumer, step, sink, worker_state, control.poll_interval);
        })?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(WorkerHandle {
            producer,
            state,
            done: done_rx,
            join,
        }),
        Ok(Err(e)) => {
            let _ = join.join();
            Err(e)
        }
        Err(_) => {
            let _ = join.join();
            Err(anyhow!("Detection worker exited before the model was loaded"))
        }
    }
}
