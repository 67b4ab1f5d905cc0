use crate::pipeline::analysis::DetectionStep;
use crate::pipeline::dispatch::ResultSink;
use crate::pipeline::error::PipelineError;
use crate::pipeline::queue::{Dequeued, FrameConsumer};
use crate::pipeline::tracker::ObjectTracker;
use crate::pipeline::types::PipelineState;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clears `is_active` when the worker exits, including by panic, so the
/// status endpoints never report a dead worker as running.
struct StopOnExit<'a>(&'a PipelineState);

impl Drop for StopOnExit<'_> {
    fn drop(&mut self) {
        self.0.request_stop();
    }
}

/// Worker that drains the frame queue one frame at a time.
///
/// A frame that fails to decode or run through the model is logged and
/// dropped; the loop only ends on the shutdown sentinel, when every producer
/// is gone, or when `state.is_active` is cleared (checked before every frame
/// and whenever a wait times out). Frames still queued after a stop request
/// are abandoned.
pub fn detection_worker<T, S>(
    consumer: FrameConsumer,
    mut step: DetectionStep<T>,
    sink: S,
    state: Arc<PipelineState>,
    poll_interval: Duration,
) where
    T: ObjectTracker,
    S: ResultSink,
{
    let _stop = StopOnExit(&state);

    loop {
        let payload = match consumer.dequeue_blocking(poll_interval) {
            Dequeued::Frame(payload) => payload,
            Dequeued::Empty => {
                if !state.is_active() {
                    tracing::info!("Detection worker observed stop request");
                    break;
                }
                continue;
            }
            Dequeued::Shutdown => break,
        };
        if !state.is_active() {
            tracing::warn!("Stop requested, abandoning queued frames");
            break;
        }

        let start_inst = Instant::now();
        let result = match step.run(payload) {
            Ok(result) => result,
            Err(e) => {
                state.frames_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Dropping frame: {}", e);
                continue;
            }
        };
        let duration_ms = start_inst.elapsed().as_secs_f64() * 1000.0;
        state.record_processed(duration_ms);
        tracing::debug!(
            object_count = result.object_count,
            flagged_present = result.flagged_present,
            "Frame processed in {:.1} ms",
            duration_ms
        );

        match sink.dispatch(&result) {
            Ok(()) => {
                state.results_dispatched.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Detection result delivered");
            }
            Err(e @ PipelineError::DispatchStatus(_)) => {
                state.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Detection result rejected: {}", e);
            }
            Err(e) => {
                state.dispatch_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Failed to deliver detection result: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::analysis::tests::{object, ScriptedTracker};
    use crate::pipeline::analysis::FlaggedClasses;
    use crate::pipeline::dispatch::tests::ChannelSink;
    use crate::pipeline::dispatch::HttpDispatcher;
    use crate::pipeline::overlay::tests::test_jpeg;
    use crate::pipeline::queue::frame_queue;
    use crate::pipeline::types::{FramePayload, TrackedObject};
    use crossbeam::channel;
    use opencv::core::Mat;
    use std::thread;

    fn step(frames: Vec<Option<Vec<TrackedObject>>>) -> DetectionStep<ScriptedTracker> {
        DetectionStep::new(
            ScriptedTracker::new(frames),
            FlaggedClasses::new(["ambulance"]),
            0.5,
        )
    }

    fn jpeg_frame() -> FramePayload {
        FramePayload::new(test_jpeg(96, 64)).unwrap()
    }

    const POLL: Duration = Duration::from_millis(20);

    #[test]
    fn test_bad_frame_does_not_stop_worker() {
        let (producer, consumer) = frame_queue(4);
        let (tx, rx) = channel::unbounded();
        let state = Arc::new(PipelineState::new());

        producer
            .try_enqueue(FramePayload::new(b"garbage".to_vec()).unwrap())
            .unwrap();
        producer.try_enqueue(jpeg_frame()).unwrap();
        producer.send_shutdown(POLL).unwrap();

        detection_worker(
            consumer,
            step(vec![Some(vec![object("ambulance", 1), object("car", 2)])]),
            ChannelSink(tx),
            state.clone(),
            POLL,
        );

        let results: Vec<_> = rx.try_iter().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].object_count, 2);
        assert!(results[0].flagged_present);
        assert_eq!(state.frames_failed.load(Ordering::Relaxed), 1);
        assert_eq!(state.frames_processed.load(Ordering::Relaxed), 1);
        assert!(!state.is_active());
    }

    #[test]
    fn test_inference_failure_is_isolated() {
        let (producer, consumer) = frame_queue(4);
        let (tx, rx) = channel::unbounded();
        let state = Arc::new(PipelineState::new());

        producer.try_enqueue(jpeg_frame()).unwrap();
        producer.try_enqueue(jpeg_frame()).unwrap();
        producer.send_shutdown(POLL).unwrap();

        detection_worker(
            consumer,
            step(vec![None, Some(vec![object("car", 5)])]),
            ChannelSink(tx),
            state.clone(),
            POLL,
        );

        let results: Vec<_> = rx.try_iter().collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].object_count, 1);
        assert_eq!(state.frames_failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unreachable_dispatch_moves_on() {
        let (producer, consumer) = frame_queue(4);
        let state = Arc::new(PipelineState::new());

        producer.try_enqueue(jpeg_frame()).unwrap();
        producer.try_enqueue(jpeg_frame()).unwrap();
        producer.send_shutdown(POLL).unwrap();

        let start = Instant::now();
        detection_worker(
            consumer,
            step(vec![]),
            HttpDispatcher::new("http://127.0.0.1:1", Duration::from_secs(2)),
            state.clone(),
            POLL,
        );

        assert_eq!(state.frames_processed.load(Ordering::Relaxed), 2);
        assert_eq!(state.dispatch_failures.load(Ordering::Relaxed), 2);
        assert_eq!(state.results_dispatched.load(Ordering::Relaxed), 0);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_stop_flag_abandons_queued_frames() {
        let (producer, consumer) = frame_queue(4);
        let (tx, rx) = channel::unbounded();
        let state = Arc::new(PipelineState::new());

        producer.try_enqueue(jpeg_frame()).unwrap();
        producer.try_enqueue(jpeg_frame()).unwrap();
        state.request_stop();

        detection_worker(consumer, step(vec![]), ChannelSink(tx), state.clone(), POLL);

        assert_eq!(rx.try_iter().count(), 0);
        assert_eq!(state.frames_processed.load(Ordering::Relaxed), 0);
        assert_eq!(producer.len(), 1);
    }

    struct PanickingTracker;

    impl ObjectTracker for PanickingTracker {
        fn track(
            &mut self,
            _image: &Mat,
            _min_confidence: f32,
        ) -> anyhow::Result<Vec<TrackedObject>> {
            panic!("model crashed");
        }
    }

    #[test]
    fn test_panic_clears_active_flag() {
        let (producer, consumer) = frame_queue(2);
        let (tx, _rx) = channel::unbounded();
        let state = Arc::new(PipelineState::new());
        producer.try_enqueue(jpeg_frame()).unwrap();

        let worker_state = state.clone();
        let handle = thread::spawn(move || {
            let step =
                DetectionStep::new(PanickingTracker, FlaggedClasses::new(["ambulance"]), 0.5);
            detection_worker(consumer, step, ChannelSink(tx), worker_state, POLL)
        });

        assert!(handle.join().is_err());
        assert!(!state.is_active());
    }

    #[test]
    fn test_stop_flag_ends_idle_worker() {
        let (_producer, consumer) = frame_queue(2);
        let (tx, _rx) = channel::unbounded();
        let state = Arc::new(PipelineState::new());

        let worker_state = state.clone();
        let handle = thread::spawn(move || {
            detection_worker(consumer, step(vec![]), ChannelSink(tx), worker_state, POLL)
        });

        state.request_stop();
        handle.join().unwrap();
    }
}
