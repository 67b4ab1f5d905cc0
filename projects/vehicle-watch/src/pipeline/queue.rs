// Bounded frame queue between the ingest endpoint and the detection worker
//
// Producers never block: a full queue rejects the new frame and leaves the
// queued ones alone. The single consumer waits with a timeout so it can
// observe shutdown between frames.

use crate::pipeline::error::PipelineError;
use crate::pipeline::types::FramePayload;
use crossbeam::channel::{
    self, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};
use std::time::Duration;

enum QueueItem {
    Frame(FramePayload),
    Shutdown,
}

/// Outcome of one bounded wait on the queue.
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued {
    Frame(FramePayload),
    /// Nothing arrived before the timeout.
    Empty,
    /// The shutdown sentinel was reached, or every producer is gone.
    Shutdown,
}

/// Creates a queue holding at most `capacity` frames.
pub fn frame_queue(capacity: usize) -> (FrameProducer, FrameConsumer) {
    let (tx, rx) = channel::bounded(capacity);
    (FrameProducer { tx, capacity }, FrameConsumer { rx })
}

/// Ingest side of the queue. Cheap to clone; concurrent producers are
/// serialized by the channel.
#[derive(Clone)]
pub struct FrameProducer {
    tx: Sender<QueueItem>,
    capacity: usize,
}

impl FrameProducer {
    /// Appends a frame without waiting.
    ///
    /// Returns `QueueSaturated` when the queue is at capacity and
    /// `QueueClosed` when the consumer has been dropped.
    pub fn try_enqueue(&self, payload: FramePayload) -> Result<(), PipelineError> {
        match self.tx.try_send(QueueItem::Frame(payload)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PipelineError::QueueSaturated),
            Err(TrySendError::Disconnected(_)) => Err(PipelineError::QueueClosed),
        }
    }

    /// Queues the shutdown sentinel behind any pending frames.
    ///
    /// Unlike frames, the sentinel waits up to `timeout` for room, so
    /// everything accepted before this call is still processed.
    pub fn send_shutdown(&self, timeout: Duration) -> Result<(), PipelineError> {
        match self.tx.send_timeout(QueueItem::Shutdown, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(PipelineError::QueueSaturated),
            Err(SendTimeoutError::Disconnected(_)) => Err(PipelineError::QueueClosed),
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Worker side of the queue. Not `Clone`: there is exactly one consumer.
pub struct FrameConsumer {
    rx: Receiver<QueueItem>,
}

impl FrameConsumer {
    pub fn dequeue_blocking(&self, timeout: Duration) -> Dequeued {
        match self.rx.recv_timeout(timeout) {
            Ok(QueueItem::Frame(payload)) => Dequeued::Frame(payload),
            Ok(QueueItem::Shutdown) => Dequeued::Shutdown,
            Err(RecvTimeoutError::Timeout) => Dequeued::Empty,
            Err(RecvTimeoutError::Disconnected) => Dequeued::Shutdown,
        }
    }
}
