/// Failures a frame can hit between the ingest boundary and result delivery.
///
/// Only `EmptyPayload`, `QueueSaturated` and `QueueClosed` ever reach the
/// caller that submitted the frame; everything after the queue is logged
/// and terminal for that frame alone.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no frame data")]
    EmptyPayload,

    #[error("frame queue is full")]
    QueueSaturated,

    /// The detection worker is gone, so nothing will ever drain the queue.
    #[error("frame queue is closed")]
    QueueClosed,

    #[error("could not decode frame: {0}")]
    Decode(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("could not render annotated frame: {0}")]
    Encode(String),

    /// Network, DNS or timeout failure while delivering a result.
    #[error("result delivery failed: {0}")]
    Dispatch(String),

    #[error("result endpoint returned HTTP {0}")]
    DispatchStatus(u16),
}
