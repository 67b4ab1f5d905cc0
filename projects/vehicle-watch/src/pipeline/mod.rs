// Frame ingestion and detection pipeline

pub mod analysis;
pub mod detection;
pub mod detection_worker;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod overlay;
pub mod queue;
pub mod tracker;
pub mod types;
