//! Detection Orchestrator
//!
//! Runs the capture → classify → reduce → react cycle on a background tokio
//! task, on an interval that compensates for processing time, and hands the
//! results to a single consumer in completion order.

mod config;
mod controller;
mod pipeline;
mod schedule;
mod sink;
mod worker;

pub use config::OrchestratorConfig;
pub use controller::{DetectionOrchestrator, OrchestratorState};
pub use pipeline::DetectionPipeline;
pub use schedule::CycleSchedule;
pub use sink::{result_channel, Delivery, ResultReceiver, ResultRecord, ResultSink};

use thiserror::Error;

/// Orchestrator error types
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("No tokio runtime available to spawn the detection worker")]
    NoRuntime,

    #[error("Previous detection worker is still finishing its last cycle")]
    StillStopping,
}

/// Failure of a single cycle. Logged by the worker; never fatal.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Capture failed: {0}")]
    Capture(#[from] frame_source::CameraError),

    #[error("Classification failed: {0}")]
    Inference(#[from] inference_engine::InferenceError),

    #[error("Persisting artifacts failed: {0}")]
    Persistence(#[from] storage::StorageError),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
