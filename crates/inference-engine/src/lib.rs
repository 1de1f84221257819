//! ONNX Inference Engine
//!
//! Runs an object detection model over still frames and reduces the raw
//! detections of one frame to a single [`Decision`].

mod classifier;
mod onnx;
mod reducer;
mod region;

pub use classifier::{Classifier, ClassifierConfig, MockClassifier};
pub use onnx::OnnxClassifier;
pub use reducer::{ClassTable, Decision, Reducer, NO_DETECTION};
pub use region::{BoundingBox, DetectionRegion};

use thiserror::Error;

/// Errors during inference
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Model load failed: {0}")]
    ModelLoadError(String),
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    #[error("Failed to decode image {path}: {reason}")]
    ImageDecode { path: String, reason: String },
    #[error("Invalid output shape: expected {expected}, got {actual}")]
    InvalidOutputShape { expected: String, actual: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
