//! Classifier contract and a scripted mock

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::{DetectionRegion, InferenceError};

/// Runs object detection on a stored image.
///
/// Implementations are pure with respect to the image: no side effects are
/// assumed by callers. Calls may block for a long time.
pub trait Classifier: Send + Sync {
    fn infer(&self, image: &Path) -> Result<Vec<DetectionRegion>, InferenceError>;

    fn describe(&self) -> String;
}

/// Model runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Square model input edge in pixels
    pub input_size: u32,
    /// Candidates scoring below this are dropped before NMS
    pub min_score: f32,
    /// IoU above which overlapping boxes of one class are suppressed
    pub iou_threshold: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            min_score: 0.25,
            iou_threshold: 0.45,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.input_size == 0 {
            return Err(InferenceError::InvalidConfig("input_size must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(InferenceError::InvalidConfig(format!(
                "min_score {} outside [0, 1]",
                self.min_score
            )));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(InferenceError::InvalidConfig(format!(
                "iou_threshold {} outside [0, 1]",
                self.iou_threshold
            )));
        }
        Ok(())
    }
}

type Scripted = Result<Vec<DetectionRegion>, String>;

/// Mock classifier replaying scripted responses (for development and tests)
///
/// Responses are returned in order; once exhausted the last one repeats.
/// An empty script always yields no detections.
pub struct MockClassifier {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    latency: Duration,
    calls: AtomicUsize,
}

impl MockClassifier {
    /// Create a mock inference engine
    pub fn new(script: Vec<Result<Vec<DetectionRegion>, String>>) -> Self {
        info!("Creating mock classifier with {} scripted responses", script.len());
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Mock that never detects anything
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Simulate model latency by blocking for `latency` on every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of `infer` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> Scripted {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = script.pop_front() {
            *last = Some(next.clone());
            next
        } else {
            last.clone().unwrap_or_else(|| Ok(Vec::new()))
        }
    }
}

impl Classifier for MockClassifier {
    fn infer(&self, image: &Path) -> Result<Vec<DetectionRegion>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        debug!("Mock inference on {}", image.display());
        self.next_response().map_err(InferenceError::InferenceFailed)
    }

    fn describe(&self) -> String {
        "mock classifier".to_string()
    }
}
