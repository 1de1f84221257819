//! Collaborators driven by one cycle

use alerting::{AlertLatch, AlertSender};
use frame_source::FrameSource;
use indicator::IndicatorController;
use inference_engine::{Classifier, Reducer};
use std::sync::Arc;
use storage::Persistence;

/// Everything a cycle touches. Built once and reused by every worker
/// generation.
pub struct DetectionPipeline {
    pub frame_source: Arc<dyn FrameSource>,
    pub classifier: Arc<dyn Classifier>,
    pub reducer: Reducer,
    pub persistence: Arc<dyn Persistence>,
    pub indicator: Arc<IndicatorController>,
    pub alert_latch: Arc<AlertLatch>,
    pub alert_sender: Arc<dyn AlertSender>,
    /// Human-readable name of the priority class, used in alerts
    pub priority_display_name: String,
}

impl DetectionPipeline {
    pub fn describe(&self) -> String {
        format!(
            "{} → {} → {}",
            self.frame_source.describe(),
            self.classifier.describe(),
            self.alert_sender.describe()
        )
    }
}
