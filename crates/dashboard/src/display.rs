//! Display consumer
//!
//! The only reader of the result channel and the only writer of
//! [`DisplayState`] and the detection history.

use alerting::AlertOutcome;
use chrono::Local;
use orchestrator::{ResultReceiver, ResultRecord};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use storage::{DetectionHistory, HistoryEntry};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Log lines kept for `GET /log`
pub const MAX_LOG_LINES: usize = 200;

/// What the display shows
#[derive(Debug, Default, Serialize)]
pub struct DisplayState {
    pub latest: Option<ResultRecord>,
    pub log: VecDeque<String>,
    /// Detections per class since startup (`no_detection` excluded)
    pub class_counts: BTreeMap<String, u64>,
    pub received: u64,
}

impl DisplayState {
    pub fn apply(&mut self, record: ResultRecord) {
        self.received += 1;
        if record.decision.is_detection() {
            *self.class_counts.entry(record.decision.final_class.clone()).or_default() += 1;
        }

        if self.log.len() >= MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(log_line(&record));
        self.latest = Some(record);
    }
}

/// One human-readable line per result
pub fn log_line(record: &ResultRecord) -> String {
    let decision = &record.decision;
    let timestamp = decision.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");

    let mut line = if decision.is_detection() {
        format!(
            "{} - Class: {}, Confidence: {:.2}",
            timestamp, decision.final_class, decision.confidence
        )
    } else {
        format!("{} - No detections", timestamp)
    };

    match &record.alert {
        Some(AlertOutcome::Sent) => line.push_str(" (alert sent)"),
        Some(AlertOutcome::Failed(reason)) => {
            line.push_str(&format!(" (alert failed: {})", reason))
        }
        _ => {}
    }
    line
}

/// Consume results until every producer is gone
pub async fn run_display(
    mut receiver: ResultReceiver,
    state: Arc<RwLock<DisplayState>>,
    history: Arc<DetectionHistory>,
) {
    info!("Display consumer started");

    while let Some(record) = receiver.recv().await {
        debug!("Result {} received: {}", record.sequence, record.decision.final_class);
        if let Err(e) = history.record(HistoryEntry::from(&record.decision)) {
            warn!("Failed to record detection history: {}", e);
        }
        state.write().await.apply(record);
    }

    info!("Result channel closed; display consumer exiting");
}
