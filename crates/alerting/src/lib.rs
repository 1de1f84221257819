//! Alerting System
//!
//! A one-shot latch gating the outbound alert for priority detections, the
//! alert message itself and the MQTT transport that delivers it.

mod latch;
mod mqtt;
mod sender;

pub use latch::{AlertLatch, AlertLatchState, AlertOutcome, SuppressReason};
pub use mqtt::{AlertTransportConfig, MqttAlertSender};
pub use sender::{compose_detection_alert, Alert, AlertAttachment, AlertSender, RecordingSender};

use thiserror::Error;

/// Alert error types
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Alert transport not connected: {0}")]
    NotConnected(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No async runtime available for the alert transport")]
    NoRuntime,
}
