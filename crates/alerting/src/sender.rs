//! Alert message and the sender capability

use inference_engine::Decision;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::AlertError;

/// File attached to an alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertAttachment {
    pub file_name: String,
    pub path: PathBuf,
}

impl AlertAttachment {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Self { file_name, path }
    }
}

/// Outbound alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub subject: String,
    pub body: String,
    pub attachments: Vec<AlertAttachment>,
}

/// Outbound alert capability. Implementations must tolerate repeated calls.
pub trait AlertSender: Send + Sync {
    fn send(&self, alert: &Alert) -> Result<(), AlertError>;

    fn describe(&self) -> String;
}

/// Build the alert for a priority detection.
///
/// Attachments are the annotated image (when one was written) followed by
/// the original frame.
pub fn compose_detection_alert(
    display_name: &str,
    decision: &Decision,
    annotated: Option<&Path>,
    original: &Path,
) -> Alert {
    let subject = format!("{} detected", display_name);
    let body = format!(
        "{} detected at {} with confidence {:.2}.\n\n\
         The annotated image and the original frame are attached.",
        display_name,
        decision.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        decision.confidence,
    );

    let attachments = annotated
        .into_iter()
        .chain(std::iter::once(original))
        .map(AlertAttachment::from_path)
        .collect();

    Alert {
        subject,
        body,
        attachments,
    }
}

/// In-memory sender that records every alert; optionally fails the first
/// `failures` calls. Used by bench runs and tests.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<Alert>>,
    attempts: AtomicUsize,
    failures: usize,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Alert> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl AlertSender for RecordingSender {
    fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(AlertError::Publish(format!("scripted failure {}", attempt + 1)));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(alert.clone());
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "recording sender".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn decision() -> Decision {
        Decision {
            final_class: "vvel".to_string(),
            class_id: Some(3),
            confidence: 0.876,
            timestamp: Utc.with_ymd_and_hms(2024, 7, 1, 14, 30, 5).unwrap(),
            should_persist: true,
            is_priority: true,
        }
    }

    #[test]
    fn test_compose_subject_body_and_attachments() {
        let alert = compose_detection_alert(
            "Vespa velutina",
            &decision(),
            Some(Path::new("/data/annotated/image_after_inference_1.jpg")),
            Path::new("/data/image_for_detection.jpg"),
        );

        assert_eq!(alert.subject, "Vespa velutina detected");
        assert!(alert.body.contains("2024-07-01 14:30:05"));
        assert!(alert.body.contains("0.88"));
        let names: Vec<_> = alert.attachments.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, ["image_after_inference_1.jpg", "image_for_detection.jpg"]);
    }

    #[test]
    fn test_compose_without_annotated_copy() {
        let alert = compose_detection_alert("Hornet", &decision(), None, Path::new("frame.jpg"));
        assert_eq!(alert.attachments.len(), 1);
    }

    #[test]
    fn test_recording_sender_scripted_failures() {
        let sender = RecordingSender::failing_first(1);
        let alert = compose_detection_alert("Hornet", &decision(), None, Path::new("frame.jpg"));

        assert!(sender.send(&alert).is_err());
        assert!(sender.send(&alert).is_ok());
        assert_eq!(sender.attempts(), 2);
        assert_eq!(sender.sent().len(), 1);
    }
}
