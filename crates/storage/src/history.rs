//! In-memory detection history

use chrono::{DateTime, Duration, DurationRound, Utc};
use inference_engine::Decision;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::StorageError;

/// One reduced cycle outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub final_class: String,
    pub confidence: f32,
    pub is_priority: bool,
}

impl From<&Decision> for HistoryEntry {
    fn from(decision: &Decision) -> Self {
        Self {
            timestamp: decision.timestamp,
            final_class: decision.final_class.clone(),
            confidence: decision.confidence,
            is_priority: decision.is_priority,
        }
    }
}

/// Detection counts for one timeline interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineBucket {
    pub start: DateTime<Utc>,
    /// `HH:MM` of the interval start
    pub label: String,
    pub priority: usize,
    pub other: usize,
}

/// Bounded history of cycle outcomes (oldest dropped first)
pub struct DetectionHistory {
    entries: Mutex<VecDeque<HistoryEntry>>,
    max_entries: usize,
}

impl DetectionHistory {
    pub fn new(max_entries: usize) -> Self {
        info!("Creating detection history (retention {} entries)", max_entries);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_entries.min(4096))),
            max_entries: max_entries.max(1),
        }
    }

    pub fn record(&self, entry: HistoryEntry) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))?;

        while entries.len() >= self.max_entries {
            entries.pop_front();
        }
        debug!("History: {} at {}", entry.final_class, entry.timestamp);
        entries.push_back(entry);
        Ok(())
    }

    /// Most recent entries, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }

    /// Per-interval counts of priority and other detections.
    ///
    /// `buckets` intervals of `bucket_minutes` each, the last one starting at
    /// `now` truncated to the minute and extending to `now`. Entries older than
    /// the first interval and `no_detection` outcomes are not counted.
    pub fn timeline(
        &self,
        now: DateTime<Utc>,
        bucket_minutes: u32,
        buckets: usize,
    ) -> Result<Vec<TimelineBucket>, StorageError> {
        let width = Duration::minutes(i64::from(bucket_minutes.max(1)));
        let anchor = now.duration_trunc(Duration::minutes(1)).unwrap_or(now);
        let n = buckets.max(1);
        let first = anchor - width * (n as i32 - 1);

        let mut timeline: Vec<TimelineBucket> = (0..n)
            .map(|i| {
                let start = first + width * i as i32;
                TimelineBucket {
                    start,
                    label: start.format("%H:%M").to_string(),
                    priority: 0,
                    other: 0,
                }
            })
            .collect();

        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))?;

        for entry in entries.iter().filter(|e| e.final_class != inference_engine::NO_DETECTION) {
            if entry.timestamp < first {
                continue;
            }
            let offset = (entry.timestamp - first).num_seconds() / width.num_seconds();
            let idx = (offset as usize).min(n - 1);
            if entry.is_priority {
                timeline[idx].priority += 1;
            } else {
                timeline[idx].other += 1;
            }
        }

        Ok(timeline)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl Default for DetectionHistory {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(ts: DateTime<Utc>, class: &str, is_priority: bool) -> HistoryEntry {
        HistoryEntry {
            timestamp: ts,
            final_class: class.to_string(),
            confidence: 0.9,
            is_priority,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_record_and_recent() {
        let history = DetectionHistory::new(100);
        history.record(entry(at(10, 0, 0), "amel", false)).unwrap();
        history.record(entry(at(10, 0, 15), "vvel", true)).unwrap();

        let recent = history.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].final_class, "vvel");
    }

    #[test]
    fn test_retention_limit() {
        let history = DetectionHistory::new(5);
        for i in 0..10 {
            history.record(entry(at(10, 0, i), "amel", false)).unwrap();
        }
        assert_eq!(history.len(), 5);
        assert_eq!(history.recent(1).unwrap()[0].timestamp, at(10, 0, 9));
    }

    #[test]
    fn test_timeline_buckets() {
        let history = DetectionHistory::default();
        history.record(entry(at(9, 0, 0), "vvel", true)).unwrap(); // before window
        history.record(entry(at(10, 1, 10), "vvel", true)).unwrap();
        history.record(entry(at(10, 1, 50), "amel", false)).unwrap();
        history.record(entry(at(10, 3, 0), "no_detection", false)).unwrap();
        history.record(entry(at(10, 4, 20), "vcra", false)).unwrap();

        let timeline = history.timeline(at(10, 4, 30), 1, 5).unwrap();
        let labels: Vec<_> = timeline.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, ["10:00", "10:01", "10:02", "10:03", "10:04"]);

        let counts: Vec<_> = timeline.iter().map(|b| (b.priority, b.other)).collect();
        assert_eq!(counts, [(0, 0), (1, 1), (0, 0), (0, 0), (0, 1)]);
    }

    #[test]
    fn test_timeline_wide_buckets() {
        let history = DetectionHistory::default();
        history.record(entry(at(10, 0, 0), "vvel", true)).unwrap();
        history.record(entry(at(10, 14, 59), "vvel", true)).unwrap();

        let timeline = history.timeline(at(10, 20, 0), 10, 3).unwrap();
        assert_eq!(timeline[0].start, at(10, 0, 0));
        assert_eq!(timeline[0].priority, 1);
        assert_eq!(timeline[1].priority, 1);
        assert_eq!(timeline[2].label, "10:20");
    }
}
