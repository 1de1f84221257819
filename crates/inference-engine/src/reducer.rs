//! Reduction of per-frame detections to one decision

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::{DetectionRegion, InferenceError};

/// Class label reported when nothing survives the confidence filter
pub const NO_DETECTION: &str = "no_detection";

/// Class names indexed by class id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassTable {
    names: Vec<String>,
}

impl ClassTable {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Label for `class_id`; ids outside the table render as `class_<id>`
    pub fn label(&self, class_id: u32) -> String {
        self.names
            .get(class_id as usize)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }

    pub fn contains(&self, class_id: u32) -> bool {
        (class_id as usize) < self.names.len()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Outcome of one cycle's classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Winning class label, or [`NO_DETECTION`]
    pub final_class: String,
    /// Winning class id, `None` when nothing was detected
    pub class_id: Option<u32>,
    /// Max confidence of the winning class (0 when nothing was detected)
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    /// Whether the frame should be archived
    pub should_persist: bool,
    /// Whether the winning class is the priority class
    pub is_priority: bool,
}

impl Decision {
    pub fn no_detection(timestamp: DateTime<Utc>) -> Self {
        Self {
            final_class: NO_DETECTION.to_string(),
            class_id: None,
            confidence: 0.0,
            timestamp,
            should_persist: false,
            is_priority: false,
        }
    }

    pub fn is_detection(&self) -> bool {
        self.final_class != NO_DETECTION
    }
}

#[derive(Debug, Clone, Copy)]
struct ClassStats {
    max_confidence: f32,
}

/// Applies the confidence filter and the priority-class override
#[derive(Debug, Clone)]
pub struct Reducer {
    classes: ClassTable,
    threshold: f32,
    priority_class: u32,
}

impl Reducer {
    pub fn new(
        classes: ClassTable,
        threshold: f32,
        priority_class: u32,
    ) -> Result<Self, InferenceError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(InferenceError::InvalidConfig(format!(
                "confidence threshold {} outside [0, 1]",
                threshold
            )));
        }
        Ok(Self {
            classes,
            threshold,
            priority_class,
        })
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn priority_class(&self) -> u32 {
        self.priority_class
    }

    pub fn priority_label(&self) -> String {
        self.classes.label(self.priority_class)
    }

    /// Reduce using the current time as the decision timestamp
    pub fn reduce(&self, regions: &[DetectionRegion]) -> Decision {
        self.reduce_at(regions, Utc::now())
    }

    pub fn reduce_at(&self, regions: &[DetectionRegion], timestamp: DateTime<Utc>) -> Decision {
        let mut per_class: BTreeMap<u32, ClassStats> = BTreeMap::new();

        // NaN never passes the comparison
        for region in regions.iter().filter(|r| r.confidence > self.threshold) {
            per_class
                .entry(region.class_id)
                .and_modify(|s| s.max_confidence = s.max_confidence.max(region.confidence))
                .or_insert(ClassStats {
                    max_confidence: region.confidence,
                });
        }

        let winner = match per_class.get(&self.priority_class) {
            Some(stats) => Some((self.priority_class, *stats)),
            None => per_class.iter().fold(None, |best: Option<(u32, ClassStats)>, (&id, &stats)| {
                match best {
                    Some((_, b)) if b.max_confidence >= stats.max_confidence => best,
                    _ => Some((id, stats)),
                }
            }),
        };

        let decision = match winner {
            Some((class_id, stats)) => Decision {
                final_class: self.classes.label(class_id),
                class_id: Some(class_id),
                confidence: stats.max_confidence,
                timestamp,
                should_persist: true,
                is_priority: class_id == self.priority_class,
            },
            None => Decision::no_detection(timestamp),
        };

        debug!(
            "Reduced {} regions ({} classes above {:.2}) to {} ({:.2})",
            regions.len(),
            per_class.len(),
            self.threshold,
            decision.final_class,
            decision.confidence
        );
        decision
    }
}
