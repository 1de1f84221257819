//! Captured frame handle

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// A still image written to disk by a [`crate::FrameSource`]
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// Location of the encoded image
    pub path: PathBuf,
    /// Wall-clock capture time
    pub captured_at: DateTime<Utc>,
    /// Monotonic frame counter of the producing source
    pub sequence: u64,
}

impl CapturedFrame {
    pub fn new(path: PathBuf, sequence: u64) -> Self {
        Self {
            path,
            captured_at: Utc::now(),
            sequence,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
