//! Storage Layer
//!
//! Writes the per-cycle artifacts (annotated copy, archived detection and
//! its JSON sidecar) and keeps the recent detection history for the timeline.

mod artifacts;
mod history;

pub use artifacts::{
    parse_archive_name, ArchivedDetection, ArtifactStore, DetectionSidecar, PersistedArtifacts,
    Persistence, ANNOTATED_DIR, ARCHIVE_DIR,
};
pub use history::{DetectionHistory, HistoryEntry, TimelineBucket};

use std::path::PathBuf;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Image error on {path}: {reason}")]
    Image { path: PathBuf, reason: String },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Lock error: {0}")]
    Lock(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| StorageError::Io { path, source }
    }
}
