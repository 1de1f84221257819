//! Frame Source Library
//!
//! Produces one still image on demand and reports where it was stored.
//! Supports:
//! - Raspberry Pi camera modules through `libcamera-still`
//! - Replaying a directory of stored images (bench runs without a camera)

pub mod frame;
pub mod replay;
pub mod still;

pub use frame::CapturedFrame;
pub use replay::ReplaySource;
pub use still::LibcameraStill;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// File name of the working frame inside the images folder
pub const CAPTURE_FILE_NAME: &str = "image_for_detection.jpg";

/// Camera error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to prepare output directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch capture command `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Capture command exited with {0}")]
    CommandFailed(String),

    #[error("Capture reported success but {0} is missing")]
    MissingOutput(PathBuf),

    #[error("No images to replay in {0}")]
    EmptyReplay(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How frames are acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Run `libcamera-still` for every frame
    #[default]
    Libcamera,
    /// Copy images from `replay_dir` in turn
    Replay,
}

/// Camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Acquisition mode
    pub mode: CaptureMode,
    /// Capture command (libcamera mode)
    pub command: String,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Extra arguments appended to the capture command
    pub extra_args: Vec<String>,
    /// Source directory for replay mode
    pub replay_dir: Option<PathBuf>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Libcamera,
            command: "libcamera-still".to_string(),
            width: 4656,
            height: 3496,
            extra_args: Vec::new(),
            replay_dir: None,
        }
    }
}

/// Produces one still frame per call.
///
/// Implementations block until the image is on disk; callers on an async
/// runtime are expected to run them on a blocking thread.
pub trait FrameSource: Send + Sync {
    /// Capture a frame. Never returns a path to a file that does not exist.
    fn capture(&self) -> Result<CapturedFrame, CameraError>;

    /// Short human readable description for logs
    fn describe(&self) -> String;
}

/// Build the configured frame source writing into `images_folder`
pub fn from_config(
    config: &CameraConfig,
    images_folder: impl Into<PathBuf>,
) -> Result<Box<dyn FrameSource>, CameraError> {
    let images_folder = images_folder.into();
    match config.mode {
        CaptureMode::Libcamera => Ok(Box::new(LibcameraStill::new(config, images_folder))),
        CaptureMode::Replay => {
            let dir = config
                .replay_dir
                .clone()
                .ok_or_else(|| CameraError::EmptyReplay(PathBuf::from("<unset replay_dir>")))?;
            Ok(Box::new(ReplaySource::open(dir, images_folder)?))
        }
    }
}

/// Create `dir` (and parents) if it does not exist yet
pub(crate) fn ensure_dir(dir: &std::path::Path) -> Result<(), CameraError> {
    std::fs::create_dir_all(dir).map_err(|source| CameraError::Directory {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_mode_requires_directory() {
        let config = CameraConfig {
            mode: CaptureMode::Replay,
            ..Default::default()
        };
        let result = from_config(&config, "/tmp/unused");
        assert!(matches!(result, Err(CameraError::EmptyReplay(_))));
    }

    #[test]
    fn test_default_resolution() {
        let config = CameraConfig::default();
        assert_eq!((config.width, config.height), (4656, 3496));
        assert_eq!(config.mode, CaptureMode::Libcamera);
    }
}
