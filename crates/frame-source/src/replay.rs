//! Directory replay source

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::{ensure_dir, CameraError, CapturedFrame, FrameSource, CAPTURE_FILE_NAME};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Replays stored images in file-name order, wrapping around at the end
pub struct ReplaySource {
    images: Vec<PathBuf>,
    output: PathBuf,
    next: AtomicU64,
}

impl ReplaySource {
    /// Scan `dir` for images; frames are copied to `<images_folder>/image_for_detection.jpg`
    pub fn open(dir: impl AsRef<Path>, images_folder: PathBuf) -> Result<Self, CameraError> {
        let dir = dir.as_ref();
        let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image(path))
            .collect();
        images.sort();

        if images.is_empty() {
            return Err(CameraError::EmptyReplay(dir.to_path_buf()));
        }

        info!("Replaying {} images from {}", images.len(), dir.display());
        Ok(Self {
            images,
            output: images_folder.join(CAPTURE_FILE_NAME),
            next: AtomicU64::new(0),
        })
    }

    /// Number of images in the replay set
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ReplaySource {
    fn capture(&self) -> Result<CapturedFrame, CameraError> {
        if let Some(parent) = self.output.parent() {
            ensure_dir(parent)?;
        }

        let index = self.next.fetch_add(1, Ordering::Relaxed);
        let source = &self.images[(index % self.images.len() as u64) as usize];

        // Keep the source encoding; only the file name is fixed
        let output = match source.extension() {
            Some(ext) => self.output.with_extension(ext),
            None => self.output.clone(),
        };
        std::fs::copy(source, &output)?;
        debug!("Replayed {} -> {}", source.display(), output.display());

        Ok(CapturedFrame::new(output, index + 1))
    }

    fn describe(&self) -> String {
        format!("replay of {} images", self.images.len())
    }
}
