//! `libcamera-still` capture

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::{ensure_dir, CameraConfig, CameraError, CapturedFrame, FrameSource, CAPTURE_FILE_NAME};

/// Captures stills by running the libcamera CLI once per frame
pub struct LibcameraStill {
    command: String,
    width: u32,
    height: u32,
    extra_args: Vec<String>,
    output: PathBuf,
    sequence: AtomicU64,
}

impl LibcameraStill {
    /// Create a capture source writing to `<images_folder>/image_for_detection.jpg`
    pub fn new(config: &CameraConfig, images_folder: PathBuf) -> Self {
        let output = images_folder.join(CAPTURE_FILE_NAME);
        info!(
            "libcamera capture: {} {}x{} -> {}",
            config.command,
            config.width,
            config.height,
            output.display()
        );
        Self {
            command: config.command.clone(),
            width: config.width,
            height: config.height,
            extra_args: config.extra_args.clone(),
            output,
            sequence: AtomicU64::new(0),
        }
    }

    /// Target path of every capture
    pub fn output_path(&self) -> &PathBuf {
        &self.output
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg("-n")
            .arg("-o")
            .arg(&self.output)
            .arg("--width")
            .arg(self.width.to_string())
            .arg("--height")
            .arg(self.height.to_string())
            .args(&self.extra_args);
        cmd
    }
}

impl FrameSource for LibcameraStill {
    fn capture(&self) -> Result<CapturedFrame, CameraError> {
        if let Some(parent) = self.output.parent() {
            ensure_dir(parent)?;
        }

        // A stale frame must never be reported as a fresh capture
        match std::fs::remove_file(&self.output) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CameraError::Io(e)),
        }

        let start = Instant::now();
        let output = self
            .build_command()
            .output()
            .map_err(|source| CameraError::Launch {
                command: self.command.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CameraError::CommandFailed(format!(
                "{} ({})",
                output.status,
                stderr.trim()
            )));
        }

        if !self.output.is_file() {
            return Err(CameraError::MissingOutput(self.output.clone()));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            "Captured frame #{} to {} in {}ms",
            sequence,
            self.output.display(),
            start.elapsed().as_millis()
        );
        Ok(CapturedFrame::new(self.output.clone(), sequence))
    }

    fn describe(&self) -> String {
        format!("{} {}x{}", self.command, self.width, self.height)
    }
}
