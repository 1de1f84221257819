//! Per-cycle artifacts on disk

use chrono::{Local, NaiveDateTime};
use frame_source::CapturedFrame;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use inference_engine::{Decision, DetectionRegion};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::StorageError;

/// Subdirectory of the images folder holding annotated copies
pub const ANNOTATED_DIR: &str = "annotated";
/// Subdirectory of the images folder holding archived detections
pub const ARCHIVE_DIR: &str = "detections";

const ANNOTATED_PREFIX: &str = "image_after_inference_";
const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

const PRIORITY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const OTHER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Paths written for one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedArtifacts {
    pub annotated: PathBuf,
    pub archived: Option<PathBuf>,
    pub sidecar: Option<PathBuf>,
}

/// Raw detections stored next to an archived image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSidecar {
    pub source_image: PathBuf,
    pub archived_image: PathBuf,
    pub decision: Decision,
    pub regions: Vec<DetectionRegion>,
}

/// Archived detection as recovered from its file name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedDetection {
    pub file_name: String,
    pub path: PathBuf,
    pub class: String,
    pub confidence: f32,
    pub captured_at: NaiveDateTime,
}

/// Persistence capability used by the orchestrator
pub trait Persistence: Send + Sync {
    /// Write the annotated copy; when `decision.should_persist`, also the
    /// archived copy and its sidecar
    fn persist(
        &self,
        frame: &CapturedFrame,
        decision: &Decision,
        regions: &[DetectionRegion],
    ) -> Result<PersistedArtifacts, StorageError>;
}

/// Filesystem artifact store rooted at the images folder
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    images_folder: PathBuf,
    priority_class: Option<u32>,
    /// Regions at or below this confidence are neither drawn nor recorded
    min_confidence: f32,
    /// Annotated copies kept on disk (oldest removed first)
    annotated_retention: usize,
}

impl ArtifactStore {
    pub fn new(images_folder: impl Into<PathBuf>) -> Self {
        Self {
            images_folder: images_folder.into(),
            priority_class: None,
            min_confidence: 0.0,
            annotated_retention: 200,
        }
    }

    /// Boxes of this class are drawn in the priority color
    pub fn with_priority_class(mut self, class_id: u32) -> Self {
        self.priority_class = Some(class_id);
        self
    }

    /// Skip regions at or below `threshold`, normally the reducer threshold
    pub fn with_min_confidence(mut self, threshold: f32) -> Self {
        self.min_confidence = threshold;
        self
    }

    pub fn with_annotated_retention(mut self, keep: usize) -> Self {
        self.annotated_retention = keep.max(1);
        self
    }

    pub fn images_folder(&self) -> &Path {
        &self.images_folder
    }

    pub fn annotated_dir(&self) -> PathBuf {
        self.images_folder.join(ANNOTATED_DIR)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.images_folder.join(ARCHIVE_DIR)
    }

    /// Archived detections, highest confidence first (newest first on ties)
    pub fn list_archived(
        &self,
        class: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ArchivedDetection>, StorageError> {
        let dir = self.archive_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io { path: dir, source: e }),
        };

        let mut found: Vec<ArchivedDetection> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| parse_archive_name(&entry.path()))
            .filter(|d| class.map_or(true, |c| d.class == c))
            .collect();

        found.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.captured_at.cmp(&a.captured_at))
        });
        found.truncate(limit);
        Ok(found)
    }

    fn archive(
        &self,
        frame: &CapturedFrame,
        decoded: &RgbImage,
        stem: &str,
    ) -> Result<PathBuf, StorageError> {
        let dir = ensure_dir(self.archive_dir())?;
        let archived = dir.join(format!("{}.jpg", stem));

        if is_jpeg(frame.path()) {
            std::fs::copy(frame.path(), &archived).map_err(StorageError::io(&archived))?;
        } else {
            save_image(decoded, &archived)?;
        }
        Ok(archived)
    }

    fn prune_annotated(&self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {} for retention: {}", dir.display(), e);
                return;
            }
        };

        let mut annotated: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(ANNOTATED_PREFIX))
            })
            .collect();

        if annotated.len() <= self.annotated_retention {
            return;
        }
        // Timestamped names sort chronologically
        annotated.sort();
        let excess = annotated.len() - self.annotated_retention;
        for old in annotated.into_iter().take(excess) {
            if let Err(e) = std::fs::remove_file(&old) {
                warn!("Failed to remove {}: {}", old.display(), e);
            }
        }
        debug!("Pruned {} annotated images", excess);
    }
}

impl Persistence for ArtifactStore {
    fn persist(
        &self,
        frame: &CapturedFrame,
        decision: &Decision,
        regions: &[DetectionRegion],
    ) -> Result<PersistedArtifacts, StorageError> {
        let stamp = decision.timestamp.with_timezone(&Local).format(STAMP_FORMAT).to_string();
        let kept: Vec<DetectionRegion> = regions
            .iter()
            .filter(|r| r.confidence > self.min_confidence)
            .cloned()
            .collect();

        let mut image = image::open(frame.path())
            .map_err(|e| StorageError::Image {
                path: frame.path().to_path_buf(),
                reason: e.to_string(),
            })?
            .to_rgb8();

        let (archived, sidecar) = if decision.should_persist {
            let stem = format!("{}-{:.2}-{}", decision.final_class, decision.confidence, stamp);
            let archived = self.archive(frame, &image, &stem)?;

            let sidecar_path = archived.with_extension("json");
            let sidecar = DetectionSidecar {
                source_image: frame.path().to_path_buf(),
                archived_image: archived.clone(),
                decision: decision.clone(),
                regions: kept.clone(),
            };
            std::fs::write(&sidecar_path, serde_json::to_vec_pretty(&sidecar)?)
                .map_err(StorageError::io(&sidecar_path))?;

            info!("Detection archived: {}", archived.display());
            (Some(archived), Some(sidecar_path))
        } else {
            (None, None)
        };

        let thickness = (image.width() / 400).max(2);
        for region in &kept {
            let color = if Some(region.class_id) == self.priority_class {
                PRIORITY_COLOR
            } else {
                OTHER_COLOR
            };
            draw_region(&mut image, region, color, thickness);
        }

        let annotated_dir = ensure_dir(self.annotated_dir())?;
        let annotated = annotated_dir.join(format!("{}{}.jpg", ANNOTATED_PREFIX, stamp));
        save_image(&image, &annotated)?;
        debug!("Annotated image saved to {}", annotated.display());
        self.prune_annotated(&annotated_dir);

        Ok(PersistedArtifacts {
            annotated,
            archived,
            sidecar,
        })
    }
}

/// Parse `<class>-<confidence>-<YYYYmmdd>-<HHMMSS>.jpg`
pub fn parse_archive_name(path: &Path) -> Option<ArchivedDetection> {
    if !is_jpeg(path) {
        return None;
    }
    let file_name = path.file_name()?.to_str()?.to_string();
    let stem = path.file_stem()?.to_str()?;

    let mut parts = stem.rsplitn(4, '-');
    let time = parts.next()?;
    let date = parts.next()?;
    let confidence: f32 = parts.next()?.parse().ok()?;
    let class = parts.next()?;
    if class.is_empty() {
        return None;
    }
    let captured_at =
        NaiveDateTime::parse_from_str(&format!("{}-{}", date, time), STAMP_FORMAT).ok()?;

    Some(ArchivedDetection {
        file_name,
        path: path.to_path_buf(),
        class: class.to_string(),
        confidence,
        captured_at,
    })
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
}

fn ensure_dir(dir: PathBuf) -> Result<PathBuf, StorageError> {
    std::fs::create_dir_all(&dir).map_err(StorageError::io(&dir))?;
    Ok(dir)
}

fn save_image(image: &RgbImage, path: &Path) -> Result<(), StorageError> {
    image.save(path).map_err(|e| StorageError::Image {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn draw_region(image: &mut RgbImage, region: &DetectionRegion, color: Rgb<u8>, thickness: u32) {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp = |v: f32, max: u32| v.max(0.0).min((max - 1) as f32) as i32;
    let (x1, y1) = (clamp(region.bbox.x1, w), clamp(region.bbox.y1, h));
    let (x2, y2) = (clamp(region.bbox.x2, w), clamp(region.bbox.y2, h));

    for t in 0..thickness as i32 {
        let rw = x2 - x1 - 2 * t;
        let rh = y2 - y1 - 2 * t;
        if rw <= 0 || rh <= 0 {
            break;
        }
        draw_hollow_rect_mut(image, Rect::at(x1 + t, y1 + t).of_size(rw as u32, rh as u32), color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use inference_engine::BoundingBox;

    fn write_frame(dir: &Path, name: &str) -> CapturedFrame {
        let path = dir.join(name);
        RgbImage::from_pixel(64, 48, Rgb([10, 10, 10])).save(&path).unwrap();
        CapturedFrame::new(path, 1)
    }

    fn decision(class: &str, confidence: f32, persist: bool) -> Decision {
        Decision {
            final_class: class.to_string(),
            class_id: persist.then_some(3),
            confidence,
            timestamp: Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap(),
            should_persist: persist,
            is_priority: persist,
        }
    }

    fn regions() -> Vec<DetectionRegion> {
        vec![DetectionRegion::new(BoundingBox::new(8.0, 8.0, 40.0, 30.0), 3, 0.93)]
    }

    #[test]
    fn test_no_detection_writes_only_annotated() {
        let dir = tempfile::tempdir().unwrap();
        let frame = write_frame(dir.path(), "image_for_detection.jpg");
        let store = ArtifactStore::new(dir.path());

        let artifacts = store.persist(&frame, &decision("no_detection", 0.0, false), &[]).unwrap();
        assert!(artifacts.annotated.exists());
        assert!(artifacts.annotated.starts_with(dir.path().join(ANNOTATED_DIR)));
        assert!(artifacts.archived.is_none());
        assert!(!store.archive_dir().exists());
    }

    #[test]
    fn test_detection_archived_with_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let frame = write_frame(dir.path(), "image_for_detection.jpg");
        let store = ArtifactStore::new(dir.path()).with_priority_class(3);

        let artifacts = store.persist(&frame, &decision("vvel", 0.93, true), &regions()).unwrap();
        let archived = artifacts.archived.unwrap();
        let name = archived.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("vvel-0.93-"));
        assert!(archived.exists());

        let sidecar: DetectionSidecar =
            serde_json::from_slice(&std::fs::read(artifacts.sidecar.unwrap()).unwrap()).unwrap();
        assert_eq!(sidecar.regions.len(), 1);
        assert_eq!(sidecar.decision.final_class, "vvel");

        // Boxes are drawn on the annotated copy only
        let annotated = image::open(&artifacts.annotated).unwrap().to_rgb8();
        let edge = annotated.get_pixel(8, 15);
        assert!(edge[0] as i32 - edge[1] as i32 > 60);
    }

    #[test]
    fn test_regions_below_threshold_are_not_drawn() {
        let dir = tempfile::tempdir().unwrap();
        let frame = write_frame(dir.path(), "image_for_detection.jpg");
        let store = ArtifactStore::new(dir.path())
            .with_priority_class(3)
            .with_min_confidence(0.8);
        let weak = vec![DetectionRegion::new(BoundingBox::new(8.0, 8.0, 40.0, 30.0), 3, 0.5)];

        let artifacts = store
            .persist(&frame, &decision("no_detection", 0.0, false), &weak)
            .unwrap();

        let annotated = image::open(&artifacts.annotated).unwrap().to_rgb8();
        let edge = annotated.get_pixel(8, 15);
        assert!((edge[0] as i32 - edge[1] as i32).abs() < 20, "box drawn: {:?}", edge);
    }

    #[test]
    fn test_sidecar_keeps_only_surviving_regions() {
        let dir = tempfile::tempdir().unwrap();
        let frame = write_frame(dir.path(), "image_for_detection.jpg");
        let store = ArtifactStore::new(dir.path()).with_min_confidence(0.8);
        let mut mixed = regions();
        mixed.push(DetectionRegion::new(BoundingBox::new(1.0, 1.0, 5.0, 5.0), 0, 0.3));

        let artifacts = store.persist(&frame, &decision("vvel", 0.93, true), &mixed).unwrap();
        let sidecar: DetectionSidecar =
            serde_json::from_slice(&std::fs::read(artifacts.sidecar.unwrap()).unwrap()).unwrap();
        assert_eq!(sidecar.regions.len(), 1);
        assert_eq!(sidecar.regions[0].class_id, 3);
    }

    #[test]
    fn test_png_frame_is_reencoded_for_archive() {
        let dir = tempfile::tempdir().unwrap();
        let frame = write_frame(dir.path(), "image_for_detection.png");
        let store = ArtifactStore::new(dir.path());

        let artifacts = store.persist(&frame, &decision("vcra", 0.81, true), &regions()).unwrap();
        let archived = artifacts.archived.unwrap();
        assert_eq!(image::ImageFormat::from_path(&archived).unwrap(), image::ImageFormat::Jpeg);
        assert!(image::open(&archived).is_ok());
    }

    #[test]
    fn test_missing_frame_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let frame = CapturedFrame::new(dir.path().join("missing.jpg"), 1);
        assert!(matches!(
            store.persist(&frame, &decision("vvel", 0.9, true), &[]),
            Err(StorageError::Image { .. })
        ));
    }

    #[test]
    fn test_out_of_bounds_boxes_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let frame = write_frame(dir.path(), "frame.jpg");
        let store = ArtifactStore::new(dir.path());
        let wild = vec![
            DetectionRegion::new(BoundingBox::new(-50.0, -50.0, 500.0, 500.0), 0, 0.9),
            DetectionRegion::new(BoundingBox::new(f32::NAN, 1.0, 2.0, f32::NAN), 1, 0.9),
        ];
        assert!(store.persist(&frame, &decision("amel", 0.9, true), &wild).is_ok());
    }

    #[test]
    fn test_annotated_retention() {
        let dir = tempfile::tempdir().unwrap();
        let frame = write_frame(dir.path(), "frame.jpg");
        let store = ArtifactStore::new(dir.path()).with_annotated_retention(2);

        for minute in 0..4 {
            let mut d = decision("no_detection", 0.0, false);
            d.timestamp = Utc.with_ymd_and_hms(2024, 7, 1, 12, minute, 0).unwrap();
            store.persist(&frame, &d, &[]).unwrap();
        }
        assert_eq!(std::fs::read_dir(store.annotated_dir()).unwrap().count(), 2);
    }

    #[test]
    fn test_parse_archive_name() {
        let parsed = parse_archive_name(Path::new("/x/vvel-0.87-20240701-143005.jpg")).unwrap();
        assert_eq!(parsed.class, "vvel");
        assert!((parsed.confidence - 0.87).abs() < 1e-6);
        assert_eq!(parsed.captured_at.format("%H:%M:%S").to_string(), "14:30:05");

        assert!(parse_archive_name(Path::new("vvel-0.87-20240701-143005.json")).is_none());
        assert!(parse_archive_name(Path::new("image_for_detection.jpg")).is_none());
    }

    #[test]
    fn test_list_archived_sorted_by_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.list_archived(None, 4).unwrap().is_empty());

        std::fs::create_dir_all(store.archive_dir()).unwrap();
        for name in [
            "vvel-0.81-20240701-100000.jpg",
            "vvel-0.95-20240701-110000.jpg",
            "amel-0.99-20240701-120000.jpg",
            "vvel-0.81-20240701-130000.jpg",
            "vvel-0.95-20240701-110000.json",
        ] {
            std::fs::write(store.archive_dir().join(name), b"x").unwrap();
        }

        let listed = store.list_archived(Some("vvel"), 2).unwrap();
        let names: Vec<_> = listed.iter().map(|d| d.file_name.as_str()).collect();
        assert_eq!(names, ["vvel-0.95-20240701-110000.jpg", "vvel-0.81-20240701-130000.jpg"]);
        assert_eq!(store.list_archived(None, 10).unwrap().len(), 4);
    }
}
