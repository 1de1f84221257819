//! YOLO-style detector running on tract

use std::path::{Path, PathBuf};
use std::time::Instant;
use image::{Rgb, RgbImage};
use tracing::{debug, info};
use tract_onnx::prelude::*;
use tract_onnx::prelude::tract_ndarray::{Array4, ArrayView2, Axis, Ix3};

use crate::{BoundingBox, Classifier, ClassifierConfig, DetectionRegion, InferenceError};

/// ONNX detector for models exported with a `1x(4+C)xN` output
/// (center x, center y, width, height, then one score per class).
pub struct OnnxClassifier {
    model: TypedRunnableModel<TypedModel>,
    config: ClassifierConfig,
    model_path: PathBuf,
}

impl OnnxClassifier {
    /// Load and optimize the model at `path`
    pub fn load(path: impl AsRef<Path>, config: ClassifierConfig) -> Result<Self, InferenceError> {
        config.validate()?;
        let path = path.as_ref();
        let size = config.input_size as usize;
        info!("Loading detection model from {} (input {}x{})", path.display(), size, size);

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|m| m.with_input_fact(0, f32::fact([1, 3, size, size]).into()))
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| InferenceError::ModelLoadError(format!("{}: {}", path.display(), e)))?;

        info!("Model loaded successfully");
        Ok(Self {
            model,
            config,
            model_path: path.to_path_buf(),
        })
    }

    /// Get model path
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn preprocess(&self, image: &Path) -> Result<(Tensor, Letterbox), InferenceError> {
        let decoded = image::open(image).map_err(|e| InferenceError::ImageDecode {
            path: image.display().to_string(),
            reason: e.to_string(),
        })?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();

        let size = self.config.input_size;
        let letterbox = Letterbox::fit(width, height, size);
        let resized = image::imageops::resize(
            &rgb,
            letterbox.width,
            letterbox.height,
            image::imageops::FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.pad_x),
            i64::from(letterbox.pad_y),
        );

        let side = size as usize;
        let input: Tensor = Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            canvas[(x as u32, y as u32)][c] as f32 / 255.0
        })
        .into();

        Ok((input, letterbox))
    }
}

/// Gray used for the letterbox bars
const PAD_VALUE: u8 = 114;

/// Aspect-preserving fit of the source image into the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    pub(crate) fn fit(src_width: u32, src_height: u32, size: u32) -> Self {
        let scale_x = size as f32 / src_width.max(1) as f32;
        let scale_y = size as f32 / src_height.max(1) as f32;
        let scale = scale_x.min(scale_y);
        let width = ((src_width as f32 * scale).round() as u32).clamp(1, size);
        let height = ((src_height as f32 * scale).round() as u32).clamp(1, size);
        Self {
            scale,
            width,
            height,
            pad_x: (size - width) / 2,
            pad_y: (size - height) / 2,
        }
    }

    /// Map a box in model input pixels back to source image pixels
    pub(crate) fn to_source(&self, bbox: &BoundingBox) -> BoundingBox {
        let (px, py) = (self.pad_x as f32, self.pad_y as f32);
        BoundingBox::new(
            (bbox.x1 - px) / self.scale,
            (bbox.y1 - py) / self.scale,
            (bbox.x2 - px) / self.scale,
            (bbox.y2 - py) / self.scale,
        )
    }
}

impl Classifier for OnnxClassifier {
    fn infer(&self, image: &Path) -> Result<Vec<DetectionRegion>, InferenceError> {
        let start = Instant::now();
        let (input, letterbox) = self.preprocess(image)?;

        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| InferenceError::InferenceFailed("model produced no outputs".into()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| InferenceError::InferenceFailed(e.to_string()))?;
        let shape = view.shape().to_vec();
        let view = view
            .into_dimensionality::<Ix3>()
            .map_err(|_| InferenceError::InvalidOutputShape {
                expected: "[1, 4 + classes, anchors]".to_string(),
                actual: format!("{:?}", shape),
            })?;
        let predictions = view.index_axis(Axis(0), 0);

        // Some exports emit [anchors, 4 + classes]
        let predictions = if predictions.nrows() > predictions.ncols() {
            predictions.reversed_axes()
        } else {
            predictions
        };

        let candidates = decode_predictions(predictions, &letterbox, self.config.min_score)?;
        let regions = non_max_suppression(candidates, self.config.iou_threshold);

        debug!(
            "Inference on {} produced {} regions in {}ms",
            image.display(),
            regions.len(),
            start.elapsed().as_millis()
        );
        Ok(regions)
    }

    fn describe(&self) -> String {
        format!("onnx model {}", self.model_path.display())
    }
}

/// Turn a `(4 + C) x N` prediction matrix into candidate regions in source pixels
pub(crate) fn decode_predictions(
    predictions: ArrayView2<f32>,
    letterbox: &Letterbox,
    min_score: f32,
) -> Result<Vec<DetectionRegion>, InferenceError> {
    let rows = predictions.nrows();
    if rows < 5 {
        return Err(InferenceError::InvalidOutputShape {
            expected: "at least 5 rows (box + one class)".to_string(),
            actual: format!("{:?}", predictions.shape()),
        });
    }

    let mut regions = Vec::new();
    for anchor in predictions.columns() {
        let (class_id, score) = anchor
            .iter()
            .skip(4)
            .enumerate()
            .fold((0usize, f32::MIN), |best, (idx, &score)| {
                if score > best.1 {
                    (idx, score)
                } else {
                    best
                }
            });

        if score < min_score {
            continue;
        }

        let bbox = letterbox.to_source(&BoundingBox::from_center(
            anchor[0], anchor[1], anchor[2], anchor[3],
        ));
        regions.push(DetectionRegion::new(bbox, class_id as u32, score.clamp(0.0, 1.0)));
    }
    Ok(regions)
}

/// Greedy per-class non-maximum suppression, highest confidence first
pub(crate) fn non_max_suppression(
    mut candidates: Vec<DetectionRegion>,
    iou_threshold: f32,
) -> Vec<DetectionRegion> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<DetectionRegion> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use tract_onnx::prelude::tract_ndarray::Array2;

    /// Build a (4 + classes) x anchors matrix from per-anchor rows
    fn predictions(anchors: &[[f32; 6]]) -> Array2<f32> {
        let mut m = Array2::<f32>::zeros((6, anchors.len()));
        for (col, values) in anchors.iter().enumerate() {
            for (row, v) in values.iter().enumerate() {
                m[[row, col]] = *v;
            }
        }
        m
    }

    #[test]
    fn test_letterbox_landscape_pads_vertically() {
        let lb = Letterbox::fit(1280, 640, 640);
        assert_eq!((lb.width, lb.height), (640, 320));
        assert_eq!((lb.pad_x, lb.pad_y), (0, 160));
        assert!((lb.scale - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_maps_back_to_source() {
        let lb = Letterbox::fit(1280, 640, 640);
        let source = lb.to_source(&BoundingBox::new(100.0, 200.0, 300.0, 400.0));
        assert_eq!(source, BoundingBox::new(200.0, 80.0, 600.0, 480.0));
    }

    #[test]
    fn test_decode_picks_best_class_and_maps_to_source() {
        let m = predictions(&[
            [320.0, 320.0, 64.0, 64.0, 0.1, 0.9],
            [100.0, 100.0, 10.0, 10.0, 0.05, 0.1],
        ]);
        let lb = Letterbox::fit(1280, 640, 640);
        let regions = decode_predictions(m.view(), &lb, 0.25).unwrap();

        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].class_id, 1);
        assert!((regions[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(regions[0].bbox, BoundingBox::new(576.0, 256.0, 704.0, 384.0));
    }

    #[test]
    fn test_decode_rejects_short_output() {
        let m = Array2::<f32>::zeros((4, 3));
        let lb = Letterbox::fit(640, 640, 640);
        assert!(decode_predictions(m.view(), &lb, 0.1).is_err());
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap_only() {
        let a = DetectionRegion::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0, 0.9);
        let b = DetectionRegion::new(BoundingBox::new(1.0, 1.0, 11.0, 11.0), 0, 0.8);
        let c = DetectionRegion::new(BoundingBox::new(1.0, 1.0, 11.0, 11.0), 1, 0.7);
        let far = DetectionRegion::new(BoundingBox::new(50.0, 50.0, 60.0, 60.0), 0, 0.6);

        let kept = non_max_suppression(vec![b, far.clone(), a.clone(), c.clone()], 0.45);
        assert_eq!(kept, vec![a, c, far]);
    }
}
