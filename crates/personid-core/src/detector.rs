//! SCRFD face detector via ONNX Runtime.
//!
//! The photo is letterboxed into the 640×640 model input. Each of the three
//! feature strides produces scores, box distances and landmark offsets for two
//! anchors per grid cell; detections above the confidence floor are mapped back
//! to photo coordinates and de-duplicated with NMS.

use crate::types::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_OUTPUTS: usize = SCRFD_STRIDES.len() * 3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download det_10g.onnx from insightface and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Placement of the photo inside the square model input.
///
/// Pads are whole pixels, the same offsets `preprocess` pastes at.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: usize,
    pad_y: usize,
}

impl Letterbox {
    /// Largest uniform scale that fits `width` × `height` into the input, centred.
    fn fit(width: u32, height: u32, input: usize) -> (Self, u32, u32) {
        let scale = (input as f32 / width as f32).min(input as f32 / height as f32);
        let fitted_w = ((width as f32 * scale).round() as usize).clamp(1, input);
        let fitted_h = ((height as f32 * scale).round() as usize).clamp(1, input);
        let letterbox = Self {
            scale,
            pad_x: (input - fitted_w) / 2,
            pad_y: (input - fitted_h) / 2,
        };
        (letterbox, fitted_w as u32, fitted_h as u32)
    }

    /// Model-input point back to photo coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x as f32) / self.scale, (y - self.pad_y as f32) / self.scale)
    }
}

/// Output tensor positions for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideHeads {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// Raw head outputs for one stride.
struct StrideOutputs<'a> {
    stride: usize,
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    heads: [StrideHeads; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = model_path, outputs = ?output_names, "loaded SCRFD model");

        if output_names.len() < SCRFD_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs {SCRFD_OUTPUTS} outputs (score, bbox and kps per stride), found {}",
                output_names.len()
            )));
        }

        let heads = map_heads(&output_names);
        tracing::debug!(?heads, "SCRFD output mapping");

        Ok(Self { session, heads })
    }

    /// Detect faces in an RGB photo, most confident first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(image, SCRFD_INPUT_SIZE);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let outputs = &outputs;
        let head = move |index: usize, kind: &str, stride: usize| {
            outputs[index]
                .try_extract_tensor::<f32>()
                .map(|(_, data)| data)
                .map_err(|e| DetectorError::InferenceFailed(format!("{kind} output for stride {stride}: {e}")))
        };

        let mut candidates = Vec::new();
        for (&stride, heads) in SCRFD_STRIDES.iter().zip(self.heads) {
            let level = StrideOutputs {
                stride,
                scores: head(heads.score, "score", stride)?,
                bboxes: head(heads.bbox, "bbox", stride)?,
                kps: head(heads.kps, "kps", stride)?,
            };
            candidates.extend(decode_stride(&level, SCRFD_INPUT_SIZE, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = faces.len(), "SCRFD detection complete");
        Ok(faces)
    }
}

/// Letterbox the photo into a square NCHW tensor; padding normalizes to 0.
fn preprocess(image: &RgbImage, input: usize) -> (Array4<f32>, Letterbox) {
    let (letterbox, fitted_w, fitted_h) = Letterbox::fit(image.width(), image.height(), input);
    let resized = imageops::resize(image, fitted_w, fitted_h, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, input, input));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + letterbox.pad_x, y as usize + letterbox.pad_y);
        for (c, &value) in pixel.0.iter().enumerate() {
            tensor[[0, c, ty, tx]] = (value as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    (tensor, letterbox)
}

/// Map outputs to strides.
///
/// Exports that name their tensors `score_8`, `bbox_16`, `kps_32` and so on
/// are matched by name; anything else falls back to the usual positional
/// layout of three scores, three boxes, then three landmark sets.
fn map_heads(names: &[String]) -> [StrideHeads; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let named: Option<Vec<StrideHeads>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideHeads {
                score: position("score", stride)?,
                bbox: position("bbox", stride)?,
                kps: position("kps", stride)?,
            })
        })
        .collect();

    match named.and_then(|heads| <[StrideHeads; 3]>::try_from(heads).ok()) {
        Some(heads) => heads,
        None => {
            tracing::info!(?names, "SCRFD output names not recognized; using positional layout");
            std::array::from_fn(|i| StrideHeads {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Candidate faces above `threshold` from one stride, in photo coordinates.
fn decode_stride(level: &StrideOutputs<'_>, input: usize, letterbox: &Letterbox, threshold: f32) -> Vec<BoundingBox> {
    let grid_w = input / level.stride;
    let cells = grid_w * (input / level.stride);
    let step = level.stride as f32;

    (0..cells * SCRFD_ANCHORS_PER_CELL)
        .filter_map(|anchor| {
            let score = *level.scores.get(anchor)?;
            if score <= threshold {
                return None;
            }

            let cell = anchor / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * step;
            let cy = (cell / grid_w) as f32 * step;

            // Distances from the anchor point to the left, top, right and bottom edges.
            let d = level.bboxes.get(anchor * 4..anchor * 4 + 4)?;
            let (x1, y1) = letterbox.unmap(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.unmap(cx + d[2] * step, cy + d[3] * step);

            let landmarks = level
                .kps
                .get(anchor * 10..anchor * 10 + 10)
                .map(|k| std::array::from_fn(|i| letterbox.unmap(cx + k[2 * i] * step, cy + k[2 * i + 1] * step)));

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression, returning survivors by descending confidence.
fn nms(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn bbox(x: f32, y: f32, size: f32, confidence: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: size,
            height: size,
            confidence,
            landmarks: None,
        }
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let candidates = vec![
            bbox(200.0, 200.0, 50.0, 0.7),
            bbox(5.0, 5.0, 100.0, 0.8),
            bbox(0.0, 0.0, 100.0, 0.9),
        ];
        let kept = nms(candidates, 0.4);
        let confidences: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_letterbox_fit() {
        let (letterbox, w, h) = Letterbox::fit(320, 160, 640);
        assert_eq!((w, h), (640, 320));
        assert_eq!(letterbox, Letterbox { scale: 2.0, pad_x: 0, pad_y: 160 });
        assert_eq!(letterbox.unmap(640.0, 480.0), (320.0, 160.0));
    }

    #[test]
    fn test_letterbox_odd_padding_matches_paste_offset() {
        // 319 rows of padding: 159 above the photo, 160 below.
        let image = RgbImage::from_pixel(640, 321, Rgb([255, 255, 255]));
        let (tensor, letterbox) = preprocess(&image, 640);
        assert_eq!(letterbox.pad_y, 159);

        let white = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert_eq!(tensor[[0, 0, 158, 100]], 0.0);
        assert!((tensor[[0, 0, 159, 100]] - white).abs() < 1e-4);
        assert!((tensor[[0, 0, 479, 100]] - white).abs() < 1e-4);
        assert_eq!(tensor[[0, 0, 480, 100]], 0.0);
        // The first pasted row maps back to the top of the photo.
        assert_eq!(letterbox.unmap(0.0, 159.0), (0.0, 0.0));
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let image = RgbImage::from_pixel(320, 160, Rgb([255, 0, 0]));
        let (tensor, _) = preprocess(&image, 640);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(tensor[[0, 0, 10, 10]], 0.0);
        let red = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        let none = (0.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 0, 320, 320]] - red).abs() < 1e-4);
        assert!((tensor[[0, 1, 320, 320]] - none).abs() < 1e-4);
        assert!((tensor[[0, 2, 320, 320]] - none).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_maps_back_to_photo() {
        // One anchor above threshold in cell (1, 1) of a 2×2 grid.
        let anchor = 3 * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; 4 * SCRFD_ANCHORS_PER_CELL];
        scores[anchor] = 0.9;
        let mut bboxes = vec![0.0f32; scores.len() * 4];
        bboxes[anchor * 4..anchor * 4 + 4].copy_from_slice(&[0.5; 4]);
        let kps = vec![0.0f32; scores.len() * 10];

        let level = StrideOutputs {
            stride: 32,
            scores: &scores,
            bboxes: &bboxes,
            kps: &kps,
        };
        let letterbox = Letterbox { scale: 2.0, pad_x: 0, pad_y: 0 };
        let faces = decode_stride(&level, 64, &letterbox, 0.5);

        assert_eq!(faces.len(), 1);
        // Anchor (32, 32) ± 16 in input space is 8..24 in the photo.
        let face = &faces[0];
        assert!((face.x - 8.0).abs() < 1e-4);
        assert!((face.y - 8.0).abs() < 1e-4);
        assert!((face.width - 16.0).abs() < 1e-4);
        assert!((face.height - 16.0).abs() < 1e-4);
        let landmarks = face.landmarks.expect("landmarks decoded");
        assert!((landmarks[0].0 - 16.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_skips_truncated_outputs() {
        let scores = vec![0.9f32; 2];
        let level = StrideOutputs {
            stride: 32,
            scores: &scores,
            bboxes: &[0.5; 4],
            kps: &[],
        };
        let letterbox = Letterbox { scale: 1.0, pad_x: 0, pad_y: 0 };
        let faces = decode_stride(&level, 64, &letterbox, 0.5);
        assert_eq!(faces.len(), 1);
        assert!(faces[0].landmarks.is_none());
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_map_heads_by_name() {
        let names = names(&[
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32",
        ]);
        let heads = map_heads(&names);
        assert_eq!(heads[0], StrideHeads { score: 2, bbox: 0, kps: 1 });
        assert_eq!(heads[2], StrideHeads { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_map_heads_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i| i.to_string()).collect();
        let heads = map_heads(&names);
        assert_eq!(heads[0], StrideHeads { score: 0, bbox: 3, kps: 6 });
        assert_eq!(heads[1], StrideHeads { score: 1, bbox: 4, kps: 7 });
        assert_eq!(heads[2], StrideHeads { score: 2, bbox: 5, kps: 8 });
    }
}
