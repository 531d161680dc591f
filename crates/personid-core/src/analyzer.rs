//! Face analysis: detection followed by per-face encoding.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::DetectedFace;
use image::RgbImage;
use std::collections::VecDeque;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Finds every face in an image and encodes each one.
///
/// Faces come back most confident first. Implementations hold inference
/// sessions and may need exclusive access, hence `&mut self`.
pub trait FaceAnalyzer: Send {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError>;
}

/// SCRFD detection + ArcFace encoding.
pub struct OnnxAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxAnalyzer {
    pub fn load(scrfd_path: &str, arcface_path: &str) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(scrfd_path)?;
        tracing::info!(path = scrfd_path, "SCRFD detector loaded");

        let recognizer = FaceRecognizer::load(arcface_path)?;
        tracing::info!(path = arcface_path, "ArcFace recognizer loaded");

        Ok(Self { detector, recognizer })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn analyze(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let boxes = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            let embedding = self.recognizer.extract(image, &bbox)?;
            faces.push(DetectedFace { bbox, embedding });
        }
        Ok(faces)
    }
}

/// Analyzer that replays canned results instead of running models.
///
/// Each call returns the next scripted result; once the script runs out the
/// fallback result is returned for every call. Used to exercise the pipeline
/// without model files.
pub struct StaticAnalyzer {
    script: VecDeque<Vec<DetectedFace>>,
    fallback: Vec<DetectedFace>,
}

impl StaticAnalyzer {
    /// Replay `script` in order, then find no faces.
    pub fn new(script: Vec<Vec<DetectedFace>>) -> Self {
        Self {
            script: script.into(),
            fallback: Vec::new(),
        }
    }

    /// Return the same faces for every image.
    pub fn repeating(faces: Vec<DetectedFace>) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: faces,
        }
    }
}

impl FaceAnalyzer for StaticAnalyzer {
    fn analyze(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        Ok(self.script.pop_front().unwrap_or_else(|| self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding};

    fn face(v: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0, confidence: v, landmarks: None },
            embedding: Embedding::new(vec![v]),
        }
    }

    #[test]
    fn test_static_analyzer_replays_then_falls_back() {
        let image = RgbImage::new(4, 4);
        let mut analyzer = StaticAnalyzer::new(vec![vec![face(0.9)], vec![face(0.8), face(0.7)]]);
        assert_eq!(analyzer.analyze(&image).unwrap().len(), 1);
        assert_eq!(analyzer.analyze(&image).unwrap().len(), 2);
        assert!(analyzer.analyze(&image).unwrap().is_empty());
    }

    #[test]
    fn test_static_analyzer_repeating() {
        let image = RgbImage::new(4, 4);
        let mut analyzer = StaticAnalyzer::repeating(vec![face(0.9)]);
        for _ in 0..3 {
            assert_eq!(analyzer.analyze(&image).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_onnx_analyzer_missing_models() {
        let err = OnnxAnalyzer::load("/nonexistent/det_10g.onnx", "/nonexistent/w600k_r50.onnx")
            .err()
            .expect("load must fail");
        assert!(matches!(err, AnalyzerError::Detector(DetectorError::ModelNotFound(_))));
    }
}
