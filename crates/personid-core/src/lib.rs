//! personid-core: recognize a fixed roster of people in photographs.
//!
//! Uses SCRFD for face detection and ArcFace for face encoding, both running
//! via ONNX Runtime on the CPU, then matches each face against the reference
//! roster, tallies the matches and draws labelled boxes on the image.

pub mod alignment;
pub mod analyzer;
pub mod annotate;
pub mod detector;
pub mod identify;
pub mod matcher;
pub mod recognizer;
pub mod roster;
pub mod tally;
pub mod types;

use std::path::PathBuf;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer, StaticAnalyzer};
pub use annotate::{Annotator, UNKNOWN_LABEL};
pub use detector::FaceDetector;
pub use identify::{IdentifyError, Identification, Identifier, Report};
pub use matcher::{MatchPolicy, DEFAULT_SIMILARITY_THRESHOLD};
pub use recognizer::FaceRecognizer;
pub use roster::{Decade, Reference, Roster, RosterConfig, RosterError};
pub use tally::{DecadeTable, Tally};
pub use types::{BoundingBox, DetectedFace, Embedding, PixelRect};

/// File name of the SCRFD detection model inside the model directory.
pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the model directory.
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default model directory: `$XDG_DATA_HOME/personid/models`, falling back to
/// `~/.local/share/personid/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("personid")
        .join("models")
}
