use personid_core::{MatchPolicy, DEFAULT_SIMILARITY_THRESHOLD};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::storage::{OutputMode, UploadNaming};

/// Server configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:5000).
    pub bind: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Root of `uploads/` and `processed/`, served under `/static`.
    pub static_dir: PathBuf,
    /// Roster TOML file; the built-in four references when unset.
    pub roster_path: Option<PathBuf>,
    /// Label font; system fonts are searched when unset.
    pub font_path: Option<PathBuf>,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    pub match_policy: MatchPolicy,
    pub upload_naming: UploadNaming,
    pub output_mode: OutputMode,
    /// Keep at most this many stored uploads (and per-request outputs); unbounded when unset.
    pub retain_uploads: Option<usize>,
    /// Largest accepted request body in bytes.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from `PERSONID_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            bind: env_parse("PERSONID_BIND", SocketAddr::from(([127, 0, 0, 1], 5000))),
            model_dir: env_path("PERSONID_MODEL_DIR").unwrap_or_else(personid_core::default_model_dir),
            static_dir: env_path("PERSONID_STATIC_DIR").unwrap_or_else(|| PathBuf::from("static")),
            roster_path: env_path("PERSONID_ROSTER"),
            font_path: env_path("PERSONID_FONT_PATH"),
            similarity_threshold: env_parse("PERSONID_SIMILARITY_THRESHOLD", DEFAULT_SIMILARITY_THRESHOLD),
            match_policy: env_parse("PERSONID_MATCH_POLICY", MatchPolicy::First),
            upload_naming: env_parse("PERSONID_UPLOAD_NAMING", UploadNaming::Client),
            output_mode: env_parse("PERSONID_OUTPUT_MODE", OutputMode::Shared),
            retain_uploads: env_optional("PERSONID_RETAIN_UPLOADS"),
            max_upload_bytes: env_parse("PERSONID_MAX_UPLOAD_BYTES", 16 * 1024 * 1024),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(personid_core::SCRFD_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(personid_core::ARCFACE_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_optional(key).unwrap_or(default)
}

fn env_optional<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| parse_value(key, &v))
}

/// Parse a configuration value; blank means unset, garbage is logged and ignored.
fn parse_value<T: FromStr>(key: &str, value: &str) -> Option<T> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match value.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value, "ignoring unparseable configuration value");
            None
        }
    }
}
