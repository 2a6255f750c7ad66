use facecheck_core::detector::DEFAULT_CONFIDENCE_THRESHOLD;
use facecheck_core::encoder::{DEFAULT_DETECTOR_MODEL, DEFAULT_RECOGNIZER_MODEL};
use facecheck_core::recognizer::EMBEDDING_DIM;
use facecheck_core::{DetectorOptions, ModelPaths, RecognizerOptions};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5001";

/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:5001).
    pub bind_addr: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD model file name, relative to `model_dir` unless absolute.
    pub detector_model: String,
    /// Recognition model file name, relative to `model_dir` unless absolute.
    pub recognizer_model: String,
    /// Minimum detector score for a face.
    pub detection_threshold: f32,
    /// ONNX Runtime intra-op threads per model.
    pub intra_threads: usize,
    /// Required embedding length; `FACECHECK_EMBEDDING_DIM=0` accepts any length.
    pub embedding_dim: Option<usize>,
    /// Request body limit in MiB; base64 photos are large.
    pub max_body_mb: usize,
    /// Pending requests the engine queue holds before callers wait.
    pub queue_depth: usize,
    /// Allow cross-origin browser callers.
    pub cors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5001)),
            model_dir: facecheck_core::default_model_dir(),
            detector_model: DEFAULT_DETECTOR_MODEL.to_string(),
            recognizer_model: DEFAULT_RECOGNIZER_MODEL.to_string(),
            detection_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            intra_threads: 2,
            embedding_dim: Some(EMBEDDING_DIM),
            max_body_mb: 16,
            queue_depth: 16,
            cors: false,
        }
    }
}

impl Config {
    /// Load configuration from `FACECHECK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let bind_addr = match get("FACECHECK_BIND_ADDR") {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, default = DEFAULT_BIND_ADDR, "invalid FACECHECK_BIND_ADDR, using default");
                defaults.bind_addr
            }),
            None => defaults.bind_addr,
        };

        Self {
            bind_addr,
            model_dir: get("FACECHECK_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            detector_model: get("FACECHECK_DETECTOR_MODEL").unwrap_or(defaults.detector_model),
            recognizer_model: get("FACECHECK_RECOGNIZER_MODEL").unwrap_or(defaults.recognizer_model),
            detection_threshold: parse_var(&get, "FACECHECK_DETECTION_THRESHOLD")
                .unwrap_or(defaults.detection_threshold),
            intra_threads: parse_var(&get, "FACECHECK_INTRA_THREADS").unwrap_or(defaults.intra_threads),
            embedding_dim: match parse_var::<usize>(&get, "FACECHECK_EMBEDDING_DIM") {
                Some(0) => None,
                Some(dim) => Some(dim),
                None => defaults.embedding_dim,
            },
            max_body_mb: parse_var(&get, "FACECHECK_MAX_BODY_MB").unwrap_or(defaults.max_body_mb),
            queue_depth: parse_var::<usize>(&get, "FACECHECK_QUEUE_DEPTH")
                .unwrap_or(defaults.queue_depth)
                .max(1),
            cors: get("FACECHECK_CORS").map(|v| v != "0").unwrap_or(defaults.cors),
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.model_dir.join(&self.detector_model),
            recognizer: self.model_dir.join(&self.recognizer_model),
        }
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            confidence_threshold: self.detection_threshold,
            intra_threads: self.intra_threads,
        }
    }

    pub fn recognizer_options(&self) -> RecognizerOptions {
        RecognizerOptions {
            expected_dim: self.embedding_dim,
            intra_threads: self.intra_threads,
        }
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_mb.saturating_mul(1024 * 1024)
    }
}

fn parse_var<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable value");
            None
        }
    }
}
