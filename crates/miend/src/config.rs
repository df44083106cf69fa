use std::path::PathBuf;

use mien_core::MatchPolicy;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Listen address for the HTTP surface (default: 127.0.0.1:8090).
    pub bind_addr: String,
    /// Root directory for the database and capture areas.
    pub data_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Shared secret for the ingestion endpoint; unset leaves it open.
    pub api_key: Option<String>,
    /// Cosine distance below which a signature matches a known identity.
    pub match_threshold: f32,
    /// Match policy: first row under threshold, or nearest under threshold.
    pub match_policy: MatchPolicy,
    /// Origin label recorded when the client does not send one.
    pub origin_default: String,
    /// Timeout in seconds for the detect/extract stage of one request.
    pub extract_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `MIEN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("MIEN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share").join("mien")
            });

        let model_dir = std::env::var("MIEN_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            bind_addr: std::env::var("MIEN_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8090".to_string()),
            model_dir,
            api_key: std::env::var("MIEN_API_KEY").ok().filter(|k| !k.is_empty()),
            match_threshold: env_f32("MIEN_MATCH_THRESHOLD", mien_core::DEFAULT_MATCH_THRESHOLD),
            match_policy: std::env::var("MIEN_MATCH_POLICY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            origin_default: std::env::var("MIEN_ORIGIN").unwrap_or_else(|_| "unknown".to_string()),
            extract_timeout_secs: env_u64("MIEN_EXTRACT_TIMEOUT_SECS", 30),
            data_dir,
        }
    }

    /// Committed capture area.
    pub fn captured_dir(&self) -> PathBuf {
        self.data_dir.join("captured_faces")
    }

    /// Staging area for crops and pending task files.
    pub fn pending_dir(&self) -> PathBuf {
        self.captured_dir().join("pending_jobs")
    }

    /// Path to the SQLite capture database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("captures.db")
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the signature embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
