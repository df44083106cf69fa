//! miend — Face-capture ingestion daemon.
//!
//! Receives uploaded images over HTTP, resolves every detected face to a
//! known or freshly minted identity, records each capture durably, and
//! stages a self-contained task file for out-of-process consumers.

pub mod api;
pub mod config;
pub mod ingest;
pub mod staging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mien_core::{FaceDetector, Matcher, SignatureExtractor};
use mien_store::Store;
use tokio::sync::Mutex;

/// Shared daemon state handed to every request handler.
pub struct AppState {
    pub store: Store,
    pub detector: Arc<dyn FaceDetector + Send + Sync>,
    pub extractor: Arc<dyn SignatureExtractor + Send + Sync>,
    pub matcher: Box<dyn Matcher + Send + Sync>,
    pub match_threshold: f32,
    /// Shared secret for the ingestion endpoint; `None` disables the check.
    pub api_key: Option<String>,
    /// Origin label recorded when the client does not send one.
    pub origin_default: String,
    /// Committed capture area (fallback image location, serve root).
    pub captured_dir: PathBuf,
    /// Staging area: crops, pending task files (serve root).
    pub pending_dir: PathBuf,
    /// Upper bound on the decode/detect/extract stage of one request.
    pub extract_timeout: Duration,
    /// Single-writer serialization point for load-known -> match -> mint ->
    /// append. Without it, two near-simultaneous captures of the same
    /// person can each miss the other's row and mint duplicate identities.
    pub match_gate: Mutex<()>,
}
