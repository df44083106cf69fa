//! Ingestion orchestrator.
//!
//! Drives one uploaded image through detection, signature extraction,
//! identity resolution, durable capture, and pending-task staging, and
//! aggregates one outcome per face. Per-face failures degrade that face's
//! entry only; sibling faces in the same image are unaffected.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::RgbImage;
use mien_core::{enhance, DetectorError, FaceId, Signature};
use mien_store::{CaptureRecord, StoreError};
use serde::Serialize;
use thiserror::Error;

use crate::staging::{self, PendingTask};
use crate::AppState;

/// Request-level failures; everything face-level lands in a [`FaceOutcome`].
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("image payload could not be decoded: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("capture image write failed: {0}")]
    ImageWrite(#[source] image::ImageError),
    #[error("face pipeline timed out after {0:?}")]
    Timeout(Duration),
    #[error("face pipeline task failed: {0}")]
    TaskFailed(String),
}

impl IngestError {
    /// True for failures the client caused (bad payload, empty image).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidImage(_) | Self::NoFaceDetected)
    }
}

/// Aggregate entry for one detected face.
#[derive(Debug, Serialize)]
pub struct FaceOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_id: Option<String>,
    pub matched: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FaceOutcome {
    fn persistence_failure(face_id: Option<FaceId>, err: &IngestError) -> Self {
        Self {
            face_id: face_id.map(|id| id.to_string()),
            matched: false,
            message: "Capture not persisted".to_string(),
            image_path: None,
            image_url: None,
            job_file: None,
            error: Some(err.to_string()),
        }
    }
}

/// A face that survived extraction: its enhanced crop and signature.
struct PreparedFace {
    signature: Signature,
    crop: RgbImage,
}

/// Process one uploaded image; returns one outcome per persisted face.
///
/// Faces whose signature could not be extracted are omitted from the
/// aggregate (an omission, not an error entry).
pub async fn process_image(
    state: &Arc<AppState>,
    bytes: Vec<u8>,
    origin: String,
) -> Result<Vec<FaceOutcome>, IngestError> {
    let prepared = extract_faces(state, bytes).await?;

    let mut results = Vec::with_capacity(prepared.len());
    for face in prepared {
        let captured_at = Utc::now();
        match resolve_and_record(state, &face, &origin, captured_at).await {
            Ok(outcome) => results.push(outcome),
            Err((face_id, err)) => {
                tracing::error!(error = %err, "face capture failed");
                results.push(FaceOutcome::persistence_failure(face_id, &err));
            }
        }
    }
    Ok(results)
}

/// Decode, detect, and extract on a blocking thread, bounded by the
/// configured timeout so a wedged model call cannot hold the request open
/// forever.
async fn extract_faces(
    state: &Arc<AppState>,
    bytes: Vec<u8>,
) -> Result<Vec<PreparedFace>, IngestError> {
    let detector = state.detector.clone();
    let extractor = state.extractor.clone();

    let task = tokio::task::spawn_blocking(move || -> Result<Vec<PreparedFace>, IngestError> {
        let frame = image::load_from_memory(&bytes)?.to_rgb8();

        let regions = detector.detect(&frame)?;
        if regions.is_empty() {
            return Err(IngestError::NoFaceDetected);
        }
        tracing::debug!(faces = regions.len(), "detection complete");

        let mut prepared = Vec::new();
        for region in &regions {
            let crop = enhance::equalize_luminance(&enhance::padded_crop(&frame, region));
            match extractor.extract(&crop) {
                Ok(Some(signature)) => prepared.push(PreparedFace { signature, crop }),
                Ok(None) => {
                    tracing::debug!("extractor produced no signature; skipping face");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "signature extraction failed; skipping face");
                }
            }
        }
        Ok(prepared)
    });

    match tokio::time::timeout(state.extract_timeout, task).await {
        Err(_) => Err(IngestError::Timeout(state.extract_timeout)),
        Ok(Err(join_err)) => Err(IngestError::TaskFailed(join_err.to_string())),
        Ok(Ok(result)) => result,
    }
}

/// Resolve one face to an identity, persist the capture, stage the task.
///
/// The load-known -> match -> mint -> append section runs under the match
/// gate: concurrent requests resolve strictly one face at a time, so a
/// just-minted identity is visible to the next resolution.
async fn resolve_and_record(
    state: &Arc<AppState>,
    face: &PreparedFace,
    origin: &str,
    captured_at: DateTime<Utc>,
) -> Result<FaceOutcome, (Option<FaceId>, IngestError)> {
    let filename;
    let face_id;
    let matched;
    let message;
    let image_path;
    {
        let _gate = state.match_gate.lock().await;

        let store = state.store.clone();
        let known = run_store(move || store.load_known())
            .await
            .map_err(|e| (None, e))?;
        if known.skipped > 0 {
            tracing::debug!(skipped = known.skipped, "corrupt gallery rows dropped");
        }

        match state
            .matcher
            .find(&face.signature, &known.entries, state.match_threshold)
        {
            Some(id) => {
                face_id = id;
                matched = true;
                message = "Matched existing face_id";
            }
            None => {
                // Minted exactly once, and only after the matcher declined.
                face_id = FaceId::mint();
                matched = false;
                message = "New face detected";
            }
        }
        tracing::info!(face_id = %face_id, matched, "face resolved");

        filename = format!("{}_{}.jpg", face_id, captured_at.format("%Y%m%d_%H%M%S"));
        image_path = save_crop(state, &face.crop, &filename)
            .map_err(|e| (Some(face_id.clone()), IngestError::ImageWrite(e)))?;

        let record = CaptureRecord {
            face_id: face_id.clone(),
            origin: origin.to_string(),
            image_path: image_path.clone(),
            captured_at,
            signature: Some(face.signature.clone()),
        };
        let store = state.store.clone();
        let append_id = face_id.clone();
        run_store(move || store.append(&record))
            .await
            .map_err(|e| (Some(append_id), e))?;
    }

    let image_url = format!("/images/{filename}");

    // Staging is best-effort: the capture record above is the source of
    // truth, so a failed handoff must never fail the face.
    let task = PendingTask {
        job_id: uuid::Uuid::now_v7().to_string(),
        face_id: face_id.to_string(),
        origin: origin.to_string(),
        image_path: image_path.clone(),
        image_url: image_url.clone(),
        captured_at,
        signature_attached: true,
    };
    let job_file = match staging::stage(&state.pending_dir, &task) {
        Ok(path) => Some(path.to_string_lossy().into_owned()),
        Err(err) => {
            tracing::warn!(error = %err, face_id = %face_id, "pending task not staged");
            None
        }
    };

    Ok(FaceOutcome {
        face_id: Some(face_id.to_string()),
        matched,
        message: message.to_string(),
        image_path: Some(image_path),
        image_url: Some(image_url),
        job_file,
        error: None,
    })
}

/// Save the enhanced crop into the staging area, falling back to the
/// committed capture area when the staging directory is unwritable.
fn save_crop(
    state: &Arc<AppState>,
    crop: &RgbImage,
    filename: &str,
) -> Result<String, image::ImageError> {
    let pending_path = state.pending_dir.join(filename);
    match crop.save(&pending_path) {
        Ok(()) => Ok(pending_path.to_string_lossy().into_owned()),
        Err(err) => {
            tracing::warn!(error = %err, "staging-area save failed; using capture area");
            let fallback = state.captured_dir.join(filename);
            crop.save(&fallback)?;
            Ok(fallback.to_string_lossy().into_owned())
        }
    }
}

/// Run a blocking store operation off the async worker.
async fn run_store<T, F>(op: F) -> Result<T, IngestError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| IngestError::TaskFailed(e.to_string()))?
        .map_err(IngestError::from)
}
