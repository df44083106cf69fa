//! Disk-backed pending-work handoff.
//!
//! One self-contained JSON task per processed face, dropped into the
//! staging directory for out-of-process consumers (emotion classification
//! and the like). Tasks are written to a temporary name and renamed into
//! place, so a polling consumer never observes a partially written file.
//!
//! Staging is an optimization, not the source of truth; the capture
//! record is. Callers log and swallow staging failures.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("task encode: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Self-describing unit of downstream work for one processed face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTask {
    pub job_id: String,
    pub face_id: String,
    pub origin: String,
    pub image_path: String,
    pub image_url: String,
    pub captured_at: DateTime<Utc>,
    /// Whether a signature was attached to the capture record.
    pub signature_attached: bool,
}

impl PendingTask {
    /// Task file name: capture timestamp and identity, plus a job-id prefix
    /// as the collision-resistant suffix (wall-clock naming alone collides
    /// under sub-second bursts and clock skew).
    pub fn file_name(&self) -> String {
        let suffix = &self.job_id[..8.min(self.job_id.len())];
        format!(
            "{}_{}_{}.json",
            self.captured_at.format("%Y%m%d_%H%M%S"),
            self.face_id,
            suffix
        )
    }
}

/// Write `task` into `dir` as one complete file.
///
/// The rename is the commit point: consumers matching `*.json` see either
/// nothing or the whole task.
pub fn stage(dir: &Path, task: &PendingTask) -> Result<PathBuf, StageError> {
    let final_path = dir.join(task.file_name());
    let tmp_path = final_path.with_extension("json.tmp");

    let body = serde_json::to_vec(task)?;
    std::fs::write(&tmp_path, &body)?;
    std::fs::rename(&tmp_path, &final_path)?;

    Ok(final_path)
}
