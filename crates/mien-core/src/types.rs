use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity token for one distinct physical face.
///
/// Minted as a UUIDv7 so tokens sort by creation time and remain unique
/// across process restarts. Immutable once created; this core never merges
/// or deletes identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceId(String);

impl FaceId {
    /// Mint a fresh, previously unseen token.
    pub fn mint() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for FaceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Face signature vector produced by the embedding model.
///
/// Not guaranteed unit-normalized; consumers must compare with a
/// scale-resilient metric (cosine distance), never with equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature {
    pub values: Vec<f32>,
}

/// One gallery entry: an identity paired with a stored reference signature.
#[derive(Debug, Clone)]
pub struct KnownSignature {
    pub id: FaceId,
    pub signature: Signature,
}

/// Axis-aligned face region reported by the detector, in pixel coordinates
/// of the original image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}
