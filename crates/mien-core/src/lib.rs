//! mien-core — Face signature extraction and identity matching engine.
//!
//! Wraps SCRFD-style detection and ArcFace-style signature extraction
//! behind narrow traits (both running via ONNX Runtime for CPU inference)
//! and resolves signatures against the known-identity gallery with
//! cosine-distance matching.

pub mod detector;
pub mod enhance;
pub mod extractor;
pub mod matcher;
pub mod types;

pub use detector::{DetectorError, FaceDetector, OnnxFaceDetector};
pub use extractor::{ExtractorError, OnnxExtractor, SignatureExtractor};
pub use matcher::{
    cosine_distance, FirstUnderThreshold, MatchPolicy, Matcher, NearestUnderThreshold,
    DEFAULT_MATCH_THRESHOLD,
};
pub use types::{FaceId, FaceRegion, KnownSignature, Signature};
