//! Identity matching over the known-signature gallery.
//!
//! A probe signature either resolves to an existing identity or to `None`,
//! which callers interpret as "new face". All comparisons use cosine
//! distance: signatures are not guaranteed unit-normalized and two
//! extractions of the same crop are never bit-identical.

use std::str::FromStr;

use thiserror::Error;

use crate::types::{FaceId, KnownSignature, Signature};

/// Maximum cosine distance at which two signatures count as the same face.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.45;

/// Cosine distance `1 - cos_similarity(a, b)`. Lower is more similar.
///
/// Zero-norm or length-mismatched vectors are maximally distant: the stored
/// gallery may hold signatures from an older model revision and those must
/// never match by accident.
pub fn cosine_distance(a: &Signature, b: &Signature) -> f32 {
    if a.values.is_empty() || a.values.len() != b.values.len() {
        return 1.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.values.iter().zip(b.values.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        1.0 - dot / denom
    } else {
        1.0
    }
}

/// Strategy for resolving a probe signature against the gallery.
pub trait Matcher {
    /// Returns the matched identity, or `None` to signal "new face".
    ///
    /// The threshold is exclusive: a candidate at exactly `threshold`
    /// does not match.
    fn find(
        &self,
        probe: &Signature,
        known: &[KnownSignature],
        threshold: f32,
    ) -> Option<FaceId>;
}

/// Returns the first gallery entry under the threshold, in iteration order.
///
/// When several identities fall under the threshold the earliest row wins,
/// not the closest. This reproduces the historical resolution behavior and
/// is the default policy; [`NearestUnderThreshold`] is the closest-match
/// alternative.
pub struct FirstUnderThreshold;

impl Matcher for FirstUnderThreshold {
    fn find(
        &self,
        probe: &Signature,
        known: &[KnownSignature],
        threshold: f32,
    ) -> Option<FaceId> {
        known
            .iter()
            .find(|candidate| cosine_distance(probe, &candidate.signature) < threshold)
            .map(|candidate| candidate.id.clone())
    }
}

/// Returns the closest gallery entry strictly under the threshold.
pub struct NearestUnderThreshold;

impl Matcher for NearestUnderThreshold {
    fn find(
        &self,
        probe: &Signature,
        known: &[KnownSignature],
        threshold: f32,
    ) -> Option<FaceId> {
        let mut best: Option<(&KnownSignature, f32)> = None;
        for candidate in known {
            let distance = cosine_distance(probe, &candidate.signature);
            if distance < threshold && best.map_or(true, |(_, d)| distance < d) {
                best = Some((candidate, distance));
            }
        }
        best.map(|(candidate, _)| candidate.id.clone())
    }
}

/// Which matcher the daemon runs with; parsed from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    #[default]
    First,
    Nearest,
}

impl MatchPolicy {
    pub fn matcher(self) -> Box<dyn Matcher + Send + Sync> {
        match self {
            MatchPolicy::First => Box::new(FirstUnderThreshold),
            MatchPolicy::Nearest => Box::new(NearestUnderThreshold),
        }
    }
}

#[derive(Error, Debug)]
#[error("unknown match policy: {0} (expected \"first\" or \"nearest\")")]
pub struct UnknownPolicyError(String);

impl FromStr for MatchPolicy {
    type Err = UnknownPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first" => Ok(MatchPolicy::First),
            "nearest" => Ok(MatchPolicy::Nearest),
            other => Err(UnknownPolicyError(other.to_string())),
        }
    }
}
