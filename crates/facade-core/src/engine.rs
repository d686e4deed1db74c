//! The seam between the pipeline and the recognition engine.

use crate::types::{CropScore, FeatureVector, Region};
use thiserror::Error;

/// Failure surfaced by an engine call.
///
/// Engine failures are terminal for the operation that hit them: the
/// pipeline never retries and never keeps partial output from the failing
/// call.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine returned a non-success status code. The code carries no
    /// further meaning beyond "not success".
    #[error("{call} failed with engine status {code}")]
    CallFailed { call: &'static str, code: i32 },

    /// The engine reported success but broke its own output contract, e.g.
    /// a null or mis-sized buffer, or a non-finite similarity.
    #[error("{call} produced malformed output: {what}")]
    MalformedOutput { call: &'static str, what: String },
}

/// Face detection, feature extraction, quality scoring, and comparison.
///
/// Methods take `&mut self` because the engine's thread-safety is
/// unspecified; exclusive access is the concurrency contract, and the
/// daemon enforces it by giving the engine to a single worker thread. The
/// production implementation wraps the vendor library; tests substitute
/// scripted fakes.
pub trait RecognitionEngine {
    /// Extract one feature vector per caller-supplied region, in region
    /// order. Returns exactly `regions.len()` vectors on success; an empty
    /// region list short-circuits to an empty result without touching the
    /// engine.
    fn extract_features(
        &mut self,
        image: &[u8],
        regions: &[Region],
    ) -> Result<Vec<FeatureVector>, EngineError>;

    /// Detect faces and extract their features in one engine pass.
    ///
    /// Zero detected faces is a successful empty result, not an error.
    fn detect_and_extract(
        &mut self,
        image: &[u8],
    ) -> Result<Vec<(Region, FeatureVector)>, EngineError>;

    /// Score crop quality and head pose for each caller-supplied region,
    /// in region order. Returns exactly `regions.len()` scores on success.
    fn score_quality(
        &mut self,
        image: &[u8],
        regions: &[Region],
    ) -> Result<Vec<CropScore>, EngineError>;

    /// Similarity of two feature vectors in `[0, 1]`.
    fn compare_features(
        &mut self,
        a: &FeatureVector,
        b: &FeatureVector,
    ) -> Result<f32, EngineError>;
}
