//! Shared data types for the facade pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of elements in every feature vector the engine produces.
///
/// The engine's embedding dimensionality is fixed at build time; vectors of
/// any other length cannot have come from it and are rejected at the edges.
pub const FEATURE_LEN: usize = 512;

/// Axis-aligned face region in absolute pixel coordinates of one image.
///
/// Width and height must be positive. Whether the region actually lies
/// inside the image is left to the engine, which clamps crops itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

/// Returned when a feature vector of the wrong length is constructed.
#[derive(Debug, Error)]
#[error("feature vector must have {FEATURE_LEN} elements, got {0}")]
pub struct FeatureLengthError(pub usize);

/// Fixed-length face embedding.
///
/// The only way in is [`FeatureVector::new`], which rejects any length other
/// than [`FEATURE_LEN`]. Holding one is proof the length is right, so
/// downstream code never re-checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Result<Self, FeatureLengthError> {
        if values.len() == FEATURE_LEN {
            Ok(Self(values))
        } else {
            Err(FeatureLengthError(values.len()))
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.0
    }
}

impl TryFrom<Vec<f32>> for FeatureVector {
    type Error = FeatureLengthError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<FeatureVector> for Vec<f32> {
    fn from(vector: FeatureVector) -> Self {
        vector.0
    }
}

/// Per-region scores from the engine's quality pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropScore {
    /// Crop usability, 0 (worst) to 10 (best).
    pub quality: i32,
    /// Head pose score; positive means frontal enough to trust.
    pub pose: f32,
}

/// One admitted face: where it was, its embedding, and the scores that let
/// it through the gate. Assembled in a single pipeline pass, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub region: Region,
    pub feature: FeatureVector,
    pub quality: i32,
    pub pose: f32,
}

/// Outcome of a similarity comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    /// Similarity in `[0, 1]`; higher means more likely the same person.
    pub similarity: f32,
    /// Set when no meaningful similarity could be computed, e.g. one side
    /// of an image comparison contained no usable face.
    pub diagnostic: Option<String>,
}
