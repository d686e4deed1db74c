//! Request orchestration over the recognition engine.
//!
//! Each operation is a short sequence of engine calls with short-circuit
//! failure: an engine error anywhere aborts the whole operation, so callers
//! never see records stitched together across a failed pass.

use crate::engine::{EngineError, RecognitionEngine};
use crate::gate::QualityGate;
use crate::types::{Comparison, CropScore, DetectionRecord, FeatureVector, Region};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed request. Reported to the caller immediately; the engine is
    /// never invoked for it.
    #[error("{0}")]
    InvalidArgument(String),

    /// The engine failed mid-operation; no partial results survive.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Composes engine calls into the operations the service exposes.
///
/// Owns the engine exclusively. The daemon runs one pipeline on a dedicated
/// worker thread; tests drive it directly with fake engines.
pub struct Pipeline<E> {
    engine: E,
    gate: QualityGate,
}

impl<E: RecognitionEngine> Pipeline<E> {
    pub fn new(engine: E, gate: QualityGate) -> Self {
        Self { engine, gate }
    }

    /// Locate faces without returning features.
    pub fn detect(&mut self, image: &[u8]) -> Result<Vec<Region>, PipelineError> {
        validate_image(image)?;
        let faces = self.engine.detect_and_extract(image)?;
        tracing::debug!(count = faces.len(), "detect completed");
        Ok(faces.into_iter().map(|(region, _)| region).collect())
    }

    /// Extract features for caller-supplied regions, keeping only faces
    /// that pass the quality gate. An empty region list is a successful
    /// empty result.
    pub fn extract_with_regions(
        &mut self,
        image: &[u8],
        regions: &[Region],
    ) -> Result<Vec<DetectionRecord>, PipelineError> {
        validate_image(image)?;
        validate_regions(regions)?;
        if regions.is_empty() {
            return Ok(Vec::new());
        }
        let features = self.engine.extract_features(image, regions)?;
        let faces: Vec<(Region, FeatureVector)> =
            regions.iter().copied().zip(features).collect();
        let scores = self.engine.score_quality(image, regions)?;
        self.gate_records(faces, &scores)
    }

    /// Detect faces, extract their features, and gate them in one request.
    ///
    /// Zero detected faces, or zero survivors after gating, is a successful
    /// empty result.
    pub fn extract_auto(&mut self, image: &[u8]) -> Result<Vec<DetectionRecord>, PipelineError> {
        validate_image(image)?;
        let faces = self.engine.detect_and_extract(image)?;
        if faces.is_empty() {
            tracing::debug!("no faces detected");
            return Ok(Vec::new());
        }
        let regions: Vec<Region> = faces.iter().map(|(region, _)| *region).collect();
        let scores = self.engine.score_quality(image, &regions)?;
        self.gate_records(faces, &scores)
    }

    /// Raw, ungated quality and pose scores for caller-supplied regions.
    ///
    /// Requires at least one region.
    pub fn score_quality(
        &mut self,
        image: &[u8],
        regions: &[Region],
    ) -> Result<Vec<CropScore>, PipelineError> {
        validate_image(image)?;
        if regions.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "at least one region is required".into(),
            ));
        }
        validate_regions(regions)?;
        let scores = self.engine.score_quality(image, regions)?;
        if scores.len() != regions.len() {
            return Err(score_count_mismatch(scores.len(), regions.len()).into());
        }
        Ok(scores)
    }

    /// Compare two raw feature vectors.
    ///
    /// Both must carry exactly [`crate::types::FEATURE_LEN`] elements;
    /// anything else is an argument error and never reaches the engine.
    pub fn compare_features(&mut self, a: Vec<f32>, b: Vec<f32>) -> Result<f32, PipelineError> {
        let a = FeatureVector::new(a)
            .map_err(|e| PipelineError::InvalidArgument(format!("feature A: {e}")))?;
        let b = FeatureVector::new(b)
            .map_err(|e| PipelineError::InvalidArgument(format!("feature B: {e}")))?;
        Ok(self.engine.compare_features(&a, &b)?)
    }

    /// Compare one face region from each of two images.
    ///
    /// Extraction here bypasses the quality gate: the caller asked for this
    /// exact comparison and accepts a poor crop. A side that yields no
    /// feature produces similarity 0.0 with a diagnostic naming the side,
    /// not an error.
    pub fn compare_images(
        &mut self,
        image_a: &[u8],
        region_a: Region,
        image_b: &[u8],
        region_b: Region,
    ) -> Result<Comparison, PipelineError> {
        validate_image(image_a)?;
        validate_image(image_b)?;
        validate_region(&region_a, "region A")?;
        validate_region(&region_b, "region B")?;

        let Some(feature_a) = self.single_feature(image_a, region_a, "A") else {
            return Ok(no_face_comparison("A"));
        };
        let Some(feature_b) = self.single_feature(image_b, region_b, "B") else {
            return Ok(no_face_comparison("B"));
        };

        let similarity = self.engine.compare_features(&feature_a, &feature_b)?;
        Ok(Comparison {
            similarity,
            diagnostic: None,
        })
    }

    /// Extract the single feature for one side of an image comparison.
    /// `None` means the side produced nothing usable; the caller reports
    /// that as a no-face result rather than an error.
    fn single_feature(&mut self, image: &[u8], region: Region, side: &str) -> Option<FeatureVector> {
        match self.engine.extract_features(image, std::slice::from_ref(&region)) {
            Ok(features) => {
                let feature = features.into_iter().next();
                if feature.is_none() {
                    tracing::warn!(side, "image comparison: no feature for region");
                }
                feature
            }
            Err(error) => {
                tracing::warn!(side, %error, "image comparison: extraction failed, treating as no face");
                None
            }
        }
    }

    /// Pair faces with their scores and apply the gate.
    ///
    /// Faces and scores must describe the same regions in the same order; a
    /// count mismatch means the engine broke its contract, and the whole
    /// operation fails rather than risk misattributed features.
    fn gate_records(
        &self,
        faces: Vec<(Region, FeatureVector)>,
        scores: &[CropScore],
    ) -> Result<Vec<DetectionRecord>, PipelineError> {
        if scores.len() != faces.len() {
            return Err(score_count_mismatch(scores.len(), faces.len()).into());
        }
        let mut records = Vec::with_capacity(faces.len());
        for ((region, feature), score) in faces.into_iter().zip(scores) {
            if self.gate.admit(score.quality, score.pose) {
                records.push(DetectionRecord {
                    region,
                    feature,
                    quality: score.quality,
                    pose: score.pose,
                });
            } else {
                tracing::debug!(
                    quality = score.quality,
                    pose = score.pose,
                    left = region.left,
                    top = region.top,
                    "face rejected by quality gate"
                );
            }
        }
        Ok(records)
    }
}

fn validate_image(image: &[u8]) -> Result<(), PipelineError> {
    if image.is_empty() {
        return Err(PipelineError::InvalidArgument("image is empty".into()));
    }
    Ok(())
}

fn validate_region(region: &Region, label: &str) -> Result<(), PipelineError> {
    if region.width <= 0 || region.height <= 0 {
        return Err(PipelineError::InvalidArgument(format!(
            "{label}: width and height must be positive, got {}x{}",
            region.width, region.height
        )));
    }
    Ok(())
}

fn validate_regions(regions: &[Region]) -> Result<(), PipelineError> {
    for (i, region) in regions.iter().enumerate() {
        validate_region(region, &format!("region {i}"))?;
    }
    Ok(())
}

fn score_count_mismatch(scores: usize, faces: usize) -> EngineError {
    EngineError::MalformedOutput {
        call: "scoreQuality",
        what: format!("{scores} scores for {faces} regions"),
    }
}

fn no_face_comparison(side: &str) -> Comparison {
    Comparison {
        similarity: 0.0,
        diagnostic: Some(format!("no face in image {side}")),
    }
}
