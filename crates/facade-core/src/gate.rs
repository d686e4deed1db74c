//! Quality gating for raw detections.

/// Decides which detections are trustworthy enough to hand to callers.
///
/// Comparison accuracy degrades sharply on blurry or extreme-profile crops,
/// so those are filtered here once instead of by every caller.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    min_quality: i32,
    min_pose: f32,
}

impl QualityGate {
    /// Default minimum admissible quality score (inclusive).
    pub const DEFAULT_MIN_QUALITY: i32 = 5;
    /// Default pose floor (exclusive): scores must be strictly above it.
    pub const DEFAULT_MIN_POSE: f32 = 0.0;

    pub fn new(min_quality: i32, min_pose: f32) -> Self {
        Self {
            min_quality,
            min_pose,
        }
    }

    /// Admission rule: quality at or above the threshold and a pose score
    /// strictly above the floor. Pure; applied per detection, so one
    /// rejection drops that face only, never the whole request.
    pub fn admit(&self, quality: i32, pose: f32) -> bool {
        quality >= self.min_quality && pose > self.min_pose
    }

    pub fn min_quality(&self) -> i32 {
        self.min_quality
    }

    pub fn min_pose(&self) -> f32 {
        self.min_pose
    }
}

impl Default for QualityGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MIN_QUALITY, Self::DEFAULT_MIN_POSE)
    }
}
