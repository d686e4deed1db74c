//! facade-core — engine-independent heart of the facade service.
//!
//! Everything here is pure Rust with no FFI and no I/O: the shared data
//! model, the quality gate, the [`RecognitionEngine`] seam, and the
//! [`Pipeline`] that composes engine calls into the operations the service
//! exposes. The native binding and the gRPC surface live in sibling crates
//! and meet in the middle through these types.

pub mod engine;
pub mod gate;
pub mod pipeline;
pub mod types;

pub use engine::{EngineError, RecognitionEngine};
pub use gate::QualityGate;
pub use pipeline::{Pipeline, PipelineError};
pub use types::{
    Comparison, CropScore, DetectionRecord, FeatureLengthError, FeatureVector, Region, FEATURE_LEN,
};
