//! Daemon configuration.

use facade_core::QualityGate;
use std::path::PathBuf;

/// Runtime configuration, loaded from `FACADE_*` environment variables.
pub struct Config {
    /// gRPC listen address.
    pub listen_addr: String,
    /// Shared object holding the VeriFace engine, passed to dlopen.
    pub engine_library: PathBuf,
    /// Directory with the engine's model files.
    pub model_dir: PathBuf,
    /// Optional log file the engine writes on its own.
    pub engine_log: Option<PathBuf>,
    /// Minimum admissible quality score (0-10).
    pub min_quality: i32,
    /// Pose scores must be strictly above this to count as frontal.
    pub min_pose: f32,
}

impl Config {
    /// Load configuration from the environment, with defaults for anything
    /// unset or unparseable.
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("FACADE_LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:50051".to_string()),
            engine_library: std::env::var("FACADE_ENGINE_LIBRARY")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("libveriface.so")),
            model_dir: std::env::var("FACADE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models")),
            engine_log: std::env::var("FACADE_ENGINE_LOG")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            min_quality: env_i32("FACADE_MIN_QUALITY", QualityGate::DEFAULT_MIN_QUALITY),
            min_pose: env_f32("FACADE_MIN_POSE", QualityGate::DEFAULT_MIN_POSE),
        }
    }

    /// Quality gate built from the configured thresholds.
    pub fn gate(&self) -> QualityGate {
        QualityGate::new(self.min_quality, self.min_pose)
    }
}

fn env_i32(key: &str, default: i32) -> i32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
