//! The pipeline worker thread and its async handle.
//!
//! gRPC handlers run on the tokio runtime, but the native engine must only
//! ever be called from one thread at a time. Requests cross an mpsc channel
//! to a dedicated OS thread that owns the engine; replies come back on
//! oneshot channels. Dropping every handle closes the channel, letting the
//! worker drain, release the engine, and exit.

use facade_core::{
    Comparison, CropScore, DetectionRecord, Pipeline, PipelineError, QualityGate,
    RecognitionEngine, Region,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("pipeline worker exited")]
    ChannelClosed,
}

/// Messages from gRPC handlers to the pipeline worker.
enum PipelineRequest {
    Detect {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<Region>, PipelineError>>,
    },
    ExtractWithRegions {
        image: Vec<u8>,
        regions: Vec<Region>,
        reply: oneshot::Sender<Result<Vec<DetectionRecord>, PipelineError>>,
    },
    ExtractAuto {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<DetectionRecord>, PipelineError>>,
    },
    ScoreQuality {
        image: Vec<u8>,
        regions: Vec<Region>,
        reply: oneshot::Sender<Result<Vec<CropScore>, PipelineError>>,
    },
    CompareFeatures {
        feature_a: Vec<f32>,
        feature_b: Vec<f32>,
        reply: oneshot::Sender<Result<f32, PipelineError>>,
    },
    CompareImages {
        image_a: Vec<u8>,
        region_a: Region,
        image_b: Vec<u8>,
        region_b: Region,
        reply: oneshot::Sender<Result<Comparison, PipelineError>>,
    },
}

/// Clonable async handle to the pipeline worker.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<PipelineRequest>,
}

impl PipelineHandle {
    pub async fn detect(&self, image: Vec<u8>) -> Result<Vec<Region>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PipelineRequest::Detect { image, reply })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| RuntimeError::ChannelClosed)??)
    }

    pub async fn extract_with_regions(
        &self,
        image: Vec<u8>,
        regions: Vec<Region>,
    ) -> Result<Vec<DetectionRecord>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PipelineRequest::ExtractWithRegions {
                image,
                regions,
                reply,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| RuntimeError::ChannelClosed)??)
    }

    pub async fn extract_auto(&self, image: Vec<u8>) -> Result<Vec<DetectionRecord>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PipelineRequest::ExtractAuto { image, reply })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| RuntimeError::ChannelClosed)??)
    }

    pub async fn score_quality(
        &self,
        image: Vec<u8>,
        regions: Vec<Region>,
    ) -> Result<Vec<CropScore>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PipelineRequest::ScoreQuality {
                image,
                regions,
                reply,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| RuntimeError::ChannelClosed)??)
    }

    pub async fn compare_features(
        &self,
        feature_a: Vec<f32>,
        feature_b: Vec<f32>,
    ) -> Result<f32, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PipelineRequest::CompareFeatures {
                feature_a,
                feature_b,
                reply,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| RuntimeError::ChannelClosed)??)
    }

    pub async fn compare_images(
        &self,
        image_a: Vec<u8>,
        region_a: Region,
        image_b: Vec<u8>,
        region_b: Region,
    ) -> Result<Comparison, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(PipelineRequest::CompareImages {
                image_a,
                region_a,
                image_b,
                region_b,
                reply,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| RuntimeError::ChannelClosed)??)
    }
}

/// Join guard for the worker thread.
pub struct PipelineWorker {
    thread: std::thread::JoinHandle<()>,
}

impl PipelineWorker {
    /// Wait for the worker to drain and release the engine. Call after the
    /// last `PipelineHandle` has been dropped.
    pub fn join(self) {
        if self.thread.join().is_err() {
            tracing::error!("pipeline worker panicked");
        }
    }
}

/// Spawn the pipeline on a dedicated OS thread that takes ownership of the
/// engine.
pub fn spawn<E>(engine: E, gate: QualityGate) -> (PipelineHandle, PipelineWorker)
where
    E: RecognitionEngine + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<PipelineRequest>(4);

    let thread = std::thread::Builder::new()
        .name("facade-pipeline".into())
        .spawn(move || {
            let mut pipeline = Pipeline::new(engine, gate);
            tracing::info!("pipeline worker started");
            // A send failure means the caller gave up waiting; the result
            // is discarded and the worker moves on.
            while let Some(request) = rx.blocking_recv() {
                match request {
                    PipelineRequest::Detect { image, reply } => {
                        let _ = reply.send(pipeline.detect(&image));
                    }
                    PipelineRequest::ExtractWithRegions {
                        image,
                        regions,
                        reply,
                    } => {
                        let _ = reply.send(pipeline.extract_with_regions(&image, &regions));
                    }
                    PipelineRequest::ExtractAuto { image, reply } => {
                        let _ = reply.send(pipeline.extract_auto(&image));
                    }
                    PipelineRequest::ScoreQuality {
                        image,
                        regions,
                        reply,
                    } => {
                        let _ = reply.send(pipeline.score_quality(&image, &regions));
                    }
                    PipelineRequest::CompareFeatures {
                        feature_a,
                        feature_b,
                        reply,
                    } => {
                        let _ = reply.send(pipeline.compare_features(feature_a, feature_b));
                    }
                    PipelineRequest::CompareImages {
                        image_a,
                        region_a,
                        image_b,
                        region_b,
                        reply,
                    } => {
                        let _ =
                            reply.send(pipeline.compare_images(&image_a, region_a, &image_b, region_b));
                    }
                }
            }
            tracing::info!("pipeline worker exiting");
        })
        .expect("failed to spawn pipeline thread");

    (PipelineHandle { tx }, PipelineWorker { thread })
}
