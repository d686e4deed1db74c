//! gRPC surface of the facade daemon.
//!
//! Every handler follows the same lifecycle: decode the request, dispatch
//! one pipeline operation to the worker, encode the reply. Each call ends
//! in a reply or a status, never silence.

use crate::runtime::{PipelineHandle, RuntimeError};
use facade_core::{Comparison, DetectionRecord, PipelineError, QualityGate, Region, FEATURE_LEN};
use facade_engine::MIN_FACE_SIZE;
use facade_proto::v1::face_service_server::FaceService;
use facade_proto::v1::{
    CompareFeaturesRequest, CompareImagesRequest, CompareReply, DetectReply, DetectRequest,
    ExtractAutoRequest, ExtractReply, ExtractWithRegionsRequest, Face, FaceScore, Rect,
    ScoreQualityReply, ScoreQualityRequest, StatusReply, StatusRequest,
};
use std::time::Instant;
use tonic::{Request, Response, Status};

pub struct FacadeService {
    pipeline: PipelineHandle,
    gate: QualityGate,
    started: Instant,
}

impl FacadeService {
    pub fn new(pipeline: PipelineHandle, gate: QualityGate) -> Self {
        Self {
            pipeline,
            gate,
            started: Instant::now(),
        }
    }
}

#[tonic::async_trait]
impl FaceService for FacadeService {
    /// Locate faces in an image.
    async fn detect(
        &self,
        request: Request<DetectRequest>,
    ) -> Result<Response<DetectReply>, Status> {
        let req = request.into_inner();
        tracing::info!(bytes = req.image.len(), "detect requested");
        let regions = self.pipeline.detect(req.image).await.map_err(into_status)?;
        tracing::debug!(count = regions.len(), "detect completed");
        Ok(Response::new(DetectReply {
            regions: regions.into_iter().map(encode_rect).collect(),
        }))
    }

    /// Extract features for caller-supplied regions, quality-gated.
    async fn extract_with_regions(
        &self,
        request: Request<ExtractWithRegionsRequest>,
    ) -> Result<Response<ExtractReply>, Status> {
        let req = request.into_inner();
        tracing::info!(
            bytes = req.image.len(),
            regions = req.regions.len(),
            "extract_with_regions requested"
        );
        let regions: Vec<Region> = req.regions.into_iter().map(decode_rect).collect();
        let records = self
            .pipeline
            .extract_with_regions(req.image, regions)
            .await
            .map_err(into_status)?;
        Ok(Response::new(encode_faces(records)))
    }

    /// Detect, extract, and gate in one call.
    async fn extract_auto(
        &self,
        request: Request<ExtractAutoRequest>,
    ) -> Result<Response<ExtractReply>, Status> {
        let req = request.into_inner();
        tracing::info!(bytes = req.image.len(), "extract_auto requested");
        let records = self
            .pipeline
            .extract_auto(req.image)
            .await
            .map_err(into_status)?;
        tracing::debug!(admitted = records.len(), "extract_auto completed");
        Ok(Response::new(encode_faces(records)))
    }

    /// Raw quality and pose scores, ungated.
    async fn score_quality(
        &self,
        request: Request<ScoreQualityRequest>,
    ) -> Result<Response<ScoreQualityReply>, Status> {
        let req = request.into_inner();
        tracing::info!(
            bytes = req.image.len(),
            regions = req.regions.len(),
            "score_quality requested"
        );
        let regions: Vec<Region> = req.regions.into_iter().map(decode_rect).collect();
        let scores = self
            .pipeline
            .score_quality(req.image, regions)
            .await
            .map_err(into_status)?;
        Ok(Response::new(ScoreQualityReply {
            scores: scores
                .into_iter()
                .map(|score| FaceScore {
                    quality: score.quality,
                    pose: score.pose,
                })
                .collect(),
        }))
    }

    /// Similarity of two previously extracted feature vectors.
    async fn compare_features(
        &self,
        request: Request<CompareFeaturesRequest>,
    ) -> Result<Response<CompareReply>, Status> {
        let req = request.into_inner();
        tracing::info!(
            len_a = req.feature_a.len(),
            len_b = req.feature_b.len(),
            "compare_features requested"
        );
        let similarity = self
            .pipeline
            .compare_features(req.feature_a, req.feature_b)
            .await
            .map_err(into_status)?;
        Ok(Response::new(CompareReply {
            similarity,
            diagnostic: String::new(),
        }))
    }

    /// Compare one face region from each of two images.
    async fn compare_images(
        &self,
        request: Request<CompareImagesRequest>,
    ) -> Result<Response<CompareReply>, Status> {
        let req = request.into_inner();
        let region_a = require_rect(req.region_a, "region_a")?;
        let region_b = require_rect(req.region_b, "region_b")?;
        tracing::info!(
            bytes_a = req.image_a.len(),
            bytes_b = req.image_b.len(),
            "compare_images requested"
        );
        let comparison = self
            .pipeline
            .compare_images(req.image_a, region_a, req.image_b, region_b)
            .await
            .map_err(into_status)?;
        if let Some(reason) = &comparison.diagnostic {
            tracing::warn!(reason, "compare_images found no comparable face");
        }
        Ok(Response::new(encode_comparison(comparison)))
    }

    /// Daemon build and configuration facts.
    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusReply>, Status> {
        Ok(Response::new(StatusReply {
            version: env!("CARGO_PKG_VERSION").to_string(),
            feature_length: FEATURE_LEN as u32,
            min_face_size: MIN_FACE_SIZE,
            min_quality: self.gate.min_quality(),
            min_pose: self.gate.min_pose(),
            uptime_secs: self.started.elapsed().as_secs(),
        }))
    }
}

fn decode_rect(rect: Rect) -> Region {
    Region {
        left: rect.left,
        top: rect.top,
        width: rect.width,
        height: rect.height,
    }
}

fn require_rect(rect: Option<Rect>, field: &'static str) -> Result<Region, Status> {
    rect.map(decode_rect)
        .ok_or_else(|| Status::invalid_argument(format!("{field} is required")))
}

fn encode_rect(region: Region) -> Rect {
    Rect {
        left: region.left,
        top: region.top,
        width: region.width,
        height: region.height,
    }
}

fn encode_faces(records: Vec<DetectionRecord>) -> ExtractReply {
    ExtractReply {
        faces: records
            .into_iter()
            .map(|record| Face {
                region: Some(encode_rect(record.region)),
                feature: record.feature.into_vec(),
            })
            .collect(),
    }
}

fn encode_comparison(comparison: Comparison) -> CompareReply {
    CompareReply {
        similarity: comparison.similarity,
        diagnostic: comparison.diagnostic.unwrap_or_default(),
    }
}

/// Map pipeline and runtime failures onto gRPC status codes.
fn into_status(err: RuntimeError) -> Status {
    match err {
        RuntimeError::Pipeline(PipelineError::InvalidArgument(msg)) => {
            Status::invalid_argument(msg)
        }
        RuntimeError::Pipeline(PipelineError::Engine(e)) => {
            tracing::error!(error = %e, "engine failure");
            Status::internal(format!("recognition engine failure: {e}"))
        }
        RuntimeError::ChannelClosed => Status::unavailable("pipeline worker is not running"),
    }
}
