//! facade — operator CLI for the facade daemon.
//!
//! Talks to facaded over gRPC. Extraction results are printed as JSON so
//! they can be saved and fed back into `compare-features`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facade_core::{FeatureVector, Region};
use facade_proto::v1::face_service_client::FaceServiceClient;
use facade_proto::v1::{
    CompareFeaturesRequest, CompareImagesRequest, DetectRequest, ExtractAutoRequest,
    ExtractWithRegionsRequest, Rect, ScoreQualityRequest, StatusRequest,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facade", about = "Face recognition service CLI")]
struct Cli {
    /// gRPC endpoint of the facade daemon
    #[arg(long, global = true, default_value = "http://127.0.0.1:50051")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate faces in an image
    Detect {
        /// Image file (encoded bytes are sent as-is)
        image: PathBuf,
    },
    /// Extract face features; auto-detects unless regions are given
    Extract {
        image: PathBuf,
        /// Face region as left,top,width,height (repeatable)
        #[arg(long = "region", value_parser = parse_region)]
        regions: Vec<Region>,
    },
    /// Score crop quality and pose for given regions
    Quality {
        image: PathBuf,
        /// Face region as left,top,width,height (repeatable)
        #[arg(long = "region", value_parser = parse_region, required = true)]
        regions: Vec<Region>,
    },
    /// Compare two feature files produced by `extract`
    CompareFeatures {
        a: PathBuf,
        b: PathBuf,
    },
    /// Compare one face region from each of two images
    CompareImages {
        image_a: PathBuf,
        #[arg(value_parser = parse_region)]
        region_a: Region,
        image_b: PathBuf,
        #[arg(value_parser = parse_region)]
        region_b: Region,
    },
    /// Show daemon status
    Status,
}

/// One extracted face, as printed by `extract` and read back by
/// `compare-features`. Scores are reported by the `quality` subcommand,
/// not here.
#[derive(Serialize, Deserialize)]
struct FaceRecord {
    region: Region,
    feature: FeatureVector,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut client = FaceServiceClient::connect(cli.endpoint.clone())
        .await
        .with_context(|| format!("connecting to {}", cli.endpoint))?;

    match cli.command {
        Commands::Detect { image } => {
            let image = read_image(&image)?;
            let reply = client.detect(DetectRequest { image }).await?.into_inner();
            let regions: Vec<Region> = reply.regions.into_iter().map(region_from_rect).collect();
            println!("{}", serde_json::to_string_pretty(&regions)?);
        }
        Commands::Extract { image, regions } => {
            let bytes = read_image(&image)?;
            let reply = if regions.is_empty() {
                client
                    .extract_auto(ExtractAutoRequest { image: bytes })
                    .await?
                    .into_inner()
            } else {
                client
                    .extract_with_regions(ExtractWithRegionsRequest {
                        image: bytes,
                        regions: regions.into_iter().map(rect_from_region).collect(),
                    })
                    .await?
                    .into_inner()
            };
            let records = reply
                .faces
                .into_iter()
                .map(|face| {
                    Ok(FaceRecord {
                        region: face
                            .region
                            .map(region_from_rect)
                            .context("face without region in reply")?,
                        feature: FeatureVector::new(face.feature)
                            .context("unexpected feature length in reply")?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Quality { image, regions } => {
            let bytes = read_image(&image)?;
            let reply = client
                .score_quality(ScoreQualityRequest {
                    image: bytes,
                    regions: regions.into_iter().map(rect_from_region).collect(),
                })
                .await?
                .into_inner();
            for (i, score) in reply.scores.iter().enumerate() {
                println!("region {i}: quality {} pose {:.3}", score.quality, score.pose);
            }
        }
        Commands::CompareFeatures { a, b } => {
            let feature_a = load_first_feature(&a)?;
            let feature_b = load_first_feature(&b)?;
            let reply = client
                .compare_features(CompareFeaturesRequest {
                    feature_a,
                    feature_b,
                })
                .await?
                .into_inner();
            println!("similarity: {:.4}", reply.similarity);
        }
        Commands::CompareImages {
            image_a,
            region_a,
            image_b,
            region_b,
        } => {
            let reply = client
                .compare_images(CompareImagesRequest {
                    image_a: read_image(&image_a)?,
                    region_a: Some(rect_from_region(region_a)),
                    image_b: read_image(&image_b)?,
                    region_b: Some(rect_from_region(region_b)),
                })
                .await?
                .into_inner();
            if reply.diagnostic.is_empty() {
                println!("similarity: {:.4}", reply.similarity);
            } else {
                println!("similarity: {:.4} ({})", reply.similarity, reply.diagnostic);
            }
        }
        Commands::Status => {
            let reply = client.status(StatusRequest {}).await?.into_inner();
            println!("facaded {}", reply.version);
            println!("  feature length: {}", reply.feature_length);
            println!("  min face size:  {}px", reply.min_face_size);
            println!(
                "  quality gate:   quality >= {}, pose > {}",
                reply.min_quality, reply.min_pose
            );
            println!("  uptime:         {}s", reply.uptime_secs);
        }
    }

    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// First feature from a JSON file written by `extract`.
fn load_first_feature(path: &Path) -> Result<Vec<f32>> {
    let data =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let records: Vec<FaceRecord> =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
    let Some(first) = records.into_iter().next() else {
        bail!("{} contains no faces", path.display());
    };
    Ok(first.feature.into_vec())
}

/// Parse "left,top,width,height" into a region.
fn parse_region(s: &str) -> Result<Region, String> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        return Err(format!("expected left,top,width,height, got {s:?}"));
    }
    let mut values = [0i32; 4];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .map_err(|_| format!("{part:?} is not an integer"))?;
    }
    let [left, top, width, height] = values;
    if width <= 0 || height <= 0 {
        return Err("width and height must be positive".to_string());
    }
    Ok(Region {
        left,
        top,
        width,
        height,
    })
}

fn region_from_rect(rect: Rect) -> Region {
    Region {
        left: rect.left,
        top: rect.top,
        width: rect.width,
        height: rect.height,
    }
}

fn rect_from_region(region: Region) -> Rect {
    Rect {
        left: region.left,
        top: region.top,
        width: region.width,
        height: region.height,
    }
}
