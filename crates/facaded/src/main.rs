//! facaded — gRPC daemon fronting the VeriFace recognition engine.

use anyhow::{Context, Result};
use facade_engine::NativeEngine;
use facade_proto::v1::face_service_server::FaceServiceServer;
use std::net::SocketAddr;
use tokio::signal;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;
mod service;

use config::Config;
use service::FacadeService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "facaded starting");

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_addr))?;

    // Load and initialize the engine synchronously before serving
    // (fail-fast).
    let engine = NativeEngine::load(
        &config.engine_library,
        &config.model_dir,
        config.engine_log.as_deref(),
    )
    .context("failed to initialize the recognition engine")?;

    let gate = config.gate();
    tracing::info!(
        min_quality = config.min_quality,
        min_pose = config.min_pose,
        "quality gate configured"
    );

    let (pipeline, worker) = runtime::spawn(engine, gate);
    let service = FacadeService::new(pipeline.clone(), gate);

    tracing::info!(%addr, "serving");
    let served = Server::builder()
        .add_service(FaceServiceServer::new(service))
        .serve_with_shutdown(addr, shutdown_signal())
        .await;

    // Serving has ended, cleanly or not. Dropping the last handle closes
    // the worker channel; join waits for the engine release.
    drop(pipeline);
    worker.join();
    served.context("gRPC server failed")?;
    tracing::info!("facaded shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
