//! # GhostStream Server
//!
//! The HTTP/WebSocket frontend glue (spec §1 "explicitly out of scope
//! beyond the operation signatures §6 enumerates") wrapped around the job
//! lifecycle and transcoding orchestration subsystem in `ghoststream-core`.
//! This binary owns process composition only: configuration, logging,
//! the capability probe at startup, the router, and graceful shutdown.
//!
//! Spec §9: "an explicit `Service` composition root holding owned
//! sub-components ... no hidden singletons" — see [`state::AppState`].

pub mod config;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

use clap::Parser;
use config::{Args, Config};
use ghoststream_core::capability::CapabilityProbe;
use ghoststream_core::cleanup::CleanupScheduler;
use ghoststream_core::JobManager;
use state::AppState;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env()?;
    config.apply_cli(&args);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ghoststream_server=info,ghoststream_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(host = %config.host, port = config.port, "loaded GhostStream server configuration");

    config.ensure_directories()?;
    info!(work_dir = %config.service.work_dir.display(), "work directory ready");

    let capability_probe = CapabilityProbe::new(config.service.encoder_path.clone());
    let capabilities = capability_probe.probe(config.service.concurrency).await?;
    info!(
        families = ?capabilities.available_families(),
        platform = %capabilities.platform,
        "capability probe complete"
    );

    let job_manager = JobManager::new(config.service.clone(), capabilities);

    let cleanup = Arc::new(CleanupScheduler::new(
        job_manager.clone(),
        config.service.streaming_ttl,
        config.service.batch_ttl,
        config.service.record_ttl_after_cleanup,
        config.service.cleanup_sweep_interval,
    ));
    let orphans_cleaned = cleanup.reclaim_orphans(&config.service.work_dir).await;
    if orphans_cleaned > 0 {
        info!(orphans_cleaned, "reclaimed orphaned job directories at startup");
    }
    cleanup.clone().spawn();

    let config = Arc::new(config);
    let state = AppState::new(job_manager, cleanup, config.clone());
    let app = routes::build_router(state);

    let addr = std::net::SocketAddr::from((config.host, config.port));
    info!(%addr, "starting GhostStream server");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining in-flight jobs is best-effort");
}
