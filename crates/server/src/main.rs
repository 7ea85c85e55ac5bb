use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use photobackup_core::Backup;
use photobackup_server::config::AppConfig;
use photobackup_server::{router, schedule, AppState};

#[derive(Parser)]
#[command(name = "photobackup", version, about = "Personal photo and video backup server")]
struct Args {
    /// Config file (defaults to config/photobackup.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Storage root, overriding the configured one
    #[arg(long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("photobackup v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(args.config.as_deref(), args.root.as_deref())
        .context("failed to load configuration")?;

    let options = config.backup_options();
    let backup = tokio::task::spawn_blocking(move || Backup::open(&options))
        .await?
        .context("failed to open backup store")?;

    let cleaned = backup.cleanup_partial_uploads();
    if cleaned > 0 {
        tracing::info!(cleaned, "removed partial uploads from a previous run");
    }

    schedule::spawn_reconciliation(backup.reconciler(), config.reconcile_interval());

    let app = router(AppState::new(backup, &config));
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, upload_auth = config.upload_token().is_some(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
