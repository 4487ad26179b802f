#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use quill_core::config::QuillConfig;
use quill_observability::logger::service_span;
use quill_observability::{PipelineMetrics, RotatingFileWriter};
use quill_pipeline::AccessLog;
use quill_server::{AppState, build_router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "quill", version, about = "HTTP service with structured access logging")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "quill.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Application log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ── Tracing ──
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Quill starting");

    // ── Config ──
    let config = if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config file");
        QuillConfig::load(&cli.config)?
    } else {
        info!("No config file found, using defaults");
        QuillConfig::default()
    };

    // ── Sink (no writable destination means no start) ──
    let sink = RotatingFileWriter::new(config.sink.clone())
        .with_context(|| format!("opening access log {}", config.sink.path_template))?;

    // ── Pipeline ──
    let metrics = Arc::new(PipelineMetrics::new(config.metrics.enabled)?);
    let access_log = Arc::new(AccessLog::new(&config, Arc::new(sink), Arc::clone(&metrics))?);

    let app = build_router(AppState {
        access_log: Arc::clone(&access_log),
        metrics,
    });

    // ── Serve ──
    let listener = tokio::net::TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("binding {}", config.server.addr))?;
    {
        let _service = service_span(&config.identity).entered();
        info!(addr = %config.server.addr, mode = ?config.dispatch.mode, "Quill is ready");
    }

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining access log");
    access_log.close()?;
    info!("Quill stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
