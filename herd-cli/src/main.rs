use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod cli;
mod config;
mod error;
mod web;

use cli::CliArgs;
use config::AppConfig;
use error::AppError;
use herd_engine::{
    AdmissionGate, DownloadGate, HttpTransport, Session, SourceDispatcher, StatsRegistry,
    Transport,
};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();
    let config = AppConfig::load(&args.config)?;

    // Setup logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        config.log.level()?
    };
    let _appender_guard = init_logging(&config, log_level)?;

    info!(version = env!("CARGO_PKG_VERSION"), "herd starting");
    info!(
        sessions = config.sessions,
        sources = config.sources.len(),
        concurrency = config.download_concurrency,
        rate_limit = config.rate_limit_bytes_per_sec,
        "engine configuration loaded"
    );

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.transport())?);
    let gate: Arc<dyn AdmissionGate> = Arc::new(DownloadGate::new(config.download_concurrency));
    let dispatcher = Arc::new(SourceDispatcher::new(config.sources.clone()));
    let stats = Arc::new(StatsRegistry::new());

    let cancel = CancellationToken::new();

    if let Some(listen) = config.status_listen {
        let stats = Arc::clone(&stats);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = web::serve(listen, stats, cancel).await {
                error!(error = %e, "status endpoint failed");
            }
        });
    }

    let session_config = config.session_config()?;
    let mut session_tasks = Vec::with_capacity(config.sessions);
    for i in 0..config.sessions {
        let session = Session::new(
            format!("sess-{i}"),
            session_config.clone(),
            Arc::clone(&transport),
            Arc::clone(&gate),
            Arc::clone(&dispatcher),
            Arc::clone(&stats),
        );
        session_tasks.push(tokio::spawn(session.run(cancel.child_token())));
    }
    info!(count = session_tasks.len(), "sessions spawned");

    let mut drained = std::pin::pin!(futures::future::join_all(session_tasks));
    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining sessions");
            cancel.cancel();
            drained.as_mut().await;
        }
        _ = drained.as_mut() => {
            info!("all sessions finished");
        }
    }
    cancel.cancel();

    info!(
        downloads = stats.downloads_total(),
        succeeded = stats.downloads_succeeded(),
        failed = stats.downloads_failed(),
        "herd stopped"
    );
    Ok(())
}

/// Stdout always; optionally a daily-rolling file as well. The returned
/// guard must stay alive for the process lifetime so buffered log lines
/// flush on exit.
fn init_logging(
    config: &AppConfig,
    log_level: Level,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, AppError> {
    let guard = if let Some(directory) = &config.log.directory {
        let appender = tracing_appender::rolling::daily(directory, "herd.log");
        let (file_writer, guard) = tracing_appender::non_blocking(appender);
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(MakeWriterExt::and(std::io::stdout, file_writer))
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| AppError::Initialization(e.to_string()))?;
        Some(guard)
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stdout)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| AppError::Initialization(e.to_string()))?;
        None
    };
    Ok(guard)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
