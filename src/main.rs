//! Biboo daemon - watches a manga library and translates tagged chapters.

use anyhow::{Context, Result};
use biboo::config::Config;
use biboo::error::ConfigError;
use biboo::{ApiTranslator, Converter, Library, Tracker};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log output format.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// Automatic manga translation tracker.
#[derive(Parser, Debug)]
#[command(name = "biboo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file (defaults to the platform config directory).
    #[arg(long, env = "BIBOO_CONFIG")]
    config: Option<PathBuf>,

    /// Scan once, wait for queued translations, then exit.
    #[arg(long)]
    once: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty, env = "BIBOO_LOG_FORMAT")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.log_format);

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    let config = load_config(args.config.as_deref())?;
    info!(
        endpoint = %config.api.endpoint,
        tag = %config.tracker.auto_translate_tag,
        lookup = %config.library.lookup_dir.display(),
        local = %config.library.local_dir.display(),
        "configuration loaded"
    );

    let translator =
        ApiTranslator::new(&config.api).context("Failed to create translation client")?;
    let converter = Converter::new(Arc::new(translator), Library::from_config(&config.library));

    let cancel = CancellationToken::new();
    let mut tracker = Tracker::new(&config.tracker, converter, cancel.clone());

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("shutting down Biboo tracker...");
            cancel.cancel();
        }
    });

    info!("starting Biboo tracker...");

    if args.once {
        let stats = tracker.run_once().await.context("Library scan failed")?;
        info!(
            discovered = stats.discovered,
            queued = stats.queued,
            completed = stats.completed,
            failed = stats.failed,
            "scan complete"
        );
        tracker.shutdown().await;
    } else {
        tracker.run().await;
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "biboo=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Loads the file config, then applies environment overrides and validates.
fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => match Config::load() {
            Ok(config) => config,
            Err(ConfigError::NoConfigDir) => {
                warn!("no config directory available, using defaults");
                Config::default()
            }
            Err(e) => return Err(e).context("Failed to load configuration"),
        },
    };

    config
        .apply_env()
        .context("Invalid environment override")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
