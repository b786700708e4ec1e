//! Cumulus - cloud file synchronization agent
//!
//! This binary runs as a long-lived service that mirrors configured
//! local directory trees into an S3 bucket. It handles:
//! - Configuration loading and sample generation
//! - Logging initialization (stdout or rotating file, json/text)
//! - Graceful shutdown on SIGTERM/SIGINT via a cancellation token
//!
//! Exit codes: 0 on success, non-zero on initialization or fatal failure.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cumulus_core::config::{Config, LoggingConfig};

mod logs;
mod service;

use service::Service;

// ============================================================================
// CLI surface
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "cumulus", version, about = "Cloud file synchronization agent")]
struct Cli {
    /// Path to the configuration file (defaults to the XDG location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run as a daemon until signalled
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    daemon: bool,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Write a sample configuration file and exit
    #[arg(long)]
    generate_config: bool,
}

// ============================================================================
// Logging
// ============================================================================

/// Initializes the tracing pipeline from the logging section.
///
/// Returns the appender guard when logging to a file; it must stay alive
/// for the lifetime of the process.
fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    if config.output_path.is_empty() {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true);
        if config.format == "json" {
            builder.json().init();
        } else {
            builder.init();
        }
        return None;
    }

    let path = Path::new(&config.output_path);
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "cumulus.log".into());

    let appender = match config.rotation.as_str() {
        "hourly" => tracing_appender::rolling::hourly(directory, file_name),
        "never" => tracing_appender::rolling::never(directory, file_name),
        _ => tracing_appender::rolling::daily(directory, file_name),
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(writer)
        .with_ansi(false);
    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }

    Some(guard)
}

// ============================================================================
// Shutdown signals
// ============================================================================

/// Waits for SIGTERM or SIGINT and cancels the token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Sample configuration
// ============================================================================

/// Path the sample configuration is written to.
const SAMPLE_CONFIG_PATH: &str = "cumulus-config.yaml";

fn generate_sample_config() -> Result<()> {
    let config = Config::sample();
    config
        .save(Path::new(SAMPLE_CONFIG_PATH))
        .context("Failed to write sample configuration")?;

    println!("Sample configuration saved to: {SAMPLE_CONFIG_PATH}");
    println!();
    println!("Edit the configuration file to:");
    println!("1. Set your AWS credentials and S3 bucket");
    println!("2. Configure the directories to sync");
    println!("3. Adjust security and performance settings");
    println!("4. Enable the directories you want to sync");
    Ok(())
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        return generate_sample_config();
    }

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let _log_guard = init_logging(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %config_path.display(),
        "Starting cumulus"
    );

    // Cancellation token propagated to every background task
    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    // Retention over rotated log files, when logging to a file
    let retention = logs::spawn_retention(config.logging.clone(), shutdown_token.clone());

    let mut service = Service::new(config, shutdown_token.clone())
        .await
        .context("Failed to initialize service")?;

    service.start().await.context("Failed to start service")?;

    if cli.daemon {
        service.wait().await;
    } else {
        // Development mode: run one window of activity, then exit
        info!("Running in non-daemon mode");
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_secs(30)) => {}
            _ = service.wait() => {}
        }
    }

    info!("Shutting down");
    service.stop().await;

    shutdown_token.cancel();
    if let Some(handle) = retention {
        let _ = handle.await;
    }

    let stats = service.stats();
    info!(
        files_uploaded = stats.files_uploaded,
        bytes_uploaded = stats.bytes_uploaded,
        sync_errors = stats.sync_errors,
        "Cumulus stopped"
    );

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
