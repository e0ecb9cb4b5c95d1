use clap::Parser;
use tracing::{info, warn};

use clawwatch::cli::{self, Cli, Command};
use clawwatch::config::{ConfigOverrides, DashboardConfig};
use clawwatch::logging;
use clawwatch::server::{run_server_with_config, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let overrides = cli.server.overrides();

    match cli.command {
        // No subcommand or explicit `serve` both launch the server.
        None | Some(Command::Serve) => run_server(&overrides).await,

        Some(Command::Archive { days, dry_run }) => {
            init_logging_from_env()?;
            cli::handle_archive(&overrides, days, dry_run).await
        }

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

/// Load configuration, start the server and wait for a shutdown signal.
async fn run_server(overrides: &ConfigOverrides) -> Result<(), Box<dyn std::error::Error>> {
    init_logging_from_env()?;
    let config = DashboardConfig::load(overrides)?;

    if !config.sessions_dir.is_dir() {
        warn!(
            dir = %config.sessions_dir.display(),
            "sessions directory does not exist yet; the dashboard will be empty until it appears"
        );
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        sessions = %config.sessions_dir.display(),
        archive = %config.archive_dir.display(),
        settings = %config.settings_path.display(),
        "starting clawwatch"
    );

    let handle = run_server_with_config(ServerConfig::new(config)?).await?;
    info!("Dashboard available at {}", handle.base_url());

    let trigger = await_shutdown_trigger().await;
    info!(trigger, "shutting down");
    handle.shutdown().await;
    info!("Dashboard shut down");
    Ok(())
}

/// Initialize logging based on the CLAWWATCH_DEV environment variable.
fn init_logging_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let log_config = if std::env::var("CLAWWATCH_DEV")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
    {
        logging::LogConfig::development()
    } else {
        logging::LogConfig::production()
    };
    logging::init_logging(log_config)?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            ctrl_c_only().await
        }
    }
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    ctrl_c_only().await
}

async fn ctrl_c_only() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            warn!("Failed to install Ctrl+C handler: {}", e);
            "signal-handler-error"
        }
    }
}
