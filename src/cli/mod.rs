//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommands:
//! - `serve` (default) -- start the dashboard server
//! - `archive` -- apply the retention policy once, without a server
//! - `version` -- print build/version info
//!
//! Server flags (`--port`, `--session-path`, `--token`, `--read-only`,
//! `--config`) are global and override every other configuration layer.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use clap::{Args, Parser, Subcommand};

use crate::config::{ConfigOverrides, DashboardConfig};
use crate::sessions::retention::{eligible, run_retention, RetentionReport};
use crate::sessions::{
    now_millis, ArchiveStore, RetentionDays, Session, SessionCatalog, SessionError, SettingsStore,
};

/// Session monitoring dashboard for OpenClaw agents.
#[derive(Parser, Debug)]
#[command(
    name = "clawwatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "clawwatch - monitor, archive and restore OpenClaw agent sessions"
)]
pub struct Cli {
    #[command(flatten)]
    pub server: ServerArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerArgs {
    /// Port to listen on (default: 8889).
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Primary sessions directory (default: ~/.openclaw/agents/main/sessions).
    #[arg(long, global = true)]
    pub session_path: Option<PathBuf>,

    /// Dashboard access token.
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Refuse archive, restore and settings changes.
    #[arg(long, global = true)]
    pub read_only: bool,

    /// Config file to use instead of ~/.clawwatch/config.json.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

impl ServerArgs {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            port: self.port,
            session_path: self.session_path.clone(),
            token: self.token.clone(),
            read_only: self.read_only,
            config_path: self.config.clone(),
        }
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the dashboard server (default when no subcommand is given).
    Serve,

    /// Archive inactive sessions once using the retention policy.
    Archive {
        /// Archive sessions idle longer than this many days, overriding the
        /// saved retention setting.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        days: Option<u32>,

        /// Only list the sessions that would be archived.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print version information.
    Version,
}

/// Result of an offline archive run.
#[derive(Debug)]
pub enum ArchiveOutcome {
    /// Sessions that would have been archived.
    DryRun(Vec<Session>),
    Ran(RetentionReport),
}

/// Open the catalog and archive for `config` and apply retention once.
///
/// `days` replaces the saved retention period and enables auto-archive for
/// this run only; nothing is written to the settings file.
pub async fn run_archive_command(
    config: &DashboardConfig,
    days: Option<u32>,
    dry_run: bool,
) -> Result<ArchiveOutcome, SessionError> {
    let catalog = Arc::new(SessionCatalog::new(config.catalog_config()));
    catalog.refresh().await;
    let archive_dir = config.archive_dir.clone();
    let archive =
        tokio::task::spawn_blocking(move || ArchiveStore::open(archive_dir, catalog)).await??;

    let mut settings = SettingsStore::load(&config.settings_path).get();
    if let Some(days) = days {
        settings.retention_days = RetentionDays::Days(days);
        settings.auto_archive = true;
    }

    let now = now_millis();
    if dry_run {
        let mut candidates = eligible(&archive.active_sessions(), &settings, now);
        candidates.sort_by_key(|s| s.updated_at);
        return Ok(ArchiveOutcome::DryRun(candidates));
    }
    Ok(ArchiveOutcome::Ran(run_retention(&archive, &settings, now).await))
}

fn format_timestamp(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Run the `archive` subcommand.
pub async fn handle_archive(
    overrides: &ConfigOverrides,
    days: Option<u32>,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = DashboardConfig::load(overrides)?;
    match run_archive_command(&config, days, dry_run).await? {
        ArchiveOutcome::DryRun(sessions) if sessions.is_empty() => {
            println!("No sessions would be archived.");
        }
        ArchiveOutcome::DryRun(sessions) => {
            println!("{} session(s) would be archived:", sessions.len());
            for s in &sessions {
                println!(
                    "  {:<48} {:<32} last active {}",
                    s.key,
                    s.label.as_deref().unwrap_or("-"),
                    format_timestamp(s.updated_at)
                );
            }
        }
        ArchiveOutcome::Ran(report) => {
            if let Some(reason) = &report.skipped {
                println!("Nothing archived: {reason}.");
                return Ok(());
            }
            println!("Archived {} session(s).", report.archived.len());
            for key in &report.archived {
                println!("  {key}");
            }
            if !report.failures.is_empty() {
                eprintln!("{} session(s) failed:", report.failures.len());
                for failure in &report.failures {
                    eprintln!("  {}: {}", failure.key, failure.error);
                }
                return Err(format!("{} session(s) could not be archived", report.failures.len()).into());
            }
        }
    }
    Ok(())
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("clawwatch {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    #[test]
    fn test_cli_no_args_defaults_to_none() {
        let cli = Cli::try_parse_from(["clawwatch"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.server, ServerArgs::default());
    }

    #[test]
    fn test_cli_serve_with_flags() {
        let cli = Cli::try_parse_from([
            "clawwatch",
            "serve",
            "--port",
            "9000",
            "--read-only",
            "--session-path",
            "/tmp/sessions",
        ])
        .unwrap();
        assert_eq!(cli.command, Some(Command::Serve));
        let overrides = cli.server.overrides();
        assert_eq!(overrides.port, Some(9000));
        assert!(overrides.read_only);
        assert_eq!(overrides.session_path, Some(PathBuf::from("/tmp/sessions")));
    }

    #[test]
    fn test_cli_global_flags_before_subcommand() {
        let cli = Cli::try_parse_from(["clawwatch", "--token", "abc", "archive", "--dry-run"]).unwrap();
        assert_eq!(cli.server.token.as_deref(), Some("abc"));
        assert_eq!(
            cli.command,
            Some(Command::Archive {
                days: None,
                dry_run: true
            })
        );
    }

    #[test]
    fn test_cli_archive_days() {
        let cli = Cli::try_parse_from(["clawwatch", "archive", "--days", "14"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Archive {
                days: Some(14),
                dry_run: false
            })
        );
        assert!(Cli::try_parse_from(["clawwatch", "archive", "--days", "0"]).is_err());
    }

    #[test]
    fn test_cli_version_subcommand() {
        let cli = Cli::try_parse_from(["clawwatch", "version"]).unwrap();
        assert_eq!(cli.command, Some(Command::Version));
    }

    #[test]
    fn test_cli_unknown_subcommand() {
        assert!(Cli::try_parse_from(["clawwatch", "explode"]).is_err());
    }

    fn write_session(dir: &std::path::Path, id: &str, age_days: u64) {
        let path = dir.join(format!("{id}.jsonl"));
        let line = json!({"type": "message", "message": {"role": "user", "content": format!("job {id}")}});
        fs::write(&path, format!("{line}\n")).unwrap();
        let mtime = SystemTime::now() - Duration::from_secs(age_days * 86_400);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }

    fn fixture() -> (TempDir, DashboardConfig) {
        let dir = TempDir::new().unwrap();
        let config = DashboardConfig::for_dirs(dir.path().join("oc"), dir.path().join("cw"));
        fs::create_dir_all(&config.sessions_dir).unwrap();
        write_session(&config.sessions_dir, "old", 40);
        write_session(&config.sessions_dir, "fresh", 1);
        (dir, config)
    }

    #[tokio::test]
    async fn test_archive_dry_run_leaves_files() {
        let (_dir, config) = fixture();
        let outcome = run_archive_command(&config, Some(30), true).await.unwrap();
        let ArchiveOutcome::DryRun(sessions) = outcome else {
            panic!("expected dry run");
        };
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "old");
        assert!(config.sessions_dir.join("old.jsonl").exists());
    }

    #[tokio::test]
    async fn test_archive_run_moves_old_sessions() {
        let (_dir, config) = fixture();
        let outcome = run_archive_command(&config, Some(30), false).await.unwrap();
        let ArchiveOutcome::Ran(report) = outcome else {
            panic!("expected a run");
        };
        assert_eq!(report.archived.len(), 1);
        assert!(report.failures.is_empty());
        assert!(!config.sessions_dir.join("old.jsonl").exists());
        assert!(config.sessions_dir.join("fresh.jsonl").exists());
        assert!(config.archive_dir.join("old.jsonl.gz").exists());
    }

    #[tokio::test]
    async fn test_archive_uses_saved_settings_without_days() {
        let (_dir, config) = fixture();
        let outcome = run_archive_command(&config, None, false).await.unwrap();
        let ArchiveOutcome::Ran(report) = outcome else {
            panic!("expected a run");
        };
        assert_eq!(report.skipped.as_deref(), Some("Retention set to never"));
        assert!(config.sessions_dir.join("old.jsonl").exists());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00 UTC");
    }
}
