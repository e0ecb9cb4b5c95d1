//! Session retention.
//!
//! Sessions idle for longer than the configured retention period are moved
//! into the archive, either on demand or from a background loop that
//! re-reads the settings before every pass.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::archive::ArchiveStore;
use super::model::Session;
use super::settings::{RetentionDays, Settings, SettingsStore};
use super::{now_millis, SessionError};

const STARTUP_DELAY: Duration = Duration::from_secs(30);

/// Scheduling of the background retention loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub startup_delay: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60 * 60),
            startup_delay: STARTUP_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetentionFailure {
    pub key: String,
    pub error: String,
}

/// Outcome of one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    /// Keys of the sessions moved into the archive.
    pub archived: Vec<String>,
    pub failures: Vec<RetentionFailure>,
    /// Set when the pass did nothing because the policy is off.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl RetentionReport {
    fn skipped(reason: &str) -> Self {
        Self {
            skipped: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

/// Why a policy selects nothing, if it does.
fn inactive_reason(settings: &Settings) -> Option<&'static str> {
    if !settings.auto_archive {
        return Some("Auto-archive is disabled");
    }
    if settings.retention_days == RetentionDays::Never {
        return Some("Retention set to never");
    }
    None
}

/// Sessions idle for strictly longer than the retention window.
pub fn eligible(sessions: &[Session], settings: &Settings, now: i64) -> Vec<Session> {
    if inactive_reason(settings).is_some() {
        return Vec::new();
    }
    let Some(window) = settings.retention_days.window_ms() else {
        return Vec::new();
    };
    sessions
        .iter()
        .filter(|s| now - s.updated_at > window)
        .cloned()
        .collect()
}

/// Archive every eligible session. Individual failures are collected in the
/// report and never abort the pass.
pub async fn run_retention(archive: &ArchiveStore, settings: &Settings, now: i64) -> RetentionReport {
    if let Some(reason) = inactive_reason(settings) {
        debug!(reason, "retention pass skipped");
        return RetentionReport::skipped(reason);
    }

    let candidates = eligible(&archive.active_sessions(), settings, now);
    let mut report = RetentionReport::default();
    for session in candidates {
        match archive.archive(&session.id).await {
            Ok(entry) => report.archived.push(entry.key),
            // Archived or removed by someone else since the snapshot.
            Err(SessionError::NotFound(_)) => {
                debug!(session_id = %session.id, "retention candidate already gone");
            }
            Err(e) => {
                warn!(session_id = %session.id, key = %session.key, error = %e, "retention archive failed");
                report.failures.push(RetentionFailure {
                    key: session.key.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    if report.archived.is_empty() && report.failures.is_empty() {
        debug!(retention = %settings.retention_days, "retention: nothing to archive");
    } else {
        info!(
            archived = report.archived.len(),
            failed = report.failures.len(),
            retention = %settings.retention_days,
            "retention pass complete"
        );
    }
    report
}

/// Background loop: waits out the startup delay, then runs a pass every
/// `config.interval` until the shutdown signal fires.
pub async fn retention_loop(
    archive: Arc<ArchiveStore>,
    settings: Arc<SettingsStore>,
    config: RetentionConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    if !config.enabled {
        debug!("retention loop disabled");
        return;
    }
    info!(interval_secs = config.interval.as_secs(), "retention loop scheduled");

    if !wait_for_startup_delay(&mut shutdown, config.startup_delay).await {
        return;
    }

    run_pass(&archive, &settings).await;

    let mut ticker = tokio::time::interval(config.interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        run_pass(&archive, &settings).await;
    }
    debug!("retention loop stopped");
}

async fn wait_for_startup_delay(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => return false,
    }
    !*shutdown.borrow()
}

async fn run_pass(archive: &ArchiveStore, settings: &SettingsStore) {
    archive.catalog().refresh().await;
    run_retention(archive, &settings.get(), now_millis()).await;
}
