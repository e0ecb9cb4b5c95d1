//! Release check against the skill registry.
//!
//! The registry is asked for the latest published version at most once a
//! day. Answers are kept in memory and in `<clawwatchHome>/update-cache.json`
//! so a restart does not query the registry again.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::sessions::write_json_atomic;

pub const DEFAULT_REGISTRY_URL: &str = "https://clawhub.ai/api/skills/clawwatch/latest";
pub const CACHE_FILE: &str = "update-cache.json";

const CACHE_TTL_SECS: i64 = 24 * 60 * 60;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// `updateCheck` block of `config.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheckConfig {
    pub enabled: bool,
    pub registry_url: String,
}

impl Default for UpdateCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
        }
    }
}

/// Body of `GET /api/update-check`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatus {
    pub current_version: String,
    pub latest_version: Option<String>,
    pub update_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedCheck {
    data: UpdateStatus,
    /// Epoch seconds of the fetch.
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryRelease {
    version: Option<String>,
    release_notes: Option<String>,
    release_url: Option<String>,
}

#[derive(Debug, Error)]
enum UpdateError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("registry returned status {0}")]
    Status(u16),
    #[error("invalid registry response: {0}")]
    Parse(String),
}

impl UpdateError {
    fn client_message(&self) -> &'static str {
        match self {
            UpdateError::Parse(_) => "Invalid response from registry",
            UpdateError::Request(_) | UpdateError::Status(_) => "Could not check for updates",
        }
    }
}

/// True when `latest` is a strictly higher `major.minor.patch` than
/// `current`. Pre-release suffixes and a leading `v` are ignored; anything
/// unparsable compares as not newer.
pub fn is_newer(current: &str, latest: &str) -> bool {
    match (parse_version(current), parse_version(latest)) {
        (Some(current), Some(latest)) => latest > current,
        _ => false,
    }
}

fn parse_version(v: &str) -> Option<[u64; 3]> {
    let v = v.trim();
    let v = v.strip_prefix('v').unwrap_or(v);
    let core = v.split('-').next()?;
    let mut parts = [0u64; 3];
    for (i, part) in core.split('.').take(3).enumerate() {
        parts[i] = part.parse().ok()?;
    }
    Some(parts)
}

/// Cached client for the registry's latest-release endpoint.
pub struct UpdateChecker {
    config: UpdateCheckConfig,
    cache_path: PathBuf,
    static_dir: Option<PathBuf>,
    cache: Mutex<Option<CachedCheck>>,
    client: reqwest::Client,
}

impl UpdateChecker {
    /// Blocking: reads the cache file left by a previous run.
    pub fn new(config: UpdateCheckConfig, cache_path: PathBuf, static_dir: Option<PathBuf>) -> Self {
        let cache = read_cache(&cache_path);
        Self {
            config,
            cache_path,
            static_dir,
            cache: Mutex::new(cache),
            client: reqwest::Client::new(),
        }
    }

    /// Version of the served dashboard: `version.json` in the static
    /// directory when present, else this build's version.
    pub fn current_version(&self) -> String {
        self.static_dir
            .as_deref()
            .and_then(|dir| fs::read_to_string(dir.join("version.json")).ok())
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .and_then(|v| v.get("version").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
    }

    pub async fn check(&self) -> UpdateStatus {
        self.check_at(chrono::Utc::now().timestamp()).await
    }

    /// Answer from the cache while it is younger than a day, else ask the
    /// registry. Failures are reported in the status and never cached.
    pub async fn check_at(&self, now: i64) -> UpdateStatus {
        let current = self.current_version();
        if !self.config.enabled {
            return UpdateStatus {
                current_version: current,
                disabled: true,
                ..UpdateStatus::default()
            };
        }

        if let Some(cached) = self.fresh_cache(now) {
            let update_available =
                is_newer(&current, cached.latest_version.as_deref().unwrap_or("0.0.0"));
            return UpdateStatus {
                update_available,
                current_version: current,
                cached: Some(true),
                ..cached
            };
        }

        match self.fetch(&current).await {
            Ok(release) => {
                let latest = release.version.unwrap_or_else(|| current.clone());
                let status = UpdateStatus {
                    update_available: is_newer(&current, &latest),
                    current_version: current,
                    latest_version: Some(latest),
                    release_notes: release.release_notes,
                    release_url: release.release_url,
                    cached: Some(false),
                    ..UpdateStatus::default()
                };
                debug!(latest = ?status.latest_version, available = status.update_available, "update check complete");
                self.store_cache(status.clone(), now).await;
                status
            }
            Err(e) => {
                warn!(error = %e, url = %self.config.registry_url, "update check failed");
                UpdateStatus {
                    current_version: current,
                    error: Some(e.client_message().to_string()),
                    ..UpdateStatus::default()
                }
            }
        }
    }

    fn fresh_cache(&self, now: i64) -> Option<UpdateStatus> {
        self.cache
            .lock()
            .as_ref()
            .filter(|c| now - c.timestamp < CACHE_TTL_SECS)
            .map(|c| c.data.clone())
    }

    async fn fetch(&self, current: &str) -> Result<RegistryRelease, UpdateError> {
        let resp = self
            .client
            .get(&self.config.registry_url)
            .header("User-Agent", format!("clawwatch/{current}"))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| UpdateError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(UpdateError::Status(resp.status().as_u16()));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| UpdateError::Request(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| UpdateError::Parse(e.to_string()))
    }

    async fn store_cache(&self, data: UpdateStatus, now: i64) {
        let entry = CachedCheck {
            data,
            timestamp: now,
        };
        *self.cache.lock() = Some(entry.clone());

        let path = self.cache_path.clone();
        let written = tokio::task::spawn_blocking(move || write_json_atomic(&path, &entry)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(path = %self.cache_path.display(), error = %e, "could not save update cache"),
            Err(e) => warn!(error = %e, "update cache writer failed"),
        }
    }
}

fn read_cache(path: &Path) -> Option<CachedCheck> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(cache) => Some(cache),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring unreadable update cache");
            None
        }
    }
}
