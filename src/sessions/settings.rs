//! Operator settings persisted in `settings.json`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::file_lock::FileLock;
use super::write_json_atomic;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const PAGE_SIZES: [u32; 5] = [10, 20, 25, 50, 100];

const DAY_MS: i64 = 86_400_000;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{0}")]
    Validation(String),
    #[error("failed to persist settings: {0}")]
    Io(String),
}

/// How long inactive sessions stay active before retention archives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionDays {
    #[default]
    Never,
    Days(u32),
}

impl RetentionDays {
    /// Retention window in milliseconds, `None` for `never`.
    pub fn window_ms(self) -> Option<i64> {
        match self {
            RetentionDays::Never => None,
            RetentionDays::Days(days) => Some(i64::from(days) * DAY_MS),
        }
    }

    /// Accepts `"never"`, a positive integer, or a numeric string.
    pub fn from_value(value: &Value) -> Result<Self, SettingsError> {
        let days = match value {
            Value::String(s) if s.trim().eq_ignore_ascii_case("never") => {
                return Ok(RetentionDays::Never)
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| SettingsError::Validation(format!("Invalid retention period: {s}")))?,
            Value::Number(n) => n.as_i64().ok_or_else(|| {
                SettingsError::Validation(format!("Invalid retention period: {n}"))
            })?,
            other => {
                return Err(SettingsError::Validation(format!(
                    "Invalid retention period: {other}"
                )))
            }
        };
        if days < 1 {
            return Err(SettingsError::Validation(
                "Retention days must be at least 1".to_string(),
            ));
        }
        u32::try_from(days)
            .map(RetentionDays::Days)
            .map_err(|_| SettingsError::Validation(format!("Retention period too large: {days}")))
    }
}

impl fmt::Display for RetentionDays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionDays::Never => f.write_str("never"),
            RetentionDays::Days(d) => write!(f, "{d} days"),
        }
    }
}

impl Serialize for RetentionDays {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RetentionDays::Never => serializer.serialize_str("never"),
            RetentionDays::Days(d) => serializer.serialize_u32(*d),
        }
    }
}

impl<'de> Deserialize<'de> for RetentionDays {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RetentionDays::from_value(&value).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub retention_days: RetentionDays,
    pub auto_archive: bool,
    pub page_size: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            retention_days: RetentionDays::Never,
            auto_archive: true,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Settings {
    /// Apply a JSON object of changes on top of `self`.
    ///
    /// Unknown page sizes fall back to the default rather than failing.
    pub fn merged(&self, patch: &Value) -> Result<Settings, SettingsError> {
        let Some(obj) = patch.as_object() else {
            return Err(SettingsError::Validation(
                "Settings must be a JSON object".to_string(),
            ));
        };
        let mut next = self.clone();
        if let Some(v) = obj.get("retentionDays") {
            next.retention_days = RetentionDays::from_value(v)?;
        }
        if let Some(v) = obj.get("autoArchive") {
            next.auto_archive = v.as_bool().ok_or_else(|| {
                SettingsError::Validation("autoArchive must be true or false".to_string())
            })?;
        }
        if let Some(v) = obj.get("pageSize") {
            next.page_size = coerce_page_size(v);
        }
        Ok(next)
    }
}

fn coerce_page_size(value: &Value) -> u32 {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| PAGE_SIZES.contains(n))
        .unwrap_or(DEFAULT_PAGE_SIZE)
}

/// Settings file plus the published current value.
pub struct SettingsStore {
    path: PathBuf,
    current: ArcSwap<Settings>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Load settings from `path`. Missing or invalid files yield defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = read_settings(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "using default settings");
            Settings::default()
        });
        Self {
            path,
            current: ArcSwap::from_pointee(settings),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Settings {
        (**self.current.load()).clone()
    }

    /// Validate `patch`, persist the merged settings and publish them.
    pub fn save(&self, patch: &Value) -> Result<Settings, SettingsError> {
        let _guard = self.write_lock.lock();
        let next = self.get().merged(patch)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }
        let _flock = FileLock::acquire(&self.path).map_err(|e| SettingsError::Io(e.to_string()))?;
        write_json_atomic(&self.path, &next).map_err(|e| SettingsError::Io(e.to_string()))?;
        self.current.store(Arc::new(next.clone()));
        info!(
            retention = %next.retention_days,
            auto_archive = next.auto_archive,
            page_size = next.page_size,
            "settings saved"
        );
        Ok(next)
    }
}

fn read_settings(path: &Path) -> Result<Settings, SettingsError> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| SettingsError::Validation(format!("settings file is not JSON: {e}")))?;
    Settings::default().merged(&value)
}
