//! Session aggregation and lifecycle.
//!
//! - [`catalog`]: active sessions discovered from transcripts on disk
//! - [`archive`]: gzip side store with archive/restore
//! - [`retention`]: age-based automatic archiving
//! - [`query`]: filter, sort and paginate listings
//! - [`settings`]: persisted operator settings

pub mod archive;
pub mod catalog;
pub mod discovery;
pub mod file_lock;
pub mod key_lock;
pub mod labels;
pub mod metadata;
pub mod model;
pub mod query;
pub mod retention;
pub mod settings;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub use archive::{ArchiveIndex, ArchiveStore, ArchivedSession};
pub use catalog::{CatalogConfig, CatalogSnapshot, SessionCatalog, SessionRoot};
pub use model::{format_size, Session, SessionStats, SessionStatus};
pub use settings::{RetentionDays, Settings, SettingsStore};

use crate::transcript::ParseError;

/// Errors raised by catalog, archive and metadata operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session already exists: {0}")]
    AlreadyExists(String),
    #[error("transcript parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("IO error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(err: tokio::task::JoinError) -> Self {
        SessionError::Io(format!("background task failed: {err}"))
    }
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Hidden, uniquely named sibling used as the staging file for an atomic
/// replace of `path`.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp-{}", uuid::Uuid::new_v4().simple()))
}

/// Serialize `value` as pretty JSON and replace `path` atomically
/// (write temp, fsync, rename).
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = temp_sibling(path);
    let written = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_write_json_atomic_replaces_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("index.json");

        write_json_atomic(&path, &json!({"v": 1})).unwrap();
        write_json_atomic(&path, &json!({"v": 2})).unwrap();

        let v: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(v["v"], 2);
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_temp_sibling_is_hidden_and_unique() {
        let p = Path::new("/data/settings.json");
        let a = temp_sibling(p);
        let b = temp_sibling(p);
        assert_ne!(a, b);
        assert_eq!(a.parent(), p.parent());
        assert!(a.file_name().unwrap().to_string_lossy().starts_with(".settings.json.tmp-"));
    }

    #[test]
    fn test_error_conversions() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(SessionError::from(io), SessionError::Io(_)));
        let bad = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(SessionError::from(bad), SessionError::Serialization(_)));
    }
}
