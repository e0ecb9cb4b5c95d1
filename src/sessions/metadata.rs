//! Per-agent `sessions.json` metadata index.
//!
//! The agent runtime keeps a map of session key to metadata next to the
//! transcripts. We read it for labels, channels and token counts, and remove
//! or re-add entries when sessions are archived or restored. Entries we do not
//! understand are carried through rewrites untouched.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use super::file_lock::FileLock;
use super::{write_json_atomic, SessionError};

pub const METADATA_FILE: &str = "sessions.json";

/// One entry of `sessions.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted_last_run: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionMeta {
    /// First non-empty string among the given `origin` fields.
    pub fn origin_str(&self, keys: &[&str]) -> Option<String> {
        let origin = self.origin.as_ref()?.as_object()?;
        keys.iter()
            .filter_map(|k| origin.get(*k).and_then(Value::as_str))
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Channel the session talks on, preferring the explicit field.
    pub fn channel_name(&self) -> Option<String> {
        self.channel
            .clone()
            .or_else(|| self.last_channel.clone())
            .filter(|c| !c.is_empty())
    }
}

/// Parsed `sessions.json` for one session root.
#[derive(Debug, Clone, Default)]
pub struct MetadataIndex {
    entries: BTreeMap<String, SessionMeta>,
}

impl MetadataIndex {
    /// Load the index for a directory. A missing or unreadable file yields an
    /// empty index; individual malformed entries are skipped.
    pub fn load(dir: &Path) -> Self {
        let raw = match read_raw(&metadata_path(dir)) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "ignoring unreadable session metadata");
                Map::new()
            }
        };
        let mut entries = BTreeMap::new();
        for (key, value) in raw {
            match serde_json::from_value::<SessionMeta>(value) {
                Ok(meta) => {
                    entries.insert(key, meta);
                }
                Err(e) => warn!(key = %key, error = %e, "skipping malformed metadata entry"),
            }
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&SessionMeta> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SessionMeta)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map session id to its `(key, metadata)`. When several keys point at
    /// the same session, `:run:` keys lose to any other key.
    pub fn by_session_id(&self) -> HashMap<String, (String, SessionMeta)> {
        let mut out: HashMap<String, (String, SessionMeta)> = HashMap::new();
        for (key, meta) in &self.entries {
            let Some(id) = meta.session_id.clone().filter(|id| !id.is_empty()) else {
                continue;
            };
            let replace = match out.get(&id) {
                None => true,
                Some((existing, _)) => existing.contains(":run:") && !key.contains(":run:"),
            };
            if replace {
                out.insert(id, (key.clone(), meta.clone()));
            }
        }
        out
    }
}

pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILE)
}

fn read_raw(path: &Path) -> Result<Map<String, Value>, SessionError> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&content)? {
        Value::Object(map) => Ok(map),
        _ => Err(SessionError::Serialization(
            "sessions.json is not an object".to_string(),
        )),
    }
}

/// Remove `key` from the directory's `sessions.json`, returning the removed
/// entry. The file is rewritten atomically under an advisory lock.
pub fn remove_entry(dir: &Path, key: &str) -> Result<Option<SessionMeta>, SessionError> {
    let path = metadata_path(dir);
    if !path.exists() {
        return Ok(None);
    }
    let _lock = FileLock::acquire(&path)?;
    let mut raw = read_raw(&path)?;
    let Some(removed) = raw.remove(key) else {
        return Ok(None);
    };
    write_json_atomic(&path, &Value::Object(raw))?;
    Ok(serde_json::from_value(removed).ok())
}

/// Insert or replace `key` in the directory's `sessions.json`.
pub fn upsert_entry(dir: &Path, key: &str, meta: &SessionMeta) -> Result<(), SessionError> {
    fs::create_dir_all(dir)?;
    let path = metadata_path(dir);
    let _lock = FileLock::acquire(&path)?;
    let mut raw = read_raw(&path)?;
    raw.insert(key.to_string(), serde_json::to_value(meta)?);
    write_json_atomic(&path, &Value::Object(raw))
}
