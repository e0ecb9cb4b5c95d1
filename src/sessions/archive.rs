//! Archive store.
//!
//! Archived sessions live as `<archiveDir>/<sessionId>.jsonl.gz` and are
//! described by `<archiveDir>/archive-index.json`. The index is kept in
//! memory as an immutable snapshot; every change rewrites the file
//! atomically under an advisory lock and then swaps the snapshot.
//!
//! Archive and restore are ordered so that a reader of the catalog plus the
//! index sees a session in exactly one place:
//!
//! - archive: compress → index entry → delete transcript → drop from catalog
//! - restore: decompress → add to catalog → drop index entry → delete artifact
//!
//! The active listing hides ids present in the index, which covers the window
//! between the index publish and the catalog update.
//!
//! Other processes (the `archive` subcommand, a second server) may rewrite the
//! index. Reads compare the file's modification stamp with the one last seen
//! and reload the snapshot when it moved.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::catalog::{SessionCatalog, SessionRoot};
use super::file_lock::FileLock;
use super::key_lock::KeyLocks;
use super::metadata::{self, MetadataIndex, SessionMeta};
use super::model::{Session, SessionStats, SessionStatus};
use super::{now_millis, temp_sibling, write_json_atomic, SessionError};
use crate::transcript::{
    read_compressed_transcript, system_time_millis, ParseError, Transcript, TranscriptEntry,
};

pub const INDEX_FILE: &str = "archive-index.json";
const ARTIFACT_SUFFIX: &str = ".jsonl.gz";

fn default_agent_id() -> String {
    "main".to_string()
}

/// Index entry for one archived session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedSession {
    pub key: String,
    pub session_id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub started_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub context_tokens: u64,
    pub archived_at: i64,
    #[serde(default)]
    pub original_size: u64,
    #[serde(default)]
    pub compressed_size: u64,
    /// Artifact file name inside the archive directory.
    #[serde(default)]
    pub file: String,
    /// The `sessions.json` entry removed at archive time, put back on restore.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SessionMeta>,
}

impl ArchivedSession {
    pub fn artifact_name(&self) -> String {
        if self.file.is_empty() {
            format!("{}{ARTIFACT_SUFFIX}", self.session_id)
        } else {
            self.file.clone()
        }
    }

    /// Copy safe to hand to clients: runtime metadata stays on disk.
    pub fn for_client(&self) -> Self {
        Self {
            metadata: None,
            ..self.clone()
        }
    }
}

/// Contents of `archive-index.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveIndex {
    #[serde(default)]
    pub sessions: Vec<ArchivedSession>,
    #[serde(default)]
    pub total_size: u64,
}

impl ArchiveIndex {
    pub fn find(&self, ident: &str) -> Option<&ArchivedSession> {
        self.sessions
            .iter()
            .find(|s| s.session_id == ident)
            .or_else(|| self.sessions.iter().find(|s| s.key == ident))
    }

    fn upsert(&mut self, entry: ArchivedSession) {
        self.sessions.retain(|s| s.session_id != entry.session_id);
        self.sessions.push(entry);
    }

    fn remove(&mut self, session_id: &str) -> Option<ArchivedSession> {
        let pos = self.sessions.iter().position(|s| s.session_id == session_id)?;
        Some(self.sessions.remove(pos))
    }

    fn normalize(&mut self) {
        self.sessions
            .sort_by(|a, b| b.archived_at.cmp(&a.archived_at).then_with(|| a.session_id.cmp(&b.session_id)));
        self.total_size = self.sessions.iter().map(|s| s.compressed_size).sum();
    }
}

/// Identity of one version of the index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl IndexStamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// File-level half of the store. Apart from `sync`, everything here is
/// blocking and runs on the blocking pool.
struct ArchiveFiles {
    dir: PathBuf,
    index_path: PathBuf,
    index: ArcSwap<ArchiveIndex>,
    /// Stamp of the index file the published snapshot was read from or
    /// written to.
    stamp: Mutex<Option<IndexStamp>>,
    write_lock: Mutex<()>,
}

impl ArchiveFiles {
    /// Reload the index if another writer replaced the file since we last
    /// read or wrote it. A missing or unreadable file keeps the current
    /// snapshot.
    fn sync(&self) {
        let Some(current) = IndexStamp::of(&self.index_path) else {
            return;
        };
        if *self.stamp.lock() == Some(current) {
            return;
        }
        let _guard = self.write_lock.lock();
        if *self.stamp.lock() == Some(current) {
            return;
        }
        match read_index_file(&self.index_path) {
            Ok(Some(index)) => {
                debug!(entries = index.sessions.len(), "archive index changed on disk, reloaded");
                self.index.store(Arc::new(index));
            }
            Ok(None) => return,
            Err(e) => {
                warn!(path = %self.index_path.display(), error = %e, "archive index unreadable, keeping last good copy");
            }
        }
        *self.stamp.lock() = Some(current);
    }

    fn snapshot(&self) -> Arc<ArchiveIndex> {
        self.sync();
        self.index.load_full()
    }

    fn artifact_path(&self, entry: &ArchivedSession) -> PathBuf {
        self.dir.join(entry.artifact_name())
    }

    /// Apply `mutate` to the on-disk index (falling back to the in-memory
    /// copy if the file is missing or unreadable), persist, then publish.
    fn publish<R>(&self, mutate: impl FnOnce(&mut ArchiveIndex) -> R) -> Result<R, SessionError> {
        let _guard = self.write_lock.lock();
        fs::create_dir_all(&self.dir)?;
        let _flock = FileLock::acquire(&self.index_path)?;

        let mut next = match read_index_file(&self.index_path) {
            Ok(Some(index)) => index,
            _ => (**self.index.load()).clone(),
        };
        let out = mutate(&mut next);
        next.normalize();
        write_json_atomic(&self.index_path, &next)?;
        self.index.store(Arc::new(next));
        *self.stamp.lock() = IndexStamp::of(&self.index_path);
        Ok(out)
    }

    fn archive_session(&self, session: &Session, now: i64) -> Result<ArchivedSession, SessionError> {
        let src = &session.transcript_path;
        if !src.is_file() {
            return Err(SessionError::NotFound(session.id.clone()));
        }
        fs::create_dir_all(&self.dir)?;

        let file = format!("{}{ARTIFACT_SUFFIX}", session.id);
        let dest = self.dir.join(&file);
        let (original_size, compressed_size) = compress_atomic(src, &dest)?;

        let meta_dir = src.parent().map(Path::to_path_buf);
        let meta = meta_dir
            .as_deref()
            .and_then(|dir| MetadataIndex::load(dir).get(&session.key).cloned());

        let entry = ArchivedSession {
            key: session.key.clone(),
            session_id: session.id.clone(),
            label: session.label.clone(),
            agent_name: session.agent_name.clone(),
            agent_id: session.agent_id.clone(),
            node: session.node.clone(),
            channel: session.channel.clone(),
            model: session.model.clone(),
            task: session.task.clone(),
            status: Some(session.status),
            started_at: session.started_at,
            updated_at: session.updated_at,
            total_tokens: session.total_tokens,
            context_tokens: session.context_tokens,
            archived_at: now,
            original_size,
            compressed_size,
            file,
            metadata: meta,
        };

        if let Err(e) = self.publish(|index| index.upsert(entry.clone())) {
            let _ = fs::remove_file(&dest);
            return Err(e);
        }

        if let Err(e) = fs::remove_file(src) {
            warn!(session_id = %session.id, error = %e, "transcript delete failed, rolling back archive");
            if let Err(rollback) = self.publish(|index| index.remove(&session.id)) {
                warn!(session_id = %session.id, error = %rollback, "archive rollback failed");
            }
            let _ = fs::remove_file(&dest);
            return Err(e.into());
        }

        if let Some(dir) = meta_dir {
            if let Err(e) = metadata::remove_entry(&dir, &session.key) {
                warn!(key = %session.key, error = %e, "could not drop archived session from sessions.json");
            }
        }
        Ok(entry)
    }

    /// Decompress the artifact into the agent's session root and re-add its
    /// metadata. Leaves the index untouched.
    fn restore_transcript(&self, entry: &ArchivedSession, root: &SessionRoot) -> Result<PathBuf, SessionError> {
        let artifact = self.artifact_path(entry);
        if !artifact.is_file() {
            return Err(SessionError::NotFound(format!(
                "archive artifact missing for {}",
                entry.session_id
            )));
        }
        fs::create_dir_all(&root.dir)?;
        let dest = root.dir.join(format!("{}.jsonl", entry.session_id));
        if dest.exists() {
            return Err(SessionError::AlreadyExists(entry.session_id.clone()));
        }
        decompress_atomic(&artifact, &dest, entry.updated_at)?;

        if entry.metadata.is_some() || entry.key != entry.session_id {
            let mut meta = entry.metadata.clone().unwrap_or_else(|| SessionMeta {
                label: entry.label.clone(),
                model: entry.model.clone(),
                channel: entry.channel.clone(),
                total_tokens: Some(entry.total_tokens),
                context_tokens: Some(entry.context_tokens),
                updated_at: Some(entry.updated_at),
                ..SessionMeta::default()
            });
            meta.session_id = Some(entry.session_id.clone());
            meta.extra.insert("restoredAt".to_string(), json!(now_millis()));
            if let Err(e) = metadata::upsert_entry(&root.dir, &entry.key, &meta) {
                warn!(key = %entry.key, error = %e, "could not restore sessions.json entry");
            }
        }
        Ok(dest)
    }

    /// Undo `restore_transcript`: delete the transcript and its
    /// `sessions.json` entry.
    fn unrestore(&self, entry: &ArchivedSession, root: &SessionRoot, restored: &Path) {
        if let Err(e) = fs::remove_file(restored) {
            warn!(session_id = %entry.session_id, error = %e, "could not remove restored transcript");
        }
        if let Err(e) = metadata::remove_entry(&root.dir, &entry.key) {
            warn!(key = %entry.key, error = %e, "could not drop restored sessions.json entry");
        }
    }

    /// Drop the index entry, then the artifact.
    fn forget(&self, entry: &ArchivedSession) -> Result<(), SessionError> {
        self.publish(|index| index.remove(&entry.session_id))?;
        if let Err(e) = fs::remove_file(self.artifact_path(entry)) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(session_id = %entry.session_id, error = %e, "stale archive artifact left behind");
            }
        }
        Ok(())
    }

    fn read(&self, ident: &str) -> Result<Transcript, SessionError> {
        let entry = self
            .snapshot()
            .find(ident)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(ident.to_string()))?;
        match read_compressed_transcript(&self.artifact_path(&entry)) {
            Err(ParseError::Unreadable(e)) if e.kind() == io::ErrorKind::NotFound => {
                Err(SessionError::NotFound(ident.to_string()))
            }
            other => Ok(other?),
        }
    }
}

fn compress_atomic(src: &Path, dest: &Path) -> io::Result<(u64, u64)> {
    let tmp = temp_sibling(dest);
    let result = (|| -> io::Result<(u64, u64)> {
        let mut input = File::open(src)?;
        let mut encoder = GzEncoder::new(File::create(&tmp)?, Compression::default());
        let original = io::copy(&mut input, &mut encoder)?;
        let out = encoder.finish()?;
        out.sync_all()?;
        let compressed = out.metadata()?.len();
        fs::rename(&tmp, dest)?;
        Ok((original, compressed))
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn decompress_atomic(src: &Path, dest: &Path, mtime_ms: i64) -> io::Result<()> {
    let tmp = temp_sibling(dest);
    let result = (|| -> io::Result<()> {
        let mut decoder = GzDecoder::new(File::open(src)?);
        let mut out = File::create(&tmp)?;
        io::copy(&mut decoder, &mut out)?;
        out.sync_all()?;
        if mtime_ms > 0 {
            out.set_modified(UNIX_EPOCH + Duration::from_millis(mtime_ms as u64))?;
        }
        drop(out);
        fs::rename(&tmp, dest)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn read_index_file(path: &Path) -> Result<Option<ArchiveIndex>, SessionError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let mut index: ArchiveIndex = serde_json::from_str(&content)?;
    index.normalize();
    Ok(Some(index))
}

/// Reconstruct index entries from the artifacts on disk.
fn rebuild_index(dir: &Path) -> ArchiveIndex {
    let mut index = ArchiveIndex::default();
    let Ok(entries) = fs::read_dir(dir) else {
        return index;
    };
    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(session_id) = name.strip_suffix(ARTIFACT_SUFFIX) else {
            continue;
        };
        if session_id.is_empty() || name.starts_with('.') {
            continue;
        }
        let fs_meta = entry.metadata().ok();
        let archived_at = fs_meta
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(system_time_millis)
            .unwrap_or(0);
        let transcript = read_compressed_transcript(&entry.path()).unwrap_or_default();
        index.sessions.push(ArchivedSession {
            key: session_id.to_string(),
            session_id: session_id.to_string(),
            label: None,
            agent_name: None,
            agent_id: default_agent_id(),
            node: None,
            channel: None,
            model: transcript.model,
            task: transcript.task,
            status: None,
            started_at: transcript.first_timestamp.unwrap_or(archived_at),
            updated_at: archived_at,
            total_tokens: transcript.metrics.total_tokens,
            context_tokens: 0,
            archived_at,
            original_size: transcript.metrics.size_bytes,
            compressed_size: fs_meta.map(|m| m.len()).unwrap_or(0),
            file: name,
            metadata: None,
        });
    }
    index.normalize();
    index
}

/// Archive side store plus the lifecycle operations that move sessions
/// between it and the catalog.
pub struct ArchiveStore {
    files: Arc<ArchiveFiles>,
    catalog: Arc<SessionCatalog>,
    locks: KeyLocks,
    /// Live sessions already reported as shadowed by an index entry.
    reported_shadowed: Mutex<HashSet<String>>,
}

impl ArchiveStore {
    /// Open (creating if needed) the archive in `dir`.
    ///
    /// An unreadable index is rebuilt from the artifacts present; the rebuilt
    /// copy is written out on the next change.
    pub fn open(dir: impl Into<PathBuf>, catalog: Arc<SessionCatalog>) -> Result<Self, SessionError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let index_path = dir.join(INDEX_FILE);
        let index = match read_index_file(&index_path) {
            Ok(Some(index)) => index,
            Ok(None) => rebuild_index(&dir),
            Err(e) => {
                warn!(path = %index_path.display(), error = %e, "archive index unreadable, rebuilding from artifacts");
                rebuild_index(&dir)
            }
        };
        debug!(entries = index.sessions.len(), "archive index loaded");
        let stamp = IndexStamp::of(&index_path);
        Ok(Self {
            files: Arc::new(ArchiveFiles {
                dir,
                index_path,
                index: ArcSwap::from_pointee(index),
                stamp: Mutex::new(stamp),
                write_lock: Mutex::new(()),
            }),
            catalog,
            locks: KeyLocks::new(),
            reported_shadowed: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.files.dir
    }

    pub fn catalog(&self) -> &Arc<SessionCatalog> {
        &self.catalog
    }

    /// Current index, reloaded first if the file changed on disk.
    pub fn index(&self) -> Arc<ArchiveIndex> {
        self.files.snapshot()
    }

    /// Archived sessions, most recently archived first.
    pub fn list(&self) -> Vec<ArchivedSession> {
        self.index().sessions.clone()
    }

    pub fn get(&self, ident: &str) -> Option<ArchivedSession> {
        self.index().find(ident).cloned()
    }

    /// Decompress and parse an archived transcript. Blocking.
    pub fn read_transcript(&self, ident: &str) -> Result<Transcript, SessionError> {
        self.files.read(ident)
    }

    /// Rendered conversation of an archived session. Blocking.
    pub fn history(&self, ident: &str) -> Result<Vec<TranscriptEntry>, SessionError> {
        Ok(self.files.read(ident)?.entries)
    }

    /// Catalog sessions split into (active, shadowed). Shadowed sessions
    /// still have a transcript on disk and are also listed in the index
    /// while no archive or restore of them is running.
    fn partition(&self) -> (Vec<Session>, Vec<Session>) {
        let index = self.index();
        let archived: HashSet<&str> = index
            .sessions
            .iter()
            .flat_map(|e| [e.session_id.as_str(), e.key.as_str()])
            .collect();
        let mut active = Vec::new();
        let mut shadowed = Vec::new();
        for session in self.catalog.snapshot().sessions.iter() {
            if !archived.contains(session.id.as_str()) && !archived.contains(session.key.as_str()) {
                active.push(session.clone());
            } else if !self.locks.is_held(&session.id) && session.transcript_path.exists() {
                shadowed.push(session.clone());
            }
        }
        (active, shadowed)
    }

    /// Active sessions not present in the archive.
    pub fn active_sessions(&self) -> Vec<Session> {
        let (active, shadowed) = self.partition();
        let mut reported = self.reported_shadowed.lock();
        reported.retain(|id| shadowed.iter().any(|s| &s.id == id));
        for session in &shadowed {
            if reported.insert(session.id.clone()) {
                warn!(
                    session_id = %session.id,
                    key = %session.key,
                    path = %session.transcript_path.display(),
                    "live transcript is also archived; hidden from active sessions until one copy is removed"
                );
            }
        }
        active
    }

    /// Ids of live transcripts hidden because the index also lists them.
    #[cfg(test)]
    pub fn shadowed_sessions(&self) -> Vec<String> {
        self.partition().1.into_iter().map(|s| s.id).collect()
    }

    pub fn stats(&self) -> SessionStats {
        let active = self.active_sessions();
        let index = self.index();
        SessionStats::new(
            active.len(),
            active.iter().map(|s| s.size_bytes).sum(),
            index.sessions.len(),
            index.total_size,
        )
    }

    /// Move an active session into the archive.
    pub async fn archive(&self, ident: &str) -> Result<ArchivedSession, SessionError> {
        let id = self
            .catalog
            .get(ident)
            .map(|s| s.id)
            .ok_or_else(|| SessionError::NotFound(ident.to_string()))?;
        let _guard = self.locks.lock(&id).await;

        // Re-check under the lock: a concurrent archive may have won.
        let session = self
            .catalog
            .get(&id)
            .ok_or_else(|| SessionError::NotFound(ident.to_string()))?;

        let files = self.files.clone();
        let target = session.clone();
        let entry =
            tokio::task::spawn_blocking(move || files.archive_session(&target, now_millis())).await??;

        self.catalog.remove(&session.id).await;
        info!(
            session_id = %entry.session_id,
            key = %entry.key,
            original_size = entry.original_size,
            compressed_size = entry.compressed_size,
            "session archived"
        );
        Ok(entry)
    }

    /// Move an archived session back into the active catalog.
    pub async fn restore(&self, ident: &str) -> Result<ArchivedSession, SessionError> {
        let id = self
            .get(ident)
            .map(|e| e.session_id)
            .ok_or_else(|| SessionError::NotFound(ident.to_string()))?;
        let _guard = self.locks.lock(&id).await;

        let entry = self
            .get(&id)
            .ok_or_else(|| SessionError::NotFound(ident.to_string()))?;
        let root = self.catalog.config().root_for(&entry.agent_id);

        let files = self.files.clone();
        let (target, target_root) = (entry.clone(), root.clone());
        let restored =
            match tokio::task::spawn_blocking(move || files.restore_transcript(&target, &target_root)).await? {
                Ok(path) => path,
                Err(SessionError::AlreadyExists(id)) => {
                    warn!(session_id = %id, dir = %root.dir.display(), "restore target already has a live transcript");
                    return Err(SessionError::AlreadyExists(id));
                }
                Err(e) => return Err(e),
            };

        if self
            .catalog
            .upsert_transcript(root.clone(), restored.clone())
            .await
            .is_none()
        {
            warn!(session_id = %entry.session_id, "restored transcript not yet visible in catalog");
        }

        let files = self.files.clone();
        let target = entry.clone();
        let forgotten = tokio::task::spawn_blocking(move || files.forget(&target)).await?;
        if let Err(e) = forgotten {
            warn!(session_id = %entry.session_id, error = %e, "restore failed, rolling back");
            let files = self.files.clone();
            let target = entry.clone();
            tokio::task::spawn_blocking(move || files.unrestore(&target, &root, &restored)).await?;
            self.catalog.remove(&entry.session_id).await;
            return Err(e);
        }

        self.catalog.refresh().await;
        info!(session_id = %entry.session_id, key = %entry.key, "session restored");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::catalog::CatalogConfig;
    use serde_json::Value;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        sessions: PathBuf,
        store: ArchiveStore,
    }

    fn transcript_body(id: &str) -> String {
        let lines = [
            json!({"type": "session", "id": id, "timestamp": "2026-01-05T10:00:00Z"}),
            json!({"type": "message", "timestamp": "2026-01-05T10:00:01Z",
                   "message": {"role": "user", "content": "check the disks"}}),
            json!({"type": "message", "timestamp": "2026-01-05T10:00:09Z",
                   "message": {"role": "assistant", "content": [{"type": "text", "text": "Disks are fine."}],
                               "usage": {"totalTokens": 4200}, "stopReason": "stop"}}),
        ];
        lines.iter().map(|l| format!("{l}\n")).collect()
    }

    async fn fixture(ids: &[&str]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let sessions = dir.path().join("sessions");
        fs::create_dir_all(&sessions).unwrap();
        let mut meta = serde_json::Map::new();
        for id in ids {
            fs::write(sessions.join(format!("{id}.jsonl")), transcript_body(id)).unwrap();
            meta.insert(
                format!("agent:main:subagent:ops-{id}"),
                json!({"sessionId": id, "label": format!("ops-{id}"), "channel": "webchat", "custom": true}),
            );
        }
        fs::write(sessions.join("sessions.json"), Value::Object(meta).to_string()).unwrap();

        let catalog = Arc::new(SessionCatalog::new(CatalogConfig::new(&sessions)));
        catalog.refresh().await;
        let store = ArchiveStore::open(sessions.join("archive"), catalog).unwrap();
        Fixture {
            _dir: dir,
            sessions,
            store,
        }
    }

    fn persisted_fields(s: &Session) -> (String, String, Option<String>, Option<String>, i64, u64, u64, Option<String>, SessionStatus) {
        (
            s.id.clone(),
            s.key.clone(),
            s.label.clone(),
            s.agent_name.clone(),
            s.updated_at,
            s.size_bytes,
            s.total_tokens,
            s.task.clone(),
            s.status,
        )
    }

    #[tokio::test]
    async fn test_archive_moves_session() {
        let f = fixture(&["a1", "a2"]).await;
        let entry = f.store.archive("agent:main:subagent:ops-a1").await.unwrap();

        assert_eq!(entry.session_id, "a1");
        assert!(entry.compressed_size > 0);
        assert_eq!(entry.original_size, transcript_body("a1").len() as u64);
        assert!(!f.sessions.join("a1.jsonl").exists());
        assert!(f.store.dir().join("a1.jsonl.gz").exists());

        assert!(f.store.catalog().get("a1").is_none());
        let active: Vec<String> = f.store.active_sessions().into_iter().map(|s| s.id).collect();
        assert_eq!(active, vec!["a2"]);
        assert_eq!(f.store.list().len(), 1);

        let on_disk: ArchiveIndex =
            serde_json::from_str(&fs::read_to_string(f.store.dir().join(INDEX_FILE)).unwrap()).unwrap();
        assert_eq!(on_disk.sessions.len(), 1);
        assert_eq!(on_disk.total_size, entry.compressed_size);

        let meta = MetadataIndex::load(&f.sessions);
        assert!(meta.get("agent:main:subagent:ops-a1").is_none());
        assert!(meta.get("agent:main:subagent:ops-a2").is_some());
    }

    #[tokio::test]
    async fn test_archive_then_restore_round_trip() {
        let f = fixture(&["r1"]).await;
        let before = f.store.catalog().get("r1").unwrap();

        f.store.archive("r1").await.unwrap();
        let history = f.store.history("agent:main:subagent:ops-r1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "Disks are fine.");

        f.store.restore("r1").await.unwrap();
        let after = f.store.catalog().get("r1").unwrap();
        assert_eq!(persisted_fields(&before), persisted_fields(&after));
        assert!(f.store.list().is_empty());
        assert!(!f.store.dir().join("r1.jsonl.gz").exists());

        let meta = MetadataIndex::load(&f.sessions);
        let restored = meta.get("agent:main:subagent:ops-r1").unwrap();
        assert_eq!(restored.extra["custom"], json!(true));
        assert!(restored.extra.contains_key("restoredAt"));
    }

    #[tokio::test]
    async fn test_unknown_keys_are_not_found() {
        let f = fixture(&["x"]).await;
        assert!(matches!(f.store.archive("nope").await, Err(SessionError::NotFound(_))));
        assert!(matches!(f.store.restore("x").await, Err(SessionError::NotFound(_))));
        assert!(matches!(f.store.history("x"), Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_archive_of_one_key() {
        let f = fixture(&["c1"]).await;
        let (a, b) = tokio::join!(f.store.archive("c1"), f.store.archive("c1"));
        let outcomes = [a.is_ok(), b.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        let err = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(err, SessionError::NotFound(_)));
        assert_eq!(f.store.list().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_transcript_is_not_found_and_leaves_no_artifact() {
        let f = fixture(&["gone"]).await;
        fs::remove_file(f.sessions.join("gone.jsonl")).unwrap();
        let err = f.store.archive("gone").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        assert!(f.store.list().is_empty());
        assert!(!f.store.dir().join("gone.jsonl.gz").exists());
    }

    #[tokio::test]
    async fn test_restore_refuses_to_overwrite_live_transcript() {
        let f = fixture(&["dup"]).await;
        f.store.archive("dup").await.unwrap();
        fs::write(f.sessions.join("dup.jsonl"), transcript_body("dup")).unwrap();

        let err = f.store.restore("dup").await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)));
        assert_eq!(f.store.list().len(), 1, "index entry kept");
    }

    #[tokio::test]
    async fn test_live_transcript_matching_archive_entry_is_shadowed() {
        let f = fixture(&["dup", "other"]).await;
        f.store.archive("dup").await.unwrap();
        assert!(f.store.shadowed_sessions().is_empty());

        fs::write(f.sessions.join("dup.jsonl"), transcript_body("dup")).unwrap();
        f.store.catalog().refresh().await;

        let active: Vec<String> = f.store.active_sessions().into_iter().map(|s| s.id).collect();
        assert_eq!(active, vec!["other"]);
        assert_eq!(f.store.shadowed_sessions(), vec!["dup".to_string()]);
        assert!(matches!(
            f.store.restore("dup").await,
            Err(SessionError::AlreadyExists(_))
        ));

        fs::remove_file(f.sessions.join("dup.jsonl")).unwrap();
        f.store.catalog().refresh().await;
        assert!(f.store.shadowed_sessions().is_empty());
        assert_eq!(f.store.list().len(), 1);
    }

    #[tokio::test]
    async fn test_index_written_by_another_store_is_visible() {
        let f = fixture(&["x1", "x2"]).await;
        assert!(f.store.list().is_empty());

        let other_catalog = Arc::new(SessionCatalog::new(CatalogConfig::new(&f.sessions)));
        other_catalog.refresh().await;
        let other = ArchiveStore::open(f.store.dir(), other_catalog).unwrap();
        other.archive("x1").await.unwrap();

        f.store.catalog().refresh().await;
        let active: Vec<String> = f.store.active_sessions().into_iter().map(|s| s.id).collect();
        assert_eq!(active, vec!["x2"]);
        let archived: Vec<String> = f.store.list().into_iter().map(|e| e.session_id).collect();
        assert_eq!(archived, vec!["x1"]);
        assert_eq!(f.store.stats().archived_count, 1);
        assert_eq!(f.store.history("x1").unwrap().len(), 2);

        f.store.restore("agent:main:subagent:ops-x1").await.unwrap();
        assert!(other.list().is_empty());
        assert!(f.store.catalog().get("x1").is_some());
    }

    #[tokio::test]
    async fn test_failed_restore_rolls_back_transcript_and_metadata() {
        let f = fixture(&["rb"]).await;
        f.store.archive("rb").await.unwrap();

        // A directory where the index file belongs makes the index rewrite fail.
        let index_path = f.store.dir().join(INDEX_FILE);
        fs::remove_file(&index_path).unwrap();
        fs::create_dir(&index_path).unwrap();

        let err = f.store.restore("agent:main:subagent:ops-rb").await.unwrap_err();
        assert!(matches!(err, SessionError::Io(_)));
        assert!(!f.sessions.join("rb.jsonl").exists());
        assert!(MetadataIndex::load(&f.sessions)
            .get("agent:main:subagent:ops-rb")
            .is_none());
        assert!(f.store.catalog().get("rb").is_none());
        assert!(f.store.dir().join("rb.jsonl.gz").exists());
        assert_eq!(f.store.list().len(), 1, "archived copy kept");
    }

    #[tokio::test]
    async fn test_index_rebuilt_from_artifacts() {
        let f = fixture(&["k1"]).await;
        f.store.archive("k1").await.unwrap();
        fs::write(f.store.dir().join(INDEX_FILE), "{ not json").unwrap();

        let reopened = ArchiveStore::open(f.store.dir(), f.store.catalog().clone()).unwrap();
        let entry = reopened.get("k1").unwrap();
        assert_eq!(entry.task.as_deref(), Some("check the disks"));
        assert_eq!(entry.total_tokens, 4200);
        assert!(reopened.history("k1").is_ok());
    }

    #[tokio::test]
    async fn test_stats_count_both_sides() {
        let f = fixture(&["s1", "s2", "s3"]).await;
        f.store.archive("s2").await.unwrap();
        let stats = f.store.stats();
        assert_eq!(stats.active_count, 2);
        assert_eq!(stats.archived_count, 1);
        assert_eq!(stats.archived_size_bytes, f.store.index().total_size);
    }
}
