//! Session catalog.
//!
//! Scans every session root for `*.jsonl` transcripts, joins them with the
//! root's `sessions.json`, and publishes the result as an immutable
//! [`CatalogSnapshot`]. Readers load the current snapshot without locking;
//! a refresh builds a complete replacement off to the side and swaps it in.
//!
//! One unreadable or slow transcript never fails a refresh: it is published
//! as a degraded `failed` record carrying the error.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::labels::{describe_session, node_value};
use super::metadata::{MetadataIndex, SessionMeta};
use super::model::{format_size, usage_pct, Session, SessionStatus, DEFAULT_CONTEXT_TOKENS};
use super::now_millis;
use crate::transcript::{
    read_transcript, system_time_millis, ParseError, TerminalMarker, Transcript,
};

/// Activity window within which a session without a terminal marker counts
/// as running.
pub const DEFAULT_RUNNING_THRESHOLD: Duration = Duration::from_secs(60);

/// Per-session budget for reading one transcript during refresh.
pub const DEFAULT_PARSE_TIMEOUT: Duration = Duration::from_secs(5);

const REFRESH_PARALLELISM: usize = 8;

type TranscriptReader = fn(&Path) -> Result<Transcript, ParseError>;

/// A directory holding one agent's transcripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRoot {
    pub agent_id: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Primary sessions directory, owned by the `main` agent.
    pub sessions_dir: PathBuf,
    /// `<openclawHome>/agents`, scanned for `<agent>/sessions` directories.
    pub agents_dir: Option<PathBuf>,
    pub running_threshold: Duration,
    pub parse_timeout: Duration,
    pub main_agent_name: String,
    /// Hostname assigned to sessions whose metadata names no node.
    pub gateway_node: String,
    pub default_context_tokens: u64,
}

impl CatalogConfig {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            agents_dir: None,
            running_threshold: DEFAULT_RUNNING_THRESHOLD,
            parse_timeout: DEFAULT_PARSE_TIMEOUT,
            main_agent_name: "Main".to_string(),
            gateway_node: "gateway".to_string(),
            default_context_tokens: DEFAULT_CONTEXT_TOKENS,
        }
    }

    pub fn with_agents_dir(mut self, agents_dir: impl Into<PathBuf>) -> Self {
        self.agents_dir = Some(agents_dir.into());
        self
    }

    /// All session roots: the primary directory first, then every
    /// `<agents>/<agent>/sessions` directory in name order.
    pub fn discover_roots(&self) -> Vec<SessionRoot> {
        let mut roots = vec![SessionRoot {
            agent_id: "main".to_string(),
            dir: self.sessions_dir.clone(),
        }];
        let Some(agents_dir) = &self.agents_dir else {
            return roots;
        };
        let Ok(entries) = fs::read_dir(agents_dir) else {
            return roots;
        };
        let mut agents: Vec<(String, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let dir = entry.path().join("sessions");
                (!name.starts_with('.') && dir.is_dir()).then_some((name, dir))
            })
            .collect();
        agents.sort();
        for (agent_id, dir) in agents {
            if same_dir(&dir, &self.sessions_dir) {
                continue;
            }
            roots.push(SessionRoot { agent_id, dir });
        }
        roots
    }

    /// Root for an agent id, falling back to the primary directory.
    pub fn root_for(&self, agent_id: &str) -> SessionRoot {
        self.discover_roots()
            .into_iter()
            .find(|r| r.agent_id == agent_id)
            .unwrap_or_else(|| SessionRoot {
                agent_id: "main".to_string(),
                dir: self.sessions_dir.clone(),
            })
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Immutable view of all active sessions at one refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    /// Most recently updated first.
    pub sessions: Vec<Session>,
    pub refreshed_at: i64,
}

impl CatalogSnapshot {
    fn new(mut sessions: Vec<Session>, refreshed_at: i64) -> Self {
        sort_sessions(&mut sessions);
        Self {
            sessions,
            refreshed_at,
        }
    }

    /// Look a session up by id or key.
    pub fn get(&self, ident: &str) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| s.id == ident)
            .or_else(|| self.sessions.iter().find(|s| s.key == ident))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.sessions.iter().map(|s| s.size_bytes).sum()
    }
}

fn sort_sessions(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
}

/// A transcript found on disk, joined with its metadata entry.
#[derive(Debug, Clone)]
struct Candidate {
    root: SessionRoot,
    path: PathBuf,
    id: String,
    key: String,
    meta: Option<SessionMeta>,
    file_size: Option<u64>,
    file_mtime: Option<i64>,
}

pub struct SessionCatalog {
    config: Arc<CatalogConfig>,
    snapshot: ArcSwap<CatalogSnapshot>,
    /// Serializes publishers (refresh, upsert, remove). Readers never take it.
    publish_lock: AsyncMutex<()>,
}

impl SessionCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            config: Arc::new(config),
            snapshot: ArcSwap::from_pointee(CatalogSnapshot::default()),
            publish_lock: AsyncMutex::new(()),
        }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    /// Last published snapshot.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.snapshot.load_full()
    }

    pub fn get(&self, ident: &str) -> Option<Session> {
        self.snapshot.load().get(ident).cloned()
    }

    pub fn list(&self) -> Vec<Session> {
        self.snapshot.load().sessions.clone()
    }

    pub async fn refresh(&self) -> Arc<CatalogSnapshot> {
        self.refresh_at(now_millis()).await
    }

    /// Rebuild the catalog from disk as of `now` and publish it.
    pub async fn refresh_at(&self, now: i64) -> Arc<CatalogSnapshot> {
        let _publish = self.publish_lock.lock().await;

        let config = self.config.clone();
        let candidates = match tokio::task::spawn_blocking(move || scan_roots(&config)).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "session scan aborted, keeping previous snapshot");
                return self.snapshot.load_full();
            }
        };

        let sessions = load_all(self.config.clone(), candidates, now, read_transcript).await;

        let degraded = sessions.iter().filter(|s| s.error.is_some()).count();
        let snapshot = Arc::new(CatalogSnapshot::new(sessions, now));
        debug!(
            sessions = snapshot.len(),
            degraded,
            "session catalog refreshed"
        );
        self.snapshot.store(snapshot.clone());
        snapshot
    }

    /// Publish a snapshot without the session `id`. Returns whether it was
    /// present.
    pub async fn remove(&self, id: &str) -> bool {
        let _publish = self.publish_lock.lock().await;
        let current = self.snapshot.load_full();
        if !current.sessions.iter().any(|s| s.id == id) {
            return false;
        }
        let mut next = (*current).clone();
        next.sessions.retain(|s| s.id != id);
        self.snapshot.store(Arc::new(next));
        true
    }

    /// Read one transcript and publish it into the current snapshot,
    /// replacing any record with the same id.
    pub async fn upsert_transcript(&self, root: SessionRoot, path: PathBuf) -> Option<Session> {
        let _publish = self.publish_lock.lock().await;
        let now = now_millis();
        let candidate = tokio::task::spawn_blocking(move || candidate_for(&root, &path))
            .await
            .ok()
            .flatten()?;
        let session = load_candidate(self.config.clone(), candidate, now, read_transcript).await;

        let current = self.snapshot.load_full();
        let mut sessions: Vec<Session> = current
            .sessions
            .iter()
            .filter(|s| s.id != session.id)
            .cloned()
            .collect();
        sessions.push(session.clone());
        self.snapshot
            .store(Arc::new(CatalogSnapshot::new(sessions, current.refreshed_at)));
        info!(session_id = %session.id, "session published to catalog");
        Some(session)
    }
}

fn scan_roots(config: &CatalogConfig) -> Vec<Candidate> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for root in config.discover_roots() {
        let entries = match fs::read_dir(&root.dir) {
            Ok(entries) => entries,
            Err(e) => {
                if root.dir.exists() {
                    warn!(dir = %root.dir.display(), error = %e, "cannot list session root");
                }
                continue;
            }
        };
        let mut by_id = MetadataIndex::load(&root.dir).by_session_id();

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| is_transcript(p))
            .collect();
        files.sort();

        for path in files {
            let Some(id) = transcript_id(&path) else {
                continue;
            };
            if !seen.insert(id.clone()) {
                warn!(session_id = %id, dir = %root.dir.display(), "duplicate session id, keeping first");
                continue;
            }
            let (key, meta) = match by_id.remove(&id) {
                Some((key, meta)) => (key, Some(meta)),
                None => (id.clone(), None),
            };
            let fs_meta = fs::metadata(&path).ok();
            out.push(Candidate {
                root: root.clone(),
                id,
                key,
                meta,
                file_size: fs_meta.as_ref().map(|m| m.len()),
                file_mtime: fs_meta
                    .and_then(|m| m.modified().ok())
                    .map(system_time_millis),
                path,
            });
        }
    }
    out
}

fn candidate_for(root: &SessionRoot, path: &Path) -> Option<Candidate> {
    let id = transcript_id(path)?;
    let (key, meta) = match MetadataIndex::load(&root.dir).by_session_id().remove(&id) {
        Some((key, meta)) => (key, Some(meta)),
        None => (id.clone(), None),
    };
    let fs_meta = fs::metadata(path).ok()?;
    Some(Candidate {
        root: root.clone(),
        path: path.to_path_buf(),
        id,
        key,
        meta,
        file_size: Some(fs_meta.len()),
        file_mtime: fs_meta.modified().ok().map(system_time_millis),
    })
}

pub(crate) fn is_transcript(path: &Path) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "jsonl")
}

pub(crate) fn transcript_id(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
}

async fn load_all(
    config: Arc<CatalogConfig>,
    candidates: Vec<Candidate>,
    now: i64,
    reader: TranscriptReader,
) -> Vec<Session> {
    stream::iter(candidates)
        .map(|candidate| load_candidate(config.clone(), candidate, now, reader))
        .buffer_unordered(REFRESH_PARALLELISM)
        .collect()
        .await
}

async fn load_candidate(
    config: Arc<CatalogConfig>,
    candidate: Candidate,
    now: i64,
    reader: TranscriptReader,
) -> Session {
    let path = candidate.path.clone();
    let read = tokio::time::timeout(
        config.parse_timeout,
        tokio::task::spawn_blocking(move || reader(&path)),
    )
    .await;

    let outcome = match read {
        Ok(Ok(Ok(transcript))) => Ok(transcript),
        Ok(Ok(Err(e))) => Err(e.to_string()),
        Ok(Err(e)) => Err(format!("transcript reader failed: {e}")),
        Err(_) => Err(format!(
            "timed out after {}ms reading transcript",
            config.parse_timeout.as_millis()
        )),
    };
    if let Err(reason) = &outcome {
        warn!(session_id = %candidate.id, error = %reason, "publishing degraded session record");
    }
    build_session(&config, &candidate, outcome, now)
}

fn build_session(
    config: &CatalogConfig,
    candidate: &Candidate,
    transcript: Result<Transcript, String>,
    now: i64,
) -> Session {
    let meta = candidate.meta.as_ref();
    let desc = describe_session(
        &candidate.key,
        meta,
        &candidate.root.agent_id,
        &config.main_agent_name,
    );
    let raw_node = meta
        .and_then(|m| m.node.clone().or_else(|| m.hostname.clone()))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| config.gateway_node.clone());
    let context_tokens = meta
        .and_then(|m| m.context_tokens)
        .filter(|c| *c > 0)
        .unwrap_or(config.default_context_tokens);

    let mut session = Session {
        id: candidate.id.clone(),
        key: candidate.key.clone(),
        label: desc.label,
        agent_name: desc.agent_name,
        status: SessionStatus::Failed,
        started_at: 0,
        updated_at: 0,
        age_ms: 0,
        channel: meta.and_then(SessionMeta::channel_name),
        model: meta.and_then(|m| m.model.clone()),
        total_tokens: 0,
        context_tokens,
        usage_pct: 0.0,
        node: Some(node_value(&raw_node)),
        size_bytes: candidate.file_size.unwrap_or(0),
        size_formatted: String::new(),
        task: None,
        error: None,
        agent_id: candidate.root.agent_id.clone(),
        transcript_path: candidate.path.clone(),
    };

    match transcript {
        Ok(t) => {
            let updated_at = t
                .metrics
                .last_modified
                .or(candidate.file_mtime)
                .unwrap_or(now);
            session.updated_at = updated_at;
            session.started_at = t
                .first_timestamp
                .or(t.metrics.created_at)
                .unwrap_or(updated_at);
            session.size_bytes = t.metrics.size_bytes;
            session.total_tokens = meta
                .and_then(|m| m.total_tokens)
                .filter(|n| *n > 0)
                .unwrap_or(t.metrics.total_tokens);
            session.model = session.model.or(t.model);
            session.task = t.task;
            session.status = derive_status(
                t.terminal,
                meta.and_then(runtime_marker),
                updated_at,
                now,
                config.running_threshold,
            );
        }
        Err(reason) => {
            let updated_at = candidate.file_mtime.unwrap_or(now);
            session.updated_at = updated_at;
            session.started_at = updated_at;
            session.error = Some(reason);
        }
    }

    session.age_ms = (now - session.updated_at).max(0);
    session.usage_pct = usage_pct(session.total_tokens, session.context_tokens);
    session.size_formatted = format_size(session.size_bytes);
    session
}

fn runtime_marker(meta: &SessionMeta) -> Option<SessionStatus> {
    if meta.aborted_last_run == Some(true) {
        return Some(SessionStatus::Failed);
    }
    meta.status.as_deref().and_then(SessionStatus::from_runtime)
}

/// Status of a session at `now`.
///
/// A terminal marker in the transcript is final. Without one, recent
/// activity means running. The runtime's metadata lags the transcript, so its
/// marker only decides for idle sessions; idle sessions with no marker at all
/// are pending.
pub fn derive_status(
    transcript_marker: Option<TerminalMarker>,
    runtime_marker: Option<SessionStatus>,
    updated_at: i64,
    now: i64,
    running_threshold: Duration,
) -> SessionStatus {
    match transcript_marker {
        Some(TerminalMarker::Done) => return SessionStatus::Done,
        Some(TerminalMarker::Failed) => return SessionStatus::Failed,
        None => {}
    }
    if now - updated_at < running_threshold.as_millis() as i64 {
        return SessionStatus::Running;
    }
    runtime_marker.unwrap_or(SessionStatus::Pending)
}
