//! Session records as served to clients.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Context window assumed when neither metadata nor config say otherwise.
pub const DEFAULT_CONTEXT_TOKENS: u64 = 200_000;

/// Run state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Done,
    Failed,
    Pending,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Done => "done",
            SessionStatus::Failed => "failed",
            SessionStatus::Pending => "pending",
        }
    }

    /// Parse a client-supplied status filter.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Some(SessionStatus::Running),
            "done" => Some(SessionStatus::Done),
            "failed" => Some(SessionStatus::Failed),
            "pending" => Some(SessionStatus::Pending),
            _ => None,
        }
    }

    /// Map a status string written by the agent runtime to a terminal state.
    pub fn from_runtime(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "done" | "completed" | "complete" | "success" | "finished" => Some(SessionStatus::Done),
            "failed" | "error" | "crashed" | "aborted" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One active session with its derived metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub key: String,
    pub label: Option<String>,
    pub agent_name: Option<String>,
    pub status: SessionStatus,
    pub started_at: i64,
    pub updated_at: i64,
    pub age_ms: i64,
    pub channel: Option<String>,
    pub model: Option<String>,
    pub total_tokens: u64,
    pub context_tokens: u64,
    pub usage_pct: f64,
    pub node: Option<String>,
    pub size_bytes: u64,
    pub size_formatted: String,
    pub task: Option<String>,
    /// Why the transcript could not be read, for degraded records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Agent directory the transcript lives in.
    #[serde(skip)]
    pub agent_id: String,
    #[serde(skip)]
    pub transcript_path: PathBuf,
}

/// Totals shown above the session table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub active_count: usize,
    pub active_size_bytes: u64,
    pub active_size_formatted: String,
    pub archived_count: usize,
    pub archived_size_bytes: u64,
    pub archived_size_formatted: String,
}

impl SessionStats {
    pub fn new(active_count: usize, active_size: u64, archived_count: usize, archived_size: u64) -> Self {
        Self {
            active_count,
            active_size_bytes: active_size,
            active_size_formatted: format_size(active_size),
            archived_count,
            archived_size_bytes: archived_size,
            archived_size_formatted: format_size(archived_size),
        }
    }
}

/// Percentage of the context window in use, rounded to one decimal.
pub fn usage_pct(total_tokens: u64, context_tokens: u64) -> f64 {
    if context_tokens == 0 {
        return 0.0;
    }
    let pct = total_tokens as f64 / context_tokens as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

/// `512 B`, `1.5 KB`, `3.2 MB`, `1.1 GB`.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else {
        format!("{:.1} GB", b / (KB * KB * KB))
    }
}
