//! Transcript reader.
//!
//! Agents append one JSON object per line to `<sessionId>.jsonl`. A line has a
//! `type` (`session`, `message`, `model_change`, ...) and, for messages, a
//! nested `message` object carrying `role`, `content`, `usage` and the stop
//! reason of assistant turns.
//!
//! The reader is tolerant: a malformed trailing line (an append in progress)
//! is dropped, malformed lines in the middle are skipped and counted, and
//! missing optional fields fall back to defaults. Only an unreadable file or a
//! corrupted first line is reported as a [`ParseError`].

use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{Map, Value};

/// Maximum number of characters kept for the task preview.
pub const TASK_MAX_CHARS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("transcript unreadable: {0}")]
    Unreadable(#[from] io::Error),
    #[error("transcript malformed at line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// One rendered conversation entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub role: String,
    pub content: String,
    pub timestamp: Option<Value>,
}

/// Final assistant output of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptResult {
    pub content: String,
    pub timestamp: Option<Value>,
}

/// Terminal state recorded by the agent itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalMarker {
    Done,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptMetrics {
    /// Token total reported by the most recent assistant turn.
    pub total_tokens: u64,
    pub size_bytes: u64,
    /// File modification time, epoch ms.
    pub last_modified: Option<i64>,
    /// File creation time, epoch ms, where the filesystem records it.
    pub created_at: Option<i64>,
}

/// Normalized view of one transcript file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    /// Leading `type: "session"` record, if the agent wrote one.
    pub header: Option<Value>,
    pub entries: Vec<TranscriptEntry>,
    pub metrics: TranscriptMetrics,
    pub task: Option<String>,
    pub result: Option<TranscriptResult>,
    pub model: Option<String>,
    pub terminal: Option<TerminalMarker>,
    pub first_timestamp: Option<i64>,
    /// Lines skipped because they were not valid JSON objects.
    pub dropped_lines: usize,
}

/// Read and parse a transcript file, filling in filesystem metrics.
pub fn read_transcript(path: &Path) -> Result<Transcript, ParseError> {
    let meta = fs::metadata(path)?;
    let bytes = fs::read(path)?;
    let mut transcript = parse_transcript(&bytes)?;
    transcript.metrics.size_bytes = meta.len();
    transcript.metrics.last_modified = meta.modified().ok().map(system_time_millis);
    transcript.metrics.created_at = meta.created().ok().map(system_time_millis);
    Ok(transcript)
}

/// Parse a transcript from any reader (e.g. a gzip decoder over an archive
/// artifact). `size_bytes` is the number of uncompressed bytes read.
pub fn read_transcript_from<R: Read>(mut reader: R) -> Result<Transcript, ParseError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let mut transcript = parse_transcript(&bytes)?;
    transcript.metrics.size_bytes = bytes.len() as u64;
    Ok(transcript)
}

/// Read a gzip-compressed transcript artifact.
pub fn read_compressed_transcript(path: &Path) -> Result<Transcript, ParseError> {
    let file = fs::File::open(path)?;
    let mut transcript = read_transcript_from(flate2::read::GzDecoder::new(file))?;
    if let Ok(meta) = fs::metadata(path) {
        transcript.metrics.last_modified = meta.modified().ok().map(system_time_millis);
    }
    Ok(transcript)
}

/// Parse raw JSONL bytes.
pub fn parse_transcript(bytes: &[u8]) -> Result<Transcript, ParseError> {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    let mut builder = TranscriptBuilder::default();
    for (pos, (index, line)) in lines.iter().enumerate() {
        let reason = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(record)) => {
                builder.push(record);
                continue;
            }
            Ok(_) => "expected a JSON object".to_string(),
            Err(e) => e.to_string(),
        };
        // A broken first line followed by more data means this is not a
        // transcript at all. A lone broken line is an append in progress.
        if pos == 0 && lines.len() > 1 {
            return Err(ParseError::Malformed {
                line: index + 1,
                reason,
            });
        }
        builder.transcript.dropped_lines += 1;
    }

    Ok(builder.transcript)
}

#[derive(Default)]
struct TranscriptBuilder {
    transcript: Transcript,
}

impl TranscriptBuilder {
    fn push(&mut self, record: Map<String, Value>) {
        let t = &mut self.transcript;
        let timestamp = record.get("timestamp").cloned();

        if t.first_timestamp.is_none() {
            t.first_timestamp = timestamp.as_ref().and_then(timestamp_millis);
        }

        let kind = str_field(&record, &["type"]).unwrap_or_default();
        match kind.as_str() {
            "session" => {
                if t.header.is_none() {
                    t.header = Some(Value::Object(record));
                }
            }
            "model_change" => {
                if let Some(model) = str_field(&record, &["modelId", "model"]) {
                    t.model = Some(model);
                }
            }
            "message" => {
                if let Some(Value::Object(message)) = record.get("message") {
                    let timestamp = timestamp.or_else(|| message.get("timestamp").cloned());
                    self.push_message(message, timestamp);
                }
            }
            _ => {}
        }
    }

    fn push_message(&mut self, message: &Map<String, Value>, timestamp: Option<Value>) {
        let t = &mut self.transcript;
        let role = message
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let content = message.get("content").unwrap_or(&Value::Null);

        match role.as_str() {
            "user" => {
                // A new user turn re-opens a run that had stopped.
                t.terminal = None;
                if t.task.is_none() {
                    let text = extract_text(content, false);
                    let text = text.trim();
                    if !text.is_empty() {
                        t.task = Some(truncate_chars(text, TASK_MAX_CHARS));
                    }
                }
            }
            "assistant" => {
                if let Some(tokens) = message.get("usage").and_then(usage_total) {
                    t.metrics.total_tokens = tokens;
                }
                if let Some(model) = str_field(message, &["model"]) {
                    t.model = Some(model);
                }
                t.terminal = stop_marker(message);
                let text = extract_text(content, false);
                if !text.trim().is_empty() {
                    t.result = Some(TranscriptResult {
                        content: text,
                        timestamp: timestamp.clone(),
                    });
                }
            }
            _ => {}
        }

        if role == "toolResult" || role.is_empty() {
            return;
        }
        let rendered = extract_text(content, true);
        if rendered.trim().is_empty() {
            return;
        }
        t.entries.push(TranscriptEntry {
            role,
            content: rendered,
            timestamp,
        });
    }
}

/// Flatten message content to text.
///
/// Content is either a plain string or a list of parts. Text parts are kept,
/// tool calls become `[Called: <name>]` when `include_tool_calls` is set, and
/// thinking blocks are dropped.
pub fn extract_text(content: &Value, include_tool_calls: bool) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => {
            let mut pieces: Vec<String> = Vec::new();
            for part in parts {
                match part {
                    Value::String(s) => pieces.push(s.clone()),
                    Value::Object(obj) => match obj.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            if let Some(text) = obj.get("text").and_then(Value::as_str) {
                                pieces.push(text.to_string());
                            }
                        }
                        Some("toolCall") | Some("tool_use") | Some("toolUse")
                            if include_tool_calls =>
                        {
                            let name = obj
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or("tool");
                            pieces.push(format!("[Called: {name}]"));
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }
            pieces.join("\n")
        }
        _ => String::new(),
    }
}

fn usage_total(usage: &Value) -> Option<u64> {
    let usage = usage.as_object()?;
    for key in ["totalTokens", "total_tokens", "total"] {
        if let Some(total) = usage.get(key).and_then(Value::as_u64) {
            return Some(total);
        }
    }
    let sum: u64 = [
        "input",
        "output",
        "cacheRead",
        "cacheWrite",
        "input_tokens",
        "output_tokens",
    ]
    .iter()
    .filter_map(|key| usage.get(*key).and_then(Value::as_u64))
    .sum();
    (sum > 0).then_some(sum)
}

fn stop_marker(message: &Map<String, Value>) -> Option<TerminalMarker> {
    let has_error = message
        .get("errorMessage")
        .is_some_and(|v| !v.is_null() && v.as_str() != Some(""));
    if has_error {
        return Some(TerminalMarker::Failed);
    }
    match str_field(message, &["stopReason", "stop_reason"]).as_deref() {
        Some("stop") | Some("end_turn") | Some("endTurn") | Some("done") => {
            Some(TerminalMarker::Done)
        }
        Some("error") | Some("aborted") | Some("cancelled") => Some(TerminalMarker::Failed),
        _ => None,
    }
}

fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Convert a transcript timestamp (RFC 3339 string or epoch number) to epoch ms.
pub fn timestamp_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            // Values this small are epoch seconds.
            Some(if raw.abs() < 10_000_000_000 { raw * 1000 } else { raw })
        }
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis())
            .or_else(|| s.parse::<i64>().ok()),
        _ => None,
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

pub fn system_time_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
