//! Filter, sort and paginate session listings.
//!
//! Everything here is a pure function of its inputs: records are borrowed,
//! never mutated, and the same input always yields the same output.

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use super::archive::ArchivedSession;
use super::model::{Session, SessionStatus};

/// Fields the query layer needs from a listing record.
pub trait QueryRecord {
    fn record_id(&self) -> &str;
    fn record_key(&self) -> &str;
    fn label(&self) -> Option<&str>;
    fn task(&self) -> Option<&str>;
    fn agent(&self) -> Option<&str>;
    fn node(&self) -> Option<&str>;
    fn channel(&self) -> Option<&str>;
    fn status(&self) -> Option<SessionStatus>;
    fn started_at(&self) -> i64;
    fn updated_at(&self) -> i64;
    fn archived_at(&self) -> Option<i64> {
        None
    }
    fn size_bytes(&self) -> u64;
    fn total_tokens(&self) -> u64;
    fn usage_pct(&self) -> f64;
}

impl QueryRecord for Session {
    fn record_id(&self) -> &str {
        &self.id
    }
    fn record_key(&self) -> &str {
        &self.key
    }
    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
    fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }
    fn agent(&self) -> Option<&str> {
        self.agent_name.as_deref()
    }
    fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }
    fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }
    fn status(&self) -> Option<SessionStatus> {
        Some(self.status)
    }
    fn started_at(&self) -> i64 {
        self.started_at
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
    fn total_tokens(&self) -> u64 {
        self.total_tokens
    }
    fn usage_pct(&self) -> f64 {
        self.usage_pct
    }
}

impl QueryRecord for ArchivedSession {
    fn record_id(&self) -> &str {
        &self.session_id
    }
    fn record_key(&self) -> &str {
        &self.key
    }
    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
    fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }
    fn agent(&self) -> Option<&str> {
        self.agent_name.as_deref()
    }
    fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }
    fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }
    fn status(&self) -> Option<SessionStatus> {
        self.status
    }
    fn started_at(&self) -> i64 {
        self.started_at
    }
    fn updated_at(&self) -> i64 {
        self.updated_at
    }
    fn archived_at(&self) -> Option<i64> {
        Some(self.archived_at)
    }
    fn size_bytes(&self) -> u64 {
        self.original_size
    }
    fn total_tokens(&self) -> u64 {
        self.total_tokens
    }
    fn usage_pct(&self) -> f64 {
        super::model::usage_pct(self.total_tokens, self.context_tokens)
    }
}

/// Criteria combined with AND. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub agent: Option<String>,
    pub node: Option<String>,
    pub status: Option<SessionStatus>,
    /// Inclusive lower bound on `updatedAt`, epoch ms.
    pub from: Option<i64>,
    /// Inclusive upper bound on `updatedAt`, epoch ms.
    pub to: Option<i64>,
    pub search: Option<String>,
}

impl SessionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_range(mut self, from: Option<i64>, to: Option<i64>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn matches<R: QueryRecord>(&self, record: &R) -> bool {
        if let Some(agent) = non_empty(&self.agent) {
            if !eq_fold(record.agent(), agent) {
                return false;
            }
        }
        if let Some(node) = non_empty(&self.node) {
            if !eq_fold(record.node(), node) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status() != Some(status) {
                return false;
            }
        }
        if self.from.is_some_and(|from| record.updated_at() < from) {
            return false;
        }
        if self.to.is_some_and(|to| record.updated_at() > to) {
            return false;
        }
        if let Some(needle) = non_empty(&self.search) {
            let needle = needle.to_lowercase();
            let hit = [
                record.label(),
                record.task(),
                Some(record.record_id()),
                Some(record.record_key()),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(&needle));
            if !hit {
                return false;
            }
        }
        true
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn eq_fold(value: Option<&str>, wanted: &str) -> bool {
    value.is_some_and(|v| v.to_lowercase() == wanted.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortColumn {
    #[default]
    UpdatedAt,
    StartedAt,
    ArchivedAt,
    Label,
    Agent,
    Node,
    Channel,
    Status,
    Size,
    Tokens,
    Usage,
    Id,
}

impl SortColumn {
    pub fn parse(s: &str) -> Option<Self> {
        let col = match s.trim().to_ascii_lowercase().as_str() {
            "updatedat" | "updated" | "lastactive" | "age" => SortColumn::UpdatedAt,
            "startedat" | "started" => SortColumn::StartedAt,
            "archivedat" | "archived" => SortColumn::ArchivedAt,
            "label" | "name" => SortColumn::Label,
            "agent" | "agentname" => SortColumn::Agent,
            "node" => SortColumn::Node,
            "channel" => SortColumn::Channel,
            "status" => SortColumn::Status,
            "size" | "sizebytes" => SortColumn::Size,
            "tokens" | "totaltokens" => SortColumn::Tokens,
            "usage" | "usagepct" => SortColumn::Usage,
            "id" | "key" => SortColumn::Id,
            _ => return None,
        };
        Some(col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(SortDirection::Asc),
            "desc" | "descending" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

/// Case-folded comparison with a raw tie-break so equal-ignoring-case
/// strings still order deterministically. Missing values sort last.
fn compare_text(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a
            .to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_by<R: QueryRecord>(a: &R, b: &R, column: SortColumn) -> Ordering {
    match column {
        SortColumn::UpdatedAt => a.updated_at().cmp(&b.updated_at()),
        SortColumn::StartedAt => a.started_at().cmp(&b.started_at()),
        SortColumn::ArchivedAt => a.archived_at().cmp(&b.archived_at()),
        SortColumn::Label => compare_text(a.label(), b.label()),
        SortColumn::Agent => compare_text(a.agent(), b.agent()),
        SortColumn::Node => compare_text(a.node(), b.node()),
        SortColumn::Channel => compare_text(a.channel(), b.channel()),
        SortColumn::Status => compare_text(
            a.status().map(SessionStatus::as_str),
            b.status().map(SessionStatus::as_str),
        ),
        SortColumn::Size => a.size_bytes().cmp(&b.size_bytes()),
        SortColumn::Tokens => a.total_tokens().cmp(&b.total_tokens()),
        SortColumn::Usage => a.usage_pct().total_cmp(&b.usage_pct()),
        SortColumn::Id => compare_text(Some(a.record_id()), Some(b.record_id())),
    }
}

pub fn filter_records<R: QueryRecord + Clone>(records: &[R], filter: &SessionFilter) -> Vec<R> {
    records.iter().filter(|r| filter.matches(*r)).cloned().collect()
}

/// Stable sort into a new vector.
pub fn sort_records<R: QueryRecord + Clone>(
    records: &[R],
    column: SortColumn,
    direction: SortDirection,
) -> Vec<R> {
    let mut out = records.to_vec();
    out.sort_by(|a, b| {
        let ord = compare_by(a, b, column);
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<R> {
    pub items: Vec<R>,
    pub pagination: Pagination,
}

/// Slice out one 1-indexed page. Out-of-range pages are clamped.
pub fn paginate<R: Clone>(records: &[R], page: i64, page_size: usize) -> Page<R> {
    let page_size = page_size.max(1);
    let total_items = records.len();
    let total_pages = total_items.div_ceil(page_size).max(1);
    let page = page.clamp(1, total_pages as i64) as usize;
    let start = (page - 1) * page_size;
    let items = records.iter().skip(start).take(page_size).cloned().collect();
    Page {
        items,
        pagination: Pagination {
            page,
            page_size,
            total_items,
            total_pages,
        },
    }
}

/// A complete listing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionQuery {
    pub filter: SessionFilter,
    pub sort: SortColumn,
    pub direction: SortDirection,
    /// `None` returns every matching record.
    pub page: Option<i64>,
    pub page_size: Option<usize>,
}

/// filter → sort → (optional) paginate.
pub fn run_query<R: QueryRecord + Clone>(
    records: &[R],
    query: &SessionQuery,
    default_page_size: usize,
) -> (Vec<R>, Option<Pagination>) {
    let filtered = filter_records(records, &query.filter);
    let sorted = sort_records(&filtered, query.sort, query.direction);
    if query.page.is_none() && query.page_size.is_none() {
        return (sorted, None);
    }
    let page = paginate(
        &sorted,
        query.page.unwrap_or(1),
        query.page_size.unwrap_or(default_page_size),
    );
    (page.items, Some(page.pagination))
}

/// Parse a date bound: epoch ms, RFC 3339, or `YYYY-MM-DD` (start of day for
/// lower bounds, end of day for upper bounds, UTC).
pub fn parse_date_bound(raw: &str, end_of_day: bool) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?
    } else {
        NaiveTime::MIN
    };
    Some(Utc.from_utc_datetime(&date.and_time(time)).timestamp_millis())
}
