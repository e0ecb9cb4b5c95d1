//! Human-friendly labels, agent names and node names derived from session
//! keys and metadata.
//!
//! Session keys look like `agent:<agentId>:<kind>:<rest>`, e.g.
//! `agent:main:signal:dm:+15551234567` or `agent:main:subagent:ops-fix-dns`.

use std::sync::LazyLock;

use regex::Regex;

use super::metadata::SessionMeta;

const CHAT_CHANNELS: [&str; 5] = ["signal", "discord", "telegram", "whatsapp", "slack"];

static MINI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:mac\s*)?mini[- ]?(\d+)").unwrap());
static HASHLIKE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9]{20,}$").unwrap());

/// Label and agent name resolved for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub label: Option<String>,
    pub agent_name: Option<String>,
}

/// Resolve the display label and owning agent for a session key.
///
/// `dir_agent` is the agent directory the transcript was found under and is
/// used when nothing more specific can be derived from the key.
pub fn describe_session(
    key: &str,
    meta: Option<&SessionMeta>,
    dir_agent: &str,
    main_agent_name: &str,
) -> SessionDescriptor {
    let empty = SessionMeta::default();
    let meta = meta.unwrap_or(&empty);
    let stored_label = meta
        .label
        .clone()
        .or_else(|| meta.display_name.clone())
        .filter(|l| !l.is_empty());
    let key_agent = key.split(':').nth(1).filter(|s| !s.is_empty());

    let mut agent_name: Option<String> = None;
    let label: Option<String>;

    if let Some(rest) = split_after(key, ":spawn:").or_else(|| split_after(key, ":subagent:")) {
        let chosen = match meta.label.as_deref() {
            Some(l) if !l.is_empty() && !l.starts_with("agent:") => l,
            _ => rest,
        };
        agent_name = Some(first_dash_segment(chosen));
        label = Some(chosen.to_string());
    } else if key.contains(":cron:") {
        agent_name = Some("cron".to_string());
        label = Some(match meta.label.as_deref() {
            Some(l) if !l.is_empty() && !l.starts_with("agent:") => format!("Cron: {l}"),
            _ => "Cron Job".to_string(),
        });
    } else if key == "agent:main:main" {
        agent_name = Some("main".to_string());
        label = Some(format!("{main_agent_name} (main)"));
    } else if CHAT_CHANNELS
        .iter()
        .any(|c| key.contains(&format!(":{c}:")))
    {
        label = Some(friendly_label(key, meta));
        if key_agent == Some("main") {
            agent_name = Some("main".to_string());
        }
    } else {
        label = stored_label.or_else(|| Some(friendly_label(key, meta)));
    }

    if agent_name.is_none() {
        agent_name = key_agent
            .filter(|a| *a != "main")
            .or(Some(dir_agent))
            .filter(|a| !a.is_empty())
            .map(str::to_lowercase);
    }

    SessionDescriptor {
        label: label.filter(|l| !l.is_empty()),
        agent_name,
    }
}

fn split_after<'a>(key: &'a str, marker: &str) -> Option<&'a str> {
    key.split_once(marker)
        .map(|(_, rest)| rest)
        .filter(|rest| !rest.is_empty())
}

fn first_dash_segment(s: &str) -> String {
    s.split('-').next().unwrap_or(s).to_lowercase()
}

/// Build a readable label for chat-platform sessions.
pub fn friendly_label(key: &str, meta: &SessionMeta) -> String {
    if let Some(existing) = meta.label.as_deref() {
        if !existing.is_empty() && !existing.starts_with("agent:") && !existing.starts_with("signal:")
        {
            return existing.to_string();
        }
    }

    let channel = meta
        .channel
        .as_deref()
        .or(meta.last_channel.as_deref())
        .unwrap_or_default();
    let on = |name: &str| key.contains(&format!(":{name}:")) || channel == name;

    if on("signal") {
        return signal_label(key, meta);
    }
    if on("discord") {
        return prefixed("Discord", meta.origin_str(&["label", "channelName"]), "Discord Chat");
    }
    if on("telegram") {
        return prefixed("Telegram", meta.origin_str(&["label", "chatTitle"]), "Telegram Chat");
    }
    if on("whatsapp") {
        return prefixed("WhatsApp", meta.origin_str(&["label", "from"]), "WhatsApp Chat");
    }
    if on("slack") {
        return prefixed("Slack", meta.origin_str(&["label", "channelName"]), "Slack Chat");
    }

    let parts: Vec<&str> = key.split(':').collect();
    if parts.len() > 2 {
        parts[2..].join(":")
    } else {
        key.to_string()
    }
}

fn prefixed(platform: &str, origin: Option<String>, fallback: &str) -> String {
    match origin {
        Some(label) => format!("{platform}: {label}"),
        None => fallback.to_string(),
    }
}

fn signal_label(key: &str, meta: &SessionMeta) -> String {
    let is_group = key.contains("group") || meta.chat_type.as_deref() == Some("group");
    if is_group {
        if let Some(group) = meta.origin_str(&["label", "groupName"]) {
            let group = match group.split_once(" id:") {
                Some((name, _)) => name.trim().to_string(),
                None => group,
            };
            let hashlike = HASHLIKE_RE.is_match(&group.to_lowercase());
            if !group.is_empty()
                && !group.starts_with("group:")
                && group.chars().count() < 30
                && !hashlike
            {
                return format!("Signal: {group}");
            }
        }
        if let Some(name) = meta
            .display_name
            .as_deref()
            .and_then(|d| d.strip_prefix("signal:g-"))
        {
            if name.starts_with("group-") {
                return "Signal Group Chat".to_string();
            }
            if name.chars().count() < 30 {
                return format!("Signal: {}", title_case(&name.replace('-', " ")));
            }
        }
        return "Signal Group Chat".to_string();
    }

    if let Some(origin) = meta.origin_str(&["label", "from"]) {
        if let Some(phone) = origin.strip_prefix("signal:") {
            return format!("Signal: {}", format_phone_number(phone));
        }
        if !origin.starts_with("group:") {
            return format!("Signal: {origin}");
        }
    }
    "Signal DM".to_string()
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format North American numbers as `+1 XXX XXX XXXX`.
pub fn format_phone_number(phone: &str) -> String {
    if phone.is_empty() {
        return String::new();
    }
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        return format!("+1 {} {} {}", &digits[1..4], &digits[4..7], &digits[7..]);
    }
    if digits.len() == 10 {
        return format!("+1 {} {} {}", &digits[..3], &digits[3..6], &digits[6..]);
    }
    if phone.starts_with('+') {
        format!("+{digits}")
    } else {
        phone.to_string()
    }
}

/// Friendly display name for a host, e.g. `Brians-Mac-mini-2.local` → `Mini 2`.
pub fn normalize_node_name(name: &str) -> String {
    if name.trim().is_empty() {
        return "Unknown".to_string();
    }
    let cleaned = name.replace(".local", "").replace(".attlocal.net", "");
    if let Some(caps) = MINI_RE.captures(&cleaned) {
        if let Some(n) = caps.get(1) {
            return format!("Mini {}", n.as_str());
        }
    }
    cleaned
}

/// Stable filter value for a node: normalized, lowercased, spaces as dashes.
pub fn node_value(name: &str) -> String {
    normalize_node_name(name).to_lowercase().replace(' ', "-")
}
