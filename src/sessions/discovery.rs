//! Agent and node lists offered as listing filters.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

use super::archive::ArchivedSession;
use super::catalog::SessionRoot;
use super::labels::{node_value, normalize_node_name};
use super::metadata::MetadataIndex;
use super::model::Session;

const ALL_AGENTS_EMOJI: &str = "🤖";
const CRON_EMOJI: &str = "⏰";

/// Display names and emojis for agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub main_agent_name: String,
    pub main_agent_emoji: String,
    /// Lowercase agent name → emoji. `default` applies to unlisted agents.
    pub agent_emojis: BTreeMap<String, String>,
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self {
            main_agent_name: "Main".to_string(),
            main_agent_emoji: "🏠".to_string(),
            agent_emojis: BTreeMap::new(),
        }
    }
}

impl AgentIdentity {
    fn emoji_for(&self, agent: &str, fallback: &str) -> String {
        self.agent_emojis
            .get(agent)
            .or_else(|| self.agent_emojis.get("default"))
            .cloned()
            .unwrap_or_else(|| fallback.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentOption {
    pub value: String,
    pub label: String,
    pub emoji: String,
}

/// Agents seen in active and archived sessions.
///
/// Order: "All Agents" (value `""`), main, cron, then the rest alphabetically.
/// Main is always present.
pub fn list_agents(
    sessions: &[Session],
    archived: &[ArchivedSession],
    identity: &AgentIdentity,
) -> Vec<AgentOption> {
    let mut seen: BTreeSet<String> = sessions
        .iter()
        .filter_map(|s| s.agent_name.as_deref())
        .chain(archived.iter().filter_map(|a| a.agent_name.as_deref()))
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .collect();

    let mut agents = vec![
        AgentOption {
            value: String::new(),
            label: "All Agents".to_string(),
            emoji: ALL_AGENTS_EMOJI.to_string(),
        },
        AgentOption {
            value: "main".to_string(),
            label: format!("{} (main)", identity.main_agent_name),
            emoji: identity.main_agent_emoji.clone(),
        },
    ];
    seen.remove("main");

    if seen.remove("cron") {
        agents.push(AgentOption {
            value: "cron".to_string(),
            label: "Cron".to_string(),
            emoji: identity
                .agent_emojis
                .get("cron")
                .cloned()
                .unwrap_or_else(|| CRON_EMOJI.to_string()),
        });
    }

    for agent in seen {
        agents.push(AgentOption {
            label: capitalize(&agent),
            emoji: identity.emoji_for(&agent, ALL_AGENTS_EMOJI),
            value: agent,
        });
    }
    agents
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: String,
    pub name: String,
    pub value: String,
    pub display_name: String,
    pub is_gateway: bool,
    pub connected: bool,
    pub status: String,
    pub status_message: String,
}

impl NodeInfo {
    fn discovered(raw: &str, status: &str, message: &str) -> Self {
        Self {
            id: raw.to_string(),
            name: normalize_node_name(raw),
            value: node_value(raw),
            display_name: raw.to_string(),
            is_gateway: false,
            connected: false,
            status: status.to_string(),
            status_message: message.to_string(),
        }
    }
}

/// Nodes known from the local host, session metadata and the archive.
///
/// Reads each root's `sessions.json`, so call it off the async runtime.
pub fn list_nodes(gateway: &str, roots: &[SessionRoot], archived: &[ArchivedSession]) -> Vec<NodeInfo> {
    let gateway_name = normalize_node_name(gateway);
    let mut known: HashSet<String> = HashSet::new();
    known.insert(gateway_name.to_lowercase());

    let mut nodes = vec![NodeInfo {
        id: "gateway".to_string(),
        value: node_value(gateway),
        display_name: gateway_name.clone(),
        name: gateway_name,
        is_gateway: true,
        connected: true,
        status: "ok".to_string(),
        status_message: "Gateway running".to_string(),
    }];

    for root in roots {
        let index = MetadataIndex::load(&root.dir);
        for (_, meta) in index.iter() {
            let Some(raw) = meta
                .node
                .as_deref()
                .or(meta.hostname.as_deref())
                .filter(|n| !n.trim().is_empty())
            else {
                continue;
            };
            if known.insert(normalize_node_name(raw).to_lowercase()) {
                nodes.push(NodeInfo::discovered(raw, "unknown", "Discovered from session data"));
            }
        }
    }

    for entry in archived {
        let raw = entry
            .metadata
            .as_ref()
            .and_then(|m| m.node.as_deref().or(m.hostname.as_deref()))
            .or(entry.node.as_deref())
            .filter(|n| !n.trim().is_empty());
        let Some(raw) = raw else { continue };
        if known.insert(normalize_node_name(raw).to_lowercase()) {
            nodes.push(NodeInfo::discovered(raw, "archived", "Found in archived sessions"));
        }
    }

    nodes.sort_by(|a, b| {
        b.is_gateway
            .cmp(&a.is_gateway)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    nodes
}

/// Name of this host: `HOSTNAME` when set, otherwise the OS hostname.
pub fn local_hostname() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    sys::hostname().unwrap_or_else(|| "gateway".to_string())
}

#[cfg(unix)]
mod sys {
    pub fn hostname() -> Option<String> {
        let mut buf = [0u8; 256];
        // SAFETY: buf is valid for buf.len() bytes; gethostname NUL-terminates
        // on success when the name fits.
        let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
        if rc != 0 {
            return None;
        }
        let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
        let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
        (!name.is_empty()).then_some(name)
    }
}

#[cfg(not(unix))]
mod sys {
    pub fn hostname() -> Option<String> {
        std::env::var("COMPUTERNAME").ok().filter(|n| !n.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::model::SessionStatus;
    use serde_json::json;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn session_for(agent: &str) -> Session {
        Session {
            id: format!("id-{agent}"),
            key: format!("key-{agent}"),
            label: None,
            agent_name: Some(agent.to_string()),
            status: SessionStatus::Done,
            started_at: 0,
            updated_at: 0,
            age_ms: 0,
            channel: None,
            model: None,
            total_tokens: 0,
            context_tokens: 200_000,
            usage_pct: 0.0,
            node: None,
            size_bytes: 0,
            size_formatted: "0 B".to_string(),
            task: None,
            error: None,
            agent_id: "main".to_string(),
            transcript_path: PathBuf::new(),
        }
    }

    fn archived(agent: Option<&str>, node: Option<&str>) -> ArchivedSession {
        serde_json::from_value(json!({
            "key": "agent:main:x",
            "sessionId": "x",
            "archivedAt": 1,
            "agentName": agent,
            "node": node,
        }))
        .unwrap()
    }

    #[test]
    fn test_agents_order() {
        let identity = AgentIdentity {
            agent_emojis: BTreeMap::from([
                ("research".to_string(), "🔬".to_string()),
                ("default".to_string(), "🦾".to_string()),
            ]),
            ..AgentIdentity::default()
        };
        let sessions = vec![session_for("research"), session_for("cron"), session_for("Ops")];
        let agents = list_agents(&sessions, &[archived(Some("billing"), None)], &identity);
        let values: Vec<_> = agents.iter().map(|a| a.value.as_str()).collect();
        assert_eq!(values, vec!["", "main", "cron", "billing", "ops", "research"]);
        assert_eq!(agents[1].label, "Main (main)");
        assert_eq!(agents[2].emoji, "⏰");
        assert_eq!(agents[4].label, "Ops");
        assert_eq!(agents[4].emoji, "🦾");
        assert_eq!(agents[5].emoji, "🔬");
    }

    #[test]
    fn test_main_always_listed() {
        let agents = list_agents(&[], &[], &AgentIdentity::default());
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].label, "All Agents");
        assert_eq!(agents[1].value, "main");
    }

    #[test]
    fn test_nodes_gateway_first_and_deduplicated() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("sessions.json"),
            json!({
                "a": {"sessionId": "a", "node": "zeta"},
                "b": {"sessionId": "b", "hostname": "Brians-Mac-mini-2.local"},
                "c": {"sessionId": "c", "node": "workstation.local"},
                "d": {"sessionId": "d"}
            })
            .to_string(),
        )
        .unwrap();
        let roots = vec![SessionRoot {
            agent_id: "main".to_string(),
            dir: dir.path().to_path_buf(),
        }];
        let nodes = list_nodes(
            "workstation",
            &roots,
            &[archived(None, Some("alpha")), archived(None, Some("zeta"))],
        );

        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["workstation", "alpha", "Mini 2", "zeta"]);
        assert!(nodes[0].is_gateway);
        assert_eq!(nodes[0].status, "ok");
        let alpha = &nodes[1];
        assert_eq!(alpha.status, "archived");
        assert_eq!(nodes[2].value, "mini-2");
        assert_eq!(nodes[3].status, "unknown");
    }

    #[test]
    fn test_local_hostname_is_never_empty() {
        assert!(!local_hostname().is_empty());
    }
}
