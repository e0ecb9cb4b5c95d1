//! Layered configuration.
//!
//! Precedence, lowest first: built-in defaults, agent identities from
//! `<openclawHome>/openclaw.json`, `<clawwatchHome>/config.json` (JSON5),
//! environment variables, command-line flags.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::{AuthConfig, AuthMode, DEFAULT_COOKIE_MAX_AGE_DAYS};
use crate::sessions::catalog::CatalogConfig;
use crate::sessions::discovery::{local_hostname, AgentIdentity};
use crate::update::{UpdateCheckConfig, CACHE_FILE as UPDATE_CACHE_FILE};

pub const DEFAULT_PORT: u16 = 8889;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_RETENTION_INTERVAL_MINUTES: u64 = 60;

const CONFIG_FILE: &str = "config.json";
const OPENCLAW_CONFIG_FILE: &str = "openclaw.json";
const SETTINGS_FILE: &str = "settings.json";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse JSON5 at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Validation error at {path}: {message}")]
    ValidationError { path: String, message: String },
}

/// Values supplied on the command line. They win over everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub session_path: Option<PathBuf>,
    pub token: Option<String>,
    pub read_only: bool,
    pub config_path: Option<PathBuf>,
}

/// Fully resolved dashboard configuration.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
    pub openclaw_home: PathBuf,
    pub clawwatch_home: PathBuf,
    /// Primary sessions directory (agent `main`).
    pub sessions_dir: PathBuf,
    /// `<openclawHome>/agents`.
    pub agents_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub settings_path: PathBuf,
    pub static_dir: Option<PathBuf>,
    pub auth: AuthConfig,
    pub cors_origin: Option<String>,
    pub identity: AgentIdentity,
    pub node_emojis: BTreeMap<String, String>,
    pub gateway_node: String,
    pub refresh_interval: Duration,
    pub retention_interval: Duration,
    pub update_check: UpdateCheckConfig,
    /// `<clawwatchHome>/update-cache.json`.
    pub update_cache_path: PathBuf,
}

impl DashboardConfig {
    /// Defaults rooted at the given directories, with no files consulted.
    pub fn for_dirs(openclaw_home: impl Into<PathBuf>, clawwatch_home: impl Into<PathBuf>) -> Self {
        let openclaw_home = openclaw_home.into();
        let clawwatch_home = clawwatch_home.into();
        let sessions_dir = openclaw_home.join("agents").join("main").join("sessions");
        let mut config = Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            agents_dir: openclaw_home.join("agents"),
            archive_dir: PathBuf::new(),
            settings_path: clawwatch_home.join(SETTINGS_FILE),
            update_cache_path: clawwatch_home.join(UPDATE_CACHE_FILE),
            sessions_dir,
            openclaw_home,
            clawwatch_home,
            static_dir: None,
            auth: AuthConfig::default(),
            cors_origin: None,
            identity: AgentIdentity::default(),
            node_emojis: BTreeMap::new(),
            gateway_node: "gateway".to_string(),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            retention_interval: Duration::from_secs(DEFAULT_RETENTION_INTERVAL_MINUTES * 60),
            update_check: UpdateCheckConfig::default(),
        };
        config.set_sessions_dir(config.sessions_dir.clone());
        config
    }

    fn set_sessions_dir(&mut self, dir: PathBuf) {
        self.archive_dir = dir.join("archive");
        self.sessions_dir = dir;
    }

    /// Resolve the configuration from the process environment.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::load_from(overrides, |name| std::env::var(name).ok())
    }

    /// Resolve the configuration with an explicit environment lookup.
    pub fn load_from<F>(overrides: &ConfigOverrides, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let openclaw_home = env("OPENCLAW_HOME")
            .map(|p| expand_home(&p))
            .unwrap_or_else(|| home.join(".openclaw"));
        let clawwatch_home = env("CLAWWATCH_HOME")
            .map(|p| expand_home(&p))
            .unwrap_or_else(|| home.join(".clawwatch"));

        let mut merged = default_values();

        let openclaw = read_optional_json(&openclaw_home.join(OPENCLAW_CONFIG_FILE));
        if let Some(openclaw) = &openclaw {
            apply_openclaw_identities(&mut merged, openclaw);
        }

        let config_path = overrides
            .config_path
            .clone()
            .unwrap_or_else(|| clawwatch_home.join(CONFIG_FILE));
        if overrides.config_path.is_some() && !config_path.exists() {
            return Err(ConfigError::ReadError {
                path: config_path.display().to_string(),
                message: "file not found".to_string(),
            });
        }
        if config_path.exists() {
            let file = load_config_file(&config_path)?;
            deep_merge(&mut merged, strip_comment_keys(file));
        }

        let mut config = Self::for_dirs(openclaw_home, clawwatch_home);
        config.apply_values(&merged, &config_path)?;
        if let Some(path) = openclaw
            .as_ref()
            .and_then(|v| v.pointer("/agents/sessionsPath"))
            .and_then(Value::as_str)
        {
            config.set_sessions_dir(expand_home(path));
        }
        if let Some(path) = merged.get("sessionsPath").and_then(Value::as_str) {
            config.set_sessions_dir(expand_home(path));
        }

        config.apply_env(&env);
        config.apply_overrides(overrides);
        config.gateway_node = local_hostname();

        debug!(
            port = config.port,
            sessions_dir = %config.sessions_dir.display(),
            auth_mode = %config.auth.mode,
            auth_enabled = config.auth.enabled(),
            read_only = config.auth.read_only,
            "configuration resolved"
        );
        Ok(config)
    }

    fn apply_values(&mut self, v: &Value, source: &Path) -> Result<(), ConfigError> {
        let invalid = |field: &str, message: &str| ConfigError::ValidationError {
            path: format!("{}:{field}", source.display()),
            message: message.to_string(),
        };

        if let Some(port) = v.get("port").filter(|p| !p.is_null()) {
            self.port = parse_port(port).ok_or_else(|| invalid("port", "must be 0-65535"))?;
        }
        if let Some(host) = v.get("host").and_then(Value::as_str) {
            self.host = host.to_string();
        }
        if let Some(token) = v.get("dashboardToken").and_then(Value::as_str) {
            self.auth.token = Some(token.to_string()).filter(|t| !t.is_empty());
        }
        if let Some(mode) = v.get("authMode").and_then(Value::as_str) {
            self.auth.mode = AuthMode::parse(mode);
        }
        if let Some(days) = v.get("cookieMaxAgeDays").filter(|d| !d.is_null()) {
            self.auth.cookie_max_age_days = days
                .as_u64()
                .and_then(|d| u32::try_from(d).ok())
                .filter(|d| *d >= 1)
                .ok_or_else(|| invalid("cookieMaxAgeDays", "must be a positive integer"))?;
        }
        if let Some(read_only) = v.get("readOnly").and_then(Value::as_bool) {
            self.auth.read_only = read_only;
        }
        self.cors_origin = v
            .get("corsOrigin")
            .and_then(Value::as_str)
            .filter(|o| !o.is_empty())
            .map(str::to_string);
        if let Some(name) = v.get("mainAgentName").and_then(Value::as_str) {
            self.identity.main_agent_name = name.to_string();
        }
        if let Some(emoji) = v.get("mainAgentEmoji").and_then(Value::as_str) {
            self.identity.main_agent_emoji = emoji.to_string();
        }
        self.identity.agent_emojis = string_map(v.get("agentEmojis"));
        self.node_emojis = string_map(v.get("nodeEmojis"));
        self.static_dir = v
            .get("staticDir")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .map(expand_home);
        if let Some(secs) = v.get("refreshIntervalSeconds").filter(|s| !s.is_null()) {
            let secs = secs
                .as_u64()
                .filter(|s| *s >= 1)
                .ok_or_else(|| invalid("refreshIntervalSeconds", "must be a positive integer"))?;
            self.refresh_interval = Duration::from_secs(secs);
        }
        if let Some(minutes) = v.get("retentionIntervalMinutes").filter(|m| !m.is_null()) {
            let minutes = minutes
                .as_u64()
                .filter(|m| *m >= 1)
                .ok_or_else(|| invalid("retentionIntervalMinutes", "must be a positive integer"))?;
            self.retention_interval = Duration::from_secs(minutes * 60);
        }
        if let Some(update) = v.get("updateCheck").filter(|u| u.is_object()) {
            if let Some(enabled) = update.get("enabled").and_then(Value::as_bool) {
                self.update_check.enabled = enabled;
            }
            if let Some(url) = update.get("registryUrl").and_then(Value::as_str) {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(invalid("updateCheck.registryUrl", "must be an http(s) URL"));
                }
                self.update_check.registry_url = url.to_string();
            }
        }
        Ok(())
    }

    fn apply_env(&mut self, env: &dyn Fn(&str) -> Option<String>) {
        for name in ["CLAWWATCH_PORT", "DASHBOARD_PORT"] {
            if let Some(raw) = env(name) {
                match raw.parse::<u16>() {
                    Ok(port) => {
                        self.port = port;
                        break;
                    }
                    Err(_) => warn!(var = name, value = %raw, "ignoring invalid port"),
                }
            }
        }
        if let Some(token) = env("CLAWWATCH_TOKEN").or_else(|| env("DASHBOARD_TOKEN")) {
            self.auth.token = Some(token);
        }
        if let Some(path) = env("CLAWWATCH_SESSION_PATH").or_else(|| env("OPENCLAW_SESSIONS_PATH")) {
            self.set_sessions_dir(expand_home(&path));
        }
        if env("DASHBOARD_READ_ONLY")
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        {
            self.auth.read_only = true;
        }
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(path) = &overrides.session_path {
            self.set_sessions_dir(path.clone());
        }
        if let Some(token) = overrides.token.as_ref().filter(|t| !t.is_empty()) {
            self.auth.token = Some(token.clone());
        }
        if overrides.read_only {
            self.auth.read_only = true;
        }
    }

    /// Catalog settings derived from this configuration.
    pub fn catalog_config(&self) -> CatalogConfig {
        let mut catalog = CatalogConfig::new(&self.sessions_dir).with_agents_dir(&self.agents_dir);
        catalog.main_agent_name = self.identity.main_agent_name.clone();
        catalog.gateway_node = self.gateway_node.clone();
        catalog
    }

    /// Client-safe view served at `/api/config`. Never includes the token.
    pub fn public_view(&self) -> Value {
        json!({
            "authEnabled": self.auth.enabled(),
            "authMode": self.auth.mode,
            "readOnly": self.auth.read_only,
            "mainAgentName": self.identity.main_agent_name,
            "mainAgentEmoji": self.identity.main_agent_emoji,
            "agentEmojis": self.identity.agent_emojis,
            "nodeEmojis": self.node_emojis,
        })
    }
}

fn default_values() -> Value {
    json!({
        "port": DEFAULT_PORT,
        "host": DEFAULT_HOST,
        "dashboardToken": "",
        "authMode": "login",
        "cookieMaxAgeDays": DEFAULT_COOKIE_MAX_AGE_DAYS,
        "readOnly": false,
        "corsOrigin": null,
        "mainAgentName": "Main",
        "mainAgentEmoji": "🏠",
        "agentEmojis": {
            "ops": "🔧",
            "research": "🔍",
            "content": "✏️",
            "design": "🎨",
            "cron": "⏰",
            "default": "🤖"
        },
        "nodeEmojis": {
            "gateway": "🟢",
            "remote": "🔵",
            "default": "🖥️"
        }
    })
}

/// Fold `agents.list[].identity` from `openclaw.json` into `merged`.
fn apply_openclaw_identities(merged: &mut Value, openclaw: &Value) {
    let Some(agents) = openclaw.pointer("/agents/list").and_then(Value::as_array) else {
        return;
    };
    for agent in agents {
        let id = agent.get("id").and_then(Value::as_str).unwrap_or_default();
        let name = agent.pointer("/identity/name").and_then(Value::as_str);
        let emoji = agent.pointer("/identity/emoji").and_then(Value::as_str);
        if id == "main" {
            if let Some(name) = name {
                merged["mainAgentName"] = json!(name);
            }
            if let Some(emoji) = emoji {
                merged["mainAgentEmoji"] = json!(emoji);
            }
        } else if let (Some(name), Some(emoji)) = (name, emoji) {
            merged["agentEmojis"][name.to_lowercase()] = json!(emoji);
        }
    }
}

/// Read an optional JSON5 file, logging and skipping it when unusable.
fn read_optional_json(path: &Path) -> Option<Value> {
    if !path.exists() {
        return None;
    }
    match load_config_file(path) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "ignoring unreadable configuration file");
            None
        }
    }
}

fn load_config_file(path: &Path) -> Result<Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let value = parse_json5(&content, path)?;
    if !value.is_object() {
        return Err(ConfigError::ValidationError {
            path: path.display().to_string(),
            message: "top level must be an object".to_string(),
        });
    }
    Ok(value)
}

/// Parse JSON5 content
fn parse_json5(content: &str, path: &Path) -> Result<Value, ConfigError> {
    json5::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Drop top-level keys starting with `_` (used as comments).
fn strip_comment_keys(value: Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

/// Deep merge two JSON values: objects merge recursively, anything else in
/// `overlay` replaces `base`.
fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_obj), Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                match base_obj.get_mut(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_obj.insert(key, overlay_value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn parse_port(value: &Value) -> Option<u16> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .and_then(|p| u16::try_from(p).ok())
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.to_lowercase(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct Homes {
        _dir: TempDir,
        openclaw: PathBuf,
        clawwatch: PathBuf,
    }

    fn homes() -> Homes {
        let dir = TempDir::new().unwrap();
        let openclaw = dir.path().join("openclaw");
        let clawwatch = dir.path().join("clawwatch");
        fs::create_dir_all(&openclaw).unwrap();
        fs::create_dir_all(&clawwatch).unwrap();
        Homes {
            _dir: dir,
            openclaw,
            clawwatch,
        }
    }

    fn load(h: &Homes, extra_env: &[(&str, &str)], overrides: &ConfigOverrides) -> DashboardConfig {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("OPENCLAW_HOME".to_string(), h.openclaw.display().to_string()),
            ("CLAWWATCH_HOME".to_string(), h.clawwatch.display().to_string()),
        ]);
        for (k, v) in extra_env {
            vars.insert(k.to_string(), v.to_string());
        }
        DashboardConfig::load_from(overrides, |name| vars.get(name).cloned()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let h = homes();
        let cfg = load(&h, &[], &ConfigOverrides::default());
        assert_eq!(cfg.port, 8889);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.auth.mode, AuthMode::Login);
        assert!(!cfg.auth.enabled());
        assert_eq!(cfg.auth.cookie_max_age_days, 30);
        assert_eq!(cfg.sessions_dir, h.openclaw.join("agents/main/sessions"));
        assert_eq!(cfg.archive_dir, cfg.sessions_dir.join("archive"));
        assert_eq!(cfg.settings_path, h.clawwatch.join("settings.json"));
        assert_eq!(cfg.identity.main_agent_name, "Main");
        assert_eq!(cfg.identity.agent_emojis.get("cron").map(String::as_str), Some("⏰"));
        assert_eq!(cfg.refresh_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_openclaw_identities_and_sessions_path() {
        let h = homes();
        fs::write(
            h.openclaw.join("openclaw.json"),
            r#"{
                agents: {
                    sessionsPath: "/srv/sessions",
                    list: [
                        {id: "main", identity: {name: "Jarvis", emoji: "🦊"}},
                        {id: "r2", identity: {name: "Scout", emoji: "🛰️"}},
                    ],
                },
            }"#,
        )
        .unwrap();
        let cfg = load(&h, &[], &ConfigOverrides::default());
        assert_eq!(cfg.identity.main_agent_name, "Jarvis");
        assert_eq!(cfg.identity.main_agent_emoji, "🦊");
        assert_eq!(cfg.identity.agent_emojis.get("scout").map(String::as_str), Some("🛰️"));
        assert_eq!(cfg.sessions_dir, PathBuf::from("/srv/sessions"));
    }

    #[test]
    fn test_config_file_merges_and_skips_comment_keys() {
        let h = homes();
        fs::write(
            h.clawwatch.join("config.json"),
            r#"{
                // JSON5 comments are fine
                _comment: "ignored",
                port: 9100,
                authMode: "both",
                dashboardToken: "from-file",
                agentEmojis: {ops: "🛠️"},
                corsOrigin: "*",
                refreshIntervalSeconds: 10,
            }"#,
        )
        .unwrap();
        let cfg = load(&h, &[], &ConfigOverrides::default());
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.auth.mode, AuthMode::Both);
        assert_eq!(cfg.auth.token.as_deref(), Some("from-file"));
        assert!(cfg.auth.enabled());
        assert_eq!(cfg.identity.agent_emojis.get("ops").map(String::as_str), Some("🛠️"));
        assert_eq!(
            cfg.identity.agent_emojis.get("research").map(String::as_str),
            Some("🔍"),
            "untouched defaults survive the merge"
        );
        assert_eq!(cfg.cors_origin.as_deref(), Some("*"));
        assert_eq!(cfg.refresh_interval, Duration::from_secs(10));
        assert!(cfg.update_check.enabled);
        assert_eq!(cfg.update_cache_path, h.clawwatch.join("update-cache.json"));
    }

    #[test]
    fn test_update_check_block() {
        let h = homes();
        fs::write(
            h.clawwatch.join("config.json"),
            r#"{updateCheck: {enabled: false, registryUrl: "http://registry.local/latest"}}"#,
        )
        .unwrap();
        let cfg = load(&h, &[], &ConfigOverrides::default());
        assert!(!cfg.update_check.enabled);
        assert_eq!(cfg.update_check.registry_url, "http://registry.local/latest");

        fs::write(h.clawwatch.join("config.json"), r#"{updateCheck: {registryUrl: "ftp://x"}}"#).unwrap();
        let vars: HashMap<&str, String> = HashMap::from([
            ("OPENCLAW_HOME", h.openclaw.display().to_string()),
            ("CLAWWATCH_HOME", h.clawwatch.display().to_string()),
        ]);
        assert!(DashboardConfig::load_from(&ConfigOverrides::default(), |n| vars.get(n).cloned()).is_err());
    }

    #[test]
    fn test_env_then_cli_precedence() {
        let h = homes();
        fs::write(h.clawwatch.join("config.json"), r#"{"port": 9100, "dashboardToken": "file"}"#).unwrap();
        let env = [
            ("DASHBOARD_PORT", "9200"),
            ("CLAWWATCH_TOKEN", "env-token"),
            ("OPENCLAW_SESSIONS_PATH", "/env/sessions"),
            ("DASHBOARD_READ_ONLY", "yes"),
        ];
        let cfg = load(&h, &env, &ConfigOverrides::default());
        assert_eq!(cfg.port, 9200);
        assert_eq!(cfg.auth.token.as_deref(), Some("env-token"));
        assert_eq!(cfg.sessions_dir, PathBuf::from("/env/sessions"));
        assert!(cfg.auth.read_only);

        let overrides = ConfigOverrides {
            port: Some(9300),
            token: Some("cli-token".to_string()),
            session_path: Some(PathBuf::from("/cli/sessions")),
            ..ConfigOverrides::default()
        };
        let cfg = load(&h, &env, &overrides);
        assert_eq!(cfg.port, 9300);
        assert_eq!(cfg.auth.token.as_deref(), Some("cli-token"));
        assert_eq!(cfg.archive_dir, PathBuf::from("/cli/sessions/archive"));
    }

    #[test]
    fn test_invalid_env_port_is_ignored() {
        let h = homes();
        let cfg = load(&h, &[("CLAWWATCH_PORT", "http")], &ConfigOverrides::default());
        assert_eq!(cfg.port, DEFAULT_PORT);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let h = homes();
        fs::write(h.clawwatch.join("config.json"), r#"{"cookieMaxAgeDays": 0}"#).unwrap();
        let vars: HashMap<&str, String> = HashMap::from([
            ("OPENCLAW_HOME", h.openclaw.display().to_string()),
            ("CLAWWATCH_HOME", h.clawwatch.display().to_string()),
        ]);
        let err = DashboardConfig::load_from(&ConfigOverrides::default(), |n| vars.get(n).cloned())
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));

        fs::write(h.clawwatch.join("config.json"), "{ port: ").unwrap();
        let err = DashboardConfig::load_from(&ConfigOverrides::default(), |n| vars.get(n).cloned())
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_missing_explicit_config_file_is_an_error() {
        let h = homes();
        let overrides = ConfigOverrides {
            config_path: Some(h.clawwatch.join("nope.json")),
            ..ConfigOverrides::default()
        };
        let vars: HashMap<&str, String> =
            HashMap::from([("OPENCLAW_HOME", h.openclaw.display().to_string())]);
        let err = DashboardConfig::load_from(&overrides, |n| vars.get(n).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_public_view_never_contains_token() {
        let h = homes();
        let cfg = load(&h, &[("CLAWWATCH_TOKEN", "hunter2")], &ConfigOverrides::default());
        let view = cfg.public_view();
        assert_eq!(view["authEnabled"], true);
        assert_eq!(view["authMode"], "login");
        assert!(!view.to_string().contains("hunter2"));
    }

    #[test]
    fn test_deep_merge_replaces_primitives_and_arrays() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "list": [1, 2]});
        deep_merge(&mut base, json!({"a": {"y": 3}, "list": [9]}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 3}, "list": [9]}));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/x"), home.join("x"));
        }
    }
}
