//! Dashboard authentication.
//!
//! Credentials can arrive three ways: an `Authorization: Bearer` header, a
//! `?key=` query parameter, or the `dashboard_auth` cookie holding a salted
//! hash of the token. Which of these are accepted depends on [`AuthMode`].

use std::fmt;

use axum::http::{HeaderMap, Method, Uri};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const AUTH_COOKIE: &str = "dashboard_auth";
pub const DEFAULT_COOKIE_MAX_AGE_DAYS: u32 = 30;

const HASH_SALT: &str = "openclaw-dashboard:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// No authentication.
    None,
    /// `?key=` exchanged for a cookie.
    Key,
    /// Bearer token.
    #[default]
    Login,
    /// Either key/cookie or bearer.
    Both,
}

impl AuthMode {
    /// Parse a configured mode. Unknown values fall back to `login`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => AuthMode::None,
            "key" => AuthMode::Key,
            "both" => AuthMode::Both,
            "login" => AuthMode::Login,
            other => {
                tracing::warn!(mode = other, "unknown auth mode, using login");
                AuthMode::Login
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthMode::None => "none",
            AuthMode::Key => "key",
            AuthMode::Login => "login",
            AuthMode::Both => "both",
        }
    }

    fn accepts_key(self) -> bool {
        matches!(self, AuthMode::Key | AuthMode::Both)
    }

    fn accepts_bearer(self) -> bool {
        matches!(self, AuthMode::Login | AuthMode::Both)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved authentication settings. Immutable once the server starts.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
    pub cookie_max_age_days: u32,
    pub read_only: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Login,
            token: None,
            cookie_max_age_days: DEFAULT_COOKIE_MAX_AGE_DAYS,
            read_only: false,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("mode", &self.mode)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("cookie_max_age_days", &self.cookie_max_age_days)
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Missing,
    InvalidKey,
}

impl AuthFailure {
    pub fn message(self) -> &'static str {
        match self {
            AuthFailure::Missing => "Unauthorized. Please provide a valid token.",
            AuthFailure::InvalidKey => "Invalid key",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    /// Valid `?key=` on a navigation request: set the cookie and redirect to
    /// the same URL without the key.
    ExchangeKey,
    Deny(AuthFailure),
}

/// Credentials pulled out of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub bearer: Option<String>,
    pub key: Option<String>,
    pub cookie: Option<String>,
}

impl Credentials {
    pub fn from_request(headers: &HeaderMap, uri: &Uri) -> Self {
        let bearer = header_value(headers, "authorization")
            .and_then(|v| v.strip_prefix("Bearer ").map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty());
        let key = uri.query().and_then(key_param);
        let cookie = headers
            .get_all("cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|v| cookie_value(v, AUTH_COOKIE));
        Self { bearer, key, cookie }
    }
}

impl AuthConfig {
    /// Auth is enforced only with a non-`none` mode and a non-empty token.
    pub fn enabled(&self) -> bool {
        self.mode != AuthMode::None && self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn cookie_max_age_secs(&self) -> u64 {
        u64::from(self.cookie_max_age_days) * 24 * 60 * 60
    }

    fn bearer_ok(&self, token: &str, creds: &Credentials) -> bool {
        creds
            .bearer
            .as_deref()
            .is_some_and(|b| timing_safe_eq(b, token))
    }

    fn cookie_ok(&self, token: &str, creds: &Credentials) -> bool {
        creds
            .cookie
            .as_deref()
            .is_some_and(|c| timing_safe_eq(c, &hash_token(token)))
    }

    pub fn authorize(&self, method: &Method, creds: &Credentials) -> AuthDecision {
        let Some(token) = self.token.as_deref().filter(|_| self.enabled()) else {
            return AuthDecision::Allow;
        };

        if self.mode.accepts_bearer() && self.bearer_ok(token, creds) {
            return AuthDecision::Allow;
        }
        if self.mode.accepts_key() {
            if let Some(key) = creds.key.as_deref() {
                if !timing_safe_eq(key, token) {
                    return AuthDecision::Deny(AuthFailure::InvalidKey);
                }
                return if method == Method::GET || method == Method::HEAD {
                    AuthDecision::ExchangeKey
                } else {
                    AuthDecision::Allow
                };
            }
            if self.cookie_ok(token, creds) {
                return AuthDecision::Allow;
            }
        }
        AuthDecision::Deny(AuthFailure::Missing)
    }

    /// `Set-Cookie` value granting access for `cookie_max_age_days`.
    pub fn session_cookie(&self, secure: bool) -> Option<String> {
        let token = self.token.as_deref()?;
        let mut cookie = format!(
            "{AUTH_COOKIE}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Strict",
            hash_token(token),
            self.cookie_max_age_secs()
        );
        if secure {
            cookie.push_str("; Secure");
        }
        Some(cookie)
    }
}

/// `Set-Cookie` value that expires the auth cookie.
pub fn clear_cookie() -> String {
    format!("{AUTH_COOKIE}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT")
}

/// Hex SHA-256 of the salted token, stored in the auth cookie.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(HASH_SALT.as_bytes());
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Timing-safe string equality.
pub fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut out = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        out |= x ^ y;
    }
    out == 0
}

/// Whether the client reached us over HTTPS (behind a proxy or Tailscale).
pub fn request_is_secure(headers: &HeaderMap) -> bool {
    let proto_https = header_value(headers, "x-forwarded-proto")
        .is_some_and(|p| p.eq_ignore_ascii_case("https"));
    proto_https || get_host_name(header_value(headers, "host")).ends_with(".ts.net")
}

/// Path and query of `uri` with every `key` parameter removed.
pub fn strip_key_param(uri: &Uri) -> String {
    let path = uri.path();
    let Some(query) = uri.query() else {
        return path.to_string();
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty() && pair.split('=').next() != Some("key"))
        .collect();
    if kept.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", kept.join("&"))
    }
}

fn key_param(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(name, _)| *name == "key")
        .map(|(_, value)| decode_query_value(value))
        .filter(|v| !v.is_empty())
}

/// Decode a form-encoded query value (`+` is a space).
fn decode_query_value(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(value) => value.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned(),
    }
}

fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|part| {
        let (k, v) = part.trim().split_once('=')?;
        (k.trim() == name).then(|| v.trim().trim_matches('"').to_string())
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_host_name(host_header: Option<String>) -> String {
    let host = host_header.unwrap_or_default();
    let trimmed = host.trim();
    if trimmed.starts_with('[') {
        if let Some(end) = trimmed.find(']') {
            return trimmed[1..end].to_string();
        }
    }
    trimmed.split(':').next().unwrap_or_default().to_string()
}
