//! Integration tests for the server startup / shutdown lifecycle.
//!
//! Each test spins up a real dashboard server on an ephemeral port via
//! [`run_server_with_config`], exercises it over HTTP, and shuts it down
//! cleanly.

use std::fs;
use std::path::PathBuf;

use clawwatch::auth::{hash_token, AuthMode};
use clawwatch::config::DashboardConfig;
use clawwatch::server::startup::{run_server_with_config, ServerConfig, ServerHandle};
use serde_json::{json, Value};
use tempfile::TempDir;

struct TestServer {
    _dir: TempDir,
    sessions_dir: PathBuf,
    handle: ServerHandle,
}

fn write_transcript(dir: &std::path::Path, id: &str) {
    let lines = [
        json!({"type": "session", "id": id, "timestamp": "2026-02-01T08:00:00Z"}),
        json!({"type": "message", "timestamp": "2026-02-01T08:00:01Z",
               "message": {"role": "user", "content": format!("summarize report {id}")}}),
        json!({"type": "message", "timestamp": "2026-02-01T08:00:30Z",
               "message": {"role": "assistant", "content": "Summary attached.",
                           "usage": {"totalTokens": 900}, "stopReason": "stop"}}),
    ];
    let body: String = lines.iter().map(|l| format!("{l}\n")).collect();
    fs::write(dir.join(format!("{id}.jsonl")), body).unwrap();
}

/// Spin up a server over a temp OpenClaw home with two sessions.
async fn start_test_server(tweak: impl FnOnce(&mut DashboardConfig)) -> TestServer {
    let dir = TempDir::new().unwrap();
    let mut config =
        DashboardConfig::for_dirs(dir.path().join("openclaw"), dir.path().join("clawwatch"));
    let sessions_dir = config.sessions_dir.clone();
    fs::create_dir_all(&sessions_dir).unwrap();
    write_transcript(&sessions_dir, "run-1");
    write_transcript(&sessions_dir, "run-2");
    fs::write(
        sessions_dir.join("sessions.json"),
        json!({
            "agent:main:subagent:reports-1": {"sessionId": "run-1", "label": "reports-1"},
            "agent:main:subagent:reports-2": {"sessionId": "run-2", "label": "reports-2"},
        })
        .to_string(),
    )
    .unwrap();

    tweak(&mut config);
    let handle = run_server_with_config(ServerConfig::for_testing(config))
        .await
        .unwrap();
    TestServer {
        _dir: dir,
        sessions_dir,
        handle,
    }
}

fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// 1. Server starts and binds to a real port
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_starts_and_binds() {
    let server = start_test_server(|_| {}).await;
    assert_ne!(server.handle.port(), 0, "OS should assign a non-zero port");
    assert_eq!(server.handle.state().catalog.list().len(), 2);
    server.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 2. Health endpoint responds with 200 + expected JSON fields
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_endpoint_responds() {
    let server = start_test_server(|_| {}).await;
    let url = format!("{}/health", server.handle.base_url());

    let resp = reqwest::get(&url).await.expect("GET /health failed");
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(
        body.get("version").is_some(),
        "response should include version"
    );

    server.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 3. Non-existent route returns 404 JSON
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nonexistent_route_returns_404() {
    let server = start_test_server(|_| {}).await;
    let url = format!("{}/api/does-not-exist", server.handle.base_url());

    let resp = reqwest::get(&url).await.expect("GET failed");
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "not_found");

    server.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 4. Key-mode auth: exchange the key for a cookie, then use the cookie
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_key_exchange_flow() {
    let server = start_test_server(|c| {
        c.auth.mode = AuthMode::Key;
        c.auth.token = Some("letmein".to_string());
    })
    .await;
    let base = server.handle.base_url();
    let client = no_redirect_client();

    let resp = client.get(format!("{base}/api/sessions")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Unauthorized. Please provide a valid token.");

    let resp = client
        .get(format!("{base}/api/sessions?key=letmein&page=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers()["location"], "/api/sessions?page=1");
    let cookie = resp.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.contains(&hash_token("letmein")));
    assert!(cookie.contains("HttpOnly"));

    let cookie_pair = cookie.split(';').next().unwrap().to_string();
    let resp = client
        .get(format!("{base}/api/sessions"))
        .header("cookie", cookie_pair)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{base}/api/sessions?key=wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // Public even with auth on.
    let resp = client.get(format!("{base}/api/config")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    server.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 5. Concurrent archive of one key: exactly one wins
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_archive_single_winner() {
    let server = start_test_server(|_| {}).await;
    let url = format!("{}/api/archive", server.handle.base_url());
    let client = reqwest::Client::new();

    let send = |client: reqwest::Client, url: String| async move {
        client
            .post(url)
            .json(&json!({"sessionKey": "agent:main:subagent:reports-1"}))
            .send()
            .await
            .unwrap()
            .status()
            .as_u16()
    };
    let (a, b) = tokio::join!(
        send(client.clone(), url.clone()),
        send(client.clone(), url.clone())
    );
    let mut statuses = vec![a, b];
    statuses.sort_unstable();
    assert_eq!(statuses, vec![200, 404]);

    let archived = server.handle.state().archive.list();
    assert_eq!(archived.len(), 1);
    assert!(!server.sessions_dir.join("run-1.jsonl").exists());
    assert!(server.sessions_dir.join("archive").join("run-1.jsonl.gz").exists());

    server.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 6. Archive then restore brings the session back unchanged
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_archive_restore_cycle() {
    let server = start_test_server(|_| {}).await;
    let base = server.handle.base_url();
    let client = reqwest::Client::new();
    let original = server.handle.state().catalog.get("run-2").unwrap();

    let resp = client
        .post(format!("{base}/api/archive"))
        .json(&json!({"sessionKey": "run-2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let sessions: Value = client
        .get(format!("{base}/api/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<_> = sessions["sessions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["run-1"]);

    let resp = client
        .post(format!("{base}/api/restore"))
        .json(&json!({"sessionKey": "agent:main:subagent:reports-2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let restored = server.handle.state().catalog.get("run-2").unwrap();
    assert_eq!(restored.key, original.key);
    assert_eq!(restored.label, original.label);
    assert_eq!(restored.size_bytes, original.size_bytes);
    assert_eq!(restored.total_tokens, original.total_tokens);
    assert!(server.handle.state().archive.list().is_empty());

    let resp = client
        .post(format!("{base}/api/restore"))
        .json(&json!({"sessionKey": "run-2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    server.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 7. CORS preflight when an origin is configured
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cors_preflight() {
    let server = start_test_server(|c| c.cors_origin = Some("http://localhost:3000".to_string())).await;
    let resp = reqwest::Client::new()
        .request(
            reqwest::Method::OPTIONS,
            format!("{}/api/sessions", server.handle.base_url()),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );
    server.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// 8. Server shuts down gracefully
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_shuts_down_gracefully() {
    let server = start_test_server(|_| {}).await;
    let addr = server.handle.local_addr();
    server.handle.shutdown().await;

    let result = tokio::net::TcpStream::connect(addr).await;
    assert!(result.is_err(), "server should no longer accept connections");
}
