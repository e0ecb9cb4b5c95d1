//! HTTP API
//!
//! Implements:
//! - Session listing, history and result (GET /api/sessions...)
//! - Agent and node filter lists (GET /api/agents, /api/nodes)
//! - Archive listing, history, archive and restore (/api/archive, /api/restore)
//! - Settings and manual retention (/api/settings, POST /api/run-archive)
//! - Public config, logout and health (GET /api/config, POST /api/logout, GET /health)
//! - Release check against the skill registry (GET /api/update-check)
//! - Static dashboard assets for everything else

use std::collections::HashMap;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::fs;
use tracing::{debug, info};

use crate::auth;
use crate::config::DashboardConfig;
use crate::server::error::ApiError;
use crate::server::middleware::{auth_middleware, cors_middleware, read_only_guard};
use crate::sessions::discovery::{list_agents, list_nodes};
use crate::sessions::query::{
    parse_date_bound, run_query, SessionFilter, SessionQuery, SortColumn, SortDirection,
};
use crate::sessions::retention::run_retention;
use crate::sessions::{
    format_size, now_millis, ArchiveStore, SessionCatalog, SessionError, SessionStatus,
    SettingsStore,
};
use crate::transcript::read_transcript;
use crate::update::UpdateChecker;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DashboardConfig>,
    pub catalog: Arc<SessionCatalog>,
    pub archive: Arc<ArchiveStore>,
    pub settings: Arc<SettingsStore>,
    pub updates: Arc<UpdateChecker>,
    /// Server start, epoch seconds.
    pub start_time: i64,
}

impl AppState {
    /// Build the catalog, run the first refresh and open the archive.
    pub async fn open(config: DashboardConfig) -> Result<Self, SessionError> {
        let catalog = Arc::new(SessionCatalog::new(config.catalog_config()));
        let snapshot = catalog.refresh().await;
        info!(
            sessions = snapshot.len(),
            dir = %config.sessions_dir.display(),
            "session catalog loaded"
        );

        let archive_dir = config.archive_dir.clone();
        let archive_catalog = catalog.clone();
        let archive =
            tokio::task::spawn_blocking(move || ArchiveStore::open(archive_dir, archive_catalog))
                .await??;

        let settings_path = config.settings_path.clone();
        let settings = tokio::task::spawn_blocking(move || SettingsStore::load(settings_path)).await?;

        let (update_config, cache_path, static_dir) = (
            config.update_check.clone(),
            config.update_cache_path.clone(),
            config.static_dir.clone(),
        );
        let updates = tokio::task::spawn_blocking(move || {
            UpdateChecker::new(update_config, cache_path, static_dir)
        })
        .await?;

        Ok(Self {
            config: Arc::new(config),
            catalog,
            archive: Arc::new(archive),
            settings: Arc::new(settings),
            updates: Arc::new(updates),
            start_time: chrono::Utc::now().timestamp(),
        })
    }
}

/// Create the router with every endpoint and the auth, read-only and CORS
/// layers.
pub fn create_router(state: AppState) -> Router {
    let auth_config = Arc::new(state.config.auth.clone());
    let read_only = state.config.auth.read_only;
    let cors_origin: Option<Arc<str>> = state.config.cors_origin.as_deref().map(Arc::from);

    let router: Router<AppState> = Router::new()
        .route("/health", get(health_handler))
        .route("/api/config", get(config_handler))
        .route("/api/logout", post(logout_handler))
        .route("/api/sessions", get(sessions_handler))
        .route("/api/sessions/:id/history", get(session_history_handler))
        .route("/api/sessions/:id/result", get(session_result_handler))
        .route("/api/agents", get(agents_handler))
        .route("/api/nodes", get(nodes_handler))
        .route("/api/archive", get(archive_list_handler).post(archive_handler))
        .route("/api/archive/:key/history", get(archive_history_handler))
        .route("/api/restore", post(restore_handler))
        .route("/api/settings", get(settings_handler).post(save_settings_handler))
        .route("/api/run-archive", post(run_archive_handler))
        .route("/api/update-check", get(update_check_handler))
        .fallback(static_handler);

    // Last added runs first: cors -> read_only -> auth -> handler
    router
        .with_state(state)
        .layer(middleware::from_fn_with_state(auth_config, auth_middleware))
        .layer(middleware::from_fn_with_state(read_only, read_only_guard))
        .layer(middleware::from_fn_with_state(cors_origin, cors_middleware))
}

// ============================================================================
// Query parsing
// ============================================================================

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Turn listing query parameters into a [`SessionQuery`].
fn parse_session_query(params: &HashMap<String, String>) -> Result<SessionQuery, ApiError> {
    let mut filter = SessionFilter::new();
    if let Some(agent) = param(params, "agent") {
        filter = filter.with_agent(agent);
    }
    if let Some(node) = param(params, "node") {
        filter = filter.with_node(node);
    }
    if let Some(search) = param(params, "search") {
        filter = filter.with_search(search);
    }
    if let Some(raw) = param(params, "status") {
        let status = SessionStatus::parse(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid status: {raw}")))?;
        filter = filter.with_status(status);
    }
    let bound = |name: &str, end_of_day: bool| -> Result<Option<i64>, ApiError> {
        param(params, name)
            .map(|raw| {
                parse_date_bound(raw, end_of_day)
                    .ok_or_else(|| ApiError::BadRequest(format!("Invalid date for {name}: {raw}")))
            })
            .transpose()
    };
    filter = filter.with_range(bound("from", false)?, bound("to", true)?);

    let sort = match param(params, "sort") {
        Some(raw) => SortColumn::parse(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid sort column: {raw}")))?,
        None => SortColumn::default(),
    };
    let direction = match param(params, "dir").or_else(|| param(params, "direction")) {
        Some(raw) => SortDirection::parse(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid sort direction: {raw}")))?,
        None => SortDirection::default(),
    };

    let page = param(params, "page")
        .map(|raw| {
            raw.parse::<i64>()
                .map_err(|_| ApiError::BadRequest(format!("Invalid page: {raw}")))
        })
        .transpose()?;
    let page_size = param(params, "pageSize")
        .map(|raw| {
            raw.parse::<usize>()
                .map_err(|_| ApiError::BadRequest(format!("Invalid pageSize: {raw}")))
        })
        .transpose()?;

    Ok(SessionQuery {
        filter,
        sort,
        direction,
        page,
        page_size,
    })
}

/// Parse a JSON request body, mapping failures onto the API error shape.
fn json_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))
}

fn session_key(body: &Bytes) -> Result<String, ApiError> {
    json_body(body)?
        .get("sessionKey")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest("sessionKey is required".to_string()))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health - Liveness check.
async fn health_handler(State(state): State<AppState>) -> Response {
    let uptime = chrono::Utc::now().timestamp() - state.start_time;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptimeSeconds": uptime,
        })),
    )
        .into_response()
}

/// GET /api/config
async fn config_handler(State(state): State<AppState>) -> Json<Value> {
    Json(state.config.public_view())
}

/// POST /api/logout - Expire the auth cookie.
async fn logout_handler() -> Response {
    (
        StatusCode::OK,
        [(header::SET_COOKIE, auth::clear_cookie())],
        Json(json!({ "success": true })),
    )
        .into_response()
}

/// GET /api/sessions
async fn sessions_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let query = parse_session_query(&params)?;
    let sessions = state.archive.active_sessions();
    let page_size = state.settings.get().page_size as usize;
    let (sessions, pagination) = run_query(&sessions, &query, page_size);

    let mut body = json!({
        "sessions": sessions,
        "stats": state.archive.stats(),
    });
    if let Some(pagination) = pagination {
        body["pagination"] = json!(pagination);
    }
    Ok(Json(body))
}

async fn load_active_transcript(
    state: &AppState,
    ident: &str,
) -> Result<crate::transcript::Transcript, ApiError> {
    let session = state
        .catalog
        .get(ident)
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {ident}")))?;
    let path = session.transcript_path.clone();
    let transcript = tokio::task::spawn_blocking(move || read_transcript(&path)).await?;
    match transcript {
        Ok(t) => Ok(t),
        Err(crate::transcript::ParseError::Unreadable(e))
            if e.kind() == std::io::ErrorKind::NotFound =>
        {
            Err(ApiError::NotFound(format!("Session not found: {ident}")))
        }
        Err(e) => Err(SessionError::from(e).into()),
    }
}

/// GET /api/sessions/:id/history
async fn session_history_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let transcript = load_active_transcript(&state, &id).await?;
    Ok(Json(json!({ "history": transcript.entries })))
}

/// GET /api/sessions/:id/result
async fn session_result_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let transcript = load_active_transcript(&state, &id).await?;
    Ok(Json(json!({ "result": transcript.result })))
}

/// GET /api/agents
async fn agents_handler(State(state): State<AppState>) -> Json<Value> {
    let agents = list_agents(
        &state.catalog.list(),
        &state.archive.list(),
        &state.config.identity,
    );
    Json(json!({ "agents": agents }))
}

/// GET /api/nodes
async fn nodes_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let catalog = state.catalog.clone();
    let archived = state.archive.list();
    let gateway = state.config.gateway_node.clone();
    let nodes = tokio::task::spawn_blocking(move || {
        let roots = catalog.config().discover_roots();
        list_nodes(&gateway, &roots, &archived)
    })
    .await?;
    Ok(Json(json!({ "nodes": nodes })))
}

/// GET /api/archive
async fn archive_list_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let query = parse_session_query(&params)?;
    let index = state.archive.index();
    let page_size = state.settings.get().page_size as usize;
    let (sessions, pagination) = run_query(&index.sessions, &query, page_size);
    let sessions: Vec<_> = sessions.iter().map(|s| s.for_client()).collect();

    let mut body = json!({
        "sessions": sessions,
        "totalSize": index.total_size,
        "totalSizeFormatted": format_size(index.total_size),
    });
    if let Some(pagination) = pagination {
        body["pagination"] = json!(pagination);
    }
    Ok(Json(body))
}

/// GET /api/archive/:key/history
async fn archive_history_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let archive = state.archive.clone();
    let history = tokio::task::spawn_blocking(move || archive.history(&key)).await??;
    Ok(Json(json!({ "history": history })))
}

/// POST /api/archive {sessionKey}
async fn archive_handler(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let key = session_key(&body)?;
    let entry = state.archive.archive(&key).await?;
    info!(session_id = %entry.session_id, key = %entry.key, "archived via API");
    Ok(Json(json!({ "success": true })))
}

/// POST /api/restore {sessionKey}
async fn restore_handler(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let key = session_key(&body)?;
    let entry = state.archive.restore(&key).await?;
    info!(session_id = %entry.session_id, key = %entry.key, "restored via API");
    Ok(Json(json!({ "success": true })))
}

/// GET /api/settings
async fn settings_handler(State(state): State<AppState>) -> Response {
    Json(state.settings.get()).into_response()
}

/// POST /api/settings
async fn save_settings_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let patch = json_body(&body)?;
    let store = state.settings.clone();
    let settings = tokio::task::spawn_blocking(move || store.save(&patch)).await??;
    debug!(retention = %settings.retention_days, auto_archive = settings.auto_archive, "settings saved");
    Ok(Json(json!({ "success": true, "settings": settings })))
}

/// POST /api/run-archive - Apply the retention policy now.
async fn run_archive_handler(State(state): State<AppState>) -> Json<Value> {
    let settings = state.settings.get();
    let report = run_retention(&state.archive, &settings, now_millis()).await;
    let mut body = json!({
        "success": true,
        "archived": report.archived.len(),
        "failed": report.failures,
    });
    if let Some(message) = report.skipped {
        body["message"] = json!(message);
    }
    Json(body)
}

/// GET /api/update-check - Latest published release, cached for a day.
async fn update_check_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.updates.check().await))
}

// ============================================================================
// Static assets
// ============================================================================

fn not_found() -> Response {
    ApiError::NotFound("Not found".to_string()).into_response()
}

/// Serve dashboard assets from `staticDir`; `/` maps to `index.html`.
async fn static_handler(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path();
    if path.starts_with("/api/") || path == "/api" {
        return not_found();
    }
    let Some(root) = state.config.static_dir.as_deref() else {
        return not_found();
    };
    let Some(file_path) = resolve_static_path(root, path) else {
        return not_found();
    };
    if file_path.is_file() {
        serve_file(&file_path).await
    } else {
        not_found()
    }
}

/// Map a request path under `root`, refusing traversal.
fn resolve_static_path(root: &FsPath, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.trim_start_matches('/');
    if relative.split('/').any(|part| part == ".." || part.contains('\\')) {
        return None;
    }
    let relative = if relative.is_empty() || relative.ends_with('/') {
        format!("{relative}index.html")
    } else {
        relative.to_string()
    };
    Some(root.join(relative))
}

/// Serve a static file
async fn serve_file(path: &FsPath) -> Response {
    let content_type = get_content_type(path);

    match fs::read(path).await {
        Ok(content) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            content,
        )
            .into_response(),
        Err(_) => not_found(),
    }
}

/// Get content type based on file extension
fn get_content_type(path: &FsPath) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "application/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") | Some("map") => "application/json; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
