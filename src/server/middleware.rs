//! Request gates applied around the API router.
//!
//! Order, outermost first: CORS, read-only guard, auth.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::auth::{self, AuthConfig, AuthDecision, AuthFailure, Credentials};
use crate::server::error::ApiError;

/// Paths that never require credentials.
const PUBLIC_PATHS: [&str; 3] = ["/api/config", "/api/logout", "/health"];

/// POST targets that change state and are refused in read-only mode.
const MUTATING_PATHS: [&str; 4] = [
    "/api/archive",
    "/api/restore",
    "/api/settings",
    "/api/run-archive",
];

fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

fn is_api(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

/// Adds CORS headers for the configured origin and answers preflights.
pub async fn cors_middleware(
    State(origin): State<Option<Arc<str>>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let Some(origin) = origin else {
        return next.run(request).await;
    };

    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };

    if let Ok(value) = HeaderValue::from_str(&origin) {
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Authorization"),
        );
    }
    response
}

/// Refuses mutating requests when the dashboard is read-only. Runs before
/// auth so the answer does not depend on credentials.
pub async fn read_only_guard(
    State(read_only): State<bool>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if read_only
        && request.method() == Method::POST
        && MUTATING_PATHS.contains(&request.uri().path())
    {
        debug!(path = %request.uri().path(), "rejected write in read-only mode");
        return ApiError::Forbidden("Dashboard is in read-only mode".to_string()).into_response();
    }
    next.run(request).await
}

/// Enforces the configured auth mode.
///
/// A valid `?key=` on a GET is swapped for a cookie and redirected to the
/// same URL without the key. API paths need credentials; static assets
/// only fail when they carry a wrong key.
pub async fn auth_middleware(
    State(auth_config): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let path = request.uri().path().to_string();
    if !auth_config.enabled() || is_public(&path) {
        return next.run(request).await;
    }

    let creds = Credentials::from_request(request.headers(), request.uri());
    match auth_config.authorize(request.method(), &creds) {
        AuthDecision::Allow => next.run(request).await,
        AuthDecision::ExchangeKey => {
            let location = auth::strip_key_param(request.uri());
            let secure = auth::request_is_secure(request.headers());
            let mut response = (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
            if let Some(cookie) = auth_config
                .session_cookie(secure)
                .and_then(|c| HeaderValue::from_str(&c).ok())
            {
                response.headers_mut().insert(header::SET_COOKIE, cookie);
            }
            response
        }
        AuthDecision::Deny(AuthFailure::InvalidKey) => {
            debug!(path = %path, "rejected invalid key");
            ApiError::Unauthorized(AuthFailure::InvalidKey.message().to_string()).into_response()
        }
        AuthDecision::Deny(failure) if is_api(&path) => {
            ApiError::Unauthorized(failure.message().to_string()).into_response()
        }
        AuthDecision::Deny(_) => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{hash_token, AuthMode};
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    fn router(auth_config: AuthConfig, cors: Option<&str>) -> Router {
        let read_only = auth_config.read_only;
        Router::new()
            .route("/api/sessions", get(|| async { "sessions" }))
            .route("/api/config", get(|| async { "config" }))
            .route("/api/archive", get(|| async { "list" }).post(|| async { "archived" }))
            .route("/index.html", get(|| async { "page" }))
            .layer(middleware::from_fn_with_state(
                Arc::new(auth_config),
                auth_middleware,
            ))
            .layer(middleware::from_fn_with_state(read_only, read_only_guard))
            .layer(middleware::from_fn_with_state(
                cors.map(Arc::<str>::from),
                cors_middleware,
            ))
    }

    fn auth(mode: AuthMode) -> AuthConfig {
        AuthConfig {
            mode,
            token: Some("s3cret".to_string()),
            ..AuthConfig::default()
        }
    }

    async fn send(router: Router, method: &str, uri: &str, headers: &[(&str, &str)]) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        router
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_key_exchange_redirects_with_cookie() {
        let response = send(
            router(auth(AuthMode::Key), None),
            "GET",
            "/index.html?key=s3cret&tab=archive",
            &[],
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/index.html?tab=archive"
        );
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with(&format!("dashboard_auth={}", hash_token("s3cret"))));
        assert!(cookie.contains("Max-Age=2592000"));
        assert!(!cookie.contains("Secure"));
    }

    #[tokio::test]
    async fn test_key_exchange_secure_behind_tls_proxy() {
        let response = send(
            router(auth(AuthMode::Both), None),
            "GET",
            "/api/sessions?key=s3cret",
            &[("x-forwarded-proto", "https")],
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.ends_with("; Secure"));
    }

    #[tokio::test]
    async fn test_cookie_grants_access() {
        let cookie = format!("theme=dark; dashboard_auth={}", hash_token("s3cret"));
        let response = send(
            router(auth(AuthMode::Key), None),
            "GET",
            "/api/sessions",
            &[("cookie", &cookie)],
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_everywhere() {
        for uri in ["/api/sessions?key=nope", "/index.html?key=nope"] {
            let response = send(router(auth(AuthMode::Key), None), "GET", uri, &[]).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["error"], "Invalid key");
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_only_block_api() {
        let response = send(router(auth(AuthMode::Login), None), "GET", "/api/sessions", &[]).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(router(auth(AuthMode::Login), None), "GET", "/index.html", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(router(auth(AuthMode::Login), None), "GET", "/api/config", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bearer_modes() {
        let bearer = [("authorization", "Bearer s3cret")];
        let ok = send(router(auth(AuthMode::Login), None), "GET", "/api/sessions", &bearer).await;
        assert_eq!(ok.status(), StatusCode::OK);

        let key_only = send(router(auth(AuthMode::Key), None), "GET", "/api/sessions", &bearer).await;
        assert_eq!(key_only.status(), StatusCode::UNAUTHORIZED);

        let wrong = send(
            router(auth(AuthMode::Login), None),
            "GET",
            "/api/sessions",
            &[("authorization", "Bearer s3cre")],
        )
        .await;
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_disabled_without_token() {
        let config = AuthConfig {
            mode: AuthMode::Login,
            token: None,
            ..AuthConfig::default()
        };
        let response = send(router(config, None), "GET", "/api/sessions", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_read_only_wins_over_auth() {
        let config = AuthConfig {
            read_only: true,
            ..auth(AuthMode::Login)
        };
        // No credentials at all, still Forbidden rather than Unauthorized.
        let response = send(router(config.clone(), None), "POST", "/api/archive", &[]).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let reads = send(
            router(config, None),
            "GET",
            "/api/archive",
            &[("authorization", "Bearer s3cret")],
        )
        .await;
        assert_eq!(reads.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_only_when_configured() {
        let plain = send(router(AuthConfig::default(), None), "GET", "/api/config", &[]).await;
        assert!(plain
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());

        let preflight = send(
            router(auth(AuthMode::Login), Some("https://ops.example")),
            "OPTIONS",
            "/api/sessions",
            &[],
        )
        .await;
        assert_eq!(preflight.status(), StatusCode::OK);
        assert_eq!(
            preflight.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://ops.example"
        );
        assert_eq!(
            preflight.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, OPTIONS"
        );
    }
}
