//! API error type and its JSON rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::sessions::settings::SettingsError;
use crate::sessions::SessionError;

/// Error returned by API handlers, rendered as `{"error": ..., "kind": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Parse(String),
    #[error("{0}")]
    Io(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Validation(_) => "validation",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::AlreadyExists(_) => "already_exists",
            ApiError::Parse(_) => "parse",
            ApiError::Io(_) => "io",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::AlreadyExists(_) => StatusCode::CONFLICT,
            ApiError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "request failed");
        }
        (
            status,
            Json(json!({ "error": self.to_string(), "kind": self.kind() })),
        )
            .into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(what) => ApiError::NotFound(format!("Session not found: {what}")),
            SessionError::AlreadyExists(what) => {
                ApiError::AlreadyExists(format!("Session already active: {what}"))
            }
            SessionError::Parse(e) => ApiError::Parse(e.to_string()),
            SessionError::Io(e) | SessionError::Serialization(e) => ApiError::Io(e),
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Validation(msg) => ApiError::Validation(msg),
            SettingsError::Io(msg) => ApiError::Io(msg),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Io(format!("background task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::ParseError;

    #[test]
    fn test_status_per_kind() {
        let cases = [
            (ApiError::NotFound(String::new()), 404),
            (ApiError::BadRequest(String::new()), 400),
            (ApiError::Validation(String::new()), 400),
            (ApiError::Unauthorized(String::new()), 401),
            (ApiError::Forbidden(String::new()), 403),
            (ApiError::AlreadyExists(String::new()), 409),
            (ApiError::Parse(String::new()), 422),
            (ApiError::Io(String::new()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(err.status().as_u16(), code, "{}", err.kind());
        }
    }

    #[test]
    fn test_session_error_mapping() {
        assert_eq!(
            ApiError::from(SessionError::NotFound("abc".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(SessionError::AlreadyExists("abc".into())).status(),
            StatusCode::CONFLICT
        );
        let parse = SessionError::Parse(ParseError::Malformed {
            line: 1,
            reason: "not an object".into(),
        });
        assert_eq!(ApiError::from(parse).kind(), "parse");
        assert_eq!(ApiError::from(SessionError::Io("disk".into())).kind(), "io");
        assert_eq!(
            ApiError::from(SettingsError::Validation("bad".into())),
            ApiError::Validation("bad".into())
        );
    }

    #[tokio::test]
    async fn test_body_shape() {
        let response = ApiError::Forbidden("Dashboard is in read-only mode".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Dashboard is in read-only mode");
        assert_eq!(json["kind"], "forbidden");
    }
}
