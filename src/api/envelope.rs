//! Response envelope for the control endpoints.
//!
//! Control responses are wrapped in [`ApiResponse`] (success) or
//! [`ApiErrorResponse`] (error). `GET /v1/` returns the bare reading on
//! success and only uses the error shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

use crate::storage::LogError;

/// Error code for "no reading yet".
pub const NOT_READY: &str = "NOT_READY";

/// Metadata included in every enveloped success response.
#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
    pub version: &'static str,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: "1",
        }
    }
}

/// `{ "data": T, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    fn build(status: StatusCode, data: T) -> Response {
        let body = Self {
            data,
            meta: ResponseMeta::default(),
        };
        (status, axum::Json(body)).into_response()
    }

    pub fn ok(data: T) -> Response {
        Self::build(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Response {
        Self::build(StatusCode::CREATED, data)
    }
}

/// Error detail inside [`ApiErrorResponse`].
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// `{ "error": { "code": "...", "message": "..." } }`
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
}

impl ApiErrorResponse {
    fn build(status: StatusCode, code: &str, msg: impl Into<String>) -> Response {
        (status, axum::Json(Self::body(code, msg))).into_response()
    }

    pub fn not_found(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::NOT_FOUND, "NOT_FOUND", msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::CONFLICT, "CONFLICT", msg)
    }

    pub fn internal(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
    }

    /// 503 with code [`NOT_READY`]: the data logger has not produced a reading yet.
    pub fn not_ready(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::SERVICE_UNAVAILABLE, NOT_READY, msg)
    }

    /// Error body without a status, for SSE events.
    pub fn body(code: &str, msg: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: msg.into(),
            },
        }
    }

    /// Map a log control failure onto its HTTP status.
    pub fn from_log_error(err: &LogError) -> Response {
        match err {
            LogError::AlreadyAttached(_) | LogError::NotAttached => Self::conflict(err.to_string()),
            LogError::InvalidPath { .. } => Self::bad_request(err.to_string()),
            LogError::WidthMismatch { .. } | LogError::Io { .. } => Self::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ok_response_shape() {
        let resp = ApiResponse::ok(serde_json::json!({"hello": "world"}));
        assert_eq!(resp.status(), StatusCode::OK);

        let v = body_json(resp).await;
        assert_eq!(v["data"]["hello"], "world");
        assert_eq!(v["meta"]["version"], "1");
    }

    #[tokio::test]
    async fn test_error_response_shape() {
        let resp = ApiErrorResponse::not_ready("no reading yet");
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let v = body_json(resp).await;
        assert_eq!(v["error"]["code"], "NOT_READY");
        assert_eq!(v["error"]["message"], "no reading yet");
        assert!(v.get("meta").is_none());
    }

    #[test]
    fn test_log_errors_map_to_status() {
        let conflict = ApiErrorResponse::from_log_error(&LogError::AlreadyAttached(PathBuf::from("a.tsv")));
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        let conflict = ApiErrorResponse::from_log_error(&LogError::NotAttached);
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let escape = LogError::InvalidPath {
            path: PathBuf::from("../etc/passwd"),
            reason: "must stay inside the log directory",
        };
        assert_eq!(
            ApiErrorResponse::from_log_error(&escape).status(),
            StatusCode::BAD_REQUEST
        );

        let io = LogError::Io {
            path: PathBuf::from("/nope/a.tsv"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(
            ApiErrorResponse::from_log_error(&io).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
