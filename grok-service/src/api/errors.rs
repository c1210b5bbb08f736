//! Maps internal error types onto the wire error body:
//! `{error: {type, message, request_id}}`, `message` never containing
//! cookie material.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use grok_types::ProxyErrorKind;
use serde::Serialize;
use uuid::Uuid;

use crate::services::resilience::coordinator::CoordinatorError;
use crate::services::telemetry;

/// The wire shape of an error body.
#[derive(Serialize)]
pub struct ErrorBody {
    error: ErrorDetail,
    #[serde(skip)]
    kind: ProxyErrorKind,
}

#[derive(Serialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: ProxyErrorKind,
    message: String,
    request_id: Uuid,
}

impl ErrorBody {
    /// Builds an error body, redacting `message` before it is ever
    /// serialized.
    pub fn new(kind: ProxyErrorKind, message: impl Into<String>, request_id: Uuid) -> Self {
        Self {
            kind,
            error: ErrorDetail { kind, message: telemetry::redact(&message.into()), request_id },
        }
    }
}

impl IntoResponse for ErrorBody {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        // `upstream_status` carries the real upstream 4xx for
        // `UpstreamRejected`; every other kind falls back to its fixed
        // `http_status()` mapping.
        let status = self
            .upstream_status
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or_else(|| StatusCode::from_u16(self.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR));
        let body = ErrorBody::new(self.kind, self.message, self.request_id);
        (status, Json(body)).into_response()
    }
}

/// A validation failure caught before the coordinator is ever invoked (bad
/// request body, missing/invalid `Authorization` header).
pub struct ValidationError {
    /// `validation_error` or `authentication_required`.
    pub kind: ProxyErrorKind,
    /// A human-readable message.
    pub message: String,
}

impl IntoResponse for ValidationError {
    fn into_response(self) -> Response {
        ErrorBody::new(self.kind, self.message, Uuid::new_v4()).into_response()
    }
}
