//! The user-visible error taxonomy, shared between the API layer (which
//! maps each variant to an HTTP status) and the persistence/resilience
//! layers (which raise these as the final, terminal outcome of a request).

use serde::{Deserialize, Serialize};

/// One of the fixed error classes a caller may observe from `/v1/chat/completions`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ProxyErrorKind {
    /// Malformed or missing request fields.
    #[error("validation_error")]
    ValidationError,
    /// Missing or invalid `Authorization` header.
    #[error("authentication_required")]
    AuthenticationRequired,
    /// No session with effective status `healthy` was available for the
    /// requested provider.
    #[error("no_healthy_sessions")]
    NoHealthySessions,
    /// The circuit breaker is `open`.
    #[error("service_unavailable")]
    ServiceUnavailable,
    /// The upstream call exceeded its per-attempt timeout.
    #[error("upstream_timeout")]
    UpstreamTimeout,
    /// Upstream returned a terminal client-side class (`client_error`).
    #[error("upstream_rejected")]
    UpstreamRejected,
    /// The persistence gateway is unreachable; the request still completed,
    /// but its telemetry row is incomplete.
    #[error("persistence_unavailable")]
    PersistenceUnavailable,
    /// Anything not covered above.
    #[error("internal_error")]
    InternalError,
}

impl ProxyErrorKind {
    /// The HTTP status this error class is surfaced as.
    pub fn http_status(self) -> u16 {
        match self {
            ProxyErrorKind::ValidationError => 400,
            ProxyErrorKind::AuthenticationRequired => 401,
            ProxyErrorKind::NoHealthySessions => 503,
            ProxyErrorKind::ServiceUnavailable => 503,
            ProxyErrorKind::UpstreamTimeout => 504,
            // The generic default for a terminal client-class outcome; the
            // coordinator overrides this with the upstream's actual 4xx
            // (400/404/422) when one was observed.
            ProxyErrorKind::UpstreamRejected => 400,
            ProxyErrorKind::PersistenceUnavailable => 200,
            ProxyErrorKind::InternalError => 500,
        }
    }

    /// The `type` field of the `{error:{type,message,request_id}}` body.
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyErrorKind::ValidationError => "validation_error",
            ProxyErrorKind::AuthenticationRequired => "authentication_required",
            ProxyErrorKind::NoHealthySessions => "no_healthy_sessions",
            ProxyErrorKind::ServiceUnavailable => "service_unavailable",
            ProxyErrorKind::UpstreamTimeout => "upstream_timeout",
            ProxyErrorKind::UpstreamRejected => "upstream_rejected",
            ProxyErrorKind::PersistenceUnavailable => "persistence_unavailable",
            ProxyErrorKind::InternalError => "internal_error",
        }
    }
}
