//! `GET /health`: aggregate readiness across the persistence store, the
//! session pool, and the circuit breaker.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::AppState;

/// Per-component health status.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    /// Fully operational.
    Healthy,
    /// Operational but impaired (some capacity or data loss).
    Degraded,
    /// Not operational.
    Unhealthy,
}

#[derive(Serialize)]
struct SessionPoolDetails {
    total: u64,
    healthy: u64,
    quarantined: u64,
    expired: u64,
    revoked: u64,
    avg_failure_rate: f64,
}

#[derive(Serialize)]
struct ComponentReport {
    status: ComponentStatus,
    details: serde_json::Value,
}

#[derive(Serialize)]
struct HealthReport {
    status: ComponentStatus,
    database: ComponentReport,
    session_pool: ComponentReport,
    circuit_breaker: ComponentReport,
}

/// Handles `GET /health`. Returns 200 for `healthy`/`degraded`, 503 for
/// `unhealthy`.
pub async fn health(State(state): State<AppState>) -> Response {
    let database_ok = state.persistence.get_session(uuid::Uuid::nil()).await;
    let database_status = match database_ok {
        Err(crate::services::persistence::PersistenceError::Unavailable(_)) => ComponentStatus::Unhealthy,
        _ => ComponentStatus::Healthy,
    };

    let stats = state.pool.stats();
    let session_pool_status = if stats.total == 0 {
        ComponentStatus::Degraded
    } else if stats.healthy == 0 {
        ComponentStatus::Unhealthy
    } else if stats.avg_failure_rate >= state.config.failure_threshold {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Healthy
    };

    let circuit_status =
        if state.coordinator.circuit_open() { ComponentStatus::Degraded } else { ComponentStatus::Healthy };

    let overall = [database_status, session_pool_status, circuit_status]
        .into_iter()
        .max_by_key(|s| match s {
            ComponentStatus::Healthy => 0,
            ComponentStatus::Degraded => 1,
            ComponentStatus::Unhealthy => 2,
        })
        .unwrap_or(ComponentStatus::Healthy);

    let report = HealthReport {
        status: overall,
        database: ComponentReport { status: database_status, details: serde_json::json!({}) },
        session_pool: ComponentReport {
            status: session_pool_status,
            details: serde_json::to_value(SessionPoolDetails {
                total: stats.total,
                healthy: stats.healthy,
                quarantined: stats.quarantined,
                expired: stats.expired,
                revoked: stats.revoked,
                avg_failure_rate: stats.avg_failure_rate,
            })
            .unwrap_or_default(),
        },
        circuit_breaker: ComponentReport {
            status: circuit_status,
            details: serde_json::json!({ "open": state.coordinator.circuit_open() }),
        },
    };

    let status_code = if overall == ComponentStatus::Unhealthy { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    (status_code, Json(report)).into_response()
}
