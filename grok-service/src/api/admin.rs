//! Admin surface: thin wrappers over the session pool's mutation points.
//! Authentication is handled the same way as the rest of the inbound
//! surface, by `AppState`'s shared bearer-key check.

use axum::Json;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use grok_types::{ProxyErrorKind, Session, SessionStatus};
use secrecy::SecretString;
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::api::errors::ErrorBody;
use crate::services::persistence::PersistenceError;

/// `POST /admin/sessions` request body.
#[derive(Deserialize)]
pub struct CreateSessionRequest {
    /// The raw cookie material.
    pub cookie_material: String,
    /// The upstream provider tag this session authenticates against.
    pub provider: String,
    /// Optional free-form annotations.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// `GET /admin/sessions` — lists sessions from the in-memory projection
/// (kept current by the health loop and by every admin mutation below).
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<Session>> {
    Json(state.pool.list())
}

/// `POST /admin/sessions`.
pub async fn create_session(State(state): State<AppState>, Json(body): Json<CreateSessionRequest>) -> Response {
    let result = state
        .persistence
        .insert_session(SecretString::from(body.cookie_material), body.provider, body.metadata)
        .await;
    match result {
        Ok(session) => {
            state.pool.upsert(session.clone());
            Json(session).into_response()
        }
        Err(err) => persistence_error_response(err),
    }
}

/// `POST /admin/sessions/:id/quarantine`.
pub async fn quarantine_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    transition(state, id, SessionStatus::Quarantined).await
}

/// `POST /admin/sessions/:id/revoke`.
pub async fn revoke_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    transition(state, id, SessionStatus::Revoked).await
}

/// `POST /admin/sessions/:id/activate` — the only path that moves a
/// session `quarantined -> healthy`.
pub async fn activate_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.pool.activate(id).await {
        Ok(()) => Json(serde_json::json!({ "id": id, "status": "healthy" })).into_response(),
        Err(err) => persistence_error_response(err),
    }
}

async fn transition(state: AppState, id: Uuid, new_status: SessionStatus) -> Response {
    match state.pool.propose_transition(id, new_status, Some("admin".to_string())).await {
        Ok(()) => Json(serde_json::json!({ "id": id, "status": new_status.to_string() })).into_response(),
        Err(err) => persistence_error_response(err),
    }
}

fn persistence_error_response(err: PersistenceError) -> Response {
    let kind = match err {
        PersistenceError::NotFound => ProxyErrorKind::ValidationError,
        PersistenceError::Duplicate => ProxyErrorKind::ValidationError,
        PersistenceError::IllegalTransition => ProxyErrorKind::ValidationError,
        PersistenceError::Unavailable(_) => ProxyErrorKind::PersistenceUnavailable,
    };
    ErrorBody::new(kind, err.to_string(), Uuid::new_v4()).into_response()
}
