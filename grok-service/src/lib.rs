#![deny(missing_docs)]
//! `grok-service`: the core reverse-proxy engine — session pool, upstream
//! client, resilience coordinator, and the HTTP surface that fronts them.
//!
//! Hosting binaries (e.g. `grok-proxy`) construct a [`ProxyServiceBuilder`],
//! hand it a [`PersistenceGateway`](services::persistence::PersistenceGateway)
//! implementation, and get back a ready-to-serve `axum::Router` plus the
//! background health-loop task's join handle and cancellation token.

pub mod api;
pub mod config;
pub mod metrics;
pub mod services;

use std::collections::HashSet;
use std::sync::Arc;

use axum::Router;
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::errors::ErrorBody;
use crate::config::ProxyConfig;
use crate::services::persistence::PersistenceGateway;
use crate::services::resilience::circuit_breaker::CircuitBreaker;
use crate::services::resilience::coordinator::ResilienceCoordinator;
use crate::services::session_pool::{hash_cookie, SessionPool};
use crate::services::upstream_client::UpstreamClient;
use grok_types::ProxyErrorKind;

/// Shared application state threaded through every handler via axum's
/// `State` extractor. Cheap to clone: every field is an `Arc` or an
/// already-`Arc`-backed handle.
#[derive(Clone)]
pub struct AppState {
    /// The immutable startup configuration.
    pub config: Arc<ProxyConfig>,
    /// The in-memory session pool.
    pub pool: SessionPool,
    /// The per-request resilience coordinator.
    pub coordinator: Arc<ResilienceCoordinator>,
    /// The persistence gateway, for admin operations and health checks.
    pub persistence: Arc<dyn PersistenceGateway>,
    /// Hashes of the accepted API keys; the raw keys are never retained.
    api_key_hashes: Arc<HashSet<String>>,
}

/// Assembles the session pool, resilience coordinator, and upstream client
/// into a servable `axum::Router`.
pub struct ProxyServiceBuilder {
    config: Arc<ProxyConfig>,
}

/// The running service: the router to serve, the health loop's join
/// handle, and the token that shuts both down.
pub struct ProxyService {
    /// The assembled router, ready for `axum::serve`.
    pub router: Router,
    /// The background health-loop task.
    pub health_loop: JoinHandle<()>,
    /// Cancel this to stop the health loop; the caller is responsible for
    /// also triggering `axum::serve`'s own graceful shutdown.
    pub cancellation_token: CancellationToken,
}

impl ProxyServiceBuilder {
    /// Starts a builder over `config`.
    pub fn new(config: ProxyConfig) -> Self {
        Self { config: Arc::new(config) }
    }

    /// Builds the service: reloads the session pool from `persistence`,
    /// wires the resilience coordinator, spawns the health loop, and
    /// returns the assembled router.
    pub async fn build(self, persistence: Arc<dyn PersistenceGateway>) -> eyre::Result<ProxyService> {
        let config = self.config;
        metrics::describe_metrics();

        let pool = SessionPool::new(persistence.clone(), config.clone());
        pool.reload().await.map_err(|e| eyre::eyre!("initial session pool reload failed: {e}"))?;

        let breaker = CircuitBreaker::new(config.circuit_failure_threshold, config.circuit_window, config.circuit_recovery_timeout);
        let upstream = Arc::new(UpstreamClient::new(config.upstream_base_url.clone(), config.upstream_attempt_timeout)?);
        let coordinator =
            Arc::new(ResilienceCoordinator::new(config.clone(), pool.clone(), upstream, breaker, persistence.clone()));

        let api_key_hashes = Arc::new(config.api_keys.iter().map(|k| hash_cookie(k)).collect::<HashSet<_>>());

        let state = AppState { config: config.clone(), pool: pool.clone(), coordinator, persistence, api_key_hashes };

        let cancellation_token = CancellationToken::new();
        let health_loop = tokio::spawn(services::health_loop::run(pool, config.clone(), cancellation_token.clone()));

        let v1_router = Router::new()
            .route("/chat/completions", post(api::chat::chat_completions))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_key));

        let admin_router = Router::new()
            .route("/sessions", get(api::admin::list_sessions).post(api::admin::create_session))
            .route("/sessions/{id}/quarantine", post(api::admin::quarantine_session))
            .route("/sessions/{id}/revoke", post(api::admin::revoke_session))
            .route("/sessions/{id}/activate", post(api::admin::activate_session))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_key));

        let router = Router::new()
            .route("/health", get(api::health::health))
            .nest("/v1", v1_router)
            .nest("/admin", admin_router)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state);

        Ok(ProxyService { router, health_loop, cancellation_token })
    }
}

/// Rejects any request without a valid `Authorization: Bearer <key>` header.
/// Compares a hash of the presented key against the precomputed set, never
/// the raw key.
async fn require_bearer_key(State(state): State<AppState>, headers: HeaderMap, request: Request, next: Next) -> Response {
    let Some(presented) = extract_bearer(&headers) else {
        return ErrorBody::new(ProxyErrorKind::AuthenticationRequired, "missing bearer token", uuid::Uuid::new_v4())
            .into_response();
    };
    if !state.api_key_hashes.contains(&hash_cookie(&presented)) {
        return ErrorBody::new(ProxyErrorKind::AuthenticationRequired, "invalid bearer token", uuid::Uuid::new_v4())
            .into_response();
    }
    next.run(request).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(str::to_string)
}
