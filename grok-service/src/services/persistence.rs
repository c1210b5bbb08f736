//! Persistence gateway: a narrow, typed surface over a relational store.
//!
//! This module defines the [`PersistenceGateway`] trait and its error type.
//! The only implementation shipped here is [`postgres::PostgresGateway`];
//! hosting applications or tests may provide others — an in-memory fake
//! lives in `grok-test-utils` — behind the same interface.

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use grok_types::{Generation, Session, SessionStatus, TokenUsage};
use uuid::Uuid;

/// Optional filter applied by [`PersistenceGateway::list_sessions`].
#[derive(Clone, Debug, Default)]
pub struct SessionFilter {
    /// Restrict to sessions with this stored status.
    pub status: Option<SessionStatus>,
    /// Restrict to sessions for this provider.
    pub provider: Option<String>,
}

/// Errors the persistence gateway may raise.
///
/// `Unavailable` is the one variant the rest of the system treats as
/// non-fatal: the proxy keeps serving traffic from its in-memory projection
/// and marks the affected telemetry row incomplete.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// No row with the given id.
    #[error("not found")]
    NotFound,
    /// A session with the same `(provider, cookie_hash)` already exists.
    #[error("duplicate session for this provider and cookie")]
    Duplicate,
    /// The requested status transition is not one of the permitted
    /// directions.
    #[error("illegal status transition")]
    IllegalTransition,
    /// The store could not be reached after the gateway's own retries.
    #[error("persistence store unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    /// Whether the gateway should retry the operation that produced this
    /// error (connectivity loss, not a logical rejection).
    pub fn is_retryable(&self) -> bool {
        matches!(self, PersistenceError::Unavailable(_))
    }
}

/// Narrow, typed, transactional surface over the relational store backing
/// sessions, generations, and token-usage rows.
///
/// Each method is one transactional unit; concurrent `increment_usage` calls
/// on the same id must serialize without losing updates.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Lists sessions matching `filter`, ordered by `last_used_at` ascending
    /// with nulls first (supports least-recently-used selection).
    async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>, PersistenceError>;

    /// Fetches one session by id.
    async fn get_session(&self, id: Uuid) -> Result<Session, PersistenceError>;

    /// Inserts a new session. Fails with [`PersistenceError::Duplicate`] if a
    /// session with the same `(provider, cookie_hash)` already exists.
    async fn insert_session(
        &self,
        cookie_material: secrecy::SecretString,
        provider: String,
        metadata: serde_json::Value,
    ) -> Result<Session, PersistenceError>;

    /// Applies a status transition, rejecting any not on the permitted list.
    async fn update_status(
        &self,
        id: Uuid,
        new_status: SessionStatus,
        reason: Option<String>,
    ) -> Result<(), PersistenceError>;

    /// Atomically increments `usage_count`, and `success_count` or
    /// `failure_count` depending on `success`, and sets `last_used_at = now()`.
    async fn increment_usage(
        &self,
        id: Uuid,
        success: bool,
        delta_latency_ms: i64,
    ) -> Result<(), PersistenceError>;

    /// Sets `last_health_check_at = now()` for a session.
    async fn mark_health_checked(&self, id: Uuid) -> Result<(), PersistenceError>;

    /// Inserts a generation row, returning its id.
    async fn insert_generation(&self, row: Generation) -> Result<Uuid, PersistenceError>;

    /// Inserts a token-usage row, returning its id.
    async fn insert_token_usage(&self, row: TokenUsage) -> Result<Uuid, PersistenceError>;
}
