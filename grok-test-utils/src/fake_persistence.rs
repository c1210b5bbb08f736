//! An in-memory [`PersistenceGateway`] fake.
//!
//! Stands in for `PostgresGateway` in unit and integration tests so they
//! never need a live database. Enforces the same uniqueness constraint on
//! `(provider, cookie_hash)` the real store does via a unique index, but
//! applies status transitions unconditionally — the same division of
//! responsibility `PostgresGateway` has, since the
//! [`SessionPool`](grok_service::services::session_pool::SessionPool) is the
//! sole place permitted transitions are checked.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use grok_service::services::persistence::{PersistenceError, PersistenceGateway, SessionFilter};
use grok_service::services::session_pool::hash_cookie;
use grok_types::{Generation, Session, SessionStatus, TokenUsage};
use parking_lot::Mutex;
use secrecy::{ExposeSecret as _, SecretString};
use uuid::Uuid;

#[derive(Default)]
struct Store {
    sessions: HashMap<Uuid, Session>,
    generations: Vec<Generation>,
    token_usage: Vec<TokenUsage>,
}

/// An in-memory stand-in for [`PersistenceGateway`], cheaply cloneable (all
/// clones share the same backing store).
#[derive(Clone, Default)]
pub struct FakePersistenceGateway {
    store: Arc<Mutex<Store>>,
}

impl FakePersistenceGateway {
    /// Builds an empty fake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a session directly into the store, bypassing the duplicate-hash
    /// check `insert_session` applies (tests construct sessions with
    /// specific ids/counters that `insert_session` can't express).
    pub fn seed(&self, session: Session) -> Uuid {
        let id = session.id;
        self.store.lock().sessions.insert(id, session);
        id
    }

    /// Snapshots the current state of one session, for assertions.
    pub fn session(&self, id: Uuid) -> Option<Session> {
        self.store.lock().sessions.get(&id).cloned()
    }

    /// Snapshots every generation row inserted so far, in insertion order.
    pub fn generations(&self) -> Vec<Generation> {
        self.store.lock().generations.clone()
    }

    /// Snapshots every token-usage row inserted so far, in insertion order.
    pub fn token_usage_rows(&self) -> Vec<TokenUsage> {
        self.store.lock().token_usage.clone()
    }
}

#[async_trait]
impl PersistenceGateway for FakePersistenceGateway {
    async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>, PersistenceError> {
        let store = self.store.lock();
        let mut sessions: Vec<Session> = store
            .sessions
            .values()
            .filter(|s| filter.status.is_none_or(|st| st == s.status))
            .filter(|s| filter.provider.as_deref().is_none_or(|p| p == s.provider))
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.last_used_at);
        Ok(sessions)
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, PersistenceError> {
        self.store.lock().sessions.get(&id).cloned().ok_or(PersistenceError::NotFound)
    }

    async fn insert_session(
        &self,
        cookie_material: SecretString,
        provider: String,
        metadata: serde_json::Value,
    ) -> Result<Session, PersistenceError> {
        let cookie_hash = hash_cookie(cookie_material.expose_secret());
        let mut store = self.store.lock();
        if store.sessions.values().any(|s| s.provider == provider && s.cookie_hash == cookie_hash) {
            return Err(PersistenceError::Duplicate);
        }
        let session = Session {
            id: Uuid::new_v4(),
            cookie_material,
            cookie_hash,
            provider,
            created_at: Utc::now(),
            last_used_at: None,
            expires_at: None,
            last_health_check_at: None,
            usage_count: 0,
            success_count: 0,
            failure_count: 0,
            status: SessionStatus::Healthy,
            metadata,
        };
        store.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn update_status(
        &self,
        id: Uuid,
        new_status: SessionStatus,
        _reason: Option<String>,
    ) -> Result<(), PersistenceError> {
        let mut store = self.store.lock();
        let session = store.sessions.get_mut(&id).ok_or(PersistenceError::NotFound)?;
        session.status = new_status;
        Ok(())
    }

    async fn increment_usage(&self, id: Uuid, success: bool, _delta_latency_ms: i64) -> Result<(), PersistenceError> {
        let mut store = self.store.lock();
        let session = store.sessions.get_mut(&id).ok_or(PersistenceError::NotFound)?;
        session.usage_count += 1;
        if success {
            session.success_count += 1;
        } else {
            session.failure_count += 1;
        }
        session.last_used_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_health_checked(&self, id: Uuid) -> Result<(), PersistenceError> {
        let mut store = self.store.lock();
        let session = store.sessions.get_mut(&id).ok_or(PersistenceError::NotFound)?;
        session.last_health_check_at = Some(Utc::now());
        Ok(())
    }

    async fn insert_generation(&self, row: Generation) -> Result<Uuid, PersistenceError> {
        let id = row.id;
        self.store.lock().generations.push(row);
        Ok(id)
    }

    async fn insert_token_usage(&self, row: TokenUsage) -> Result<Uuid, PersistenceError> {
        let id = row.id;
        self.store.lock().token_usage.push(row);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_duplicate_cookie_hash_per_provider() {
        let gateway = FakePersistenceGateway::new();
        gateway
            .insert_session(SecretString::from("cookie-a"), "grok".into(), serde_json::json!({}))
            .await
            .unwrap();
        let err = gateway
            .insert_session(SecretString::from("cookie-a"), "grok".into(), serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Duplicate));
    }

    #[tokio::test]
    async fn increment_usage_is_monotonic() {
        let gateway = FakePersistenceGateway::new();
        let session =
            gateway.insert_session(SecretString::from("cookie-b"), "grok".into(), serde_json::json!({})).await.unwrap();
        gateway.increment_usage(session.id, true, 120).await.unwrap();
        gateway.increment_usage(session.id, false, 80).await.unwrap();
        let updated = gateway.get_session(session.id).await.unwrap();
        assert_eq!(updated.usage_count, 2);
        assert_eq!(updated.success_count, 1);
        assert_eq!(updated.failure_count, 1);
    }
}
