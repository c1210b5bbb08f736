//! The session pool: an in-memory projection of session rows, classified
//! and handed out under a fair policy.
//!
//! Status changes and the in-memory lease counters are protected together
//! behind one lock, so a concurrent `acquire` and `release` never observe a
//! torn view of a session's status and lease count.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use grok_types::{AttemptOutcome, Session, SessionStatus};
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

use super::persistence::{PersistenceError, PersistenceGateway, SessionFilter};
use crate::config::ProxyConfig;
use crate::metrics::{METRICS_ID_ACTIVE_SESSIONS, METRICS_ID_SESSION_ROTATIONS_TOTAL};

/// Stable hash of a cookie, used as the per-provider uniqueness key. Reuses
/// `blake3` (already part of this workspace's dependency stack) rather than
/// pulling in a second hashing crate.
pub fn hash_cookie(cookie_material: &str) -> String {
    blake3::hash(cookie_material.as_bytes()).to_hex().to_string()
}

/// No healthy session was available for the requested provider, even after
/// the bounded wait.
#[derive(Debug, thiserror::Error)]
#[error("no healthy sessions available for provider")]
pub struct NoCapacity;

/// Aggregate health summary, a pure read over the in-memory projection.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct PoolStats {
    /// Total number of sessions tracked.
    pub total: u64,
    /// Sessions with effective status `healthy`.
    pub healthy: u64,
    /// Sessions with effective status `quarantined`.
    pub quarantined: u64,
    /// Sessions with effective status `expired`.
    pub expired: u64,
    /// Sessions with effective status `revoked`.
    pub revoked: u64,
    /// Mean `failure_count / usage_count` across all sessions with nonzero
    /// usage.
    pub avg_failure_rate: f64,
}

/// Per-session consecutive-outcome tracking used only to decide automatic
/// quarantine/revocation proposals in `release`; never persisted, reset by
/// any outcome other than the one being counted.
#[derive(Clone, Copy, Debug, Default)]
struct ConsecutiveFailures {
    auth_failure: u32,
    anti_bot: u32,
}

struct PoolState {
    sessions: HashMap<Uuid, Session>,
    /// In-flight lease counts, never written to the store.
    leases: HashMap<Uuid, u32>,
    consecutive: HashMap<Uuid, ConsecutiveFailures>,
}

/// Computes the *effective* status of a session at read time: the first
/// matching rule below wins, independent of the stored `status` until the
/// pool (or the health loop) persists the demotion.
pub fn effective_status(session: &Session, config: &ProxyConfig, now: chrono::DateTime<Utc>) -> SessionStatus {
    if session.status == SessionStatus::Revoked {
        return SessionStatus::Revoked;
    }
    if let Some(expires_at) = session.expires_at
        && expires_at <= now
    {
        return SessionStatus::Expired;
    }
    if session.usage_count >= config.rotation_threshold {
        return SessionStatus::Expired;
    }
    if now.signed_duration_since(session.created_at)
        > chrono::Duration::from_std(config.max_age).unwrap_or(chrono::Duration::MAX)
    {
        return SessionStatus::Expired;
    }
    // A stored `quarantined` session stays quarantined regardless of
    // counters: re-promotion is an explicit operator action only (`activate`),
    // never something the classifier infers from usage/failure counts.
    if session.status == SessionStatus::Quarantined {
        return SessionStatus::Quarantined;
    }
    if session.usage_count >= 20 && session.failure_rate() >= config.failure_threshold {
        return SessionStatus::Quarantined;
    }
    SessionStatus::Healthy
}

/// The in-memory session pool. Cheaply cloneable; all clones share the same
/// underlying state via an `Arc<Mutex<..>>`.
#[derive(Clone)]
pub struct SessionPool {
    state: Arc<Mutex<PoolState>>,
    persistence: Arc<dyn PersistenceGateway>,
    config: Arc<ProxyConfig>,
    notify: Arc<Notify>,
}

/// A session leased out of the pool for exactly one attempt.
pub struct LeasedSession {
    /// The leased session, as it looked at acquisition time.
    pub session: Session,
}

impl SessionPool {
    /// Builds an empty pool; call [`SessionPool::reload`] before serving
    /// traffic so the projection reflects the store.
    pub fn new(persistence: Arc<dyn PersistenceGateway>, config: Arc<ProxyConfig>) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                sessions: HashMap::new(),
                leases: HashMap::new(),
                consecutive: HashMap::new(),
            })),
            persistence,
            config,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Reloads every non-revoked session from the persistence gateway into
    /// the projection. Used at startup and by the health loop.
    pub async fn reload(&self) -> Result<(), PersistenceError> {
        let rows = self.persistence.list_sessions(SessionFilter::default()).await?;
        let mut state = self.state.lock();
        for row in rows {
            if row.status != SessionStatus::Revoked {
                state.sessions.insert(row.id, row);
            }
        }
        Ok(())
    }

    /// Inserts or refreshes a single session in the projection (used after
    /// an admin mutation so the in-memory view doesn't wait for the next
    /// health-loop tick).
    pub fn upsert(&self, session: Session) {
        self.state.lock().sessions.insert(session.id, session);
    }

    /// Acquires a session for `provider`.
    ///
    /// Candidate set: sessions with effective status `healthy` for this
    /// provider. Tie-break: fewest in-flight leases, then smallest
    /// `usage_count`, then oldest `last_used_at`. If none are free, waits up
    /// to `acquire_wait_timeout` (notified on every `release`) before giving
    /// up with [`NoCapacity`].
    pub async fn acquire(&self, provider: &str) -> Result<LeasedSession, NoCapacity> {
        self.acquire_excluding(provider, &std::collections::HashSet::new()).await
    }

    /// Same as [`SessionPool::acquire`], but never selects a session whose
    /// id is in `excluded` — used by the coordinator to avoid re-trying a
    /// session already attempted within the same inbound request, unless it
    /// is the only healthy candidate left.
    pub async fn acquire_excluding(&self, provider: &str, excluded: &std::collections::HashSet<Uuid>) -> Result<LeasedSession, NoCapacity> {
        let deadline = tokio::time::Instant::now() + self.config.acquire_wait_timeout;
        loop {
            if let Some(session) = self.try_acquire(provider, excluded) {
                return Ok(session);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(NoCapacity);
            }
            let notified = self.notify.notified();
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    fn try_acquire(&self, provider: &str, excluded: &std::collections::HashSet<Uuid>) -> Option<LeasedSession> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let config = self.config.clone();

        let is_eligible = |s: &&Session, respect_excluded: bool| {
            s.provider == provider
                && effective_status(s, &config, now) == SessionStatus::Healthy
                && (!respect_excluded || !excluded.contains(&s.id))
        };
        let tie_break = |s: &&Session| {
            let leases = *state.leases.get(&s.id).unwrap_or(&0);
            (leases, s.usage_count, s.last_used_at)
        };

        // Prefer a session not yet tried in this request; fall back to any
        // healthy candidate, since it may be the only one.
        let best_id = state
            .sessions
            .values()
            .filter(|s| is_eligible(s, true))
            .min_by_key(tie_break)
            .map(|s| s.id)
            .or_else(|| {
                state
                    .sessions
                    .values()
                    .filter(|s| is_eligible(s, false))
                    .min_by_key(tie_break)
                    .map(|s| s.id)
            })?;

        *state.leases.entry(best_id).or_insert(0) += 1;
        let session = state.sessions.get(&best_id).cloned()?;
        Some(LeasedSession { session })
    }

    /// Releases a leased session back to the pool, recording `outcome`.
    ///
    /// Persists the usage increment, proposes automatic quarantine/
    /// revocation per the consecutive-failure rules, and wakes any task
    /// waiting in [`SessionPool::acquire`].
    pub async fn release(
        &self,
        session_id: Uuid,
        outcome: AttemptOutcome,
        latency_ms: i64,
    ) -> Result<(), PersistenceError> {
        let proposal = {
            let mut state = self.state.lock();
            if let Some(count) = state.leases.get_mut(&session_id) {
                *count = count.saturating_sub(1);
            }
            let entry = state.consecutive.entry(session_id).or_default();
            let proposal = match outcome {
                AttemptOutcome::AuthFailure => {
                    entry.auth_failure += 1;
                    entry.anti_bot = 0;
                    if entry.auth_failure >= 3 {
                        Some(SessionStatus::Revoked)
                    } else {
                        Some(SessionStatus::Quarantined)
                    }
                }
                AttemptOutcome::AntiBot => {
                    entry.anti_bot += 1;
                    entry.auth_failure = 0;
                    if entry.anti_bot >= 3 {
                        Some(SessionStatus::Quarantined)
                    } else {
                        None
                    }
                }
                _ => {
                    entry.auth_failure = 0;
                    entry.anti_bot = 0;
                    None
                }
            };
            if let Some(session) = state.sessions.get_mut(&session_id) {
                session.usage_count += 1;
                if outcome.is_success() {
                    session.success_count += 1;
                } else {
                    session.failure_count += 1;
                }
                session.last_used_at = Some(Utc::now());
            }
            proposal
        };

        self.persistence
            .increment_usage(session_id, outcome.is_success(), latency_ms)
            .await?;

        if let Some(new_status) = proposal {
            self.propose_transition(session_id, new_status, Some(outcome.to_string()))
                .await?;
        }

        self.notify.notify_waiters();
        Ok(())
    }

    /// Applies a status transition both to the store and the projection,
    /// rejecting directions not on the permitted-transition list, and
    /// recording a `session_rotations_total{reason}` event.
    pub async fn propose_transition(
        &self,
        session_id: Uuid,
        new_status: SessionStatus,
        reason: Option<String>,
    ) -> Result<(), PersistenceError> {
        let current = {
            let state = self.state.lock();
            state.sessions.get(&session_id).map(|s| s.status)
        };
        let Some(current) = current else {
            return Ok(());
        };
        if !is_permitted_transition(current, new_status) {
            return Ok(());
        }
        self.persistence
            .update_status(session_id, new_status, reason.clone())
            .await?;
        {
            let mut state = self.state.lock();
            if let Some(session) = state.sessions.get_mut(&session_id) {
                session.status = new_status;
            }
        }
        metrics::counter!(METRICS_ID_SESSION_ROTATIONS_TOTAL, "reason" => reason.unwrap_or_default()).increment(1);
        Ok(())
    }

    /// Reactivates a `quarantined` session to `healthy`. Explicit operator
    /// action only; never performed automatically.
    pub async fn activate(&self, session_id: Uuid) -> Result<(), PersistenceError> {
        let current = {
            let state = self.state.lock();
            state.sessions.get(&session_id).map(|s| s.status)
        };
        if current != Some(SessionStatus::Quarantined) {
            return Err(PersistenceError::IllegalTransition);
        }
        self.persistence
            .update_status(session_id, SessionStatus::Healthy, Some("operator activate".into()))
            .await?;
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.status = SessionStatus::Healthy;
        }
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Runs one health-loop classifier pass: recomputes effective status for
    /// every tracked session and persists any automatic demotion
    /// (`healthy -> quarantined`, `healthy|quarantined -> expired`). Never
    /// re-promotes a session; reactivation is an explicit operator action.
    pub async fn run_classifier_pass(&self) -> Result<u32, PersistenceError> {
        let snapshot: Vec<(Uuid, SessionStatus, SessionStatus)> = {
            let state = self.state.lock();
            let now = Utc::now();
            state
                .sessions
                .values()
                .filter(|s| s.status != SessionStatus::Revoked)
                .map(|s| (s.id, s.status, effective_status(s, &self.config, now)))
                .collect()
        };
        let mut demotions = 0;
        for (id, current, effective) in snapshot {
            if effective != current && is_permitted_transition(current, effective) {
                self.propose_transition(id, effective, Some("health loop classifier".into()))
                    .await?;
                demotions += 1;
            }
            self.persistence.mark_health_checked(id).await?;
            let mut state = self.state.lock();
            if let Some(session) = state.sessions.get_mut(&id) {
                session.last_health_check_at = Some(Utc::now());
            }
        }
        Ok(demotions)
    }

    /// Pure read over the in-memory projection.
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let now = Utc::now();
        let mut stats = PoolStats::default();
        let mut failure_rate_sum = 0.0;
        let mut failure_rate_n = 0u64;
        for session in state.sessions.values() {
            stats.total += 1;
            match effective_status(session, &self.config, now) {
                SessionStatus::Healthy => stats.healthy += 1,
                SessionStatus::Quarantined => stats.quarantined += 1,
                SessionStatus::Expired => stats.expired += 1,
                SessionStatus::Revoked => stats.revoked += 1,
            }
            if session.usage_count > 0 {
                failure_rate_sum += session.failure_rate();
                failure_rate_n += 1;
            }
        }
        stats.avg_failure_rate = if failure_rate_n > 0 {
            failure_rate_sum / failure_rate_n as f64
        } else {
            0.0
        };
        metrics::gauge!(METRICS_ID_ACTIVE_SESSIONS, "status" => "healthy").set(stats.healthy as f64);
        metrics::gauge!(METRICS_ID_ACTIVE_SESSIONS, "status" => "quarantined").set(stats.quarantined as f64);
        metrics::gauge!(METRICS_ID_ACTIVE_SESSIONS, "status" => "expired").set(stats.expired as f64);
        metrics::gauge!(METRICS_ID_ACTIVE_SESSIONS, "status" => "revoked").set(stats.revoked as f64);
        stats
    }

    /// Lists all sessions currently in the projection (admin `list`).
    pub fn list(&self) -> Vec<Session> {
        self.state.lock().sessions.values().cloned().collect()
    }
}

/// The permitted transition directions: `healthy -> quarantined`,
/// `healthy|quarantined -> expired`, any -> `revoked`. `activate`
/// (`quarantined -> healthy`) is handled separately since it's
/// operator-only, not part of the automatic classifier.
fn is_permitted_transition(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;
    if from == to {
        return false;
    }
    matches!(
        (from, to),
        (Healthy, Quarantined) | (Healthy, Expired) | (Quarantined, Expired) | (_, Revoked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn test_config() -> Arc<ProxyConfig> {
        Arc::new(ProxyConfig {
            rotation_threshold: 500,
            max_age: StdDuration::from_secs(24 * 3600),
            failure_threshold: 0.2,
            health_check_interval: StdDuration::from_secs(30),
            max_attempts: 5,
            circuit_failure_threshold: 5,
            circuit_window: StdDuration::from_secs(60),
            circuit_recovery_timeout: StdDuration::from_secs(60),
            upstream_attempt_timeout: StdDuration::from_secs(60),
            acquire_wait_timeout: StdDuration::from_millis(50),
            persistence_min_connections: 1,
            persistence_max_connections: 1,
            db_connection_string: secrecy::SecretString::from("postgres://unused"),
            api_keys: vec![],
            upstream_base_url: "http://unused".into(),
            provider: "grok".into(),
        })
    }

    fn new_session(provider: &str) -> Session {
        Session {
            id: Uuid::new_v4(),
            cookie_material: secrecy::SecretString::from("cookie"),
            cookie_hash: hash_cookie("cookie"),
            provider: provider.to_string(),
            created_at: Utc::now(),
            last_used_at: None,
            expires_at: None,
            last_health_check_at: None,
            usage_count: 0,
            success_count: 0,
            failure_count: 0,
            status: SessionStatus::Healthy,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn classifier_retires_on_rotation_threshold() {
        let config = test_config();
        let mut session = new_session("grok");
        session.usage_count = 500;
        assert_eq!(effective_status(&session, &config, Utc::now()), SessionStatus::Expired);
    }

    #[test]
    fn classifier_quarantines_on_failure_rate() {
        let config = test_config();
        let mut session = new_session("grok");
        session.usage_count = 20;
        session.failure_count = 5;
        assert_eq!(effective_status(&session, &config, Utc::now()), SessionStatus::Quarantined);
    }

    #[test]
    fn classifier_ignores_failure_rate_below_usage_floor() {
        let config = test_config();
        let mut session = new_session("grok");
        session.usage_count = 10;
        session.failure_count = 9;
        assert_eq!(effective_status(&session, &config, Utc::now()), SessionStatus::Healthy);
    }

    #[test]
    fn revoked_is_terminal_regardless_of_counters() {
        let config = test_config();
        let mut session = new_session("grok");
        session.status = SessionStatus::Revoked;
        session.usage_count = 0;
        assert_eq!(effective_status(&session, &config, Utc::now()), SessionStatus::Revoked);
    }

    #[test]
    fn quarantined_does_not_revert_to_healthy_on_its_own() {
        let config = test_config();
        let mut session = new_session("grok");
        session.status = SessionStatus::Quarantined;
        session.usage_count = 1;
        session.failure_count = 0;
        assert_eq!(effective_status(&session, &config, Utc::now()), SessionStatus::Quarantined);
    }

    #[test]
    fn quarantined_still_expires_on_age() {
        let config = test_config();
        let mut session = new_session("grok");
        session.status = SessionStatus::Quarantined;
        session.usage_count = 1;
        session.created_at = Utc::now() - chrono::Duration::hours(25);
        assert_eq!(effective_status(&session, &config, Utc::now()), SessionStatus::Expired);
    }

    #[test]
    fn permitted_transitions_cover_expected_directions() {
        use SessionStatus::*;
        assert!(is_permitted_transition(Healthy, Quarantined));
        assert!(is_permitted_transition(Healthy, Expired));
        assert!(is_permitted_transition(Quarantined, Expired));
        assert!(is_permitted_transition(Healthy, Revoked));
        assert!(is_permitted_transition(Quarantined, Revoked));
        assert!(is_permitted_transition(Expired, Revoked));
        assert!(!is_permitted_transition(Quarantined, Healthy));
        assert!(!is_permitted_transition(Expired, Healthy));
        assert!(!is_permitted_transition(Revoked, Healthy));
    }
}
