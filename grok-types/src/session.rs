//! The [`Session`] model: one cookie-bearing pool member.
//!
//! A session is the unit the pool rotates among. Its `status` is the stored
//! value; the pool additionally derives an *effective* status at read time
//! (see `grok_service::services::session_pool`), which is not modeled here
//! because it is a pure function of the fields below plus the current time
//! and a config, not a persisted fact.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The stored lifecycle state of a [`Session`].
///
/// Permitted transitions (enforced by the session pool, never by this type):
/// `healthy -> quarantined`, `healthy|quarantined -> expired`, any -> `revoked`.
/// `revoked` is terminal. Re-promotion `quarantined -> healthy` only happens
/// via explicit operator action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Eligible for selection by the pool.
    Healthy,
    /// Temporarily withheld from selection; may be reactivated by an operator.
    Quarantined,
    /// Permanently withheld; retired gracefully (age, usage, explicit expiry).
    Expired,
    /// Permanently withheld; never selected again.
    Revoked,
}

impl SessionStatus {
    /// Returns `true` if a session in this status may ever be selected by
    /// `acquire` again without an explicit operator transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Expired | SessionStatus::Revoked)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Healthy => "healthy",
            SessionStatus::Quarantined => "quarantined",
            SessionStatus::Expired => "expired",
            SessionStatus::Revoked => "revoked",
        };
        f.write_str(s)
    }
}

/// Free-form, structured annotations attached to a session (source, notes).
pub type SessionMetadata = serde_json::Value;

/// One pool member: a cookie-backed credential usable by the upstream client
/// to perform one upstream call.
///
/// # Invariants
/// - `success_count + failure_count <= usage_count`.
/// - `cookie_hash` is unique per `provider`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// Opaque unique identifier.
    pub id: Uuid,
    /// Opaque credential string. Never logged or serialized in clear by any
    /// `Display`/`Debug` path outside this struct's own fields; callers must
    /// route it through the telemetry sink's redaction before it reaches a
    /// log line.
    #[serde(skip_serializing)]
    pub cookie_material: SecretString,
    /// Stable hash of `cookie_material`, used for the per-provider
    /// uniqueness constraint without ever persisting the raw cookie twice.
    pub cookie_hash: String,
    /// Tag naming the upstream service this session authenticates against.
    pub provider: String,
    /// When the session was created (first inserted into the pool).
    pub created_at: DateTime<Utc>,
    /// When the session was last leased out and released.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Explicit expiry set by an operator or the acquisition source, if any.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the health loop last scanned this session.
    pub last_health_check_at: Option<DateTime<Utc>>,
    /// Monotonic count of attempts made with this session.
    pub usage_count: u64,
    /// Monotonic count of attempts that ended in `success`.
    pub success_count: u64,
    /// Monotonic count of attempts that ended in any failure class.
    pub failure_count: u64,
    /// The stored status (see [`SessionStatus`]).
    pub status: SessionStatus,
    /// Free-form structured annotations.
    pub metadata: SessionMetadata,
}

impl Session {
    /// Returns `true` if the success/failure invariant holds.
    pub fn counters_consistent(&self) -> bool {
        self.success_count + self.failure_count <= self.usage_count
    }

    /// The failure rate over all usage, or `0.0` if never used.
    pub fn failure_rate(&self) -> f64 {
        if self.usage_count == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.usage_count as f64
        }
    }
}
