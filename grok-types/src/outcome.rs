//! Attempt outcome classification, shared by the upstream client, the
//! session pool, and the telemetry sink. Each variant names the upstream
//! response class that produced it and the status transition it proposes
//! to the pool.

use serde::{Deserialize, Serialize};

/// The result of exactly one attempt against the upstream for one inbound
/// request using one leased session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// 2xx, stream completed without error.
    Success,
    /// 429, or body contains a rate-limit signature. The session itself is
    /// fine; the coordinator rotates to the next one.
    RateLimit,
    /// 401, or 403 with no anti-bot signature.
    AuthFailure,
    /// 403 with a Cloudflare-style signature, or 503 with a challenge body.
    AntiBot,
    /// 500/502/504, or a network reset.
    Upstream5xx,
    /// 400/404/422 — terminal, not retried.
    ClientError,
    /// Connection refused, TLS failure, timeout, or caller cancellation.
    TransportError,
}

impl AttemptOutcome {
    /// Returns `true` if the coordinator should retry with the next session
    /// after this outcome (everything except `success` and `client_error`).
    pub fn is_retryable(self) -> bool {
        !matches!(self, AttemptOutcome::Success | AttemptOutcome::ClientError)
    }

    /// Returns `true` if this outcome counts toward `success_count` in
    /// `increment_usage`.
    pub fn is_success(self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }

    /// Returns `true` if a terminal (non-retried) outcome of this kind should
    /// count toward the circuit breaker's failure window. Capacity signals
    /// (`no_healthy_sessions`, handled above this type) never reach here;
    /// every variant except `success` is a genuine upstream-observed failure.
    pub fn counts_toward_circuit(self) -> bool {
        !matches!(self, AttemptOutcome::Success)
    }

    /// Short machine-readable tag used as the `outcome` label on
    /// `session_rotations_total{reason}` and in telemetry events.
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::RateLimit => "rate_limit",
            AttemptOutcome::AuthFailure => "auth_failure",
            AttemptOutcome::AntiBot => "anti_bot",
            AttemptOutcome::Upstream5xx => "upstream_5xx",
            AttemptOutcome::ClientError => "client_error",
            AttemptOutcome::TransportError => "transport_error",
        }
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
