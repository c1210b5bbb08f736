//! Process-local circuit breaker.
//!
//! Three states, `closed -> open -> half_open -> closed|open`. State is
//! never persisted: a process restart always starts `closed`. Transitions
//! are serialized behind one lock, keeping state changes atomic; reads that
//! only need to know whether to short-circuit use [`CircuitBreaker::is_open`],
//! which takes the same lock but does no window bookkeeping.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::metrics::METRICS_ID_CIRCUIT_OPEN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    /// Timestamps of terminal failures within the current window, oldest
    /// first.
    failures: VecDeque<Instant>,
    /// When `state` became `Open`, used to know when to try `HalfOpen`.
    opened_at: Option<Instant>,
    /// `true` while the single half-open probe is in flight, so concurrent
    /// requests don't all slip through as "the one probe".
    probe_in_flight: bool,
}

/// A circuit breaker over one upstream. Cheaply cloneable; all clones share
/// the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: std::sync::Arc<Mutex<Inner>>,
    failure_threshold: u32,
    window: Duration,
    recovery_timeout: Duration,
}

/// Whether a request may proceed past the breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed normally.
    Proceed,
    /// The request may proceed as the single `half_open` probe.
    ProceedAsProbe,
    /// The breaker is open; fail fast without touching the pool.
    Reject,
}

impl CircuitBreaker {
    /// Builds a breaker that opens after `failure_threshold` terminal
    /// failures inside `window`, and waits `recovery_timeout` before trying
    /// a `half_open` probe.
    pub fn new(failure_threshold: u32, window: Duration, recovery_timeout: Duration) -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(Inner {
                state: State::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            })),
            failure_threshold,
            window,
            recovery_timeout,
        }
    }

    /// Decides whether an inbound request may proceed, transitioning
    /// `open -> half_open` if `recovery_timeout` has elapsed.
    pub fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => Admission::Proceed,
            State::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Reject
                } else {
                    inner.probe_in_flight = true;
                    Admission::ProceedAsProbe
                }
            }
            State::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_timeout {
                    inner.state = State::HalfOpen;
                    inner.probe_in_flight = true;
                    Admission::ProceedAsProbe
                } else {
                    Admission::Reject
                }
            }
        }
    }

    /// `true` if the breaker would currently reject a request, without
    /// performing the `half_open` transition `admit` does. Used for
    /// metrics/health reporting.
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock();
        matches!(inner.state, State::Open)
    }

    /// Records a terminal failure (one exhausted inbound request). Opens
    /// the breaker if `failure_threshold` failures now sit inside `window`.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                inner.failures.clear();
                metrics::gauge!(METRICS_ID_CIRCUIT_OPEN).set(1.0);
                return;
            }
            State::Open => {
                inner.opened_at = Some(now);
                return;
            }
            State::Closed => {}
        }
        inner.failures.push_back(now);
        let window = self.window;
        while let Some(&front) = inner.failures.front() {
            if now.duration_since(front) > window {
                inner.failures.pop_front();
            } else {
                break;
            }
        }
        if inner.failures.len() as u32 >= self.failure_threshold {
            inner.state = State::Open;
            inner.opened_at = Some(now);
            inner.failures.clear();
            metrics::gauge!(METRICS_ID_CIRCUIT_OPEN).set(1.0);
        }
    }

    /// Records a success. Closes the breaker if this was the `half_open`
    /// probe; otherwise a no-op (successes don't clear accumulated failures
    /// early in `closed`, only the window's passage of time does).
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == State::HalfOpen {
            inner.state = State::Closed;
            inner.probe_in_flight = false;
            inner.failures.clear();
            metrics::gauge!(METRICS_ID_CIRCUIT_OPEN).set(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures_in_window() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60), Duration::from_secs(60));
        for _ in 0..2 {
            assert_eq!(breaker.admit(), Admission::Proceed);
            breaker.record_failure();
        }
        assert!(!breaker.is_open());
        assert_eq!(breaker.admit(), Admission::Proceed);
        breaker.record_failure();
        assert!(breaker.is_open());
        assert_eq!(breaker.admit(), Admission::Reject);
    }

    #[test]
    fn half_open_allows_exactly_one_probe() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60), Duration::from_millis(1));
        breaker.record_failure();
        assert!(breaker.is_open());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(breaker.admit(), Admission::ProceedAsProbe);
        assert_eq!(breaker.admit(), Admission::Reject);
    }

    #[test]
    fn half_open_success_closes_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60), Duration::from_millis(1));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(breaker.admit(), Admission::ProceedAsProbe);
        breaker.record_success();
        assert!(!breaker.is_open());
        assert_eq!(breaker.admit(), Admission::Proceed);
    }

    #[test]
    fn half_open_failure_reopens_and_resets_timer() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60), Duration::from_millis(1));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(breaker.admit(), Admission::ProceedAsProbe);
        breaker.record_failure();
        assert!(breaker.is_open());
        assert_eq!(breaker.admit(), Admission::Reject);
    }
}
