//! Metrics definitions for `grok-proxy`.
//!
//! This module defines all metrics keys used by the service and provides
//! [`describe_metrics`] to set metadata for each metric using the `metrics`
//! crate. Exporting them (Prometheus or otherwise) is left to the hosting
//! application; this crate only records and describes them.

/// Counter, labeled `status`: total inbound requests by terminal outcome
/// class.
pub const METRICS_ID_REQUESTS_TOTAL: &str = "grok_proxy.requests.total";
/// Histogram: wall-clock latency of a whole inbound request, in seconds.
pub const METRICS_ID_GENERATION_LATENCY_SECONDS: &str = "grok_proxy.generation.latency_seconds";
/// Gauge, labeled `status`: number of sessions currently in each status
/// bucket.
pub const METRICS_ID_ACTIVE_SESSIONS: &str = "grok_proxy.sessions.active";
/// Counter, labeled `reason`: total session status transitions proposed by
/// the resilience layer.
pub const METRICS_ID_SESSION_ROTATIONS_TOTAL: &str = "grok_proxy.sessions.rotations_total";
/// Gauge: `1` when the circuit breaker is `open`, else `0`.
pub const METRICS_ID_CIRCUIT_OPEN: &str = "grok_proxy.circuit.open";

/// Describe all metrics used by the service.
///
/// Call once at startup before the first metric is recorded, so a collector
/// attached by the hosting application gets units and descriptions.
pub fn describe_metrics() {
    metrics::describe_counter!(
        METRICS_ID_REQUESTS_TOTAL,
        metrics::Unit::Count,
        "Number of inbound chat-completion requests, by terminal outcome"
    );

    metrics::describe_histogram!(
        METRICS_ID_GENERATION_LATENCY_SECONDS,
        metrics::Unit::Seconds,
        "Wall-clock latency of an inbound request, from acquire to terminal outcome"
    );

    metrics::describe_gauge!(
        METRICS_ID_ACTIVE_SESSIONS,
        metrics::Unit::Count,
        "Number of sessions currently in each status bucket"
    );

    metrics::describe_counter!(
        METRICS_ID_SESSION_ROTATIONS_TOTAL,
        metrics::Unit::Count,
        "Number of session status transitions proposed after an attempt"
    );

    metrics::describe_gauge!(
        METRICS_ID_CIRCUIT_OPEN,
        metrics::Unit::Count,
        "1 while the circuit breaker is open, 0 otherwise"
    );
}
