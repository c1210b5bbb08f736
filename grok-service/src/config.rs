//! Configuration types and CLI/environment parsing for a `grok-proxy` node.
//!
//! Every tunable for the session pool, the resilience coordinator, the
//! circuit breaker, and the persistence layer lives on a single
//! [`ProxyConfig`], parsed once at startup via `clap`. There is no runtime
//! reload: changing a knob requires a restart, which eliminates a whole
//! class of re-read-while-serving races.

use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;

/// The configuration for the core reverse-proxy service.
///
/// Every field can be set via an environment variable or a matching CLI
/// flag; hosting binaries can `#[clap(flatten)]` this into their own config
/// the way `grok-proxy` does.
#[derive(Parser, Debug)]
pub struct ProxyConfig {
    /// Usage count at which a session is retired gracefully.
    #[clap(long, env = "GROK_PROXY_ROTATION_THRESHOLD", default_value = "500")]
    pub rotation_threshold: u64,

    /// Max session age before automatic expiry.
    #[clap(
        long,
        env = "GROK_PROXY_MAX_AGE",
        default_value = "24h",
        value_parser = humantime::parse_duration,
    )]
    pub max_age: Duration,

    /// Failure-rate trigger for quarantine, applied only once
    /// `usage_count >= 20`.
    #[clap(long, env = "GROK_PROXY_FAILURE_THRESHOLD", default_value = "0.2")]
    pub failure_threshold: f64,

    /// How often the health loop rescans the pool.
    #[clap(
        long,
        env = "GROK_PROXY_HEALTH_CHECK_INTERVAL",
        default_value = "30s",
        value_parser = humantime::parse_duration,
    )]
    pub health_check_interval: Duration,

    /// Max attempts (sessions tried) per inbound request.
    #[clap(long, env = "GROK_PROXY_MAX_ATTEMPTS", default_value = "5")]
    pub max_attempts: u32,

    /// How many terminal failures within `circuit_window` trip the breaker.
    #[clap(long, env = "GROK_PROXY_CIRCUIT_FAILURE_THRESHOLD", default_value = "5")]
    pub circuit_failure_threshold: u32,

    /// The sliding window the breaker counts terminal failures over.
    #[clap(
        long,
        env = "GROK_PROXY_CIRCUIT_WINDOW",
        default_value = "60s",
        value_parser = humantime::parse_duration,
    )]
    pub circuit_window: Duration,

    /// How long the breaker stays `open` before trying `half_open`.
    #[clap(
        long,
        env = "GROK_PROXY_CIRCUIT_RECOVERY_TIMEOUT",
        default_value = "60s",
        value_parser = humantime::parse_duration,
    )]
    pub circuit_recovery_timeout: Duration,

    /// Hard per-attempt timeout against the upstream.
    #[clap(
        long,
        env = "GROK_PROXY_UPSTREAM_ATTEMPT_TIMEOUT",
        default_value = "60s",
        value_parser = humantime::parse_duration,
    )]
    pub upstream_attempt_timeout: Duration,

    /// Bounded wait for `acquire` when no healthy session is free before
    /// returning `no_healthy_sessions`.
    #[clap(
        long,
        env = "GROK_PROXY_ACQUIRE_WAIT_TIMEOUT",
        default_value = "2s",
        value_parser = humantime::parse_duration,
    )]
    pub acquire_wait_timeout: Duration,

    /// Minimum size of the persistence connection pool.
    #[clap(long, env = "GROK_PROXY_DB_MIN_CONNECTIONS", default_value = "10")]
    pub persistence_min_connections: u32,

    /// Maximum size of the persistence connection pool.
    #[clap(long, env = "GROK_PROXY_DB_MAX_CONNECTIONS", default_value = "20")]
    pub persistence_max_connections: u32,

    /// The connection string for the persistence store.
    #[clap(long, env = "GROK_PROXY_DB_CONNECTION_STRING")]
    pub db_connection_string: SecretString,

    /// Comma-separated list of accepted API keys (stored hashed, compared
    /// against the `Authorization: Bearer <key>` header).
    #[clap(long, env = "GROK_PROXY_API_KEYS", value_delimiter = ',')]
    pub api_keys: Vec<String>,

    /// Base URL of the upstream chat service.
    #[clap(long, env = "GROK_PROXY_UPSTREAM_BASE_URL")]
    pub upstream_base_url: String,

    /// Tag identifying the upstream provider (used to scope session pools
    /// and telemetry, e.g. `"grok"`).
    #[clap(long, env = "GROK_PROXY_PROVIDER", default_value = "grok")]
    pub provider: String,
}

impl ProxyConfig {
    /// Backoff schedule for retrying across sessions within one request.
    /// Fixed, progressive, deterministic: no jitter, bounded by 67s in total.
    pub fn backoff_schedule(&self) -> &'static [Duration] {
        const SCHEDULE: [Duration; 5] = [
            Duration::from_secs(2),
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(20),
            Duration::from_secs(30),
        ];
        &SCHEDULE
    }
}
