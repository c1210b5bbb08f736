//! Builders for the [`Session`], [`ProxyConfig`], and chat-request fixtures
//! the end-to-end scenarios are built from.

use std::time::Duration;

use chrono::{DateTime, Utc};
use grok_service::config::ProxyConfig;
use grok_service::services::session_pool::hash_cookie;
use grok_types::api::v1::{ChatCompletionRequest, Message, MessageContent};
use grok_types::{Session, SessionStatus};
use secrecy::SecretString;
use uuid::Uuid;

/// A [`ProxyConfig`] with short, test-friendly timeouts and the production
/// defaults otherwise, pointed at `upstream_base_url`.
pub fn test_config(upstream_base_url: impl Into<String>) -> ProxyConfig {
    config_builder(upstream_base_url).build()
}

/// Starts a [`ConfigBuilder`] over the production defaults, pointed at
/// `upstream_base_url` (typically a `wiremock::MockServer`'s `uri()`).
pub fn config_builder(upstream_base_url: impl Into<String>) -> ConfigBuilder {
    ConfigBuilder {
        rotation_threshold: 500,
        max_age: Duration::from_secs(24 * 3600),
        failure_threshold: 0.2,
        health_check_interval: Duration::from_secs(30),
        max_attempts: 5,
        circuit_failure_threshold: 5,
        circuit_window: Duration::from_secs(60),
        circuit_recovery_timeout: Duration::from_secs(60),
        upstream_attempt_timeout: Duration::from_secs(5),
        acquire_wait_timeout: Duration::from_millis(50),
        persistence_min_connections: 1,
        persistence_max_connections: 1,
        api_keys: vec!["test-api-key".to_string()],
        upstream_base_url: upstream_base_url.into(),
        provider: "grok".to_string(),
    }
}

/// A fluent builder over [`ProxyConfig`]'s fields, since `ProxyConfig` itself
/// only derives `clap::Parser` (no `Default`/`Clone`) and is meant to be
/// built once from the environment, not copied around in tests.
pub struct ConfigBuilder {
    rotation_threshold: u64,
    max_age: Duration,
    failure_threshold: f64,
    health_check_interval: Duration,
    max_attempts: u32,
    circuit_failure_threshold: u32,
    circuit_window: Duration,
    circuit_recovery_timeout: Duration,
    upstream_attempt_timeout: Duration,
    acquire_wait_timeout: Duration,
    persistence_min_connections: u32,
    persistence_max_connections: u32,
    api_keys: Vec<String>,
    upstream_base_url: String,
    provider: String,
}

impl ConfigBuilder {
    /// Overrides `max_attempts`.
    pub fn max_attempts(mut self, v: u32) -> Self {
        self.max_attempts = v;
        self
    }

    /// Overrides `rotation_threshold`.
    pub fn rotation_threshold(mut self, v: u64) -> Self {
        self.rotation_threshold = v;
        self
    }

    /// Overrides `failure_threshold`.
    pub fn failure_threshold(mut self, v: f64) -> Self {
        self.failure_threshold = v;
        self
    }

    /// Overrides `max_age`.
    pub fn max_age(mut self, v: Duration) -> Self {
        self.max_age = v;
        self
    }

    /// Overrides `circuit_failure_threshold`.
    pub fn circuit_failure_threshold(mut self, v: u32) -> Self {
        self.circuit_failure_threshold = v;
        self
    }

    /// Overrides `circuit_window`.
    pub fn circuit_window(mut self, v: Duration) -> Self {
        self.circuit_window = v;
        self
    }

    /// Overrides `circuit_recovery_timeout`.
    pub fn circuit_recovery_timeout(mut self, v: Duration) -> Self {
        self.circuit_recovery_timeout = v;
        self
    }

    /// Overrides `acquire_wait_timeout`.
    pub fn acquire_wait_timeout(mut self, v: Duration) -> Self {
        self.acquire_wait_timeout = v;
        self
    }

    /// Overrides the accepted bearer API keys.
    pub fn api_keys(mut self, keys: Vec<String>) -> Self {
        self.api_keys = keys;
        self
    }

    /// Consumes the builder into a [`ProxyConfig`].
    pub fn build(self) -> ProxyConfig {
        ProxyConfig {
            rotation_threshold: self.rotation_threshold,
            max_age: self.max_age,
            failure_threshold: self.failure_threshold,
            health_check_interval: self.health_check_interval,
            max_attempts: self.max_attempts,
            circuit_failure_threshold: self.circuit_failure_threshold,
            circuit_window: self.circuit_window,
            circuit_recovery_timeout: self.circuit_recovery_timeout,
            upstream_attempt_timeout: self.upstream_attempt_timeout,
            acquire_wait_timeout: self.acquire_wait_timeout,
            persistence_min_connections: self.persistence_min_connections,
            persistence_max_connections: self.persistence_max_connections,
            db_connection_string: SecretString::from("postgres://unused-in-tests".to_string()),
            api_keys: self.api_keys,
            upstream_base_url: self.upstream_base_url,
            provider: self.provider,
        }
    }
}

/// Starts a [`SessionBuilder`] for provider `"grok"` with a random cookie,
/// status `healthy`, and all counters at zero.
pub fn session_builder() -> SessionBuilder {
    SessionBuilder {
        cookie_material: format!("cookie-{}", Uuid::new_v4()),
        provider: "grok".to_string(),
        created_at: Utc::now(),
        expires_at: None,
        usage_count: 0,
        success_count: 0,
        failure_count: 0,
        status: SessionStatus::Healthy,
    }
}

/// A fluent builder over [`Session`] for tests.
pub struct SessionBuilder {
    cookie_material: String,
    provider: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    usage_count: u64,
    success_count: u64,
    failure_count: u64,
    status: SessionStatus,
}

impl SessionBuilder {
    /// Sets the raw cookie material (the hash is derived from it).
    pub fn cookie(mut self, cookie_material: impl Into<String>) -> Self {
        self.cookie_material = cookie_material.into();
        self
    }

    /// Sets the provider tag.
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Sets `created_at`.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Sets `expires_at`.
    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Sets `usage_count`, `success_count`, and `failure_count` directly
    /// (the caller is responsible for the invariant
    /// `success_count + failure_count <= usage_count`).
    pub fn counters(mut self, usage_count: u64, success_count: u64, failure_count: u64) -> Self {
        self.usage_count = usage_count;
        self.success_count = success_count;
        self.failure_count = failure_count;
        self
    }

    /// Sets the stored `status`.
    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    /// Builds the [`Session`].
    pub fn build(self) -> Session {
        let cookie_hash = hash_cookie(&self.cookie_material);
        Session {
            id: Uuid::new_v4(),
            cookie_material: SecretString::from(self.cookie_material),
            cookie_hash,
            provider: self.provider,
            created_at: self.created_at,
            last_used_at: None,
            expires_at: self.expires_at,
            last_health_check_at: None,
            usage_count: self.usage_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            status: self.status,
            metadata: serde_json::json!({}),
        }
    }
}

/// A minimal, valid `POST /v1/chat/completions` request body: one user
/// message, non-streaming, no sampling overrides.
pub fn chat_request(model: impl Into<String>, user_text: impl Into<String>) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.into(),
        messages: vec![Message { role: "user".to_string(), content: MessageContent::Text(user_text.into()) }],
        stream: false,
        temperature: None,
        top_p: None,
        max_output_tokens: None,
        tools: None,
        tool_choice: None,
        parallel_tool_calls: true,
    }
}
