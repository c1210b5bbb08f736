//! A real, disposable Postgres instance for integration-testing
//! [`PostgresGateway`](grok_service::services::persistence::postgres::PostgresGateway)
//! against. Gated behind the `postgres-test-container` feature so the
//! default build of this crate (and everything depending on it) never needs
//! Docker.

use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::ContainerAsync;
use testcontainers_modules::testcontainers::runners::AsyncRunner as _;

/// Starts a throwaway Postgres container and returns it alongside a ready
/// connection string. The container is torn down when the returned handle
/// is dropped.
pub async fn postgres_testcontainer() -> eyre::Result<(ContainerAsync<Postgres>, String)> {
    let container = Postgres::default().start().await?;
    let connection_string = format!(
        "postgres://postgres:postgres@{}:{}/postgres",
        container.get_host().await?,
        container.get_host_port_ipv4(5432).await?
    );
    Ok((container, connection_string))
}

/// Applies the schema to a freshly started container, using the same three
/// tables (`sessions`, `generations`, `token_usage`) the `PostgresGateway`
/// queries assume exist.
pub async fn migrate(connection_string: &str) -> eyre::Result<()> {
    use sqlx::Executor as _;
    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(1).connect(connection_string).await?;
    pool.execute(SCHEMA_SQL).await?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id UUID PRIMARY KEY,
    cookie_text TEXT NOT NULL,
    cookie_hash TEXT NOT NULL,
    provider TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    last_used_at TIMESTAMPTZ,
    expires_at TIMESTAMPTZ,
    usage_count BIGINT NOT NULL DEFAULT 0,
    success_count BIGINT NOT NULL DEFAULT 0,
    failure_count BIGINT NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    last_health_check_at TIMESTAMPTZ,
    metadata JSONB NOT NULL DEFAULT '{}',
    UNIQUE (provider, cookie_hash)
);

CREATE TABLE IF NOT EXISTS generations (
    id UUID PRIMARY KEY,
    request_id UUID NOT NULL,
    session_id UUID,
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    prompt TEXT NOT NULL,
    prompt_tokens BIGINT NOT NULL DEFAULT 0,
    response_text TEXT,
    response_tokens BIGINT NOT NULL DEFAULT 0,
    response_raw JSONB,
    status INTEGER NOT NULL,
    latency_ms BIGINT NOT NULL,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    reasoning_tokens BIGINT NOT NULL DEFAULT 0,
    audio_tokens BIGINT NOT NULL DEFAULT 0,
    image_tokens BIGINT NOT NULL DEFAULT 0,
    cached_tokens BIGINT NOT NULL DEFAULT 0,
    accepted_prediction_tokens BIGINT NOT NULL DEFAULT 0,
    rejected_prediction_tokens BIGINT NOT NULL DEFAULT 0,
    num_sources_used BIGINT NOT NULL DEFAULT 0,
    response_id TEXT,
    previous_response_id TEXT,
    temperature REAL,
    top_p REAL,
    max_output_tokens BIGINT,
    parallel_tool_calls BOOLEAN NOT NULL DEFAULT TRUE,
    tool_choice TEXT,
    finish_reason TEXT,
    reasoning_content TEXT,
    incomplete_details JSONB,
    annotations JSONB
);

CREATE TABLE IF NOT EXISTS token_usage (
    id UUID PRIMARY KEY,
    generation_id UUID NOT NULL,
    user_id TEXT,
    session_id UUID,
    created_at TIMESTAMPTZ NOT NULL,
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    prompt_text_tokens BIGINT NOT NULL DEFAULT 0,
    prompt_audio_tokens BIGINT NOT NULL DEFAULT 0,
    prompt_image_tokens BIGINT NOT NULL DEFAULT 0,
    prompt_cached_tokens BIGINT NOT NULL DEFAULT 0,
    prompt_total_tokens BIGINT NOT NULL DEFAULT 0,
    completion_reasoning_tokens BIGINT NOT NULL DEFAULT 0,
    completion_audio_tokens BIGINT NOT NULL DEFAULT 0,
    completion_text_tokens BIGINT NOT NULL DEFAULT 0,
    completion_accepted_prediction_tokens BIGINT NOT NULL DEFAULT 0,
    completion_rejected_prediction_tokens BIGINT NOT NULL DEFAULT 0,
    completion_total_tokens BIGINT NOT NULL DEFAULT 0,
    total_tokens BIGINT NOT NULL DEFAULT 0,
    prompt_cost_micro_usd BIGINT NOT NULL DEFAULT 0,
    completion_cost_micro_usd BIGINT NOT NULL DEFAULT 0,
    total_cost_micro_usd BIGINT NOT NULL DEFAULT 0
);
"#;
