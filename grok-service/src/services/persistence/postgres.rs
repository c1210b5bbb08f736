//! Postgres implementation of [`PersistenceGateway`].
//!
//! Connectivity loss is retried at most twice with a short backoff before
//! surfacing [`PersistenceError::Unavailable`]. Every operation is a single
//! statement against the pool, so sqlx's own acquire/release on `&PgPool`
//! already gives us guaranteed connection release on all exit paths.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable as _};
use chrono::Utc;
use grok_types::{Generation, Session, SessionStatus, TokenUsage};
use secrecy::{ExposeSecret as _, SecretString};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{PersistenceError, PersistenceGateway, SessionFilter};

/// A [`PersistenceGateway`] backed by a Postgres connection pool.
pub struct PostgresGateway {
    pool: PgPool,
}

fn retry_policy() -> ExponentialBuilder {
    // At most two retries with a short backoff.
    ExponentialBuilder::default()
        .with_min_delay(std::time::Duration::from_millis(50))
        .with_max_times(2)
}

fn map_sqlx_err(err: sqlx::Error) -> PersistenceError {
    match &err {
        sqlx::Error::RowNotFound => PersistenceError::NotFound,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            PersistenceError::Duplicate
        }
        _ => PersistenceError::Unavailable(err.to_string()),
    }
}

impl PostgresGateway {
    /// Connects to `connection_string`, bounding the pool between `min` and
    /// `max` connections.
    pub async fn init(
        connection_string: &SecretString,
        min_connections: u32,
        max_connections: u32,
    ) -> eyre::Result<Self> {
        tracing::info!("connecting to persistence store...");
        let pool = PgPoolOptions::new()
            .min_connections(min_connections)
            .max_connections(max_connections)
            .connect(connection_string.expose_secret())
            .await
            .map_err(|e| eyre::eyre!("while connecting to postgres: {e}"))?;
        Ok(Self { pool })
    }

    fn row_to_session(row: &sqlx::postgres::PgRow) -> Result<Session, PersistenceError> {
        let status_str: String = row.try_get("status").map_err(map_sqlx_err)?;
        let status = match status_str.as_str() {
            "healthy" => SessionStatus::Healthy,
            "quarantined" => SessionStatus::Quarantined,
            "expired" => SessionStatus::Expired,
            "revoked" => SessionStatus::Revoked,
            other => {
                return Err(PersistenceError::Unavailable(format!(
                    "unknown status in DB: {other}"
                )));
            }
        };
        Ok(Session {
            id: row.try_get("id").map_err(map_sqlx_err)?,
            cookie_material: SecretString::from(
                row.try_get::<String, _>("cookie_text").map_err(map_sqlx_err)?,
            ),
            cookie_hash: row.try_get("cookie_hash").map_err(map_sqlx_err)?,
            provider: row.try_get("provider").map_err(map_sqlx_err)?,
            created_at: row.try_get("created_at").map_err(map_sqlx_err)?,
            last_used_at: row.try_get("last_used_at").map_err(map_sqlx_err)?,
            expires_at: row.try_get("expires_at").map_err(map_sqlx_err)?,
            last_health_check_at: row
                .try_get("last_health_check_at")
                .map_err(map_sqlx_err)?,
            usage_count: row.try_get::<i64, _>("usage_count").map_err(map_sqlx_err)? as u64,
            success_count: row
                .try_get::<i64, _>("success_count")
                .map_err(map_sqlx_err)? as u64,
            failure_count: row
                .try_get::<i64, _>("failure_count")
                .map_err(map_sqlx_err)? as u64,
            status,
            metadata: row.try_get("metadata").map_err(map_sqlx_err)?,
        })
    }
}

#[async_trait]
impl PersistenceGateway for PostgresGateway {
    async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>, PersistenceError> {
        (|| async {
            let status_str = filter.status.map(|s| s.to_string());
            let rows = sqlx::query(
                r#"
                    SELECT id, cookie_text, cookie_hash, provider, created_at, last_used_at,
                           expires_at, usage_count, success_count, failure_count, status,
                           last_health_check_at, metadata
                    FROM sessions
                    WHERE ($1::text IS NULL OR status = $1)
                      AND ($2::text IS NULL OR provider = $2)
                    ORDER BY last_used_at ASC NULLS FIRST
                "#,
            )
            .bind(status_str)
            .bind(filter.provider.clone())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
            rows.iter().map(Self::row_to_session).collect()
        })
        .retry(retry_policy())
        .when(|e| matches!(e, PersistenceError::Unavailable(_)))
        .await
    }

    async fn get_session(&self, id: Uuid) -> Result<Session, PersistenceError> {
        (|| async {
            let row = sqlx::query(
                r#"
                    SELECT id, cookie_text, cookie_hash, provider, created_at, last_used_at,
                           expires_at, usage_count, success_count, failure_count, status,
                           last_health_check_at, metadata
                    FROM sessions
                    WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or(PersistenceError::NotFound)?;
            Self::row_to_session(&row)
        })
        .retry(retry_policy())
        .when(|e| matches!(e, PersistenceError::Unavailable(_)))
        .await
    }

    async fn insert_session(
        &self,
        cookie_material: SecretString,
        provider: String,
        metadata: serde_json::Value,
    ) -> Result<Session, PersistenceError> {
        let cookie_hash = crate::services::session_pool::hash_cookie(cookie_material.expose_secret());
        let id = Uuid::new_v4();
        let now = Utc::now();
        (|| async {
            sqlx::query(
                r#"
                    INSERT INTO sessions
                        (id, cookie_text, cookie_hash, provider, created_at, usage_count,
                         success_count, failure_count, status, metadata)
                    VALUES ($1, $2, $3, $4, $5, 0, 0, 0, 'healthy', $6)
                "#,
            )
            .bind(id)
            .bind(cookie_material.expose_secret())
            .bind(&cookie_hash)
            .bind(&provider)
            .bind(now)
            .bind(&metadata)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)
        })
        .retry(retry_policy())
        .when(|e| matches!(e, PersistenceError::Unavailable(_)))
        .await?;

        Ok(Session {
            id,
            cookie_material,
            cookie_hash,
            provider,
            created_at: now,
            last_used_at: None,
            expires_at: None,
            last_health_check_at: None,
            usage_count: 0,
            success_count: 0,
            failure_count: 0,
            status: SessionStatus::Healthy,
            metadata,
        })
    }

    async fn update_status(
        &self,
        id: Uuid,
        new_status: SessionStatus,
        reason: Option<String>,
    ) -> Result<(), PersistenceError> {
        if reason.is_some() {
            tracing::info!(session_id = %id, status = %new_status, reason = reason.as_deref().unwrap_or(""), "session status transition");
        }
        (|| async {
            let result = sqlx::query("UPDATE sessions SET status = $1 WHERE id = $2")
                .bind(new_status.to_string())
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
            if result.rows_affected() == 0 {
                return Err(PersistenceError::NotFound);
            }
            Ok(())
        })
        .retry(retry_policy())
        .when(|e| matches!(e, PersistenceError::Unavailable(_)))
        .await
    }

    async fn increment_usage(
        &self,
        id: Uuid,
        success: bool,
        _delta_latency_ms: i64,
    ) -> Result<(), PersistenceError> {
        (|| async {
            let result = sqlx::query(
                r#"
                    UPDATE sessions
                    SET usage_count = usage_count + 1,
                        success_count = success_count + CASE WHEN $2 THEN 1 ELSE 0 END,
                        failure_count = failure_count + CASE WHEN $2 THEN 0 ELSE 1 END,
                        last_used_at = now()
                    WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(success)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
            if result.rows_affected() == 0 {
                return Err(PersistenceError::NotFound);
            }
            Ok(())
        })
        .retry(retry_policy())
        .when(|e| matches!(e, PersistenceError::Unavailable(_)))
        .await
    }

    async fn mark_health_checked(&self, id: Uuid) -> Result<(), PersistenceError> {
        (|| async {
            sqlx::query("UPDATE sessions SET last_health_check_at = now() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)
        })
        .retry(retry_policy())
        .when(|e| matches!(e, PersistenceError::Unavailable(_)))
        .await?;
        Ok(())
    }

    async fn insert_generation(&self, row: Generation) -> Result<Uuid, PersistenceError> {
        (|| async {
            sqlx::query(
                r#"
                    INSERT INTO generations
                        (id, request_id, session_id, provider, model, prompt, prompt_tokens,
                         response_text, response_tokens, response_raw, status, latency_ms,
                         error_message, created_at, reasoning_tokens, audio_tokens, image_tokens,
                         cached_tokens, accepted_prediction_tokens, rejected_prediction_tokens,
                         num_sources_used, response_id, previous_response_id, temperature, top_p,
                         max_output_tokens, parallel_tool_calls, tool_choice, finish_reason,
                         reasoning_content, incomplete_details, annotations)
                    VALUES
                        ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                         $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31)
                "#,
            )
            .bind(row.id)
            .bind(row.request_id)
            .bind(row.session_id)
            .bind(&row.provider)
            .bind(&row.model)
            .bind(&row.prompt)
            .bind(row.prompt_tokens)
            .bind(&row.response_text)
            .bind(row.response_tokens)
            .bind(&row.response_raw)
            .bind(row.status)
            .bind(row.latency_ms)
            .bind(&row.error_message)
            .bind(row.created_at)
            .bind(row.reasoning_tokens)
            .bind(row.audio_tokens)
            .bind(row.image_tokens)
            .bind(row.cached_tokens)
            .bind(row.accepted_prediction_tokens)
            .bind(row.rejected_prediction_tokens)
            .bind(row.num_sources_used)
            .bind(&row.response_id)
            .bind(&row.previous_response_id)
            .bind(row.parameters.temperature)
            .bind(row.parameters.top_p)
            .bind(row.parameters.max_output_tokens.map(|v| v as i64))
            .bind(row.parameters.parallel_tool_calls)
            .bind(&row.parameters.tool_choice)
            .bind(&row.finish_reason)
            .bind(&row.reasoning_content)
            .bind(&row.incomplete_details)
            .bind(&row.annotations)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)
        })
        .retry(retry_policy())
        .when(|e| matches!(e, PersistenceError::Unavailable(_)))
        .await?;
        Ok(row.id)
    }

    async fn insert_token_usage(&self, row: TokenUsage) -> Result<Uuid, PersistenceError> {
        (|| async {
            sqlx::query(
                r#"
                    INSERT INTO token_usage
                        (id, generation_id, user_id, session_id, created_at, provider, model,
                         prompt_text_tokens, prompt_audio_tokens, prompt_image_tokens,
                         prompt_cached_tokens, prompt_total_tokens, completion_reasoning_tokens,
                         completion_audio_tokens, completion_text_tokens,
                         completion_accepted_prediction_tokens,
                         completion_rejected_prediction_tokens, completion_total_tokens,
                         total_tokens, prompt_cost_micro_usd, completion_cost_micro_usd,
                         total_cost_micro_usd)
                    VALUES
                        ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                         $17, $18, $19, $20, $21, $22)
                "#,
            )
            .bind(row.id)
            .bind(row.generation_id)
            .bind(&row.user_id)
            .bind(row.session_id)
            .bind(row.created_at)
            .bind(&row.provider)
            .bind(&row.model)
            .bind(row.prompt_text_tokens)
            .bind(row.prompt_audio_tokens)
            .bind(row.prompt_image_tokens)
            .bind(row.prompt_cached_tokens)
            .bind(row.prompt_total_tokens)
            .bind(row.completion_reasoning_tokens)
            .bind(row.completion_audio_tokens)
            .bind(row.completion_text_tokens)
            .bind(row.completion_accepted_prediction_tokens)
            .bind(row.completion_rejected_prediction_tokens)
            .bind(row.completion_total_tokens)
            .bind(row.total_tokens)
            .bind(row.prompt_cost_micro_usd)
            .bind(row.completion_cost_micro_usd)
            .bind(row.total_cost_micro_usd)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)
        })
        .retry(retry_policy())
        .when(|e| matches!(e, PersistenceError::Unavailable(_)))
        .await?;
        Ok(row.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_maps_from_unique_violation_code() {
        // sanity check the match arm compiles against the sqlx error shape;
        // exercising a real unique violation needs a live DB and is covered
        // by the workspace's container-backed integration tests.
        let err = PersistenceError::Duplicate;
        assert!(!err.is_retryable());
    }
}
