//! The resilience coordinator: the per-request state machine that ties the
//! session pool, upstream client, circuit breaker, and persistence gateway
//! together.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use grok_types::api::v1::ChatCompletionRequest;
use grok_types::generation::RequestParameters;
use grok_types::{AttemptOutcome, Generation, ProxyErrorKind, TokenUsage};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::circuit_breaker::{Admission, CircuitBreaker};
use crate::config::ProxyConfig;
use crate::metrics::{METRICS_ID_GENERATION_LATENCY_SECONDS, METRICS_ID_REQUESTS_TOTAL};
use crate::services::persistence::PersistenceGateway;
use crate::services::session_pool::SessionPool;
use crate::services::telemetry;
use crate::services::upstream_client::{UpstreamClient, UpstreamPayload};

/// A terminal error surfaced to the caller: one of the fixed error classes,
/// plus the request id every error body must carry.
#[derive(Debug)]
pub struct CoordinatorError {
    /// The taxonomy class.
    pub kind: ProxyErrorKind,
    /// A sanitized, human-readable message.
    pub message: String,
    /// The inbound request's id, echoed in the error body.
    pub request_id: Uuid,
    /// The real upstream HTTP status, when one was actually observed (only
    /// set for `UpstreamRejected`). Overrides `kind.http_status()` so a
    /// `400`/`404`/`422` from upstream reaches the caller as-is rather than
    /// the kind's generic default.
    pub upstream_status: Option<u16>,
}

/// A terminal success: the buffered upstream reply, ready for the API layer
/// to serialize as either a `chat.completion` body or a sliced SSE stream.
pub struct ChatOutcome {
    /// The inbound request's id.
    pub request_id: Uuid,
    /// The model the caller asked for.
    pub model: String,
    /// The buffered upstream reply.
    pub payload: UpstreamPayload,
}

/// Ties the session pool, upstream client, circuit breaker, and persistence
/// gateway into the single `handle(request)` entry point.
pub struct ResilienceCoordinator {
    config: Arc<ProxyConfig>,
    pool: SessionPool,
    upstream: Arc<UpstreamClient>,
    breaker: CircuitBreaker,
    persistence: Arc<dyn PersistenceGateway>,
}

impl ResilienceCoordinator {
    /// Builds a coordinator over the given collaborators.
    pub fn new(
        config: Arc<ProxyConfig>,
        pool: SessionPool,
        upstream: Arc<UpstreamClient>,
        breaker: CircuitBreaker,
        persistence: Arc<dyn PersistenceGateway>,
    ) -> Self {
        Self { config, pool, upstream, breaker, persistence }
    }

    /// `true` while the breaker is open, for `/health` reporting.
    pub fn circuit_open(&self) -> bool {
        self.breaker.is_open()
    }

    /// Runs the full per-request state machine: admits through the circuit
    /// breaker, leases sessions and retries across them on retryable
    /// outcomes, and persists the terminal result.
    pub async fn handle(
        &self,
        request: &ChatCompletionRequest,
        request_id: Uuid,
        cancellation_token: CancellationToken,
    ) -> Result<ChatOutcome, CoordinatorError> {
        let admission = self.breaker.admit();
        if admission == Admission::Reject {
            metrics::counter!(METRICS_ID_REQUESTS_TOTAL, "status" => "service_unavailable").increment(1);
            return Err(CoordinatorError {
                kind: ProxyErrorKind::ServiceUnavailable,
                message: "circuit breaker is open".to_string(),
                request_id,
                upstream_status: None,
            });
        }
        let is_probe = admission == Admission::ProceedAsProbe;

        let prompt = request.messages.iter().map(|m| m.content.to_plain_text()).collect::<Vec<_>>().join("\n");
        let parameters = RequestParameters {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_output_tokens,
            tool_choice: request.tool_choice.as_ref().map(|t| format!("{t:?}")),
            parallel_tool_calls: request.parallel_tool_calls,
        };

        let request_started = std::time::Instant::now();
        let mut tried: HashSet<Uuid> = HashSet::new();
        let mut attempt: u32 = 0;
        let mut last_error: Option<(AttemptOutcome, i32, Option<String>)> = None;

        loop {
            if cancellation_token.is_cancelled() {
                return self
                    .finish_cancelled(request_id, &request.model, &prompt, &parameters, request_started, None, is_probe)
                    .await;
            }

            let leased = match self.pool.acquire_excluding(&self.config.provider, &tried).await {
                Ok(leased) => leased,
                Err(_) => {
                    metrics::counter!(METRICS_ID_REQUESTS_TOTAL, "status" => "no_healthy_sessions").increment(1);
                    return Err(CoordinatorError {
                        kind: ProxyErrorKind::NoHealthySessions,
                        message: "no healthy sessions available".to_string(),
                        request_id,
                        upstream_status: None,
                    });
                }
            };
            let session_id = leased.session.id;
            tried.insert(session_id);

            let result = self.upstream.attempt(&leased.session, request, &cancellation_token).await;
            attempt += 1;

            telemetry::record_attempt(
                request_id,
                attempt,
                session_id,
                result.outcome,
                result.latency_ms,
                result.http_status,
                result.error_message.as_deref(),
            );

            if cancellation_token.is_cancelled() {
                let _ = self.pool.release(session_id, AttemptOutcome::TransportError, result.latency_ms).await;
                return self
                    .finish_cancelled(
                        request_id,
                        &request.model,
                        &prompt,
                        &parameters,
                        request_started,
                        Some(session_id),
                        is_probe,
                    )
                    .await;
            }

            if let Err(err) = self.pool.release(session_id, result.outcome, result.latency_ms).await {
                warn!(error = %err, "persistence unavailable while releasing session, continuing from in-memory view");
            }

            match result.outcome {
                AttemptOutcome::Success => {
                    self.record_success(is_probe);
                    let payload = result.payload.expect("success attempt always carries a payload");
                    self.persist_success(
                        request_id,
                        session_id,
                        &request.model,
                        &prompt,
                        &parameters,
                        &payload,
                        result.http_status,
                        result.latency_ms,
                    )
                    .await;
                    metrics::counter!(METRICS_ID_REQUESTS_TOTAL, "status" => "success").increment(1);
                    metrics::histogram!(METRICS_ID_GENERATION_LATENCY_SECONDS)
                        .record(request_started.elapsed().as_secs_f64());
                    return Ok(ChatOutcome { request_id, model: request.model.clone(), payload });
                }
                AttemptOutcome::ClientError => {
                    self.record_success(is_probe);
                    let message = result.error_message.clone().unwrap_or_default();
                    self.persist_failure(
                        request_id,
                        Some(session_id),
                        &request.model,
                        &prompt,
                        &parameters,
                        result.http_status,
                        result.latency_ms,
                        &message,
                    )
                    .await;
                    metrics::counter!(METRICS_ID_REQUESTS_TOTAL, "status" => "upstream_rejected").increment(1);
                    // classify_failure only ever routes 4xx-range statuses
                    // (or its fallthrough, still treated as client-class)
                    // into `ClientError`, so this is always a genuine 4xx.
                    let upstream_status = u16::try_from(result.http_status).ok().filter(|s| (400..500).contains(s));
                    return Err(CoordinatorError { kind: ProxyErrorKind::UpstreamRejected, message, request_id, upstream_status });
                }
                retryable => {
                    last_error = Some((retryable, result.http_status, result.error_message.clone()));
                    if attempt >= self.config.max_attempts {
                        self.record_failure(is_probe);
                        let (outcome, status, message) = last_error.unwrap();
                        let message = message.unwrap_or_else(|| format!("exhausted after {outcome} outcome"));
                        self.persist_failure(
                            request_id,
                            Some(session_id),
                            &request.model,
                            &prompt,
                            &parameters,
                            status,
                            request_started.elapsed().as_millis() as i64,
                            &message,
                        )
                        .await;
                        metrics::counter!(METRICS_ID_REQUESTS_TOTAL, "status" => "exhausted").increment(1);
                        return Err(CoordinatorError {
                            kind: self.map_exhausted_kind(outcome),
                            message,
                            request_id,
                            upstream_status: None,
                        });
                    }
                    let schedule = self.config.backoff_schedule();
                    let sleep_for = schedule[(attempt as usize - 1).min(schedule.len() - 1)];
                    info!(attempt, outcome = %retryable, backoff_ms = sleep_for.as_millis(), "retrying with next session");
                    tokio::select! {
                        _ = tokio::time::sleep(sleep_for) => {}
                        _ = cancellation_token.cancelled() => {
                            return self
                                .finish_cancelled(request_id, &request.model, &prompt, &parameters, request_started, None, is_probe)
                                .await;
                        }
                    }
                }
            }
        }
    }

    fn record_success(&self, is_probe: bool) {
        if is_probe {
            self.breaker.record_success();
        }
    }

    fn record_failure(&self, is_probe: bool) {
        let _ = is_probe;
        self.breaker.record_failure();
    }

    /// `upstream_timeout` if the last transient outcome was a transport
    /// failure (the most common exhaustion cause under a stalled upstream),
    /// otherwise the generic `service_unavailable` catch-all for an
    /// exhausted retry budget.
    fn map_exhausted_kind(&self, last_outcome: AttemptOutcome) -> ProxyErrorKind {
        match last_outcome {
            AttemptOutcome::TransportError => ProxyErrorKind::UpstreamTimeout,
            _ => ProxyErrorKind::ServiceUnavailable,
        }
    }

    async fn finish_cancelled(
        &self,
        request_id: Uuid,
        model: &str,
        prompt: &str,
        parameters: &RequestParameters,
        request_started: std::time::Instant,
        session_id: Option<Uuid>,
        is_probe: bool,
    ) -> Result<ChatOutcome, CoordinatorError> {
        self.record_failure(is_probe);
        self.persist_failure(
            request_id,
            session_id,
            model,
            prompt,
            parameters,
            0,
            request_started.elapsed().as_millis() as i64,
            "request cancelled by caller",
        )
        .await;
        metrics::counter!(METRICS_ID_REQUESTS_TOTAL, "status" => "cancelled").increment(1);
        Err(CoordinatorError {
            kind: ProxyErrorKind::InternalError,
            message: "request cancelled by caller".to_string(),
            request_id,
            upstream_status: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_success(
        &self,
        request_id: Uuid,
        session_id: Uuid,
        model: &str,
        prompt: &str,
        parameters: &RequestParameters,
        payload: &UpstreamPayload,
        status: i32,
        latency_ms: i64,
    ) {
        let generation = Generation {
            id: Uuid::new_v4(),
            request_id,
            session_id: Some(session_id),
            provider: self.config.provider.clone(),
            model: model.to_string(),
            prompt: prompt.to_string(),
            parameters: parameters.clone(),
            response_text: Some(payload.response_text.clone()),
            finish_reason: payload.finish_reason.clone(),
            reasoning_content: payload.reasoning_content.clone(),
            response_raw: Some(payload.response_raw.clone()),
            status,
            latency_ms,
            error_message: None,
            prompt_tokens: payload.usage.prompt_tokens,
            response_tokens: payload.usage.response_tokens,
            reasoning_tokens: payload.usage.reasoning_tokens,
            audio_tokens: payload.usage.audio_tokens,
            image_tokens: payload.usage.image_tokens,
            cached_tokens: payload.usage.cached_tokens,
            accepted_prediction_tokens: payload.usage.accepted_prediction_tokens,
            rejected_prediction_tokens: payload.usage.rejected_prediction_tokens,
            num_sources_used: payload.usage.num_sources_used,
            response_id: payload.response_id.clone(),
            previous_response_id: payload.previous_response_id.clone(),
            incomplete_details: payload.incomplete_details.clone(),
            annotations: payload.annotations.clone(),
            created_at: Utc::now(),
        };

        let generation_id = match self.persistence.insert_generation(generation).await {
            Ok(id) => id,
            Err(err) => {
                warn!(error = %err, "persistence unavailable, generation row dropped");
                return;
            }
        };

        let prompt_total = payload.usage.prompt_tokens;
        let completion_total = payload.usage.response_tokens;
        let token_usage = TokenUsage {
            id: Uuid::new_v4(),
            generation_id,
            user_id: None,
            session_id: Some(session_id),
            created_at: Utc::now(),
            provider: self.config.provider.clone(),
            model: model.to_string(),
            prompt_text_tokens: prompt_total - payload.usage.audio_tokens - payload.usage.image_tokens - payload.usage.cached_tokens,
            prompt_audio_tokens: payload.usage.audio_tokens,
            prompt_image_tokens: payload.usage.image_tokens,
            prompt_cached_tokens: payload.usage.cached_tokens,
            prompt_total_tokens: prompt_total,
            completion_reasoning_tokens: payload.usage.reasoning_tokens,
            completion_audio_tokens: 0,
            completion_text_tokens: completion_total - payload.usage.reasoning_tokens,
            completion_accepted_prediction_tokens: payload.usage.accepted_prediction_tokens,
            completion_rejected_prediction_tokens: payload.usage.rejected_prediction_tokens,
            completion_total_tokens: completion_total,
            total_tokens: prompt_total + completion_total,
            prompt_cost_micro_usd: 0,
            completion_cost_micro_usd: 0,
            total_cost_micro_usd: 0,
        };
        if let Err(err) = self.persistence.insert_token_usage(token_usage).await {
            warn!(error = %err, "persistence unavailable, token usage row dropped");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_failure(
        &self,
        request_id: Uuid,
        session_id: Option<Uuid>,
        model: &str,
        prompt: &str,
        parameters: &RequestParameters,
        status: i32,
        latency_ms: i64,
        error_message: &str,
    ) {
        let generation = Generation {
            id: Uuid::new_v4(),
            request_id,
            session_id,
            provider: self.config.provider.clone(),
            model: model.to_string(),
            prompt: prompt.to_string(),
            parameters: parameters.clone(),
            response_text: None,
            finish_reason: None,
            reasoning_content: None,
            response_raw: None,
            status,
            latency_ms,
            error_message: Some(error_message.to_string()),
            prompt_tokens: 0,
            response_tokens: 0,
            reasoning_tokens: 0,
            audio_tokens: 0,
            image_tokens: 0,
            cached_tokens: 0,
            accepted_prediction_tokens: 0,
            rejected_prediction_tokens: 0,
            num_sources_used: 0,
            response_id: None,
            previous_response_id: None,
            incomplete_details: None,
            annotations: None,
            created_at: Utc::now(),
        };
        if let Err(err) = self.persistence.insert_generation(generation).await {
            warn!(error = %err, "persistence unavailable, failure generation row dropped");
        }
    }
}
