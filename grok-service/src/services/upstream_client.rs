//! The upstream client: performs one attempt against the upstream chat
//! service using one leased session.
//!
//! The client always buffers a complete upstream reply before returning: the
//! core only needs to choose between a buffered reply and a reply sliced
//! into SSE deltas at request-serving time, not byte-level passthrough of
//! the upstream connection. `grok_service::api::chat` is the layer that
//! slices a buffered [`UpstreamPayload`] into `chat.completion.chunk` events
//! when the caller asked for `stream: true`.

use std::time::{Duration, Instant};

use grok_types::api::v1::ChatCompletionRequest;
use grok_types::{AttemptOutcome, Session};
use rand::seq::SliceRandom;
use regex::Regex;
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A fixed rotation of realistic desktop user-agent strings. Stable within
/// one attempt; re-rolled on the next.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
];

/// Signature used to tell a bare rate-limit rejection apart from a genuine
/// anti-bot interception, matched against common Cloudflare challenge-page
/// markers. Kept as one compiled regex so both 403 and 503 bodies are
/// checked the same way.
fn anti_bot_signature() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(cf-mitigated|checking your browser|cf_chl_opt|challenges\.cloudflare\.com|attention required.{0,20}cloudflare|just a moment)")
            .expect("static anti-bot pattern is valid")
    })
}

fn rate_limit_signature() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)rate.?limit").expect("static rate-limit pattern is valid"))
}

/// Detailed token accounting extracted from an upstream reply, defaulting to
/// `0`/`None` for any category the reply did not report.
#[derive(Clone, Debug, Default)]
pub struct UpstreamUsage {
    /// Prompt (input) tokens.
    pub prompt_tokens: i64,
    /// Completion (output) tokens.
    pub response_tokens: i64,
    /// Reasoning tokens, a subset of completion tokens some models report
    /// separately.
    pub reasoning_tokens: i64,
    /// Audio modality tokens, prompt side.
    pub audio_tokens: i64,
    /// Image modality tokens, prompt side.
    pub image_tokens: i64,
    /// Tokens served from a prompt cache.
    pub cached_tokens: i64,
    /// Tokens from an accepted speculative-decoding prediction.
    pub accepted_prediction_tokens: i64,
    /// Tokens from a rejected speculative-decoding prediction.
    pub rejected_prediction_tokens: i64,
    /// Number of retrieval sources the model consulted, if reported.
    pub num_sources_used: i64,
}

/// A fully buffered, successful upstream reply.
#[derive(Clone, Debug)]
pub struct UpstreamPayload {
    /// The assistant's reply text.
    pub response_text: String,
    /// Why generation stopped, if the upstream reported one.
    pub finish_reason: Option<String>,
    /// Chain-of-thought/reasoning trace, if the upstream reported one.
    pub reasoning_content: Option<String>,
    /// The raw parsed JSON body, kept for the `response_raw` column.
    pub response_raw: serde_json::Value,
    /// Upstream-assigned response id, if present.
    pub response_id: Option<String>,
    /// The response id this turn continues from, if present.
    pub previous_response_id: Option<String>,
    /// Structured detail on why a response is incomplete, if present.
    pub incomplete_details: Option<serde_json::Value>,
    /// Citations/annotations attached to the reply, if present.
    pub annotations: Option<serde_json::Value>,
    /// Token accounting.
    pub usage: UpstreamUsage,
}

/// The outcome of one attempt, always populated regardless of success or
/// failure.
pub struct AttemptResult {
    /// The classified outcome.
    pub outcome: AttemptOutcome,
    /// The HTTP-equivalent status observed, or a synthetic one for
    /// transport-level failures.
    pub http_status: i32,
    /// Wall-clock latency of this attempt, from just before dispatch to
    /// last byte (success) or first error signal (failure).
    pub latency_ms: i64,
    /// A sanitized error snippet, set on any non-`success` outcome.
    pub error_message: Option<String>,
    /// Set only when `outcome` is `success`.
    pub payload: Option<UpstreamPayload>,
}

/// Performs attempts against one upstream chat service.
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    /// Builds a client bound to `base_url`, with a hard per-attempt
    /// connect+read timeout of `attempt_timeout`.
    pub fn new(base_url: String, attempt_timeout: Duration) -> eyre::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(attempt_timeout)
            .build()
            .map_err(|e| eyre::eyre!("failed to build upstream HTTP client: {e}"))?;
        Ok(Self { http, base_url })
    }

    /// Performs one attempt, returning a classified [`AttemptResult`].
    /// Cancellation-safe: if `cancellation_token` fires before a terminal
    /// outcome is reached, returns `transport_error` immediately and drops
    /// the in-flight connection.
    pub async fn attempt(
        &self,
        session: &Session,
        request: &ChatCompletionRequest,
        cancellation_token: &CancellationToken,
    ) -> AttemptResult {
        let started = Instant::now();
        let user_agent = USER_AGENTS.choose(&mut rand::thread_rng()).copied().unwrap_or(USER_AGENTS[0]);

        let send = self
            .http
            .post(&self.base_url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .header(reqwest::header::ACCEPT, "*/*")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .header("sec-ch-ua", "\"Chromium\";v=\"124\", \"Google Chrome\";v=\"124\", \"Not-A.Brand\";v=\"99\"")
            .header("sec-ch-ua-mobile", "?0")
            .header("sec-ch-ua-platform", "\"Windows\"")
            .header("sec-fetch-dest", "empty")
            .header("sec-fetch-mode", "cors")
            .header("sec-fetch-site", "same-origin")
            .header("priority", "u=1, i")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .header(reqwest::header::COOKIE, session.cookie_material.expose_secret())
            .json(request)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => {
                return Self::transport_error(started, "request cancelled by caller".into());
            }
            result = send => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                return Self::transport_error(started, sanitize(&err.to_string()));
            }
        };

        let status = response.status();
        let body = tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => {
                return Self::transport_error(started, "request cancelled by caller".into());
            }
            result = Self::drain_body(response) => result,
        };

        let body = match body {
            Ok(body) => body,
            Err(err) => {
                return Self::transport_error(started, sanitize(&err.to_string()));
            }
        };

        let latency_ms = started.elapsed().as_millis() as i64;

        if status.is_success() {
            match Self::parse_payload(&body) {
                Ok(payload) => AttemptResult {
                    outcome: AttemptOutcome::Success,
                    http_status: status.as_u16() as i32,
                    latency_ms,
                    error_message: None,
                    payload: Some(payload),
                },
                Err(err) => {
                    warn!(error = %err, "upstream returned 2xx with an unparseable body");
                    AttemptResult {
                        outcome: AttemptOutcome::Upstream5xx,
                        http_status: status.as_u16() as i32,
                        latency_ms,
                        error_message: Some(sanitize(&err)),
                        payload: None,
                    }
                }
            }
        } else {
            let outcome = classify_failure(status.as_u16(), &body);
            AttemptResult {
                outcome,
                http_status: status.as_u16() as i32,
                latency_ms,
                error_message: Some(sanitize(&truncate(&body, 256))),
                payload: None,
            }
        }
    }

    /// Reads the upstream body as a sequence of newline-delimited JSON
    /// events, keeping only the most recent complete event materialized at
    /// any time so the accumulation footprint stays bounded to one message.
    async fn drain_body(response: reqwest::Response) -> reqwest::Result<String> {
        use futures::StreamExt;
        let mut stream = response.bytes_stream();
        let mut carry = Vec::new();
        let mut last_complete_line = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            carry.extend_from_slice(&chunk);
            while let Some(pos) = carry.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = carry.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    last_complete_line = trimmed.to_string();
                }
            }
        }
        if !carry.is_empty() {
            let trailing = String::from_utf8_lossy(&carry).trim().to_string();
            if !trailing.is_empty() {
                last_complete_line = trailing;
            }
        }
        Ok(last_complete_line)
    }

    fn parse_payload(body: &str) -> Result<UpstreamPayload, String> {
        let raw: serde_json::Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON body: {e}"))?;

        let choice = raw.get("choices").and_then(|c| c.get(0));
        let message = choice.and_then(|c| c.get("message"));
        let response_text = message
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .unwrap_or_default();
        let finish_reason = choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let reasoning_content = message
            .and_then(|m| m.get("reasoning_content"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let usage = raw.get("usage");
        let get_i64 = |key: &str| usage.and_then(|u| u.get(key)).and_then(|v| v.as_i64()).unwrap_or(0);

        Ok(UpstreamPayload {
            response_text,
            finish_reason,
            reasoning_content,
            response_id: raw.get("id").and_then(|v| v.as_str()).map(str::to_string),
            previous_response_id: raw.get("previous_response_id").and_then(|v| v.as_str()).map(str::to_string),
            incomplete_details: raw.get("incomplete_details").cloned(),
            annotations: raw.get("annotations").cloned(),
            usage: UpstreamUsage {
                prompt_tokens: get_i64("prompt_tokens"),
                response_tokens: get_i64("completion_tokens"),
                reasoning_tokens: get_i64("reasoning_tokens"),
                audio_tokens: get_i64("audio_tokens"),
                image_tokens: get_i64("image_tokens"),
                cached_tokens: get_i64("cached_tokens"),
                accepted_prediction_tokens: get_i64("accepted_prediction_tokens"),
                rejected_prediction_tokens: get_i64("rejected_prediction_tokens"),
                num_sources_used: get_i64("num_sources_used"),
            },
            response_raw: raw,
        })
    }

    fn transport_error(started: Instant, message: String) -> AttemptResult {
        AttemptResult {
            outcome: AttemptOutcome::TransportError,
            http_status: 0,
            latency_ms: started.elapsed().as_millis() as i64,
            error_message: Some(message),
            payload: None,
        }
    }
}

/// Maps a non-2xx status and body onto the fixed outcome classification.
fn classify_failure(status: u16, body: &str) -> AttemptOutcome {
    match status {
        429 => AttemptOutcome::RateLimit,
        401 => AttemptOutcome::AuthFailure,
        403 => {
            if anti_bot_signature().is_match(body) {
                AttemptOutcome::AntiBot
            } else {
                AttemptOutcome::AuthFailure
            }
        }
        503 => {
            if anti_bot_signature().is_match(body) {
                AttemptOutcome::AntiBot
            } else {
                AttemptOutcome::Upstream5xx
            }
        }
        500 | 502 | 504 => AttemptOutcome::Upstream5xx,
        400 | 404 | 422 => AttemptOutcome::ClientError,
        _ if rate_limit_signature().is_match(body) => AttemptOutcome::RateLimit,
        _ if (500..600).contains(&status) => AttemptOutcome::Upstream5xx,
        _ => AttemptOutcome::ClientError,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max])
    }
}

/// Strips anything that looks like cookie or bearer material out of an
/// error string before it is stored or logged.
fn sanitize(message: &str) -> String {
    static SENSITIVE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = SENSITIVE.get_or_init(|| {
        Regex::new(r"(?i)(cookie|authorization|password|token|bearer)\s*[:=]\s*\S+").expect("static redaction pattern is valid")
    });
    re.replace_all(message, "$1=[REDACTED]").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_rate_limit_by_status() {
        assert_eq!(classify_failure(429, ""), AttemptOutcome::RateLimit);
    }

    #[test]
    fn classifies_auth_failure_without_anti_bot_signature() {
        assert_eq!(classify_failure(403, "forbidden"), AttemptOutcome::AuthFailure);
    }

    #[test]
    fn classifies_anti_bot_on_cloudflare_signature() {
        assert_eq!(
            classify_failure(403, "Attention Required! | Cloudflare"),
            AttemptOutcome::AntiBot
        );
        assert_eq!(classify_failure(503, "Checking your browser before accessing"), AttemptOutcome::AntiBot);
    }

    #[test]
    fn classifies_upstream_5xx() {
        assert_eq!(classify_failure(500, ""), AttemptOutcome::Upstream5xx);
        assert_eq!(classify_failure(502, ""), AttemptOutcome::Upstream5xx);
        assert_eq!(classify_failure(504, ""), AttemptOutcome::Upstream5xx);
        assert_eq!(classify_failure(503, "ordinary maintenance page"), AttemptOutcome::Upstream5xx);
    }

    #[test]
    fn classifies_client_error() {
        assert_eq!(classify_failure(400, ""), AttemptOutcome::ClientError);
        assert_eq!(classify_failure(404, ""), AttemptOutcome::ClientError);
        assert_eq!(classify_failure(422, ""), AttemptOutcome::ClientError);
    }

    #[test]
    fn sanitize_redacts_sensitive_keys() {
        let redacted = sanitize("request failed, cookie: abc123; Authorization=Bearer xyz");
        assert!(!redacted.contains("abc123"));
        assert!(!redacted.contains("xyz"));
    }

    #[test]
    fn parse_payload_defaults_missing_usage_to_zero() {
        let payload = UpstreamClient::parse_payload(
            r#"{"choices":[{"message":{"content":"hi"},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert_eq!(payload.response_text, "hi");
        assert_eq!(payload.usage.prompt_tokens, 0);
        assert_eq!(payload.usage.response_tokens, 0);
    }
}
