//! The [`Generation`] model: the terminal, durably recorded record of one
//! inbound request.
//!
//! At most one row exists per inbound request, regardless of how many
//! attempts (sessions) it took to reach a terminal outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The request parameters snapshotted onto a [`Generation`] row, so the
/// row is self-contained even if the in-memory request is long gone.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestParameters {
    /// Sampling temperature, if the caller supplied one.
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold, if the caller supplied one.
    pub top_p: Option<f32>,
    /// Upper bound on completion tokens, if the caller supplied one.
    pub max_output_tokens: Option<u32>,
    /// `auto` | `none` | an explicit tool name, serialized as given.
    pub tool_choice: Option<String>,
    /// Whether the caller allowed parallel tool calls (OpenAI default: true).
    pub parallel_tool_calls: bool,
}

/// One fully-attempted inbound request (terminal outcome, success or
/// exhausted failure).
///
/// # Invariants
/// - `latency_ms >= 0`.
/// - One row per inbound request, never per attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Generation {
    /// Primary key.
    pub id: Uuid,
    /// The id the inbound caller's request was tagged with.
    pub request_id: Uuid,
    /// The session that produced the terminal result, if any attempt got far
    /// enough to lease one (a `validation_error` before acquisition has none).
    pub session_id: Option<Uuid>,
    /// Upstream provider tag.
    pub provider: String,
    /// Requested model name.
    pub model: String,
    /// Canonicalized prompt text (flattened message history).
    pub prompt: String,
    /// Request parameter snapshot.
    pub parameters: RequestParameters,
    /// Final response text, if the request succeeded.
    pub response_text: Option<String>,
    /// OpenAI-shaped finish reason (`stop`, `length`, `tool_calls`, ...).
    pub finish_reason: Option<String>,
    /// Upstream reasoning trace, if the model produced one and the upstream
    /// exposed it.
    pub reasoning_content: Option<String>,
    /// The raw structured upstream response, kept for debugging/replay.
    pub response_raw: Option<serde_json::Value>,
    /// HTTP-equivalent status of the terminal attempt.
    pub status: i32,
    /// Wall-clock latency of the request in milliseconds.
    pub latency_ms: i64,
    /// Sanitized error message, if the request did not succeed.
    pub error_message: Option<String>,
    /// Prompt tokens reported by upstream (0 if unknown).
    pub prompt_tokens: i64,
    /// Completion tokens reported by upstream (0 if unknown).
    pub response_tokens: i64,
    /// Reasoning-specific completion tokens (0 if not reported).
    pub reasoning_tokens: i64,
    /// Audio-modality tokens, prompt + completion combined (0 if not
    /// reported).
    pub audio_tokens: i64,
    /// Image-modality tokens (0 if not reported).
    pub image_tokens: i64,
    /// Cached-prompt tokens (0 if not reported).
    pub cached_tokens: i64,
    /// Accepted speculative-decoding prediction tokens (0 if not reported).
    pub accepted_prediction_tokens: i64,
    /// Rejected speculative-decoding prediction tokens (0 if not reported).
    pub rejected_prediction_tokens: i64,
    /// Number of retrieval sources the upstream consulted, if reported.
    pub num_sources_used: i64,
    /// Upstream's own response identifier, if it exposes one.
    pub response_id: Option<String>,
    /// Upstream's reference to a previous response in a multi-turn chain.
    pub previous_response_id: Option<String>,
    /// Why the response is incomplete, verbatim from upstream, if any.
    pub incomplete_details: Option<serde_json::Value>,
    /// Any annotations upstream attached to the response.
    pub annotations: Option<serde_json::Value>,
    /// When this row was inserted.
    pub created_at: DateTime<Utc>,
}
