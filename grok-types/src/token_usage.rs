//! The [`TokenUsage`] model: an append-only row per successful generation,
//! aggregatable for billing. Costs are integer micro-USD to avoid floating
//! error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only token/cost accounting row, separating prompt vs. completion
/// tokens by modality.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Primary key.
    pub id: Uuid,
    /// The [`crate::Generation`] this row accounts for.
    pub generation_id: Uuid,
    /// The caller's user identifier, if the inbound surface supplied one.
    pub user_id: Option<String>,
    /// The session that served the request.
    pub session_id: Option<Uuid>,
    /// When this row was inserted.
    pub created_at: DateTime<Utc>,
    /// Upstream provider tag.
    pub provider: String,
    /// Model name.
    pub model: String,
    /// Prompt text tokens.
    pub prompt_text_tokens: i64,
    /// Prompt audio tokens.
    pub prompt_audio_tokens: i64,
    /// Prompt image tokens.
    pub prompt_image_tokens: i64,
    /// Prompt tokens served from cache.
    pub prompt_cached_tokens: i64,
    /// Total prompt tokens (sum of the above, as reported by upstream).
    pub prompt_total_tokens: i64,
    /// Completion tokens spent on reasoning.
    pub completion_reasoning_tokens: i64,
    /// Completion audio tokens.
    pub completion_audio_tokens: i64,
    /// Completion text tokens.
    pub completion_text_tokens: i64,
    /// Accepted speculative-decoding prediction tokens.
    pub completion_accepted_prediction_tokens: i64,
    /// Rejected speculative-decoding prediction tokens.
    pub completion_rejected_prediction_tokens: i64,
    /// Total completion tokens.
    pub completion_total_tokens: i64,
    /// `prompt_total_tokens + completion_total_tokens`.
    pub total_tokens: i64,
    /// Prompt cost, in integer micro-USD.
    pub prompt_cost_micro_usd: i64,
    /// Completion cost, in integer micro-USD.
    pub completion_cost_micro_usd: i64,
    /// Total cost, in integer micro-USD.
    pub total_cost_micro_usd: i64,
}
