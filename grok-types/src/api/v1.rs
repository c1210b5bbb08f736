//! OpenAI-compatible `chat.completions` request/response types.
//!
//! These mirror the subset of the OpenAI Chat Completions wire format this
//! proxy recognizes. Fields the proxy does not interpret but must still
//! round-trip (e.g. `tools`) are kept as raw `serde_json::Value`.

use serde::{Deserialize, Serialize};

/// `POST /v1/chat/completions` request body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// The upstream model name.
    pub model: String,
    /// Ordered conversation history.
    pub messages: Vec<Message>,
    /// Whether the caller wants a server-sent-event stream of
    /// `chat.completion.chunk` deltas instead of one buffered response.
    #[serde(default)]
    pub stream: bool,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Nucleus sampling threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Upper bound on tokens produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Tool/function definitions offered to the model, passed through
    /// unparsed to the upstream wire format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
    /// `auto` | `none` | an explicit tool-name request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Whether the model may call multiple tools in one turn.
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
}

fn default_true() -> bool {
    true
}

/// `tool_choice`: either one of the two fixed strings or an explicit
/// tool-selection object, passed through as given.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// `"auto"` or `"none"`.
    Mode(String),
    /// An explicit `{"type": "function", "function": {"name": ...}}` choice.
    Explicit(serde_json::Value),
}

/// One message in the conversation history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// `system` | `user` | `assistant` | `tool`.
    pub role: String,
    /// Either a plain string or a sequence of typed content parts.
    pub content: MessageContent,
}

/// Message content: a bare string, or a sequence of typed parts (text and
/// image references), per the OpenAI multi-modal message shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// A sequence of typed parts.
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flattens this content into plain text, concatenating the text parts
    /// of a multi-part message and ignoring non-text parts. Used to build
    /// the canonicalized prompt snapshot stored on a `Generation` row.
    pub fn to_plain_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One part of a multi-part message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// A text segment.
    Text {
        /// The segment's text.
        text: String,
    },
    /// A reference to an image, passed through unparsed.
    ImageUrl {
        /// `{"url": ..., "detail": ...}`.
        image_url: serde_json::Value,
    },
}

/// `chat.completion` non-streaming response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Response identifier.
    pub id: String,
    /// Always `"chat.completion"`.
    pub object: String,
    /// Unix timestamp (seconds) of creation.
    pub created: i64,
    /// Model that produced the response.
    pub model: String,
    /// Exactly one choice, matching this proxy's single-reply upstream.
    pub choices: Vec<Choice>,
    /// Token accounting for this response.
    pub usage: Usage,
}

/// One completion choice.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Choice {
    /// Position in `choices` (always `0` for this proxy).
    pub index: u32,
    /// The assistant's reply.
    pub message: ResponseMessage,
    /// Why generation stopped (`stop`, `length`, `tool_calls`, ...).
    pub finish_reason: Option<String>,
}

/// The assistant message inside a [`Choice`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Always `"assistant"`.
    pub role: String,
    /// The reply text.
    pub content: Option<String>,
}

/// Token accounting summary attached to a non-streaming response.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub prompt_tokens: i64,
    /// Completion tokens.
    pub completion_tokens: i64,
    /// `prompt_tokens + completion_tokens`.
    pub total_tokens: i64,
}

/// `chat.completion.chunk` streaming delta.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Response identifier, stable across all chunks of one stream.
    pub id: String,
    /// Always `"chat.completion.chunk"`.
    pub object: String,
    /// Unix timestamp (seconds) of creation.
    pub created: i64,
    /// Model that produced the response.
    pub model: String,
    /// Exactly one choice's delta.
    pub choices: Vec<ChunkChoice>,
}

/// One choice's delta inside a [`ChatCompletionChunk`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Position in `choices` (always `0` for this proxy).
    pub index: u32,
    /// The incremental content for this chunk.
    pub delta: Delta,
    /// Set on the final chunk only.
    pub finish_reason: Option<String>,
}

/// The incremental content of a streaming chunk.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Delta {
    /// Present only on the first chunk of a stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// The incremental text for this chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// The literal SSE terminator the OpenAI streaming wire format uses.
pub const SSE_DONE: &str = "[DONE]";
