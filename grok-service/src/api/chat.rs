//! `POST /v1/chat/completions`: the OpenAI-compatible chat completions
//! endpoint.
//!
//! Buffered replies are served directly; `stream: true` slices the same
//! buffered [`UpstreamPayload`] into a handful of `chat.completion.chunk`
//! SSE events rather than passing the upstream connection through
//! byte-for-byte.

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::stream;
use grok_types::api::v1::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Choice, ChunkChoice, Delta, ResponseMessage,
    Usage, SSE_DONE,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::AppState;
use crate::api::errors::ValidationError;
use crate::services::upstream_client::UpstreamPayload;
use grok_types::ProxyErrorKind;

/// Handles `POST /v1/chat/completions`.
pub async fn chat_completions(State(state): State<AppState>, Json(request): Json<ChatCompletionRequest>) -> Response {
    if let Err(err) = validate(&request) {
        return err.into_response();
    }

    let request_id = Uuid::new_v4();
    let cancellation_token = CancellationToken::new();
    let stream_requested = request.stream;

    let outcome = state.coordinator.handle(&request, request_id, cancellation_token).await;

    match outcome {
        Ok(outcome) => {
            if stream_requested {
                sse_response(request_id, outcome.model, outcome.payload).into_response()
            } else {
                Json(buffered_response(request_id, outcome.model, &outcome.payload)).into_response()
            }
        }
        Err(err) => err.into_response(),
    }
}

fn validate(request: &ChatCompletionRequest) -> Result<(), ValidationError> {
    if request.model.trim().is_empty() {
        return Err(ValidationError { kind: ProxyErrorKind::ValidationError, message: "model must not be empty".into() });
    }
    if request.messages.is_empty() {
        return Err(ValidationError {
            kind: ProxyErrorKind::ValidationError,
            message: "messages must not be empty".into(),
        });
    }
    Ok(())
}

fn buffered_response(request_id: Uuid, model: String, payload: &UpstreamPayload) -> ChatCompletionResponse {
    let prompt_tokens = payload.usage.prompt_tokens;
    let completion_tokens = payload.usage.response_tokens;
    ChatCompletionResponse {
        id: payload.response_id.clone().unwrap_or_else(|| request_id.to_string()),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model,
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage { role: "assistant".to_string(), content: Some(payload.response_text.clone()) },
            finish_reason: payload.finish_reason.clone(),
        }],
        usage: Usage { prompt_tokens, completion_tokens, total_tokens: prompt_tokens + completion_tokens },
    }
}

fn sse_response(request_id: Uuid, model: String, payload: UpstreamPayload) -> Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let id = payload.response_id.clone().unwrap_or_else(|| request_id.to_string());
    let created = Utc::now().timestamp();
    let finish_reason = payload.finish_reason.clone();

    let role_chunk = ChatCompletionChunk {
        id: id.clone(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta { role: Some("assistant".to_string()), content: None },
            finish_reason: None,
        }],
    };
    let content_chunk = ChatCompletionChunk {
        id: id.clone(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta { role: None, content: Some(payload.response_text.clone()) },
            finish_reason: None,
        }],
    };
    let final_chunk = ChatCompletionChunk {
        id,
        object: "chat.completion.chunk".to_string(),
        created,
        model,
        choices: vec![ChunkChoice { index: 0, delta: Delta::default(), finish_reason }],
    };

    let events = vec![
        Event::default().json_data(role_chunk).unwrap_or_else(|_| Event::default().data("{}")),
        Event::default().json_data(content_chunk).unwrap_or_else(|_| Event::default().data("{}")),
        Event::default().json_data(final_chunk).unwrap_or_else(|_| Event::default().data("{}")),
        Event::default().data(SSE_DONE),
    ];

    Sse::new(stream::iter(events.into_iter().map(Ok))).keep_alive(KeepAlive::default())
}
