//! A `wiremock`-backed fake of the upstream chat service, standing in for a
//! real cookie-authenticated upstream in tests.
//!
//! `UpstreamClient` posts directly to its configured base URL with no
//! sub-path, so every mock here matches `POST /`.

use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Starts a fresh mock upstream with no routes registered yet.
pub async fn start() -> MockServer {
    MockServer::start().await
}

/// Registers a response that mimics a successful, non-streaming upstream
/// reply: 2xx with a `choices[0].message.content` and a `usage` block.
pub async fn mount_success(server: &MockServer, content: &str, prompt_tokens: i64, completion_tokens: i64) {
    mount_success_body(
        server,
        json!({
            "id": "upstream-resp-1",
            "choices": [{
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop",
            }],
            "usage": {
                "prompt_tokens": prompt_tokens,
                "completion_tokens": completion_tokens,
            },
        }),
    )
    .await;
}

/// Registers a success response built from a fully custom JSON body, for
/// tests exercising the detailed token-accounting fields.
pub async fn mount_success_body(server: &MockServer, body: Value) {
    Mock::given(method("POST")).and(path("/")).respond_with(ResponseTemplate::new(200).set_body_json(body)).mount(server).await;
}

/// Registers a `429` response, classified as `rate_limit`.
pub async fn mount_rate_limit(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limit exceeded, try again later"))
        .mount(server)
        .await;
}

/// Registers a `401` response, classified as `auth_failure`.
pub async fn mount_auth_failure(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid session"))
        .mount(server)
        .await;
}

/// Registers a `403` response carrying a Cloudflare-style challenge body,
/// classified as `anti_bot`.
pub async fn mount_anti_bot(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Attention Required! | Cloudflare"))
        .mount(server)
        .await;
}

/// Registers a `502` response, classified as `upstream_5xx`.
pub async fn mount_upstream_5xx(server: &MockServer) {
    Mock::given(method("POST")).and(path("/")).respond_with(ResponseTemplate::new(502).set_body_string("bad gateway")).mount(server).await;
}

/// Registers a `400` response, classified as the terminal `client_error`.
pub async fn mount_client_error(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(400).set_body_string("malformed request"))
        .mount(server)
        .await;
}

/// Registers a one-shot `429` ahead of a standing success response, so the
/// first request against `server` is rate-limited and every one after it
/// succeeds. Exercises the rotate-on-retryable-failure path without needing
/// a second mock server.
pub async fn mount_rate_limit_once_then_success(server: &MockServer, content: &str, prompt_tokens: i64, completion_tokens: i64) {
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limit exceeded, try again later"))
        .up_to_n_times(1)
        .mount(server)
        .await;
    mount_success(server, content, prompt_tokens, completion_tokens).await;
}
