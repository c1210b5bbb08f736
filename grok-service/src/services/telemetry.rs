//! Telemetry sink: one structured event per attempt, with sensitive
//! material redacted before it reaches a log line.

use grok_types::AttemptOutcome;
use regex::Regex;
use uuid::Uuid;

/// Keys whose values are always redacted, wherever they appear in a
/// structured field or free-text error snippet.
const SENSITIVE_KEYS: &[&str] = &["cookie", "authorization", "password", "token", "bearer"];

fn sensitive_key_pattern() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        let alternation = SENSITIVE_KEYS.join("|");
        Regex::new(&format!(r"(?i)({alternation})\s*[:=]\s*\S+")).expect("static redaction pattern is valid")
    })
}

/// Redacts any `key: value` or `key=value` pair whose key matches the
/// sensitive-key list, replacing the value with a fixed marker.
pub fn redact(message: &str) -> String {
    sensitive_key_pattern().replace_all(message, "$1=[REDACTED]").into_owned()
}

/// Emits one structured `tracing` event for a single attempt. Always
/// redacts `error_snippet` before logging.
pub fn record_attempt(
    request_id: Uuid,
    attempt_index: u32,
    session_id: Uuid,
    outcome: AttemptOutcome,
    latency_ms: i64,
    upstream_status: i32,
    error_snippet: Option<&str>,
) {
    let sanitized = error_snippet.map(redact);
    tracing::info!(
        request_id = %request_id,
        attempt_index,
        session_id = %session_id,
        outcome = %outcome,
        latency_ms,
        upstream_status,
        error_snippet = sanitized.as_deref().unwrap_or(""),
        "upstream attempt"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_cookie_and_bearer_values() {
        let input = "cookie: abc123; sent Authorization=Bearer xyz789 to upstream";
        let redacted = redact(input);
        assert!(!redacted.contains("abc123"));
        assert!(!redacted.contains("xyz789"));
        assert!(redacted.contains("[REDACTED]"));
    }

    #[test]
    fn leaves_unrelated_text_untouched() {
        let input = "upstream returned 429 after 312ms";
        assert_eq!(redact(input), input);
    }
}
