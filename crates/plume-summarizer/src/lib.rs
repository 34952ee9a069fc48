//! Summarization of post text through an external generation service, with
//! rate-limit-aware retry.

use std::sync::Arc;

use plume_core::Summary;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, warn};

pub mod backoff;
pub mod client;

pub use backoff::BackoffPolicy;
pub use client::{ChatMessage, LlmClient, LlmClientConfig, LlmError, MockClient, OpenAiClient};

pub const CRATE_NAME: &str = "plume-summarizer";

/// Upper bound on post text forwarded to the service, in bytes.
const MAX_INPUT_BYTES: usize = 12_000;

const SYSTEM_PROMPT: &str = "You write short news digests of social-media posts. \
Reply with strictly valid JSON and nothing else: an object with exactly two string \
fields, \"title\" (a short headline) and \"summary\" (one paragraph of about 85 words). \
Do not add any other fields, commentary or markdown.";

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("nothing to summarize")]
    EmptyInput,
    #[error("generation service is rate limiting")]
    RateLimited,
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("generation service failed: {0}")]
    Service(#[source] LlmError),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: Box<SummarizeError>,
    },
}

#[derive(Debug, Deserialize)]
struct RawSummary {
    title: String,
    summary: String,
}

#[derive(Clone)]
pub struct Summarizer {
    client: Arc<dyn LlmClient>,
    policy: BackoffPolicy,
    language: String,
}

impl Summarizer {
    pub fn new(client: Arc<dyn LlmClient>, language: impl Into<String>) -> Self {
        Self {
            client,
            policy: BackoffPolicy::default(),
            language: language.into(),
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Summarizes `text`, retrying rate limits and service failures under the
    /// backoff policy. Empty input fails without calling the service.
    pub async fn summarize(&self, text: &str) -> Result<Summary, SummarizeError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SummarizeError::EmptyInput);
        }

        let mut attempt = 0;
        loop {
            let err = match self.attempt(text).await {
                Ok(summary) => return Ok(summary),
                Err(err) => err,
            };
            match &err {
                SummarizeError::RateLimited => {
                    warn!(attempt = attempt + 1, "summarization rate limited");
                }
                other => {
                    error!(attempt = attempt + 1, error = %other, "summarization attempt failed");
                }
            }
            if !self.policy.has_next(attempt) {
                return Err(SummarizeError::Exhausted {
                    attempts: attempt + 1,
                    last: Box::new(err),
                });
            }
            tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, text: &str) -> Result<Summary, SummarizeError> {
        let reply = self
            .client
            .chat_completion(self.messages(text))
            .await
            .map_err(|err| match err {
                LlmError::RateLimited => SummarizeError::RateLimited,
                other => SummarizeError::Service(other),
            })?;
        parse_summary(&reply)
    }

    fn messages(&self, text: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(format!(
                "{SYSTEM_PROMPT} Write both fields in {}.",
                self.language
            )),
            ChatMessage::user(truncate_to_char_boundary(text, MAX_INPUT_BYTES)),
        ]
    }
}

/// Parses a `{title, summary}` reply, tolerating surrounding code fences.
pub fn parse_summary(reply: &str) -> Result<Summary, SummarizeError> {
    let body = strip_code_fences(reply);
    let raw: RawSummary = serde_json::from_str(body)
        .map_err(|err| SummarizeError::MalformedResponse(err.to_string()))?;
    let title = raw.title.trim();
    let summary = raw.summary.trim();
    if title.is_empty() || summary.is_empty() {
        return Err(SummarizeError::MalformedResponse(
            "title or summary is blank".to_string(),
        ));
    }
    Ok(Summary {
        title: title.to_string(),
        summary: summary.to_string(),
    })
}

pub fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the info string (`json`, `JSON`, ...) up to the first newline
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    rest.trim_end().trim_end_matches("```").trim()
}

fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    const GOOD: &str = r#"{"title": "Rust ships", "summary": "A new release landed."}"#;

    fn assert_waited(started: Instant, expected: Duration) {
        let waited = started.elapsed();
        assert!(
            waited >= expected && waited < expected + Duration::from_millis(50),
            "waited {waited:?}, expected {expected:?}"
        );
    }

    fn summarizer(mock: &Arc<MockClient>) -> Summarizer {
        Summarizer::new(mock.clone(), "English")
    }

    #[test]
    fn strips_fenced_replies() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
        assert_eq!(strip_code_fences("```json {}```"), "{}");
    }

    #[test]
    fn parse_requires_both_fields() {
        let ok = parse_summary(&format!("```json\n{GOOD}\n```")).unwrap();
        assert_eq!(ok.title, "Rust ships");
        assert!(matches!(
            parse_summary(r#"{"title": "only title"}"#),
            Err(SummarizeError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_summary("Sure! Here is your summary."),
            Err(SummarizeError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_summary(r#"{"title": " ", "summary": "x"}"#),
            Err(SummarizeError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn empty_input_fails_without_calling_service() {
        let mock = Arc::new(MockClient::new());
        let err = summarizer(&mock).summarize("   \n").await.unwrap_err();
        assert!(matches!(err, SummarizeError::EmptyInput));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn prompt_carries_language_and_text() {
        let mock = Arc::new(MockClient::new());
        mock.push_response(Ok(GOOD.to_string()));
        let summary = Summarizer::new(mock.clone(), "Spanish")
            .summarize("hola mundo")
            .await
            .unwrap();
        assert_eq!(summary.summary, "A new release landed.");
        let calls = mock.calls();
        assert!(calls[0][0].content.contains("Spanish"));
        assert!(calls[0][0].content.contains("strictly valid JSON"));
        assert_eq!(calls[0][1].content, "hola mundo");
    }

    #[tokio::test(start_paused = true)]
    async fn two_rate_limits_then_success_waits_three_seconds() {
        let mock = Arc::new(MockClient::new());
        mock.push_response(Err(LlmError::RateLimited));
        mock.push_response(Err(LlmError::RateLimited));
        mock.push_response(Ok(GOOD.to_string()));

        let started = Instant::now();
        let summary = summarizer(&mock).summarize("post text").await.unwrap();

        assert_eq!(summary.title, "Rust ships");
        assert_waited(started, Duration::from_secs(3));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_yield_failure_not_panic() {
        let mock = Arc::new(MockClient::new());
        for _ in 0..5 {
            mock.push_response(Err(LlmError::RateLimited));
        }

        let started = Instant::now();
        let err = summarizer(&mock).summarize("post text").await.unwrap_err();

        assert!(matches!(err, SummarizeError::Exhausted { attempts: 3, .. }));
        assert_eq!(mock.call_count(), 3);
        assert_waited(started, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_reply_counts_toward_the_same_bound() {
        let mock = Arc::new(MockClient::new());
        mock.push_response(Ok("not json at all".into()));
        mock.push_response(Ok(format!("```json\n{GOOD}\n```")));

        let started = Instant::now();
        let summary = summarizer(&mock).summarize("post text").await.unwrap();

        assert_eq!(summary.title, "Rust ships");
        assert_waited(started, Duration::from_secs(1));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "Hello 世界";
        let truncated = truncate_to_char_boundary(text, 8);
        assert!(truncated.len() <= 8);
        assert!(text.starts_with(truncated));
    }
}
