//! Minimal OpenAI-compatible chat-completions client plus a queue-backed mock.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct LlmClientConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl LlmClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
}

impl ChatRole {
    fn as_api_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited by the generation service")]
    RateLimited,
    #[error("api error {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("response carried no message content")]
    EmptyReply,
    #[error("mock client response queue is empty")]
    MockQueueEmpty,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends the conversation and returns the assistant's raw text reply.
    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError>;
}

#[derive(Clone, Debug)]
pub struct OpenAiClient {
    http: HttpClient,
    cfg: LlmClientConfig,
}

impl OpenAiClient {
    pub fn new(cfg: LlmClientConfig) -> Result<Self, LlmError> {
        let http = HttpClient::builder().timeout(cfg.timeout).build()?;
        Ok(Self { http, cfg })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'))
    }

    fn build_api_request(&self, messages: &[ChatMessage]) -> ApiChatRequest {
        ApiChatRequest {
            model: self.cfg.model.clone(),
            temperature: self.cfg.temperature,
            messages: messages
                .iter()
                .map(|m| ApiChatMessage {
                    role: m.role.as_api_str().to_string(),
                    content: Some(m.content.clone()),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        let request = self.build_api_request(&messages);
        debug!(model = %request.model, "chat completion request");

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.cfg.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        let bytes = response.bytes().await?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ApiErrorEnvelope>(&bytes)
                .map(|env| env.error.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
            return Err(LlmError::Api { status, message });
        }

        let parsed: ApiChatResponse = serde_json::from_slice(&bytes)?;
        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or(LlmError::EmptyReply)
    }
}

/// Replays queued results in order and records every conversation it receives.
#[derive(Debug, Default)]
pub struct MockClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, resp: Result<String, LlmError>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(resp);
        }
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockClient {
    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<String, LlmError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages);
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or(Err(LlmError::MockQueueEmpty))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ApiChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<ApiChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiChatResponse {
    choices: Vec<ApiChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiChatChoice {
    message: ApiChatMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_serializes_messages() {
        let client = OpenAiClient::new(
            LlmClientConfig::new("test")
                .with_model("gpt-test")
                .with_base_url("http://localhost:9/v1/"),
        )
        .unwrap();

        let api_request = client.build_api_request(&[
            ChatMessage::system("be brief"),
            ChatMessage::user("hello"),
        ]);
        let value = serde_json::to_value(&api_request).unwrap();

        assert_eq!(value["model"], "gpt-test");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hello");
        assert_eq!(client.endpoint(), "http://localhost:9/v1/chat/completions");
    }

    #[tokio::test]
    async fn mock_client_replays_in_order() {
        let mock = MockClient::new();
        mock.push_response(Err(LlmError::RateLimited));
        mock.push_response(Ok("hi".into()));

        assert!(matches!(
            mock.chat_completion(vec![ChatMessage::user("a")]).await,
            Err(LlmError::RateLimited)
        ));
        assert_eq!(mock.chat_completion(vec![ChatMessage::user("b")]).await.unwrap(), "hi");
        assert!(matches!(
            mock.chat_completion(vec![ChatMessage::user("c")]).await,
            Err(LlmError::MockQueueEmpty)
        ));
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.calls()[1][0].content, "b");
    }
}
