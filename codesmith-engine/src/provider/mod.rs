//! # Chat-completion providers
//!
//! The code generator reaches a model through [`LlmProvider`]. A request is a
//! short conversation plus, optionally, one tool the model is made to answer
//! through. A response carries the reply text, any tool calls and the token
//! usage.
//!
//! Requests are single-shot. Nothing here retries; a failure is returned to
//! the caller as a [`ProviderError`] and converts into the crate error at the
//! engine boundary.

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAIProvider;

use codesmith_error::{Error, ErrorKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

// ============================================================================
// Conversation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A function the model answers through, described by a JSON schema.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A tool invocation in a model reply. `arguments` is raw JSON text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Falls back to the provider's configured model
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    /// Offered as the only tool, with the model required to call it
    pub forced_tool: Option<ToolDefinition>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn forcing_tool(mut self, tool: ToolDefinition) -> Self {
        self.forced_tool = Some(tool);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub id: String,
    pub model: String,
    /// Concatenated text blocks; `None` when the reply was tool calls only
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl Usage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ProviderError {
    /// No HTTP response at all
    Network(String),
    /// 401 or 403
    Unauthorized,
    /// 429
    RateLimited,
    /// 404, which these APIs return for an unknown model
    UnknownModel(String),
    /// 400
    Rejected(String),
    /// Any other unsuccessful status
    Status { code: u16, body: String },
    /// The body did not have the expected shape
    Malformed(String),
}

impl ProviderError {
    pub(crate) fn from_status(code: u16, body: String, model: &str) -> Self {
        match code {
            401 | 403 => Self::Unauthorized,
            404 => Self::UnknownModel(model.to_string()),
            429 => Self::RateLimited,
            400 => Self::Rejected(body),
            _ => Self::Status { code, body },
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(e) => write!(f, "could not reach the model API: {}", e),
            Self::Unauthorized => f.write_str("the API key was rejected"),
            Self::RateLimited => f.write_str("rate limited by the model API"),
            Self::UnknownModel(model) => write!(f, "unknown model: {}", model),
            Self::Rejected(body) => write!(f, "request rejected: {}", body),
            Self::Status { code, body } => write!(f, "model API returned {}: {}", code, body),
            Self::Malformed(e) => write!(f, "unreadable model response: {}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        let kind = match &err {
            ProviderError::Network(_) => ErrorKind::NetworkFailed,
            ProviderError::RateLimited => ErrorKind::RateLimited,
            ProviderError::Unauthorized => ErrorKind::AuthenticationFailed,
            ProviderError::UnknownModel(_) => ErrorKind::ProviderUnavailable,
            ProviderError::Rejected(_) => ErrorKind::InvalidArgument,
            ProviderError::Status { .. } | ProviderError::Malformed(_) => ErrorKind::InferenceFailed,
        };
        let transient = matches!(err, ProviderError::Network(_) | ProviderError::RateLimited);
        let error = Error::new(kind, err.to_string()).with_operation("provider::complete");
        let error = if transient { error.temporary() } else { error };
        error.set_source(err)
    }
}

// ============================================================================
// Provider trait
// ============================================================================

#[allow(async_fn_in_trait)]
pub trait LlmProvider: Send + Sync {
    /// Short backend name, e.g. "openai"
    fn name(&self) -> &str;

    /// Model used when a request does not name one
    fn default_model(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;
}

/// Send `request` and decode a successful JSON reply.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    model: &str,
) -> Result<T, ProviderError> {
    let response = request.send().await.map_err(|e| ProviderError::Network(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_status(status.as_u16(), body, model));
    }
    response.json().await.map_err(|e| ProviderError::Malformed(e.to_string()))
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    Anthropic,
}

impl ProviderType {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-3.5-turbo",
            Self::Anthropic => "claude-sonnet-4-20250514",
        }
    }

    /// Environment variable conventionally holding this backend's key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(Error::config_invalid(format!("unknown provider: {}", other))),
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
        })
    }
}

/// Where and how to reach a backend.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: ProviderType,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(provider: ProviderType, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: provider.default_base_url().to_string(),
            model: provider.default_model().to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// `base_url` joined with `path`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client, ProviderError> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProviderError::Network(format!("failed to create HTTP client: {}", e)))
    }
}

// ============================================================================
// Usage tracking
// ============================================================================

/// Token usage summed over several completions.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    pub calls: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub per_model: BTreeMap<String, Usage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, model: &str, usage: &Usage) {
        self.calls += 1;
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;

        let entry = self.per_model.entry(model.to_string()).or_default();
        *entry = Usage::new(
            entry.prompt_tokens + usage.prompt_tokens,
            entry.completion_tokens + usage.completion_tokens,
        );
    }

    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_follow_provider() {
        let config = ProviderConfig::new(ProviderType::OpenAI, "sk-test").with_timeout(30);
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.endpoint("chat/completions"), "https://api.openai.com/v1/chat/completions");

        let config = ProviderConfig::new(ProviderType::Anthropic, "sk-ant").with_base_url("http://localhost:8080/v1/");
        assert_eq!(config.model, "claude-sonnet-4-20250514");
        assert_eq!(config.endpoint("/messages"), "http://localhost:8080/v1/messages");
    }

    #[test]
    fn test_provider_type_names() {
        for provider in [ProviderType::OpenAI, ProviderType::Anthropic] {
            assert_eq!(provider.to_string().parse::<ProviderType>().unwrap(), provider);
        }
        let err = "cohere".parse::<ProviderType>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(ProviderType::Anthropic.api_key_env(), "ANTHROPIC_API_KEY");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(ProviderError::from_status(403, String::new(), "m"), ProviderError::Unauthorized));
        assert!(matches!(ProviderError::from_status(404, String::new(), "m"), ProviderError::UnknownModel(m) if m == "m"));
        assert!(matches!(ProviderError::from_status(429, String::new(), "m"), ProviderError::RateLimited));
        assert!(matches!(ProviderError::from_status(400, "bad".into(), "m"), ProviderError::Rejected(b) if b == "bad"));
        assert!(matches!(ProviderError::from_status(502, String::new(), "m"), ProviderError::Status { code: 502, .. }));
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = ProviderError::Unauthorized.into();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert!(!err.is_retryable());

        let err: Error = ProviderError::RateLimited.into();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.is_retryable());

        let err: Error = ProviderError::Status { code: 500, body: "boom".into() }.into();
        assert_eq!(err.kind(), ErrorKind::InferenceFailed);
        assert_eq!(err.operation(), "provider::complete");
        assert_eq!(err.message(), "model API returned 500: boom");
    }

    #[test]
    fn test_usage_tracker() {
        let mut tracker = UsageTracker::new();
        tracker.track("gpt-3.5-turbo", &Usage::new(100, 50));
        tracker.track("gpt-3.5-turbo", &Usage::new(200, 100));
        tracker.track("gpt-4o", &Usage::new(10, 5));

        assert_eq!(tracker.calls, 3);
        assert_eq!(tracker.total_tokens(), 465);
        assert_eq!(tracker.per_model["gpt-3.5-turbo"], Usage::new(300, 150));
        assert_eq!(tracker.per_model.len(), 2);
    }
}
