//! LLM code generation
//!
//! One forced tool call per request. The model is asked to answer through
//! `generate_code_response`, whose arguments carry the code, an explanation,
//! and optional suggestions.

use crate::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, ToolDefinition,
};
use codesmith_error::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const RESPONSE_TOOL: &str = "generate_code_response";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: usize = 1000;

/// Input to [`generate`].
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub context: String,
    pub language: String,
    /// Falls back to the provider's default model.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: String::new(),
            language: "python".to_string(),
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn system_message(&self) -> String {
        format!(
            "You are an expert {} programmer. Generate code based on the given prompt and context.",
            self.language
        )
    }

    fn user_message(&self) -> String {
        format!("Context: {}\n\nPrompt: {}", self.context, self.prompt)
    }
}

/// Structured answer from the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub code: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// The tool the model is forced to answer through.
pub fn response_tool() -> ToolDefinition {
    ToolDefinition::new(
        RESPONSE_TOOL,
        "Generate code based on the given prompt and context",
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The generated code"
                },
                "explanation": {
                    "type": "string",
                    "description": "A brief explanation of the generated code"
                },
                "suggestions": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "A list of suggestions for improvement or alternative approaches"
                }
            },
            "required": ["code", "explanation"]
        }),
    )
}

/// Ask `provider` for code. Makes exactly one request.
pub async fn generate<P: LlmProvider>(provider: &P, request: &GenerateRequest) -> Result<GeneratedCode> {
    let (generated, _) = generate_with_response(provider, request).await?;
    Ok(generated)
}

/// Like [`generate`], also returning the raw completion for usage accounting.
pub async fn generate_with_response<P: LlmProvider>(
    provider: &P,
    request: &GenerateRequest,
) -> Result<(GeneratedCode, CompletionResponse)> {
    if request.prompt.trim().is_empty() {
        return Err(Error::invalid_argument("Prompt cannot be empty")
            .with_operation("generator::generate"));
    }

    let mut completion = CompletionRequest::new(vec![
        ChatMessage::system(request.system_message()),
        ChatMessage::user(request.user_message()),
    ])
    .with_temperature(request.temperature)
    .with_max_tokens(request.max_tokens)
    .forcing_tool(response_tool());
    if let Some(model) = &request.model {
        completion = completion.with_model(model);
    }

    info!(provider = provider.name(), language = %request.language, "generating code");
    let response = provider
        .complete(completion)
        .await
        .map_err(|e| Error::from(e).with_operation("generator::generate"))?;

    let generated = extract_generated(&response)?;
    debug!(lines = generated.code.lines().count(), "generated code");
    Ok((generated, response))
}

fn extract_generated(response: &CompletionResponse) -> Result<GeneratedCode> {
    if let Some(call) = response.tool_calls.iter().find(|c| c.name == RESPONSE_TOOL) {
        return call.parse_arguments::<GeneratedCode>().map_err(|e| {
            Error::inference_failed(format!("Error generating code: {}", e))
                .with_operation("generator::extract")
                .set_source(e)
        });
    }

    let text = response.content.as_deref().unwrap_or_default();
    if let Ok(generated) = serde_json::from_str::<GeneratedCode>(text.trim()) {
        return Ok(generated);
    }
    match first_code_block(text) {
        Some(code) => Ok(GeneratedCode {
            code,
            explanation: text.to_string(),
            suggestions: Vec::new(),
        }),
        None => Err(Error::inference_failed("Error generating code: model returned no code")
            .with_operation("generator::extract")),
    }
}

/// Body of the first fenced code block in a markdown reply.
fn first_code_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{FinishReason, ProviderError, ToolCall, Usage};
    use std::sync::Mutex;

    /// Replays a canned response and records the request it saw.
    struct MockProvider {
        response: Mutex<Option<std::result::Result<CompletionResponse, ProviderError>>>,
        seen: Mutex<Option<CompletionRequest>>,
    }

    impl MockProvider {
        fn new(response: std::result::Result<CompletionResponse, ProviderError>) -> Self {
            Self {
                response: Mutex::new(Some(response)),
                seen: Mutex::new(None),
            }
        }

        fn replying(content: Option<&str>, tool_calls: Vec<ToolCall>) -> Self {
            Self::new(Ok(CompletionResponse {
                id: "resp".into(),
                model: "mock".into(),
                content: content.map(String::from),
                tool_calls,
                finish_reason: FinishReason::Stop,
                usage: Usage::default(),
            }))
        }
    }

    impl LlmProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        fn default_model(&self) -> &str {
            "mock"
        }

        async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, ProviderError> {
            *self.seen.lock().unwrap() = Some(request);
            self.response
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(ProviderError::Malformed("called twice".into())))
        }
    }

    fn tool_call(arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: RESPONSE_TOOL.into(),
            arguments: arguments.into(),
        }
    }

    #[tokio::test]
    async fn test_generate_from_tool_call() {
        let provider = MockProvider::replying(
            None,
            vec![tool_call(r#"{"code":"def add(a, b):\n    return a + b","explanation":"adds","suggestions":["type hints"]}"#)],
        );
        let request = GenerateRequest::new("add two numbers").with_context("math utils");
        let generated = generate(&provider, &request).await.unwrap();
        assert_eq!(generated.code, "def add(a, b):\n    return a + b");
        assert_eq!(generated.suggestions, ["type hints"]);

        let seen = provider.seen.lock().unwrap().take().unwrap();
        assert_eq!(
            seen.messages[0].content,
            "You are an expert python programmer. Generate code based on the given prompt and context."
        );
        assert_eq!(seen.messages[1].content, "Context: math utils\n\nPrompt: add two numbers");
        assert_eq!(seen.temperature, Some(0.7));
        assert_eq!(seen.max_tokens, Some(1000));
        assert_eq!(seen.forced_tool.as_ref().unwrap().name, RESPONSE_TOOL);
        assert!(seen.model.is_none());
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected_before_request() {
        let provider = MockProvider::replying(Some("unused"), Vec::new());
        let err = generate(&provider, &GenerateRequest::new("  ")).await.unwrap_err();
        assert_eq!(err.kind(), codesmith_error::ErrorKind::InvalidArgument);
        assert_eq!(err.message(), "Prompt cannot be empty");
        assert!(provider.seen.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_text_fallbacks() {
        let provider = MockProvider::replying(Some(r#"{"code":"x = 1","explanation":"one"}"#), Vec::new());
        let generated = generate(&provider, &GenerateRequest::new("p")).await.unwrap();
        assert_eq!(generated.code, "x = 1");

        let provider = MockProvider::replying(Some("Sure:\n```python\nprint('hi')\n```\nDone."), Vec::new());
        let generated = generate(&provider, &GenerateRequest::new("p")).await.unwrap();
        assert_eq!(generated.code, "print('hi')");

        let provider = MockProvider::replying(Some("I cannot help with that."), Vec::new());
        let err = generate(&provider, &GenerateRequest::new("p")).await.unwrap_err();
        assert_eq!(err.kind(), codesmith_error::ErrorKind::InferenceFailed);
    }

    #[tokio::test]
    async fn test_provider_failure_is_single_attempt() {
        let provider = MockProvider::new(Err(ProviderError::Unauthorized));
        let err = generate(&provider, &GenerateRequest::new("p").with_model("gpt-4o")).await.unwrap_err();
        assert_eq!(err.kind(), codesmith_error::ErrorKind::AuthenticationFailed);
        assert_eq!(err.operation(), "generator::generate");
        assert_eq!(provider.seen.lock().unwrap().as_ref().unwrap().model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_bad_tool_arguments() {
        let response = CompletionResponse {
            id: String::new(),
            model: String::new(),
            content: None,
            tool_calls: vec![tool_call("{not json")],
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        };
        let err = extract_generated(&response).unwrap_err();
        assert!(err.message().starts_with("Error generating code: "));
    }
}
