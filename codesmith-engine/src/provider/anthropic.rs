//! Anthropic messages API

use super::{
    send_json, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ProviderConfig,
    ProviderError, Role, ToolCall, Usage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

const API_VERSION: &str = "2023-06-01";
/// The messages API requires `max_tokens`
const FALLBACK_MAX_TOKENS: usize = 4096;

pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: config.http_client()?,
            config,
        })
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest) -> MessagesBody<'a> {
        // System prompts travel out of band
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        let (tools, tool_choice) = match &request.forced_tool {
            Some(tool) => (
                vec![json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters,
                })],
                Some(json!({ "type": "tool", "name": tool.name })),
            ),
            None => (Vec::new(), None),
        };

        MessagesBody {
            model: request.model.as_deref().unwrap_or(&self.config.model),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            messages,
            max_tokens: request.max_tokens.unwrap_or(FALLBACK_MAX_TOKENS),
            temperature: request.temperature,
            tools,
            tool_choice,
        }
    }
}

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::Unauthorized);
        }

        let body = self.body(&request);
        debug!(model = body.model, messages = body.messages.len(), "sending messages request");

        let http = self
            .client
            .post(self.config.endpoint("messages"))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);

        let reply: MessagesReply = send_json(http, body.model).await?;
        Ok(reply.into_completion())
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesReply {
    id: String,
    model: String,
    content: Vec<Block>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: usize,
    output_tokens: usize,
}

impl MessagesReply {
    fn into_completion(self) -> CompletionResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in self.content {
            match block {
                Block::Text { text: part } => text.push_str(&part),
                Block::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input.to_string(),
                }),
                Block::Unknown => {}
            }
        }

        let finish_reason = match self.stop_reason.as_deref() {
            Some("end_turn" | "stop_sequence") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            Some("tool_use") => FinishReason::ToolCalls,
            _ => FinishReason::Other,
        };

        CompletionResponse {
            id: self.id,
            model: self.model,
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            finish_reason,
            usage: Usage::new(self.usage.input_tokens, self.usage.output_tokens),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatMessage, ProviderType, ToolDefinition};

    #[test]
    fn test_system_prompt_is_lifted() {
        let provider = AnthropicProvider::new(ProviderConfig::new(ProviderType::Anthropic, "sk-ant")).unwrap();
        let request = CompletionRequest::new(vec![ChatMessage::system("be terse"), ChatMessage::user("hi")])
            .forcing_tool(ToolDefinition::new("generate_code_response", "Return code", json!({ "type": "object" })));

        let body = serde_json::to_value(provider.body(&request)).unwrap();
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["tool_choice"], json!({ "type": "tool", "name": "generate_code_response" }));
    }

    #[test]
    fn test_reply_blocks() {
        let reply: MessagesReply = serde_json::from_value(json!({
            "id": "msg_1",
            "model": "claude",
            "content": [
                { "type": "thinking", "thinking": "..." },
                { "type": "text", "text": "Here you go." },
                { "type": "tool_use", "id": "tu_1", "name": "generate_code_response", "input": { "code": "pass" } }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 7, "output_tokens": 3 }
        }))
        .unwrap();

        let completion = reply.into_completion();
        assert_eq!(completion.content.as_deref(), Some("Here you go."));
        assert_eq!(completion.tool_calls[0].arguments, "{\"code\":\"pass\"}");
        assert_eq!(completion.finish_reason, FinishReason::ToolCalls);
        assert_eq!(completion.usage.total_tokens, 10);
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_sending() {
        let provider = AnthropicProvider::new(ProviderConfig::new(ProviderType::Anthropic, "")).unwrap();
        let err = provider
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized));
    }
}
