// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! OpenAI / OpenAI-compatible chat-completions adapter.
//!
//! Implements the `LLMProvider` domain trait against the OpenAI Chat
//! Completions API shape, including `tools`/`tool_choice`/`tool_calls`
//! (spec.md §6). Also works unmodified against OpenAI-compatible gateways
//! (vLLM, LM Studio, Azure OpenAI with a compatible base URL).

use crate::domain::llm::{
    ChatMessage, ChatResponse, ChatRole, FinishReason, GenerationOptions, GenerationResponse,
    LLMError, LLMProvider, TokenUsage, ToolCallRequest, ToolSpec,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub struct OpenAIAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Clone)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: String,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireToolCallFunction,
}

#[derive(Deserialize)]
struct WireToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl OpenAIAdapter {
    pub fn new(endpoint: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
        }
    }

    fn to_wire(messages: &[ChatMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                    ChatRole::Tool => "tool",
                }
                .to_string(),
                content: Some(m.content.clone()),
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    fn classify_status(&self, status: reqwest::StatusCode, body: String) -> LLMError {
        if status == 401 || status == 403 {
            LLMError::Authentication(body)
        } else if status == 429 {
            LLMError::RateLimit
        } else if status == 404 {
            LLMError::ModelNotFound(self.model.clone())
        } else {
            LLMError::Provider(format!("HTTP {}: {}", status, body))
        }
    }

    fn finish_reason(raw: &str) -> FinishReason {
        match raw {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            "tool_calls" => FinishReason::ToolCalls,
            _ => FinishReason::Stop,
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAIAdapter {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError> {
        let chat = self
            .chat(&[ChatMessage::user(prompt)], &[], options)
            .await?;

        Ok(GenerationResponse {
            text: chat.content.unwrap_or_default(),
            usage: chat.usage,
            provider: "openai".to_string(),
            model: self.model.clone(),
            finish_reason: chat.finish_reason,
        })
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
        options: &GenerationOptions,
    ) -> Result<ChatResponse, LLMError> {
        let wire_tools = if tools.is_empty() {
            None
        } else {
            Some(
                tools
                    .iter()
                    .map(|t| WireTool {
                        kind: "function",
                        function: WireFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        };

        let request = ChatRequest {
            model: self.model.clone(),
            messages: Self::to_wire(messages),
            tool_choice: wire_tools.as_ref().map(|_| "auto"),
            tools: wire_tools,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stop: options.stop_sequences.clone(),
        };

        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify_status(status, body));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Provider(format!("failed to parse response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::Provider("no choices in response".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(ChatResponse {
            content: choice.message.content,
            tool_calls,
            usage: TokenUsage {
                prompt_tokens: parsed.usage.prompt_tokens,
                completion_tokens: parsed.usage.completion_tokens,
                total_tokens: parsed.usage.total_tokens,
            },
            finish_reason: Self::finish_reason(&choice.finish_reason),
        })
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        let url = format!("{}/models", self.endpoint.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else if response.status() == 401 || response.status() == 403 {
            Err(LLMError::Authentication("invalid API key".into()))
        } else {
            Err(LLMError::Network(format!("HTTP {}", response.status())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_wire_preserves_tool_call_id() {
        let mut msg = ChatMessage::user("the result");
        msg.tool_call_id = Some("call_1".into());
        let wire = OpenAIAdapter::to_wire(&[msg]);
        assert_eq!(wire[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn finish_reason_maps_tool_calls() {
        assert_eq!(OpenAIAdapter::finish_reason("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(OpenAIAdapter::finish_reason("stop"), FinishReason::Stop);
        assert_eq!(OpenAIAdapter::finish_reason("unknown"), FinishReason::Stop);
    }

    #[test]
    fn request_omits_tools_when_empty() {
        let req = ChatRequest {
            model: "gpt-4o".into(),
            messages: vec![WireMessage { role: "user".into(), content: Some("hi".into()), tool_call_id: None }],
            tools: None,
            tool_choice: None,
            max_tokens: Some(100),
            temperature: Some(0.2),
            stop: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(!json.as_object().unwrap().contains_key("tools"));
        assert!(!json.as_object().unwrap().contains_key("tool_choice"));
    }

    #[test]
    fn deserializes_tool_call_response() {
        let json = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "echo", "arguments": "{\"text\":\"abc\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let parsed: ChatCompletionResponse = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.choices[0].message.tool_calls.len(), 1);
        assert_eq!(parsed.choices[0].message.tool_calls[0].function.name, "echo");
    }
}
