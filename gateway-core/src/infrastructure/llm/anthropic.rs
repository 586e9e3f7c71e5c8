// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Anthropic Messages API adapter.
//!
//! TODO: wire up native `tool_use`/`tool_result` content blocks instead of
//! flattening to a single prompt once a tool-confirmation flow needs
//! Claude-native tool calling; today only the OpenAI-compatible path is
//! used for interpret().

use crate::domain::llm::{
    ChatMessage, ChatResponse, ChatRole, FinishReason, GenerationOptions, GenerationResponse,
    LLMError, LLMProvider, TokenUsage, ToolSpec,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    usage: AnthropicUsage,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    fn flatten(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system = None;
        let mut out = Vec::new();
        for m in messages {
            match m.role {
                ChatRole::System => system = Some(m.content.clone()),
                ChatRole::User | ChatRole::Tool => out.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: m.content.clone(),
                }),
                ChatRole::Assistant => out.push(AnthropicMessage {
                    role: "assistant".to_string(),
                    content: m.content.clone(),
                }),
            }
        }
        (system, out)
    }
}

#[async_trait]
impl LLMProvider for AnthropicAdapter {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, LLMError> {
        let chat = self.chat(&[ChatMessage::user(prompt)], &[], options).await?;
        Ok(GenerationResponse {
            text: chat.content.unwrap_or_default(),
            usage: chat.usage,
            provider: "anthropic".to_string(),
            model: self.model.clone(),
            finish_reason: chat.finish_reason,
        })
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolSpec],
        options: &GenerationOptions,
    ) -> Result<ChatResponse, LLMError> {
        let (system, anthropic_messages) = Self::flatten(messages);

        let request = AnthropicRequest {
            model: self.model.clone(),
            messages: anthropic_messages,
            max_tokens: options.max_tokens.unwrap_or(4096),
            temperature: options.temperature,
            system,
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            return Err(if status == 401 || status == 403 {
                LLMError::Authentication(error_text)
            } else if status == 429 {
                LLMError::RateLimit
            } else if status == 404 {
                LLMError::ModelNotFound(self.model.clone())
            } else {
                LLMError::Provider(format!("HTTP {}: {}", status, error_text))
            });
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LLMError::Provider(format!("failed to parse response: {}", e)))?;

        let text = parsed.content.first().map(|c| c.text.clone()).unwrap_or_default();

        Ok(ChatResponse {
            content: Some(text),
            tool_calls: Vec::new(),
            usage: TokenUsage {
                prompt_tokens: parsed.usage.input_tokens,
                completion_tokens: parsed.usage.output_tokens,
                total_tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
            },
            finish_reason: match parsed.stop_reason.as_deref() {
                Some("max_tokens") => FinishReason::Length,
                _ => FinishReason::Stop,
            },
        })
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        let response = self
            .client
            .get("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if response.status().is_success() || response.status() == 404 || response.status() == 405 {
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
    fn flatten_extracts_system_separately() {
        let messages = vec![ChatMessage::system("be terse"), ChatMessage::user("hi")];
        let (system, rest) = AnthropicAdapter::flatten(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].role, "user");
    }
}
