// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! LLM provider construction from environment configuration.
//!
//! The gateway talks to exactly one configured LLM backend (spec.md §6:
//! `LLM_API_KEY`, `LLM_API_BASE`, `LLM_MODEL`); this module resolves that
//! configuration into a `LLMProvider` instance and drives calls to it with
//! retry, using the same `env:`-prefixed credential convention as the rest
//! of this gateway's configuration surface.

use crate::domain::llm::{ChatMessage, ChatResponse, GenerationOptions, LLMError, LLMProvider, ToolSpec};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::anthropic::AnthropicAdapter;
use super::ollama::OllamaAdapter;
use super::openai::OpenAIAdapter;

/// Which wire shape `LLM_API_BASE` speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
    Anthropic,
}

impl ProviderKind {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw {
            "openai" | "openai-compatible" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "anthropic" => Ok(Self::Anthropic),
            other => anyhow::bail!("unsupported LLM_PROVIDER: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl LlmConfig {
    /// Resolves a BYOLLM API key: a bare value is used verbatim, an
    /// `env:VAR_NAME` value is looked up in the process environment.
    fn resolve_api_key(raw: &str) -> anyhow::Result<String> {
        if let Some(var_name) = raw.strip_prefix("env:") {
            std::env::var(var_name)
                .map_err(|_| anyhow::anyhow!("environment variable not set: {var_name}"))
        } else {
            Ok(raw.to_string())
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let provider = ProviderKind::parse(
            &std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string()),
        )?;
        let api_base = std::env::var("LLM_API_BASE")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = match std::env::var("LLM_API_KEY") {
            Ok(raw) if !raw.is_empty() => Some(Self::resolve_api_key(&raw)?),
            _ => None,
        };
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let timeout = std::env::var("LLM_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));
        let temperature = std::env::var("LLM_TEMPERATURE").ok().and_then(|v| v.parse().ok());
        let max_tokens = std::env::var("LLM_MAX_TOKENS").ok().and_then(|v| v.parse().ok());

        Ok(Self { provider, api_base, api_key, model, timeout, temperature, max_tokens })
    }

    pub fn default_options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.max_tokens.or(Some(4096)),
            temperature: self.temperature.or(Some(0.7)),
            stop_sequences: None,
        }
    }
}

/// Wraps the single configured `LLMProvider` with bounded retry.
pub struct ProviderRegistry {
    provider: Arc<dyn LLMProvider>,
    max_retries: u32,
    retry_delay: Duration,
    pub config: LlmConfig,
}

impl ProviderRegistry {
    pub fn from_config(config: LlmConfig) -> anyhow::Result<Self> {
        let provider = Self::create_provider(&config)?;
        info!(provider = ?config.provider, model = %config.model, "initialized LLM provider");
        Ok(Self { provider, max_retries: 3, retry_delay: Duration::from_millis(250), config })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_config(LlmConfig::from_env()?)
    }

    fn create_provider(config: &LlmConfig) -> anyhow::Result<Arc<dyn LLMProvider>> {
        let api_key = config.api_key.clone().unwrap_or_default();
        let provider: Arc<dyn LLMProvider> = match config.provider {
            ProviderKind::OpenAi => {
                Arc::new(OpenAIAdapter::new(config.api_base.clone(), api_key, config.model.clone()))
            }
            ProviderKind::Ollama => Arc::new(OllamaAdapter::new(config.api_base.clone(), config.model.clone())),
            ProviderKind::Anthropic => Arc::new(AnthropicAdapter::new(api_key, config.model.clone())),
        };
        Ok(provider)
    }

    pub async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatResponse, LLMError> {
        let options = self.config.default_options();
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            match self.provider.chat(messages, tools, &options).await {
                Ok(resp) => return Ok(resp),
                Err(LLMError::Authentication(e)) => return Err(LLMError::Authentication(e)),
                Err(LLMError::InvalidInput(e)) => return Err(LLMError::InvalidInput(e)),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "chat completion failed, retrying");
                    last_error = Some(e);
                    tokio::time::sleep(self.retry_delay * 2_u32.pow(attempt)).await;
                }
            }
        }

        Err(last_error.unwrap_or(LLMError::Provider("unknown error".into())))
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, LLMError> {
        let options = self.config.default_options();
        self.provider.generate(prompt, &options).await.map(|r| r.text)
    }

    pub async fn health_check(&self) -> Result<(), LLMError> {
        self.provider.health_check().await
    }

    /// Hands out the underlying adapter for callers that need a bare
    /// `Arc<dyn LLMProvider>` (the orchestrator talks to the provider
    /// directly rather than through this struct's own retry wrapper).
    pub fn provider(&self) -> Arc<dyn LLMProvider> {
        self.provider.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_aliases() {
        assert_eq!(ProviderKind::parse("openai").unwrap(), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::parse("openai-compatible").unwrap(), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::parse("ollama").unwrap(), ProviderKind::Ollama);
        assert!(ProviderKind::parse("bogus").is_err());
    }

    #[test]
    fn resolve_api_key_passes_through_bare_value() {
        assert_eq!(LlmConfig::resolve_api_key("sk-test").unwrap(), "sk-test");
    }

    #[test]
    fn resolve_api_key_reads_env_prefix() {
        std::env::set_var("GATEWAY_TEST_KEY", "secret-value");
        assert_eq!(LlmConfig::resolve_api_key("env:GATEWAY_TEST_KEY").unwrap(), "secret-value");
        std::env::remove_var("GATEWAY_TEST_KEY");
    }
}
