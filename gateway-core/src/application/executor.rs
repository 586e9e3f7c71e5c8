// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool Executor (C8): `execute()` dispatches one resolved tool call
//! against its server's pooled connection under a hard timeout, evicting
//! the connection on connection-class failures (spec.md §4.6).

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use tracing::warn;

use crate::application::connection_pool::ConnectionPool;
use crate::domain::connection::ToolContent;
use crate::domain::errors::ErrorKind;
use crate::domain::llm::{GenerationOptions, LLMProvider};
use crate::infrastructure::process::wire::{extract_content, ClientMessage, WireError};

/// Hard ceiling on one tool invocation, independent of the server's own
/// configured timeouts (spec.md §4.6 step 2, "120s hard timeout").
pub const HARD_TIMEOUT: Duration = Duration::from_secs(120);

pub struct ToolExecutor {
    pool: Arc<ConnectionPool>,
    llm: Arc<dyn LLMProvider>,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub tool_id: String,
    pub content: ToolContent,
    /// Natural-language summary of `content`, handed off to C9 and falling
    /// back to a generic success line if summarisation fails (spec.md §4.6
    /// step 5).
    pub summary: String,
}

impl ToolExecutor {
    pub fn new(pool: Arc<ConnectionPool>, llm: Arc<dyn LLMProvider>) -> Self {
        Self { pool, llm }
    }

    /// Executes `tool_id` on `server_name` with `parameters`, following
    /// spec.md §4.6: acquire a pooled connection, send `tool_call`, await
    /// the correlated `tool_response` within `HARD_TIMEOUT`, extract its
    /// `ToolContent`, and evict the connection on any error whose
    /// `ErrorKind::evicts_connection()` is true.
    pub async fn execute(
        &self,
        server_name: &str,
        tool_id: &str,
        parameters: serde_json::Value,
    ) -> Result<ExecutionResult, ErrorKind> {
        let start = std::time::Instant::now();
        let actor = self.pool.acquire(server_name).await?;
        let call_id = Uuid::new_v4().to_string();

        let reply = actor
            .request(
                call_id.clone(),
                ClientMessage::ToolCall {
                    session_id: actor.session_id().to_string(),
                    id: call_id,
                    name: tool_id.to_string(),
                    parameters,
                },
                HARD_TIMEOUT,
            )
            .await;

        let reply = match reply {
            Ok(msg) => msg,
            Err(e) => {
                if e.evicts_connection() {
                    self.pool.evict(server_name).await;
                }
                metrics::counter!("aegis_executor_tool_calls_failed_total").increment(1);
                return Err(e);
            }
        };

        let outcome = match extract_content(reply) {
            Ok(content) => {
                let summary = self.summarize(tool_id, &content).await;
                Ok(ExecutionResult { tool_id: tool_id.to_string(), content, summary })
            }
            Err(WireError::ServerError(msg)) => Err(ErrorKind::ToolExecutionFailed(msg)),
            Err(WireError::UnexpectedType) => {
                warn!(server = server_name, tool = tool_id, "tool call got a non tool_response reply");
                Err(ErrorKind::ToolExecutionFailed("unexpected reply type".into()))
            }
            Err(WireError::Malformed(e)) => Err(ErrorKind::ToolExecutionFailed(e)),
        };

        metrics::histogram!("aegis_executor_tool_call_seconds").record(start.elapsed().as_secs_f64());
        if outcome.is_err() {
            metrics::counter!("aegis_executor_tool_calls_failed_total").increment(1);
        }
        outcome
    }

    /// Hands the raw tool result to the LLM for a one-line natural-language
    /// summary, falling back to a generic success line if the call errors
    /// (spec.md §4.6 step 5).
    async fn summarize(&self, tool_id: &str, content: &ToolContent) -> String {
        let raw = content.clone().into_plain_string();
        let prompt = format!(
            "Summarise the following tool result in one short sentence for an end user. \
             Do not mention tool names or technical details, just the outcome.\n\n{raw}"
        );
        match self.llm.generate(&prompt, &GenerationOptions { max_tokens: Some(120), ..Default::default() }).await {
            Ok(response) if !response.text.trim().is_empty() => response.text.trim().to_string(),
            _ => format!("Tool {tool_id} executed successfully"),
        }
    }

    /// Runs multiple tool calls against the same server sequentially; the
    /// actor serialises requests over one stdio connection, so true
    /// concurrency happens across servers, not within one (spec.md §9
    /// design note on per-server actors).
    pub async fn execute_batch(
        &self,
        calls: Vec<(String, String, serde_json::Value)>,
    ) -> Vec<Result<ExecutionResult, ErrorKind>> {
        let mut results = Vec::with_capacity(calls.len());
        for (server_name, tool_id, parameters) in calls {
            results.push(self.execute(&server_name, &tool_id, parameters).await);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_timeout_is_two_minutes() {
        assert_eq!(HARD_TIMEOUT, Duration::from_secs(120));
    }
}
