// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! End-to-end coverage of the interpret/confirm round trip against the
//! session state machine, independent of any real MCP subprocess: these
//! exercise the scenarios that don't require a live tool server (direct
//! response, user rejection, and the start-failure blacklist), wiring a
//! fake `LLMProvider` in for the vendor call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use gateway_core::application::connection_pool::ConnectionPool;
use gateway_core::application::executor::ToolExecutor;
use gateway_core::application::launcher::{Launcher, ProcessTableHandle};
use gateway_core::application::orchestrator::Orchestrator;
use gateway_core::application::registry::ServerRegistry;
use gateway_core::application::supervisor::Supervisor;
use gateway_core::domain::errors::ErrorKind;
use gateway_core::domain::repository::{LogRepository, SessionRepository};
use gateway_core::domain::llm::{
    ChatMessage, ChatResponse, FinishReason, GenerationOptions, GenerationResponse, LLMError,
    LLMProvider, ToolCallRequest, ToolSpec, TokenUsage,
};
use gateway_core::domain::server::{ServerConfig, Timeouts};
use gateway_core::domain::session::{steps, LogStatus, SessionStatus};
use gateway_core::domain::tool::{ToolCatalogue, ToolDescriptor, ToolKind};
use gateway_core::infrastructure::repositories::in_memory::{InMemoryLogRepository, InMemorySessionRepository};

/// A vendor stand-in that either answers directly or requests one fixed
/// tool call, depending on construction.
struct StubProvider {
    tool_call: Option<ToolCallRequest>,
    direct_answer: &'static str,
}

impl StubProvider {
    fn direct(answer: &'static str) -> Self {
        Self { tool_call: None, direct_answer: answer }
    }

    fn wanting_tool(call: ToolCallRequest) -> Self {
        Self { tool_call: Some(call), direct_answer: "" }
    }
}

#[async_trait]
impl LLMProvider for StubProvider {
    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<GenerationResponse, LLMError> {
        Ok(GenerationResponse {
            text: self.direct_answer.to_string(),
            usage: TokenUsage::default(),
            provider: "stub".into(),
            model: "stub".into(),
            finish_reason: FinishReason::Stop,
        })
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
        _options: &GenerationOptions,
    ) -> Result<ChatResponse, LLMError> {
        match &self.tool_call {
            None => Ok(ChatResponse {
                content: Some(self.direct_answer.to_string()),
                tool_calls: Vec::new(),
                usage: TokenUsage::default(),
                finish_reason: FinishReason::Stop,
            }),
            Some(call) => Ok(ChatResponse {
                content: None,
                tool_calls: vec![call.clone()],
                usage: TokenUsage::default(),
                finish_reason: FinishReason::ToolCalls,
            }),
        }
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        Ok(())
    }
}

fn empty_catalogue() -> ToolCatalogue {
    ToolCatalogue::new(Vec::new())
}

fn echo_tool() -> ToolDescriptor {
    ToolDescriptor {
        tool_id: "echo".into(),
        name: "echo".into(),
        description: "echoes its input".into(),
        kind: ToolKind::Mcp,
        parameters: serde_json::json!({"type": "object"}),
        server_name: Some("echo-server".into()),
    }
}

/// An executor wired to a registry with no configured servers; S1 and S3
/// never reach it, so it only needs to satisfy `Orchestrator::new`'s types.
fn unused_executor() -> Arc<ToolExecutor> {
    let registry = Arc::new(ServerRegistry::new());
    let processes = Arc::new(ProcessTableHandle::default());
    let launcher = Arc::new(Launcher::new(registry.clone(), processes.clone()));
    let supervisor = Arc::new(Supervisor::new(registry.clone(), processes.clone(), launcher.clone()));
    let pool = Arc::new(ConnectionPool::new(registry, processes, launcher, supervisor));
    let llm: Arc<dyn LLMProvider> = Arc::new(StubProvider::direct(""));
    Arc::new(ToolExecutor::new(pool, llm))
}

/// S1: a query that needs no tools leaves the session in `parsing` and
/// records a single successful `interpret` log row.
#[tokio::test]
async fn s1_direct_response_stays_in_parsing() {
    let llm = Arc::new(StubProvider::direct("the capital of France is Paris"));
    let sessions = Arc::new(InMemorySessionRepository::default());
    let logs = Arc::new(InMemoryLogRepository::default());
    let orchestrator = Orchestrator::new(llm, unused_executor(), sessions.clone(), logs.clone(), empty_catalogue());

    let outcome = orchestrator.interpret("user-1", "what is the capital of France?").await.unwrap();

    assert_eq!(outcome.status, SessionStatus::Parsing);
    assert!(outcome.pending_tool_calls.is_empty());
    assert!(outcome.message.contains("Paris"));

    let stored = sessions.get(outcome.session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Parsing);

    let rows = logs.list_for_session(outcome.session_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.step == steps::INTERPRET));
    assert_eq!(rows.last().unwrap().status, LogStatus::Success);
}

/// S3: confirming with `approved = false` cancels the session and never
/// produces an `execute_start`/`execute_end` row.
#[tokio::test]
async fn s3_user_rejection_cancels_without_executing() {
    let call = ToolCallRequest { id: "1".into(), name: "echo".into(), arguments: r#"{"text":"hi"}"#.into() };
    let llm = Arc::new(StubProvider::wanting_tool(call));
    let sessions = Arc::new(InMemorySessionRepository::default());
    let logs = Arc::new(InMemoryLogRepository::default());
    let catalogue = ToolCatalogue::new(vec![echo_tool()]);
    let orchestrator = Orchestrator::new(llm, unused_executor(), sessions.clone(), logs.clone(), catalogue);

    let interpret = orchestrator.interpret("user-1", "echo hi").await.unwrap();
    assert_eq!(interpret.status, SessionStatus::WaitingConfirm);
    assert_eq!(interpret.pending_tool_calls.len(), 1);

    let confirm = orchestrator.confirm(interpret.session_id, "no").await;
    assert_eq!(confirm.status, Some(SessionStatus::Cancelled));
    assert!(confirm.success);
    assert!(confirm.error.is_none());

    let stored = sessions.get(interpret.session_id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::Cancelled);

    let rows = logs.list_for_session(interpret.session_id).await.unwrap();
    assert!(rows.iter().any(|r| r.step == steps::CANCELLED));
    assert!(!rows.iter().any(|r| r.step == steps::EXECUTE_START));
    assert!(!rows.iter().any(|r| r.step == steps::EXECUTE_END));
}

fn server_config(name: &str) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        command: "nonexistent-mcp-binary".into(),
        args: vec![],
        env: HashMap::new(),
        required_env: vec![],
        enabled: true,
        success_indicators: vec![],
        process_patterns: vec![],
        timeouts: Timeouts::default(),
        description: None,
        slow: false,
    }
}

/// S6: three consecutive start failures blacklist a server; once
/// `marked_failed` is set, `start_server` refuses before ever touching the
/// process table, and an explicit reset clears it.
#[tokio::test]
async fn s6_three_failures_blacklist_then_reset_allows_retry() {
    let registry = Arc::new(ServerRegistry::new());
    let mut configs = HashMap::new();
    configs.insert("flaky".to_string(), server_config("flaky"));
    registry.load(configs);

    let processes = Arc::new(ProcessTableHandle::default());
    let launcher = Launcher::new(registry.clone(), processes.clone());

    {
        let entry = registry.get("flaky").unwrap();
        let mut status = entry.status.lock().await;
        status.record_failure(3, "spawn failed");
        status.record_failure(3, "spawn failed");
        status.record_failure(3, "spawn failed");
        assert!(status.marked_failed);
        assert_eq!(status.consecutive_failures, 3);
    }

    let err = launcher.start_server("flaky").await.unwrap_err();
    assert!(matches!(err, ErrorKind::ServerUnavailable(_)));
    assert!(!processes.contains("flaky"));

    {
        let entry = registry.get("flaky").unwrap();
        entry.status.lock().await.reset_failures();
    }

    // Past the blacklist check, start_server now tries to spawn the
    // (nonexistent) binary and fails for a different reason.
    let err = launcher.start_server("flaky").await.unwrap_err();
    assert!(!matches!(err, ErrorKind::ServerUnavailable(_)));
}
