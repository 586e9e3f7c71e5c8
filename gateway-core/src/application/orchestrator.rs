// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Orchestrator (C11): `interpret()`/`confirm()`, gluing the tool
//! catalogue (C2), the LLM provider (C9), and the executor (C8) together
//! through the session state machine (C10), per spec.md §4.7/§4.8.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;
use tracing::warn;

use crate::application::executor::ToolExecutor;
use crate::domain::errors::{ErrorBody, ErrorKind};
use crate::domain::llm::{ChatMessage, GenerationOptions, LLMProvider, ToolCallRequest};
use crate::domain::repository::{LogRepository, RepositoryError, SessionRepository};
use crate::domain::session::{
    steps, ExecutionSummary, LogStatus, PendingToolCalls, Session, SessionStatus, ToolCallSpec,
};
use crate::domain::tool::ToolCatalogue;

/// How the user's reply to a pending confirmation was classified (spec.md
/// §4.8 step 2 / §6 "confirm, reject, restart, ambiguous").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfirmIntent {
    Confirm,
    Reject,
    Restart,
    Ambiguous,
}

const CONFIRM_WORDS: &[&str] = &["yes", "y", "yep", "yeah", "confirm", "ok", "okay", "sure", "go ahead", "proceed", "do it"];
const REJECT_WORDS: &[&str] = &["no", "n", "nope", "cancel", "stop", "reject", "abort", "never mind", "don't"];
const RESTART_WORDS: &[&str] = &["restart", "start over", "redo", "try again"];

/// Ceiling on the whole confirm-to-execute round trip (spec.md §4.8 "a 90s
/// confirm-execute timeout").
pub const CONFIRM_EXECUTE_TIMEOUT: Duration = Duration::from_secs(90);

const SYSTEM_PROMPT: &str = "You are a tool-orchestration gateway. Decide whether the user's \
request requires one or more tool calls. If it does, call the appropriate tools. If it doesn't, \
answer directly.";

pub struct Orchestrator {
    llm: Arc<dyn LLMProvider>,
    executor: Arc<ToolExecutor>,
    sessions: Arc<dyn SessionRepository>,
    logs: Arc<dyn LogRepository>,
    catalogue: ToolCatalogue,
}

#[derive(Debug, Clone)]
pub struct InterpretOutcome {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub message: String,
    pub pending_tool_calls: Vec<ToolCallSpec>,
}

/// `confirm()`'s result, shaped directly after the wire contract (spec.md
/// §6 `{session_id, success, content?, error?}`): `confirm` never raises,
/// so every outcome — including a rejection, a classification failure, or
/// an execution error — comes back through this type rather than a `Result`.
#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    pub session_id: Uuid,
    pub status: Option<SessionStatus>,
    pub success: bool,
    pub content: Option<String>,
    pub error: Option<ErrorBody>,
    pub detailed_results: Vec<Value>,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        executor: Arc<ToolExecutor>,
        sessions: Arc<dyn SessionRepository>,
        logs: Arc<dyn LogRepository>,
        catalogue: ToolCatalogue,
    ) -> Self {
        Self { llm, executor, sessions, logs, catalogue }
    }

    /// spec.md §4.8 step 1: parse intent. Creates a fresh session, asks the
    /// LLM whether the query needs tools, and either returns a direct
    /// answer (session stays `parsing`, matching spec.md §8 seed scenario
    /// S1) or moves to `waiting_confirm` with a pending tool-call batch.
    pub async fn interpret(&self, user_id: &str, query: &str) -> Result<InterpretOutcome, ErrorKind> {
        let session = Session::new(user_id);
        self.sessions.upsert(&session).await.map_err(repo_err)?;
        self.append_log(session.session_id, steps::INTERPRET, LogStatus::Processing, query.to_string()).await?;

        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(query)];
        let specs = self.catalogue.as_llm_specs();
        let response = self
            .llm
            .chat(&messages, &specs, &GenerationOptions::default())
            .await
            .map_err(|e| ErrorKind::InternalError(e.to_string()))?;

        if !response.wants_tools() {
            let text = response.content.unwrap_or_default();
            self.append_log(session.session_id, steps::INTERPRET, LogStatus::Success, text.clone()).await?;
            return Ok(InterpretOutcome {
                session_id: session.session_id,
                status: SessionStatus::Parsing,
                message: text,
                pending_tool_calls: Vec::new(),
            });
        }

        let tool_calls = response.tool_calls.iter().map(repair_tool_call).collect::<Vec<_>>();
        let llm_supplied_text = response.content;
        let mut session = session;
        session.transition(SessionStatus::WaitingConfirm)?;
        self.sessions.upsert(&session).await.map_err(repo_err)?;

        let pending = PendingToolCalls { tool_calls: tool_calls.clone(), original_query: query.to_string() };
        let payload = serde_json::to_string(&pending).unwrap_or_default();
        self.append_log(session.session_id, steps::PENDING_TOOLS, LogStatus::Waiting, payload).await?;

        let confirm_text = match llm_supplied_text {
            Some(text) if !text.trim().is_empty() => text,
            _ => self.synthesize_confirm_text(&tool_calls).await,
        };
        Ok(InterpretOutcome {
            session_id: session.session_id,
            status: SessionStatus::WaitingConfirm,
            message: confirm_text,
            pending_tool_calls: tool_calls,
        })
    }

    /// spec.md §4.8 step 2 / §7 "confirm never raises": resolves a pending
    /// confirmation by classifying `user_input`, executing on a `confirm`
    /// intent, cancelling on anything else, and returning every outcome —
    /// success, rejection, or failure — through `ConfirmOutcome` rather than
    /// an error.
    pub async fn confirm(&self, session_id: Uuid, user_input: &str) -> ConfirmOutcome {
        match self.confirm_inner(session_id, user_input).await {
            Ok(outcome) => outcome,
            Err(e) => ConfirmOutcome {
                session_id,
                status: None,
                success: false,
                content: None,
                error: Some(e.into()),
                detailed_results: Vec::new(),
            },
        }
    }

    async fn confirm_inner(&self, session_id: Uuid, user_input: &str) -> Result<ConfirmOutcome, ErrorKind> {
        let mut session = self.sessions.get(session_id).await.map_err(repo_err)?;

        // spec.md §8 idempotence: a second confirm once status=done returns
        // the cached summary without re-executing anything.
        if session.status == SessionStatus::Done {
            if let Some(row) = self.logs.latest_with_step(session_id, steps::EXECUTE_CONFIRMED).await.map_err(repo_err)? {
                let cached: ExecutionSummary = serde_json::from_str(&row.message)
                    .map_err(|e| ErrorKind::InternalError(format!("corrupt execute_confirmed payload: {e}")))?;
                return Ok(ConfirmOutcome {
                    session_id,
                    status: Some(SessionStatus::Done),
                    success: true,
                    content: Some(cached.summary),
                    error: None,
                    detailed_results: cached.detailed_results,
                });
            }
        }

        let pending_log = self
            .logs
            .latest_pending_tools(session_id)
            .await
            .map_err(repo_err)?
            .ok_or_else(|| ErrorKind::ValidationError("no pending tool calls for this session".into()))?;
        let pending: PendingToolCalls = serde_json::from_str(&pending_log.message)
            .map_err(|e| ErrorKind::InternalError(format!("corrupt pending_tools payload: {e}")))?;

        let intent = self.classify_confirm_input(user_input).await;
        self.append_log(session_id, steps::CONFIRM, LogStatus::Processing, format!("user_input={user_input:?}, intent={intent:?}"))
            .await?;

        if intent != ConfirmIntent::Confirm {
            session.transition(SessionStatus::Cancelled)?;
            self.sessions.upsert(&session).await.map_err(repo_err)?;
            let message = if intent == ConfirmIntent::Restart {
                "Okay, let's start over — please tell me again what you'd like to do."
            } else {
                "Okay, cancelled. Please tell me again if you'd like something else."
            };
            self.append_log(session_id, steps::CANCELLED, LogStatus::Cancelled, message.to_string()).await?;
            return Ok(ConfirmOutcome {
                session_id,
                status: Some(SessionStatus::Cancelled),
                success: true,
                content: Some(message.to_string()),
                error: None,
                detailed_results: Vec::new(),
            });
        }

        session.transition(SessionStatus::Executing)?;
        self.sessions.upsert(&session).await.map_err(repo_err)?;
        self.append_log(session_id, steps::EXECUTE_START, LogStatus::Processing, pending_log.message.clone())
            .await?;

        let run = self.run_pending_calls(&pending);
        let outcome = match tokio::time::timeout(CONFIRM_EXECUTE_TIMEOUT, run).await {
            Ok(results) => results,
            Err(_) => {
                session.transition(SessionStatus::Error)?;
                self.sessions.upsert(&session).await.map_err(repo_err)?;
                self.append_log(session_id, steps::EXECUTE_END, LogStatus::Error, "confirm-execute timed out".into())
                    .await?;
                return Err(ErrorKind::ToolExecutionTimeout);
            }
        };

        let (detailed_results, errors): (Vec<Value>, Vec<String>) = outcome.into_iter().fold(
            (Vec::new(), Vec::new()),
            |(mut ok, mut err), result| {
                match result {
                    Ok(v) => ok.push(v),
                    Err(e) => err.push(e),
                }
                (ok, err)
            },
        );

        if errors.is_empty() {
            session.transition(SessionStatus::Done)?;
            self.sessions.upsert(&session).await.map_err(repo_err)?;

            let summary = format!("executed {} tool call(s) successfully", detailed_results.len());
            let execution_summary = ExecutionSummary { summary: summary.clone(), detailed_results: detailed_results.clone() };
            let payload = serde_json::to_string(&execution_summary).unwrap_or_default();
            self.append_log(session_id, steps::EXECUTE_CONFIRMED, LogStatus::Success, payload).await?;

            Ok(ConfirmOutcome {
                session_id,
                status: Some(SessionStatus::Done),
                success: true,
                content: Some(summary),
                error: None,
                detailed_results,
            })
        } else {
            session.transition(SessionStatus::Error)?;
            self.sessions.upsert(&session).await.map_err(repo_err)?;

            let joined = format!("{} of {} tool call(s) failed: {}", errors.len(), pending.tool_calls.len(), errors.join("; "));
            self.append_log(session_id, steps::EXECUTE_END, LogStatus::Error, joined.clone()).await?;

            Ok(ConfirmOutcome {
                session_id,
                status: Some(SessionStatus::Error),
                success: false,
                content: None,
                error: Some(ErrorKind::ToolExecutionFailed(joined).into()),
                detailed_results,
            })
        }
    }

    /// Classifies a user's reply to a pending confirmation: a keyword
    /// whitelist first, falling back to an LLM ambiguity classification when
    /// nothing matches (spec.md §4.8 step 2).
    async fn classify_confirm_input(&self, user_input: &str) -> ConfirmIntent {
        let lower = user_input.trim().to_lowercase();

        if CONFIRM_WORDS.iter().any(|w| lower == *w || lower.contains(w)) {
            return ConfirmIntent::Confirm;
        }
        if RESTART_WORDS.iter().any(|w| lower.contains(w)) {
            return ConfirmIntent::Restart;
        }
        if REJECT_WORDS.iter().any(|w| lower == *w || lower.contains(w)) {
            return ConfirmIntent::Reject;
        }

        let prompt = format!(
            "A user was asked to confirm a pending action. They replied: \"{user_input}\". \
             Classify their reply as exactly one word, one of: confirm, reject, restart, ambiguous."
        );
        let options = GenerationOptions { max_tokens: Some(8), temperature: Some(0.0), ..Default::default() };
        match self.llm.generate(&prompt, &options).await {
            Ok(response) => {
                let text = response.text.trim().to_lowercase();
                if text.contains("confirm") {
                    ConfirmIntent::Confirm
                } else if text.contains("restart") {
                    ConfirmIntent::Restart
                } else if text.contains("reject") {
                    ConfirmIntent::Reject
                } else {
                    ConfirmIntent::Ambiguous
                }
            }
            Err(_) => ConfirmIntent::Ambiguous,
        }
    }

    async fn run_pending_calls(&self, pending: &PendingToolCalls) -> Vec<Result<Value, String>> {
        let mut results = Vec::with_capacity(pending.tool_calls.len());
        for call in &pending.tool_calls {
            let Some(descriptor) = self.catalogue.find(&call.tool_id) else {
                results.push(Err(format!("tool '{}' is no longer known to the gateway", call.tool_id)));
                continue;
            };
            let Some(server_name) = descriptor.server_name.clone() else {
                results.push(Err(format!("tool '{}' has no server assigned", call.tool_id)));
                continue;
            };
            match self.executor.execute(&server_name, &call.tool_id, call.parameters.clone()).await {
                Ok(exec) => results.push(Ok(serde_json::json!({
                    "tool_id": exec.tool_id,
                    "content": exec.content.into_plain_string(),
                    "summary": exec.summary,
                }))),
                Err(e) => {
                    warn!(tool = %call.tool_id, error = %e, "tool call failed during confirm");
                    results.push(Err(e.to_string()));
                }
            }
        }
        results
    }

    async fn append_log(
        &self,
        session_id: Uuid,
        step: &str,
        status: LogStatus,
        message: String,
    ) -> Result<(), ErrorKind> {
        self.logs.append(session_id, step, status, message).await.map_err(repo_err)?;
        Ok(())
    }

    /// Builds the natural-language confirmation prompt for a batch of
    /// pending tool calls by re-prompting the LLM without ever naming a
    /// tool (spec.md §4.8 step 2, "never name the underlying tools in the
    /// confirmation text").
    async fn synthesize_confirm_text(&self, calls: &[ToolCallSpec]) -> String {
        let params_preview: Vec<String> = calls.iter().map(|c| c.parameters.to_string()).collect();
        let prompt = format!(
            "A user's request requires performing {} action(s) with these parameters: {}. \
             Write a short, friendly yes/no confirmation question for the user, without naming \
             any tool, API, or function — describe only what will happen in plain language.",
            calls.len(),
            params_preview.join("; ")
        );
        let options = GenerationOptions { max_tokens: Some(120), ..Default::default() };
        match self.llm.generate(&prompt, &options).await {
            Ok(response) if !response.text.trim().is_empty() => response.text.trim().to_string(),
            _ => "Shall I proceed with this action?".to_string(),
        }
    }
}

fn repo_err(e: RepositoryError) -> ErrorKind {
    match e {
        RepositoryError::NotFound(id) => ErrorKind::ValidationError(format!("not found: {id}")),
        RepositoryError::Database(msg) => ErrorKind::InternalError(msg),
        RepositoryError::Serialization(msg) => ErrorKind::InternalError(msg),
    }
}

/// Converts one vendor tool-call request into a `ToolCallSpec`, tolerantly
/// repairing near-valid JSON arguments (spec.md §4.8 "tolerant JSON
/// repair"): a bare failure to parse degrades to an empty object rather
/// than failing the whole interpret() call.
fn repair_tool_call(call: &ToolCallRequest) -> ToolCallSpec {
    let parameters = serde_json::from_str(&call.arguments).unwrap_or_else(|_| repair_json(&call.arguments));
    ToolCallSpec { tool_id: call.name.clone(), parameters }
}

fn repair_json(raw: &str) -> Value {
    let trimmed = raw.trim();
    let candidate = trimmed.trim_end_matches(',');
    if let Ok(v) = serde_json::from_str::<Value>(candidate) {
        return v;
    }
    let quoted = candidate.replace('\'', "\"");
    serde_json::from_str(&quoted).unwrap_or_else(|_| serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_json_falls_back_to_empty_object_on_garbage() {
        let v = repair_json("not json at all {{{");
        assert_eq!(v, serde_json::json!({}));
    }

    #[test]
    fn repair_json_fixes_single_quotes() {
        let v = repair_json("{'a': 1}");
        assert_eq!(v, serde_json::json!({"a": 1}));
    }

    #[test]
    fn repair_json_strips_trailing_comma() {
        let v = repair_json(r#"{"a": 1},"#);
        assert_eq!(v, serde_json::json!({"a": 1}));
    }

    use crate::application::connection_pool::ConnectionPool;
    use crate::application::executor::ToolExecutor;
    use crate::application::launcher::{Launcher, ProcessTableHandle};
    use crate::application::registry::ServerRegistry;
    use crate::application::supervisor::Supervisor;
    use crate::domain::llm::{ChatResponse, FinishReason, GenerationResponse, LLMError, TokenUsage, ToolSpec};
    use crate::infrastructure::repositories::in_memory::{InMemoryLogRepository, InMemorySessionRepository};

    struct EchoingStub(&'static str);

    #[async_trait::async_trait]
    impl LLMProvider for EchoingStub {
        async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<GenerationResponse, LLMError> {
            Ok(GenerationResponse {
                text: self.0.to_string(),
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
            unimplemented!("not exercised by these tests")
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            Ok(())
        }
    }

    fn orchestrator_with(llm: Arc<dyn LLMProvider>) -> Orchestrator {
        let registry = Arc::new(ServerRegistry::new());
        let processes = Arc::new(ProcessTableHandle::default());
        let launcher = Arc::new(Launcher::new(registry.clone(), processes.clone()));
        let supervisor = Arc::new(Supervisor::new(registry.clone(), processes.clone(), launcher.clone()));
        let pool = Arc::new(ConnectionPool::new(registry, processes, launcher, supervisor));
        let executor = Arc::new(ToolExecutor::new(pool, llm.clone()));
        let sessions = Arc::new(InMemorySessionRepository::default());
        let logs = Arc::new(InMemoryLogRepository::default());
        Orchestrator::new(llm, executor, sessions, logs, ToolCatalogue::new(Vec::new()))
    }

    #[tokio::test]
    async fn synthesize_confirm_text_never_names_the_tool() {
        let llm: Arc<dyn LLMProvider> = Arc::new(EchoingStub("This will send a message on your behalf. Shall I proceed?"));
        let orchestrator = orchestrator_with(llm);
        let calls = vec![ToolCallSpec { tool_id: "send_email".into(), parameters: serde_json::json!({"to": "a@b.com"}) }];
        let text = orchestrator.synthesize_confirm_text(&calls).await;
        assert!(!text.contains("send_email"));
    }

    #[tokio::test]
    async fn synthesize_confirm_text_falls_back_when_llm_is_empty() {
        let llm: Arc<dyn LLMProvider> = Arc::new(EchoingStub(""));
        let orchestrator = orchestrator_with(llm);
        let calls = vec![ToolCallSpec { tool_id: "send_email".into(), parameters: serde_json::json!({}) }];
        let text = orchestrator.synthesize_confirm_text(&calls).await;
        assert_eq!(text, "Shall I proceed with this action?");
    }

    #[tokio::test]
    async fn classify_confirm_input_resolves_keywords_without_calling_the_llm() {
        let llm: Arc<dyn LLMProvider> = Arc::new(EchoingStub("garbage that would blow up classification"));
        let orchestrator = orchestrator_with(llm);
        assert_eq!(orchestrator.classify_confirm_input("yes please").await, ConfirmIntent::Confirm);
        assert_eq!(orchestrator.classify_confirm_input("no thanks").await, ConfirmIntent::Reject);
        assert_eq!(orchestrator.classify_confirm_input("let's restart").await, ConfirmIntent::Restart);
    }

    #[tokio::test]
    async fn classify_confirm_input_falls_back_to_llm_for_unmatched_replies() {
        let llm: Arc<dyn LLMProvider> = Arc::new(EchoingStub("confirm"));
        let orchestrator = orchestrator_with(llm);
        assert_eq!(orchestrator.classify_confirm_input("sounds good to me I guess").await, ConfirmIntent::Confirm);
    }

    #[tokio::test]
    async fn second_confirm_on_a_done_session_returns_the_cached_summary_without_re_executing() {
        let llm: Arc<dyn LLMProvider> = Arc::new(EchoingStub(""));
        let orchestrator = orchestrator_with(llm);

        let mut session = Session::new("user-1");
        session.transition(SessionStatus::WaitingConfirm).unwrap();
        session.transition(SessionStatus::Executing).unwrap();
        session.transition(SessionStatus::Done).unwrap();
        orchestrator.sessions.upsert(&session).await.unwrap();

        let cached = ExecutionSummary {
            summary: "executed 1 tool call(s) successfully".into(),
            detailed_results: vec![serde_json::json!({"tool_id": "echo"})],
        };
        orchestrator
            .append_log(session.session_id, steps::EXECUTE_CONFIRMED, LogStatus::Success, serde_json::to_string(&cached).unwrap())
            .await
            .unwrap();

        let outcome = orchestrator.confirm(session.session_id, "yes").await;
        assert!(outcome.success);
        assert_eq!(outcome.status, Some(SessionStatus::Done));
        assert_eq!(outcome.content, Some(cached.summary));
        assert_eq!(outcome.detailed_results, cached.detailed_results);
    }
}
