// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Session state machine types (C10, spec.md §4.7).
//!
//! The state machine itself (transition validation) lives here as pure
//! domain logic; persistence is the repository's concern
//! (`infrastructure::repositories`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Parsing,
    WaitingConfirm,
    Executing,
    Done,
    Error,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }

    /// Validates one edge of the state machine (spec.md §4.7): any
    /// non-terminal state may move to `Cancelled`; otherwise only the
    /// forward edges `parsing -> waiting_confirm -> executing -> {done,
    /// error}` are legal. Attempting a transition from a terminal state is
    /// rejected with `VALIDATION_ERROR` (testable property #2 in spec.md §8
    /// is the mirror invariant for servers; this is its session analogue).
    pub fn validate_transition(self, to: SessionStatus) -> Result<(), ErrorKind> {
        if self.is_terminal() {
            return Err(ErrorKind::ValidationError(format!(
                "cannot transition out of terminal state {:?}",
                self
            )));
        }
        let legal = match (self, to) {
            (Self::Parsing, Self::WaitingConfirm) => true,
            (Self::WaitingConfirm, Self::Executing) => true,
            (Self::Executing, Self::Done) => true,
            (Self::Executing, Self::Error) => true,
            (_, Self::Cancelled) => true,
            _ => false,
        };
        if legal {
            Ok(())
        } else {
            Err(ErrorKind::ValidationError(format!("illegal transition {:?} -> {:?}", self, to)))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            status: SessionStatus::Parsing,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, to: SessionStatus) -> Result<(), ErrorKind> {
        self.status.validate_transition(to)?;
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Processing,
    Waiting,
    Success,
    Error,
    Cancelled,
}

/// A well-known value for `LogEntry.step` (spec.md §4.7 names these
/// explicitly: `execute_start`, `pending_tools`, `execute_end`, `confirm`).
pub mod steps {
    pub const INTERPRET: &str = "interpret";
    pub const PENDING_TOOLS: &str = "pending_tools";
    pub const CONFIRM: &str = "confirm";
    pub const EXECUTE_START: &str = "execute_start";
    pub const EXECUTE_CONFIRMED: &str = "execute_confirmed";
    pub const EXECUTE_END: &str = "execute_end";
    pub const CANCELLED: &str = "cancelled";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub session_id: Uuid,
    pub step: String,
    pub status: LogStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A single proposed tool call, either pending confirmation or already
/// resolved against a catalogue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallSpec {
    pub tool_id: String,
    pub parameters: serde_json::Value,
}

/// Payload of the `step=pending_tools, status=waiting` log row (spec.md
/// §4.7). There is exactly one active row of this shape per session;
/// `confirm()` reads the most recent one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingToolCalls {
    pub tool_calls: Vec<ToolCallSpec>,
    pub original_query: String,
}

/// Payload of the `step=execute_confirmed, status=success` log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub summary: String,
    pub detailed_results: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_path_is_legal() {
        assert!(SessionStatus::Parsing.validate_transition(SessionStatus::WaitingConfirm).is_ok());
        assert!(SessionStatus::WaitingConfirm.validate_transition(SessionStatus::Executing).is_ok());
        assert!(SessionStatus::Executing.validate_transition(SessionStatus::Done).is_ok());
    }

    #[test]
    fn terminal_states_reject_any_transition() {
        let err = SessionStatus::Done.validate_transition(SessionStatus::Executing).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(SessionStatus::Cancelled.validate_transition(SessionStatus::Done).is_err());
        assert!(SessionStatus::Error.validate_transition(SessionStatus::Done).is_err());
    }

    #[test]
    fn any_nonterminal_state_can_cancel() {
        assert!(SessionStatus::Parsing.validate_transition(SessionStatus::Cancelled).is_ok());
        assert!(SessionStatus::WaitingConfirm.validate_transition(SessionStatus::Cancelled).is_ok());
        assert!(SessionStatus::Executing.validate_transition(SessionStatus::Cancelled).is_ok());
    }

    #[test]
    fn skipping_waiting_confirm_is_illegal() {
        assert!(SessionStatus::Parsing.validate_transition(SessionStatus::Executing).is_err());
    }

    #[test]
    fn session_transition_updates_timestamp() {
        let mut session = Session::new("user-1");
        let before = session.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        session.transition(SessionStatus::WaitingConfirm).unwrap();
        assert!(session.updated_at > before);
        assert_eq!(session.status, SessionStatus::WaitingConfirm);
    }
}
