// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Closed error taxonomy shared by every layer (spec.md §7).
//!
//! `ErrorKind` is the one sum type that crosses the C3/C7/C8 boundary; the
//! presentation layer's only job is to turn it into the stable
//! `{code, message, original_error?, should_retry?}` HTTP body.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("connection to the tool server failed")]
    ConnectionFailed,
    #[error("connection to the tool server timed out")]
    ConnectionTimeout,
    #[error("connection to the tool server was lost")]
    ConnectionLost,
    #[error("connection to the tool server was refused")]
    ConnectionRefused,

    #[error("tool server '{0}' is not configured")]
    ServerNotFound(String),
    #[error("tool server '{0}' failed to start: {1}")]
    ServerStartFailed(String, String),
    #[error("tool server '{0}' is unavailable")]
    ServerUnavailable(String),
    #[error("tool server '{0}' crashed")]
    ServerCrashed(String),

    #[error("tool '{0}' is not known to any configured server")]
    ToolNotFound(String),
    #[error("tool execution failed: {0}")]
    ToolExecutionFailed(String),
    #[error("tool execution timed out")]
    ToolExecutionTimeout,
    #[error("invalid parameters for tool '{0}': {1}")]
    ToolInvalidParams(String, String),

    #[error("configuration file not found at '{0}'")]
    ConfigNotFound(String),
    #[error("configuration is invalid: {0}")]
    ConfigInvalid(String),
    #[error("configuration is missing a required value: {0}")]
    ConfigMissingRequired(String),

    #[error("failed to start subprocess: {0}")]
    ProcessStartFailed(String),
    #[error("subprocess crashed: {0}")]
    ProcessCrashed(String),
    #[error("subprocess is a zombie")]
    ProcessZombie,
    #[error("permission denied spawning subprocess")]
    ProcessPermissionDenied,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("validation failed: {0}")]
    ValidationError(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("unknown error: {0}")]
    UnknownError(String),
}

impl ErrorKind {
    /// The stable `code` string used on the wire and in tests (spec.md §7).
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::ConnectionRefused => "CONNECTION_REFUSED",
            Self::ServerNotFound(_) => "SERVER_NOT_FOUND",
            Self::ServerStartFailed(_, _) => "SERVER_START_FAILED",
            Self::ServerUnavailable(_) => "SERVER_UNAVAILABLE",
            Self::ServerCrashed(_) => "SERVER_CRASHED",
            Self::ToolNotFound(_) => "TOOL_NOT_FOUND",
            Self::ToolExecutionFailed(_) => "TOOL_EXECUTION_FAILED",
            Self::ToolExecutionTimeout => "TOOL_EXECUTION_TIMEOUT",
            Self::ToolInvalidParams(_, _) => "TOOL_INVALID_PARAMS",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigInvalid(_) => "CONFIG_INVALID",
            Self::ConfigMissingRequired(_) => "CONFIG_MISSING_REQUIRED",
            Self::ProcessStartFailed(_) => "PROCESS_START_FAILED",
            Self::ProcessCrashed(_) => "PROCESS_CRASHED",
            Self::ProcessZombie => "PROCESS_ZOMBIE",
            Self::ProcessPermissionDenied => "PROCESS_PERMISSION_DENIED",
            Self::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::UnknownError(_) => "UNKNOWN_ERROR",
        }
    }

    /// Non-retryable kinds per spec.md §4.5 "Retry classification".
    pub fn should_retry(&self) -> bool {
        !matches!(
            self,
            Self::ConfigInvalid(_)
                | Self::ConfigNotFound(_)
                | Self::ProcessPermissionDenied
                | Self::ValidationError(_)
                | Self::ToolNotFound(_)
                | Self::ToolInvalidParams(_, _)
        )
    }

    pub fn user_message(&self) -> String {
        self.to_string()
    }

    /// True for the error classes that should trigger pool/registry eviction
    /// of the offending server's connection (spec.md §4.6 step 3).
    pub fn evicts_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed
                | Self::ConnectionTimeout
                | Self::ConnectionLost
                | Self::ConnectionRefused
                | Self::ServerCrashed(_)
                | Self::ProcessCrashed(_)
        )
    }
}

/// Body shape returned at the HTTP edge (spec.md §6/§7).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
    pub should_retry: bool,
}

impl From<&ErrorKind> for ErrorBody {
    fn from(kind: &ErrorKind) -> Self {
        Self {
            code: kind.code().to_string(),
            message: kind.user_message(),
            original_error: None,
            should_retry: kind.should_retry(),
        }
    }
}

impl From<ErrorKind> for ErrorBody {
    fn from(kind: ErrorKind) -> Self {
        ErrorBody::from(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_never_retry() {
        assert!(!ErrorKind::ConfigInvalid("bad json".into()).should_retry());
        assert!(!ErrorKind::ConfigNotFound("x".into()).should_retry());
        assert!(!ErrorKind::ValidationError("x".into()).should_retry());
    }

    #[test]
    fn connection_errors_retry() {
        assert!(ErrorKind::ConnectionFailed.should_retry());
        assert!(ErrorKind::ServerCrashed("foo".into()).should_retry());
    }

    #[test]
    fn crash_classes_evict_connection() {
        assert!(ErrorKind::ServerCrashed("foo".into()).evicts_connection());
        assert!(ErrorKind::ConnectionLost.evicts_connection());
        assert!(!ErrorKind::ToolInvalidParams("x".into(), "y".into()).evicts_connection());
    }

    #[test]
    fn error_body_carries_stable_code() {
        let body: ErrorBody = ErrorKind::ToolExecutionTimeout.into();
        assert_eq!(body.code, "TOOL_EXECUTION_TIMEOUT");
        assert!(body.should_retry);
    }
}
