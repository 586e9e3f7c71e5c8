// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository traits for sessions, logs, and the tool catalogue, plus the
//! `StorageBackend` selector. Implementations live under
//! `infrastructure::repositories`.

use async_trait::async_trait;
use uuid::Uuid;

use super::session::{LogEntry, LogStatus, Session, SessionStatus};
use super::tool::ToolDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Selects which repository implementation to wire up at startup
/// (SPEC_FULL.md §2.4): Postgres when `DATABASE_URL` is configured, an
/// in-memory map otherwise (also used by tests).
#[derive(Debug, Clone)]
pub enum StorageBackend {
    Postgres(String),
    InMemory,
}

impl StorageBackend {
    pub fn from_env() -> Self {
        match std::env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => Self::Postgres(url),
            _ => Self::InMemory,
        }
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn upsert(&self, session: &Session) -> Result<(), RepositoryError>;
    async fn get(&self, session_id: Uuid) -> Result<Session, RepositoryError>;
    async fn set_status(&self, session_id: Uuid, status: SessionStatus) -> Result<(), RepositoryError>;
    /// Deletes terminal sessions older than `older_than_hours`, used by the
    /// optional sweeper (SPEC_FULL.md §2.4, spec.md §3 "a sweeper may delete
    /// entries older than N hours"). Returns the number of rows removed.
    async fn sweep_terminal_older_than(&self, older_than_hours: i64) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait LogRepository: Send + Sync {
    async fn append(
        &self,
        session_id: Uuid,
        step: &str,
        status: LogStatus,
        message: String,
    ) -> Result<LogEntry, RepositoryError>;
    async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<LogEntry>, RepositoryError>;
    /// Most recent `pending_tools`/`waiting` row for a session, consumed
    /// once by `confirm()` (spec.md §4.7).
    async fn latest_pending_tools(&self, session_id: Uuid) -> Result<Option<LogEntry>, RepositoryError>;
    /// Most recent row with the given step, used by `confirm`'s idempotence
    /// behaviour to read back a cached summary (spec.md §8).
    async fn latest_with_step(&self, session_id: Uuid, step: &str) -> Result<Option<LogEntry>, RepositoryError>;
}

#[async_trait]
pub trait ToolRepository: Send + Sync {
    async fn upsert(&self, tool: &ToolDescriptor) -> Result<(), RepositoryError>;
    async fn list(&self) -> Result<Vec<ToolDescriptor>, RepositoryError>;
    async fn get(&self, tool_id: &str) -> Result<ToolDescriptor, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_prefers_postgres_when_url_set() {
        std::env::set_var("DATABASE_URL", "postgres://example");
        assert!(matches!(StorageBackend::from_env(), StorageBackend::Postgres(_)));
        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    fn storage_backend_defaults_to_in_memory() {
        std::env::remove_var("DATABASE_URL");
        assert!(matches!(StorageBackend::from_env(), StorageBackend::InMemory));
    }
}
