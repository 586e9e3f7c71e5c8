// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory repository implementations, used in tests and whenever
//! `DATABASE_URL` is not configured (`StorageBackend::InMemory`).

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

use crate::domain::repository::{LogRepository, RepositoryError, SessionRepository, ToolRepository};
use crate::domain::session::{LogEntry, LogStatus, Session, SessionStatus};
use crate::domain::tool::ToolDescriptor;

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: DashMap<Uuid, Session>,
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn upsert(&self, session: &Session) -> Result<(), RepositoryError> {
        self.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Session, RepositoryError> {
        self.sessions
            .get(&session_id)
            .map(|s| s.clone())
            .ok_or_else(|| RepositoryError::NotFound(session_id.to_string()))
    }

    async fn set_status(&self, session_id: Uuid, status: SessionStatus) -> Result<(), RepositoryError> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| RepositoryError::NotFound(session_id.to_string()))?;
        entry.status = status;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn sweep_terminal_older_than(&self, older_than_hours: i64) -> Result<u64, RepositoryError> {
        let cutoff = Utc::now() - chrono::Duration::hours(older_than_hours);
        let to_remove: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|entry| entry.status.is_terminal() && entry.updated_at < cutoff)
            .map(|entry| entry.session_id)
            .collect();
        for id in &to_remove {
            self.sessions.remove(id);
        }
        Ok(to_remove.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryLogRepository {
    logs: DashMap<Uuid, Vec<LogEntry>>,
    next_id: AtomicI64,
}

#[async_trait]
impl LogRepository for InMemoryLogRepository {
    async fn append(
        &self,
        session_id: Uuid,
        step: &str,
        status: LogStatus,
        message: String,
    ) -> Result<LogEntry, RepositoryError> {
        let entry = LogEntry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            session_id,
            step: step.to_string(),
            status,
            message,
            timestamp: Utc::now(),
        };
        self.logs.entry(session_id).or_default().push(entry.clone());
        Ok(entry)
    }

    async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<LogEntry>, RepositoryError> {
        Ok(self.logs.get(&session_id).map(|v| v.clone()).unwrap_or_default())
    }

    async fn latest_pending_tools(&self, session_id: Uuid) -> Result<Option<LogEntry>, RepositoryError> {
        Ok(self
            .logs
            .get(&session_id)
            .and_then(|entries| {
                entries
                    .iter()
                    .rev()
                    .find(|e| e.step == crate::domain::session::steps::PENDING_TOOLS && e.status == LogStatus::Waiting)
                    .cloned()
            }))
    }

    async fn latest_with_step(&self, session_id: Uuid, step: &str) -> Result<Option<LogEntry>, RepositoryError> {
        Ok(self
            .logs
            .get(&session_id)
            .and_then(|entries| entries.iter().rev().find(|e| e.step == step).cloned()))
    }
}

#[derive(Default)]
pub struct InMemoryToolRepository {
    tools: DashMap<String, ToolDescriptor>,
}

#[async_trait]
impl ToolRepository for InMemoryToolRepository {
    async fn upsert(&self, tool: &ToolDescriptor) -> Result<(), RepositoryError> {
        self.tools.insert(tool.tool_id.clone(), tool.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ToolDescriptor>, RepositoryError> {
        Ok(self.tools.iter().map(|e| e.clone()).collect())
    }

    async fn get(&self, tool_id: &str) -> Result<ToolDescriptor, RepositoryError> {
        self.tools
            .get(tool_id)
            .map(|t| t.clone())
            .ok_or_else(|| RepositoryError::NotFound(tool_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let repo = InMemorySessionRepository::default();
        let session = Session::new("user-1");
        repo.upsert(&session).await.unwrap();
        let fetched = repo.get(session.session_id).await.unwrap();
        assert_eq!(fetched.user_id, "user-1");
    }

    #[tokio::test]
    async fn get_missing_session_is_not_found() {
        let repo = InMemorySessionRepository::default();
        let err = repo.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn append_then_latest_pending_tools_roundtrips() {
        let repo = InMemoryLogRepository::default();
        let session_id = Uuid::new_v4();
        repo.append(session_id, "pending_tools", LogStatus::Waiting, "{}".into())
            .await
            .unwrap();
        let found = repo.latest_pending_tools(session_id).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn sweep_removes_only_terminal_and_old() {
        let repo = InMemorySessionRepository::default();
        let mut old_done = Session::new("user-1");
        old_done.status = SessionStatus::Done;
        old_done.updated_at = Utc::now() - chrono::Duration::hours(100);
        repo.upsert(&old_done).await.unwrap();

        let fresh = Session::new("user-2");
        repo.upsert(&fresh).await.unwrap();

        let removed = repo.sweep_terminal_older_than(24).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.get(fresh.session_id).await.is_ok());
        assert!(repo.get(old_done.session_id).await.is_err());
    }
}
