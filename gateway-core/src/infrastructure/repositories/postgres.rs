// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres-backed repositories over `sqlx::PgPool` (SPEC_FULL.md §2.4).
//! Schemas: `sessions(session_id PK, user_id, status, created_at,
//! updated_at)`, `logs(id PK, session_id FK, step, status, message,
//! timestamp)`, `tools(tool_id, name, type, description, endpoint JSON,
//! request_schema JSON, server_name?)` (spec.md §6).

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::repository::{LogRepository, RepositoryError, SessionRepository, ToolRepository};
use crate::domain::session::{LogEntry, LogStatus, Session, SessionStatus};
use crate::domain::tool::{ToolDescriptor, ToolKind};

pub struct PostgresSessionRepository {
    pool: PgPool,
}

impl PostgresSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Parsing => "parsing",
        SessionStatus::WaitingConfirm => "waiting_confirm",
        SessionStatus::Executing => "executing",
        SessionStatus::Done => "done",
        SessionStatus::Error => "error",
        SessionStatus::Cancelled => "cancelled",
    }
}

fn parse_status(raw: &str) -> Result<SessionStatus, RepositoryError> {
    match raw {
        "parsing" => Ok(SessionStatus::Parsing),
        "waiting_confirm" => Ok(SessionStatus::WaitingConfirm),
        "executing" => Ok(SessionStatus::Executing),
        "done" => Ok(SessionStatus::Done),
        "error" => Ok(SessionStatus::Error),
        "cancelled" => Ok(SessionStatus::Cancelled),
        other => Err(RepositoryError::Serialization(format!("unknown session status: {other}"))),
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn upsert(&self, session: &Session) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO sessions (session_id, user_id, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (session_id) DO UPDATE
             SET status = EXCLUDED.status, updated_at = EXCLUDED.updated_at",
        )
        .bind(session.session_id)
        .bind(&session.user_id)
        .bind(status_str(session.status))
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Session, RepositoryError> {
        let row: (Uuid, String, String, chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) =
            sqlx::query_as(
                "SELECT session_id, user_id, status, created_at, updated_at FROM sessions WHERE session_id = $1",
            )
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?
            .ok_or_else(|| RepositoryError::NotFound(session_id.to_string()))?;

        Ok(Session {
            session_id: row.0,
            user_id: row.1,
            status: parse_status(&row.2)?,
            created_at: row.3,
            updated_at: row.4,
        })
    }

    async fn set_status(&self, session_id: Uuid, status: SessionStatus) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE sessions SET status = $1, updated_at = now() WHERE session_id = $2")
            .bind(status_str(status))
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn sweep_terminal_older_than(&self, older_than_hours: i64) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM sessions
             WHERE status IN ('done', 'error', 'cancelled')
               AND updated_at < now() - ($1 || ' hours')::interval",
        )
        .bind(older_than_hours.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

pub struct PostgresLogRepository {
    pool: PgPool,
}

impl PostgresLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn log_status_str(status: LogStatus) -> &'static str {
    match status {
        LogStatus::Processing => "processing",
        LogStatus::Waiting => "waiting",
        LogStatus::Success => "success",
        LogStatus::Error => "error",
        LogStatus::Cancelled => "cancelled",
    }
}

fn parse_log_status(raw: &str) -> Result<LogStatus, RepositoryError> {
    match raw {
        "processing" => Ok(LogStatus::Processing),
        "waiting" => Ok(LogStatus::Waiting),
        "success" => Ok(LogStatus::Success),
        "error" => Ok(LogStatus::Error),
        "cancelled" => Ok(LogStatus::Cancelled),
        other => Err(RepositoryError::Serialization(format!("unknown log status: {other}"))),
    }
}

#[async_trait]
impl LogRepository for PostgresLogRepository {
    async fn append(
        &self,
        session_id: Uuid,
        step: &str,
        status: LogStatus,
        message: String,
    ) -> Result<LogEntry, RepositoryError> {
        let row: (i64, chrono::DateTime<chrono::Utc>) = sqlx::query_as(
            "INSERT INTO logs (session_id, step, status, message, timestamp)
             VALUES ($1, $2, $3, $4, now())
             RETURNING id, timestamp",
        )
        .bind(session_id)
        .bind(step)
        .bind(log_status_str(status))
        .bind(&message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(LogEntry {
            id: row.0,
            session_id,
            step: step.to_string(),
            status,
            message,
            timestamp: row.1,
        })
    }

    async fn list_for_session(&self, session_id: Uuid) -> Result<Vec<LogEntry>, RepositoryError> {
        let rows: Vec<(i64, String, String, String, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
            "SELECT id, step, status, message, timestamp FROM logs WHERE session_id = $1 ORDER BY timestamp ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|r| {
                Ok(LogEntry {
                    id: r.0,
                    session_id,
                    step: r.1,
                    status: parse_log_status(&r.2)?,
                    message: r.3,
                    timestamp: r.4,
                })
            })
            .collect()
    }

    async fn latest_pending_tools(&self, session_id: Uuid) -> Result<Option<LogEntry>, RepositoryError> {
        self.latest_matching(session_id, crate::domain::session::steps::PENDING_TOOLS, Some(LogStatus::Waiting))
            .await
    }

    async fn latest_with_step(&self, session_id: Uuid, step: &str) -> Result<Option<LogEntry>, RepositoryError> {
        self.latest_matching(session_id, step, None).await
    }
}

impl PostgresLogRepository {
    async fn latest_matching(
        &self,
        session_id: Uuid,
        step: &str,
        status: Option<LogStatus>,
    ) -> Result<Option<LogEntry>, RepositoryError> {
        let row: Option<(i64, String, String, String, chrono::DateTime<chrono::Utc>)> = if let Some(status) = status
        {
            sqlx::query_as(
                "SELECT id, step, status, message, timestamp FROM logs
                 WHERE session_id = $1 AND step = $2 AND status = $3
                 ORDER BY timestamp DESC LIMIT 1",
            )
            .bind(session_id)
            .bind(step)
            .bind(log_status_str(status))
            .fetch_optional(&self.pool)
            .await
        } else {
            sqlx::query_as(
                "SELECT id, step, status, message, timestamp FROM logs
                 WHERE session_id = $1 AND step = $2
                 ORDER BY timestamp DESC LIMIT 1",
            )
            .bind(session_id)
            .bind(step)
            .fetch_optional(&self.pool)
            .await
        }
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.map(|r| {
            Ok(LogEntry {
                id: r.0,
                session_id,
                step: r.1,
                status: parse_log_status(&r.2)?,
                message: r.3,
                timestamp: r.4,
            })
        })
        .transpose()
    }
}

pub struct PostgresToolRepository {
    pool: PgPool,
}

impl PostgresToolRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ToolRepository for PostgresToolRepository {
    async fn upsert(&self, tool: &ToolDescriptor) -> Result<(), RepositoryError> {
        let kind = match tool.kind {
            ToolKind::Mcp => "mcp",
            ToolKind::Http => "http",
        };
        sqlx::query(
            "INSERT INTO tools (tool_id, name, type, description, request_schema, server_name)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (tool_id) DO UPDATE
             SET name = EXCLUDED.name, description = EXCLUDED.description,
                 request_schema = EXCLUDED.request_schema, server_name = EXCLUDED.server_name",
        )
        .bind(&tool.tool_id)
        .bind(&tool.name)
        .bind(kind)
        .bind(&tool.description)
        .bind(&tool.parameters)
        .bind(&tool.server_name)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ToolDescriptor>, RepositoryError> {
        let rows: Vec<(String, String, String, String, serde_json::Value, Option<String>)> = sqlx::query_as(
            "SELECT tool_id, name, type, description, request_schema, server_name FROM tools",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.into_iter().map(row_to_tool).collect()
    }

    async fn get(&self, tool_id: &str) -> Result<ToolDescriptor, RepositoryError> {
        let row: (String, String, String, String, serde_json::Value, Option<String>) = sqlx::query_as(
            "SELECT tool_id, name, type, description, request_schema, server_name FROM tools WHERE tool_id = $1",
        )
        .bind(tool_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?
        .ok_or_else(|| RepositoryError::NotFound(tool_id.to_string()))?;

        row_to_tool(row)
    }
}

fn row_to_tool(
    row: (String, String, String, String, serde_json::Value, Option<String>),
) -> Result<ToolDescriptor, RepositoryError> {
    let kind = match row.2.as_str() {
        "mcp" => ToolKind::Mcp,
        "http" => ToolKind::Http,
        other => return Err(RepositoryError::Serialization(format!("unknown tool type: {other}"))),
    };
    Ok(ToolDescriptor {
        tool_id: row.0,
        name: row.1,
        description: row.3,
        kind,
        parameters: row.4,
        server_name: row.5,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SessionStatus::Parsing,
            SessionStatus::WaitingConfirm,
            SessionStatus::Executing,
            SessionStatus::Done,
            SessionStatus::Error,
            SessionStatus::Cancelled,
        ] {
            assert_eq!(parse_status(status_str(status)).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_string_is_rejected() {
        assert!(parse_status("bogus").is_err());
    }
}
