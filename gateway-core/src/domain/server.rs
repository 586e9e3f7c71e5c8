// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool-server configuration and process-registry entry types (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Per-operation timeout table. Falls back to `default` for any unset field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    pub ping: Duration,
    pub warmup: Duration,
    pub validation: Duration,
    pub default: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ping: Duration::from_secs(5),
            warmup: Duration::from_secs(10),
            validation: Duration::from_secs(10),
            default: Duration::from_secs(10),
        }
    }
}

/// Immutable-per-reload server definition, parsed from the registry file
/// (spec.md §6 `mcpServers` document).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub required_env: Vec<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub success_indicators: Vec<String>,
    #[serde(default)]
    pub process_patterns: Vec<String>,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub description: Option<String>,
    /// True for tool servers that legitimately hang on slow pings; see
    /// spec.md §4.5 step 1 ("a ping timeout on a server flagged 'slow'").
    #[serde(default)]
    pub slow: bool,
}

/// How a server's lifecycle concluded its most recent launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitMode {
    /// Long-lived process, still running.
    Alive,
    /// Legitimately exited after emitting a success marker; re-spawned per
    /// invocation (spec.md glossary "stdio mode server").
    Stdio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: Option<u32>,
    pub cmdline: String,
    pub started_at: DateTime<Utc>,
    pub exit_mode: ExitMode,
    pub cpu_percent: f32,
    pub mem_mb: f64,
    pub children: Vec<u32>,
}

/// One entry in the in-memory process registry (C2), one per configured
/// server, mutated exclusively by the launcher (C3) and supervisor (C6)
/// under that server's lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub name: String,
    pub enabled: bool,
    pub running: bool,
    pub last_check_at: Option<DateTime<Utc>>,
    pub restart_count: u64,
    pub consecutive_failures: u32,
    pub last_restart_at: Option<DateTime<Utc>>,
    pub marked_failed: bool,
    pub last_error: Option<String>,
    pub process_info: Option<ProcessInfo>,
}

impl ServerStatus {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            name: config.name.clone(),
            enabled: config.enabled,
            running: false,
            last_check_at: None,
            restart_count: 0,
            consecutive_failures: 0,
            last_restart_at: None,
            marked_failed: false,
            last_error: None,
            process_info: None,
        }
    }

    /// (I5) reset on any successful startup or health check.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_error = None;
    }

    /// (I2) marked_failed blocks further starts until an explicit reset.
    pub fn record_failure(&mut self, failure_threshold: u32, error: impl Into<String>) {
        self.consecutive_failures += 1;
        self.last_error = Some(error.into());
        if self.consecutive_failures >= failure_threshold {
            self.marked_failed = true;
        }
    }

    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
        self.marked_failed = false;
        self.last_error = None;
    }

    pub fn clear_process(&mut self) {
        self.running = false;
        self.process_info = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ServerConfig {
        ServerConfig {
            name: "echo".into(),
            command: "echo-mcp".into(),
            args: vec![],
            env: HashMap::new(),
            required_env: vec![],
            enabled: true,
            success_indicators: vec!["ready".into()],
            process_patterns: vec!["echo-mcp".into()],
            timeouts: Timeouts::default(),
            description: None,
            slow: false,
        }
    }

    #[test]
    fn new_status_is_stopped_and_clean() {
        let status = ServerStatus::new(&cfg());
        assert!(!status.running);
        assert_eq!(status.consecutive_failures, 0);
        assert!(!status.marked_failed);
    }

    #[test]
    fn three_failures_mark_failed() {
        let mut status = ServerStatus::new(&cfg());
        status.record_failure(3, "boom");
        status.record_failure(3, "boom");
        assert!(!status.marked_failed);
        status.record_failure(3, "boom");
        assert!(status.marked_failed);
        assert_eq!(status.consecutive_failures, 3);
    }

    #[test]
    fn success_resets_failure_counter() {
        let mut status = ServerStatus::new(&cfg());
        status.record_failure(3, "boom");
        status.record_failure(3, "boom");
        status.record_success();
        assert_eq!(status.consecutive_failures, 0);
    }

    #[test]
    fn reset_clears_marked_failed() {
        let mut status = ServerStatus::new(&cfg());
        status.record_failure(1, "boom");
        assert!(status.marked_failed);
        status.reset_failures();
        assert!(!status.marked_failed);
        assert_eq!(status.consecutive_failures, 0);
    }
}
