// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Launcher (C3): starts, adopts, and stops tool-server subprocesses,
//! classifying startup output against each server's success indicators
//! (spec.md §4.1).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::time::Instant;
use tracing::info;

use crate::application::config_loader::resolve_environment;
use crate::application::registry::ServerRegistry;
use crate::domain::errors::ErrorKind;
use crate::domain::server::{ExitMode, ProcessInfo, ServerConfig};
use crate::infrastructure::process::mcp_process::{spawn_child, McpActorHandle, StartupOutput};
use crate::infrastructure::process::os_table::ProcessTable;
use crate::infrastructure::process::wire::ClientMessage;

/// A subprocess the launcher has started and attached an actor to. Owned by
/// the connection pool (C7) once handed off; the launcher only holds it
/// during the startup window.
pub struct RunningProcess {
    pub pid: Option<u32>,
    pub actor: McpActorHandle,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub exit_mode: ExitMode,
}

impl RunningProcess {
    pub fn process_info(&self, cmdline: &str) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            cmdline: cmdline.to_string(),
            started_at: self.started_at,
            exit_mode: self.exit_mode,
            cpu_percent: 0.0,
            mem_mb: 0.0,
            children: Vec::new(),
        }
    }
}

/// Live subprocess table, keyed by server name. Shared between the
/// launcher, health probe, reaper, and connection pool so they all see the
/// same set of running processes without needing the registry lock.
#[derive(Default)]
pub struct ProcessTableHandle {
    processes: DashMap<String, RunningProcess>,
}

impl ProcessTableHandle {
    pub fn insert(&self, name: String, process: RunningProcess) {
        self.processes.insert(name, process);
    }

    pub fn get_actor(&self, name: &str) -> Option<McpActorHandle> {
        self.processes.get(name).map(|p| p.actor.clone())
    }

    pub fn remove(&self, name: &str) -> Option<RunningProcess> {
        self.processes.remove(name).map(|(_, p)| p)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    pub fn pid_of(&self, name: &str) -> Option<u32> {
        self.processes.get(name).and_then(|p| p.pid)
    }

    pub fn names(&self) -> Vec<String> {
        self.processes.iter().map(|e| e.key().clone()).collect()
    }
}

pub struct Launcher {
    registry: Arc<ServerRegistry>,
    processes: Arc<ProcessTableHandle>,
}

/// How the launcher should classify a started server once its startup
/// window closes (spec.md §4.1 step 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// A configured `success_indicators` string appeared in stdout/stderr.
    Succeeded,
    /// The process exited cleanly (`Stdio` mode server) within the window.
    ExitedStdioMode,
    /// Still alive, emitted a recognized error string before signalling
    /// success: the child is killed and the start fails.
    AliveWithErrorOutput(String),
    /// The process exited with a non-zero code before signalling success.
    CrashedDuringStartup(i32),
}

/// Substrings that mark startup output as a real failure even though the
/// process is still alive (spec.md §4.1 "Alive-error-output").
const ERROR_INDICATORS: &[&str] =
    &["error:", "failed to", "permission denied", "module not found", "enoent", "connection refused", "timeout"];

/// How many ~100ms-apart samples must agree on the same pid before the
/// launcher adopts an already-running process instead of spawning a new one
/// (spec.md §4.1 step 1).
const ADOPTION_SAMPLES: usize = 3;
const ADOPTION_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

impl Launcher {
    pub fn new(registry: Arc<ServerRegistry>, processes: Arc<ProcessTableHandle>) -> Self {
        Self { registry, processes }
    }

    /// Starts (or re-uses) the named server, running the full spec.md §4.1
    /// sequence: resolve env, spawn, attach the actor, capture startup
    /// output, classify it, and update `ServerStatus` under the server's
    /// own lock.
    pub async fn start_server(&self, name: &str) -> Result<(), ErrorKind> {
        let entry = self.registry.get(name)?;
        {
            let status = entry.status.lock().await;
            if status.marked_failed {
                return Err(ErrorKind::ServerUnavailable(name.to_string()));
            }
        }
        if self.processes.contains(name) {
            return Ok(());
        }

        if !entry.config.process_patterns.is_empty() {
            if let Some(pid) = self.adopt_existing(&entry.config).await {
                info!(server = name, pid, "found a stable pre-existing process matching this server's patterns");
            }
        }

        self.spawn_and_classify(name, &entry).await
    }

    /// Samples the OS process table three times, ~100ms apart, for a
    /// process matching the server's identification patterns; returns its
    /// pid only if the same one shows up in every sample (spec.md §4.1 step
    /// 1 "adopt a stable, pre-existing process instead of spawning a new
    /// one"). The wire protocol still needs a fresh `Child` handle to talk
    /// to the server, so a positive result here is logged but a spawn
    /// still follows; it exists to distinguish "we started a brand new
    /// process" from "one was already there" in the startup log.
    async fn adopt_existing(&self, config: &ServerConfig) -> Option<u32> {
        let mut observed: Option<u32> = None;
        for i in 0..ADOPTION_SAMPLES {
            if i > 0 {
                tokio::time::sleep(ADOPTION_SAMPLE_INTERVAL).await;
            }
            let mut table = ProcessTable::new();
            table.refresh();
            let candidates = table.matching(&config.process_patterns);
            match candidates.first() {
                Some(snapshot) if observed.is_none() || observed == Some(snapshot.pid) => {
                    observed = Some(snapshot.pid);
                }
                _ => return None,
            }
        }
        observed
    }

    async fn spawn_and_classify(&self, name: &str, entry: &super::registry::ServerEntry) -> Result<(), ErrorKind> {
        let env = resolve_environment(&entry.config)?;
        let child = spawn_child(&entry.config.command, &entry.config.args, &env)?;
        let pid = child.id();

        let (output, mut child) = capture_startup_output(child, entry.config.timeouts.warmup).await;
        let outcome = classify_startup_output(&entry.config, &output);

        match &outcome {
            StartupOutcome::Succeeded | StartupOutcome::ExitedStdioMode => {}
            StartupOutcome::AliveWithErrorOutput(line) => {
                let _ = child.start_kill();
                let mut status = entry.status.lock().await;
                status.record_failure(super::registry::FAILURE_THRESHOLD, line.clone());
                return Err(ErrorKind::ServerStartFailed(name.to_string(), line.clone()));
            }
            StartupOutcome::CrashedDuringStartup(code) => {
                let mut status = entry.status.lock().await;
                let msg = format!("exited during startup with code {code}");
                status.record_failure(super::registry::FAILURE_THRESHOLD, msg.clone());
                return Err(ErrorKind::ServerStartFailed(name.to_string(), msg));
            }
        }

        let exit_mode = match outcome {
            StartupOutcome::ExitedStdioMode => ExitMode::Stdio,
            _ => ExitMode::Alive,
        };

        let actor = McpActorHandle::attach(child)
            .map_err(|e| ErrorKind::ServerStartFailed(name.to_string(), e.to_string()))?;
        actor
            .request_untagged(
                ClientMessage::Hello { version: "1.0".into(), session_id: actor.session_id().to_string() },
                entry.config.timeouts.warmup,
            )
            .await
            .map_err(|e| ErrorKind::ServerStartFailed(name.to_string(), format!("hello failed: {e}")))?;

        let running = RunningProcess { pid, actor, started_at: chrono::Utc::now(), exit_mode };
        let cmdline = format!("{} {}", entry.config.command, entry.config.args.join(" "));
        let process_info = running.process_info(&cmdline);
        self.processes.insert(name.to_string(), running);

        let mut status = entry.status.lock().await;
        status.running = true;
        status.record_success();
        status.process_info = Some(process_info);
        info!(server = name, pid, "tool server started");
        Ok(())
    }

    /// Stops a running server, attempting a graceful `goodbye` handshake
    /// before a hard kill when the timeout elapses (spec.md §3
    /// `stop_server(name, graceful, timeout)`).
    pub async fn stop_server(&self, name: &str, graceful: bool, timeout: Duration) -> Result<(), ErrorKind> {
        let Some(process) = self.processes.remove(name) else {
            return Ok(());
        };

        if graceful {
            let actor = process.actor.clone();
            let goodbye = actor.send(ClientMessage::Goodbye { session_id: actor.session_id().to_string() });
            let _ = tokio::time::timeout(timeout, goodbye).await;
        }

        process.actor.kill().await;

        if let Ok(entry) = self.registry.get(name) {
            let mut status = entry.status.lock().await;
            status.clear_process();
        }
        Ok(())
    }
}

async fn capture_startup_output(mut child: Child, window: Duration) -> (StartupOutput, Child) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let deadline = Instant::now() + window;
    let mut lines = Vec::new();

    if let Some(stdout) = stdout {
        let mut reader = BufReader::new(stdout).lines();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, reader.next_line()).await {
                Ok(Ok(Some(line))) => lines.push(line),
                _ => break,
            }
        }
        child.stdout = Some(reader.into_inner().into_inner());
    }

    if let Some(stderr) = stderr {
        let mut reader = BufReader::new(stderr).lines();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, reader.next_line()).await {
                Ok(Ok(Some(line))) => lines.push(line),
                _ => break,
            }
        }
        child.stderr = Some(reader.into_inner().into_inner());
    }

    let exit_code = match child.try_wait() {
        Ok(Some(status)) => status.code(),
        _ => None,
    };

    (StartupOutput { lines, exit_code }, child)
}

/// Implements spec.md §4.1 step 4: a success indicator anywhere in the
/// captured output wins; a recognized error string while still alive fails
/// the start outright; otherwise a clean exit means stdio mode, a nonzero
/// exit is a crash, and alive-with-no-output is treated as success
/// unconditionally, whether or not indicators are configured.
pub fn classify_startup_output(config: &ServerConfig, output: &StartupOutput) -> StartupOutcome {
    let joined = output.lines.join("\n");
    let joined_lower = joined.to_lowercase();
    let matched = config.success_indicators.iter().any(|marker| joined.contains(marker.as_str()));

    if matched {
        return StartupOutcome::Succeeded;
    }

    match output.exit_code {
        Some(0) => StartupOutcome::ExitedStdioMode,
        Some(code) => StartupOutcome::CrashedDuringStartup(code),
        None => {
            if let Some(marker) = ERROR_INDICATORS.iter().find(|marker| joined_lower.contains(*marker)) {
                StartupOutcome::AliveWithErrorOutput(format!("startup output matched error indicator '{marker}'"))
            } else {
                StartupOutcome::Succeeded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(indicators: Vec<&str>) -> ServerConfig {
        ServerConfig {
            name: "echo".into(),
            command: "echo-mcp".into(),
            args: vec![],
            env: HashMap::new(),
            required_env: vec![],
            enabled: true,
            success_indicators: indicators.into_iter().map(String::from).collect(),
            process_patterns: vec![],
            timeouts: Default::default(),
            description: None,
            slow: false,
        }
    }

    #[test]
    fn matching_indicator_is_success() {
        let output = StartupOutput { lines: vec!["server ready".into()], exit_code: None };
        assert_eq!(classify_startup_output(&cfg(vec!["ready"]), &output), StartupOutcome::Succeeded);
    }

    #[test]
    fn clean_exit_without_indicator_is_stdio_mode() {
        let output = StartupOutput { lines: vec![], exit_code: Some(0) };
        assert_eq!(classify_startup_output(&cfg(vec!["ready"]), &output), StartupOutcome::ExitedStdioMode);
    }

    #[test]
    fn nonzero_exit_is_crash() {
        let output = StartupOutput { lines: vec![], exit_code: Some(1) };
        assert_eq!(classify_startup_output(&cfg(vec!["ready"]), &output), StartupOutcome::CrashedDuringStartup(1));
    }

    #[test]
    fn no_output_no_exit_is_success_even_with_indicators_configured() {
        let output = StartupOutput { lines: vec![], exit_code: None };
        assert_eq!(classify_startup_output(&cfg(vec!["ready"]), &output), StartupOutcome::Succeeded);
    }

    #[test]
    fn alive_with_error_output_fails_even_without_exit_code() {
        let output = StartupOutput { lines: vec!["Error: permission denied".into()], exit_code: None };
        assert!(matches!(
            classify_startup_output(&cfg(vec!["ready"]), &output),
            StartupOutcome::AliveWithErrorOutput(_)
        ));
    }

    #[test]
    fn no_indicators_configured_means_immediate_success() {
        let output = StartupOutput { lines: vec![], exit_code: None };
        assert_eq!(classify_startup_output(&cfg(vec![]), &output), StartupOutcome::Succeeded);
    }
}
