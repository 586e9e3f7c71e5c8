// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Supervisor (C6): the tick loop that drives health checks, the leak
//! reaper, and periodic process-info refresh (spec.md §4.4).

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::application::health_probe::{HealthProbe, HealthVerdict};
use crate::application::launcher::{Launcher, ProcessTableHandle};
use crate::application::reaper::{alert_threshold_exceeded, Reaper};
use crate::application::registry::{ServerRegistry, FAILURE_THRESHOLD};
use crate::domain::errors::ErrorKind;
use crate::infrastructure::process::os_table::ProcessTable;

/// Default tick interval (spec.md §4.4 "default 3600s").
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(3600);

/// Result of a client-triggered `ensure_running_one` coordination call.
#[derive(Debug, Clone)]
pub struct EnsureRunningOutcome {
    pub success: bool,
    pub running: bool,
    pub pid: Option<u32>,
    pub error: Option<ErrorKind>,
}

pub struct Supervisor {
    registry: Arc<ServerRegistry>,
    processes: Arc<ProcessTableHandle>,
    launcher: Arc<Launcher>,
    health_probe: HealthProbe,
    reaper: Reaper,
    tick_interval: Duration,
    tick_count: std::sync::atomic::AtomicU64,
}

impl Supervisor {
    pub fn new(registry: Arc<ServerRegistry>, processes: Arc<ProcessTableHandle>, launcher: Arc<Launcher>) -> Self {
        let health_probe = HealthProbe::new(registry.clone(), processes.clone());
        let reaper = Reaper::new(registry.clone(), processes.clone());
        Self {
            registry,
            processes,
            launcher,
            health_probe,
            reaper,
            tick_interval: DEFAULT_TICK_INTERVAL,
            tick_count: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Runs until the supplied cancellation token fires. Every tick: health
    /// check every server (always), sweep leaks every 6th tick, re-evaluate
    /// the leak monitor every 5th tick, refresh cached process_info every
    /// 3rd tick (spec.md §4.4 cadence table).
    pub async fn run(&self, shutdown: tokio_util::sync::CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("supervisor shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    pub async fn tick(&self) {
        let n = self.tick_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let mut table = ProcessTable::new();
        table.refresh();

        for name in self.registry.names() {
            match self.health_probe.check(&name, &mut table).await {
                Ok(verdict) => self.handle_verdict(&name, verdict).await,
                Err(e) => warn!(server = %name, error = %e, "health probe failed"),
            }
        }

        if n % 6 == 0 {
            let decisions = self.reaper.sweep(&mut table);
            if !decisions.is_empty() {
                info!(count = decisions.len(), "leak reaper swept orphaned processes");
            }
        }

        if n % 5 == 0 {
            self.run_leak_monitor(&mut table).await;
        }

        if n % 3 == 0 {
            self.refresh_process_info(&mut table).await;
        }
    }

    /// Distinct from the 6-tick reap sweep: a read-only scan tallying the
    /// leak-alert counters, auto-invoking a sweep only if the alert
    /// threshold is crossed (spec.md §4.4 "every 5 ticks: leak monitor +
    /// auto-handler").
    async fn run_leak_monitor(&self, table: &mut ProcessTable) {
        let counters = self.reaper.counters(table);
        let expected = self.registry.names().len();
        if alert_threshold_exceeded(&counters, expected) {
            warn!(?counters, "leak monitor threshold exceeded, running auto-handler sweep");
            self.reaper.sweep(table);
        }
    }

    async fn handle_verdict(&self, name: &str, verdict: HealthVerdict) {
        let Ok(entry) = self.registry.get(name) else { return };
        match verdict {
            HealthVerdict::Healthy => {
                entry.status.lock().await.record_success();
            }
            HealthVerdict::StartingUp => {}
            HealthVerdict::ProcessGone | HealthVerdict::Unresponsive(_) | HealthVerdict::ResourceExceeded(_) => {
                self.handle_failure(name, &verdict).await;
            }
        }
    }

    /// Reacts to a failed health check: records the failure, and if the
    /// server isn't already marked failed, attempts one restart (spec.md
    /// §4.4 "ensure_running"/"connect_only" distinction — a configured but
    /// not-yet-started server is only connected to, never force-restarted
    /// here; that's the connection pool's job on next `acquire()`).
    async fn handle_failure(&self, name: &str, verdict: &HealthVerdict) {
        let Ok(entry) = self.registry.get(name) else { return };
        let reason = format!("{verdict:?}");
        let should_restart = {
            let mut status = entry.status.lock().await;
            status.record_failure(FAILURE_THRESHOLD, reason.clone());
            !status.marked_failed
        };

        warn!(server = name, reason, "server failed health check");

        let mut table = ProcessTable::new();
        self.reaper.sweep(&mut table);

        let _ = self.launcher.stop_server(name, false, Duration::from_secs(1)).await;

        if should_restart {
            if let Err(e) = self.launcher.start_server(name).await {
                error!(server = name, error = %e, "restart after health failure also failed");
            }
        }
    }

    /// Forces an out-of-cadence leak sweep; used by the connection pool's
    /// attempt-1 recovery step ("zombie-sweep-then-retry", spec.md §4.5).
    pub async fn sweep_leaks(&self) {
        let mut table = ProcessTable::new();
        table.refresh();
        let decisions = self.reaper.sweep(&mut table);
        if !decisions.is_empty() {
            info!(count = decisions.len(), "connection pool triggered an out-of-cadence leak sweep");
        }
    }

    /// Clears a server's `marked_failed` blacklist; used by the connection
    /// pool's attempt-2 recovery step ("reset marked_failed-then-ask-
    /// supervisor", spec.md §4.5).
    pub async fn reset_failures(&self, name: &str) {
        if let Ok(entry) = self.registry.get(name) {
            entry.status.lock().await.reset_failures();
        }
    }

    /// Per-server, client-triggered coordination entry point used by the
    /// connection pool's recovery ladder (spec.md §4.4): if the server is
    /// already running, just syncs state; if `connect_only` and the server
    /// isn't running, refuses without spawning; otherwise starts it.
    pub async fn ensure_running_one(&self, name: &str, connect_only: bool) -> EnsureRunningOutcome {
        let Ok(entry) = self.registry.get(name) else {
            return EnsureRunningOutcome {
                success: false,
                running: false,
                pid: None,
                error: Some(ErrorKind::ServerNotFound(name.to_string())),
            };
        };

        let already_running = entry.status.lock().await.running;
        if already_running {
            let pid = self.processes.pid_of(name);
            return EnsureRunningOutcome { success: true, running: true, pid, error: None };
        }

        if connect_only {
            return EnsureRunningOutcome {
                success: false,
                running: false,
                pid: None,
                error: Some(ErrorKind::ServerUnavailable(name.to_string())),
            };
        }

        match self.launcher.start_server(name).await {
            Ok(()) => {
                let pid = self.processes.pid_of(name);
                EnsureRunningOutcome { success: true, running: true, pid, error: None }
            }
            Err(e) => EnsureRunningOutcome { success: false, running: false, pid: None, error: Some(e) },
        }
    }

    /// Ensures every enabled, non-failed server is running; called once at
    /// startup before the first tick (spec.md §4 bootstrap sequence).
    pub async fn ensure_running(&self) {
        for name in self.registry.names() {
            let Ok(entry) = self.registry.get(&name) else { continue };
            let (enabled, failed) = {
                let status = entry.status.lock().await;
                (entry.config.enabled, status.marked_failed)
            };
            if !enabled || failed {
                continue;
            }
            if let Err(e) = self.launcher.start_server(&name).await {
                error!(server = %name, error = %e, "failed to start server during bootstrap");
            }
        }
    }

    async fn refresh_process_info(&self, table: &mut ProcessTable) {
        for name in self.processes.names() {
            let Some(pid) = self.processes.pid_of(&name) else { continue };
            let Some(snapshot) = table.snapshot(pid) else { continue };
            if let Ok(entry) = self.registry.get(&name) {
                let mut status = entry.status.lock().await;
                if let Some(info) = status.process_info.as_mut() {
                    info.cpu_percent = snapshot.cpu_percent;
                    info.mem_mb = snapshot.mem_mb;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::server::{ServerConfig, Timeouts};
    use std::collections::HashMap;

    #[test]
    fn default_tick_interval_is_one_hour() {
        assert_eq!(DEFAULT_TICK_INTERVAL, Duration::from_secs(3600));
    }

    fn cfg(name: &str) -> ServerConfig {
        ServerConfig {
            name: name.into(),
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

    fn supervisor() -> Supervisor {
        let registry = Arc::new(ServerRegistry::new());
        let mut configs = HashMap::new();
        configs.insert("flaky".to_string(), cfg("flaky"));
        registry.load(configs);
        let processes = Arc::new(ProcessTableHandle::default());
        let launcher = Arc::new(Launcher::new(registry.clone(), processes.clone()));
        Supervisor::new(registry, processes, launcher)
    }

    #[tokio::test]
    async fn ensure_running_one_refuses_to_spawn_when_connect_only() {
        let sup = supervisor();
        let outcome = sup.ensure_running_one("flaky", true).await;
        assert!(!outcome.success);
        assert!(!outcome.running);
        assert!(matches!(outcome.error, Some(ErrorKind::ServerUnavailable(_))));
    }

    #[tokio::test]
    async fn ensure_running_one_reports_unknown_server() {
        let sup = supervisor();
        let outcome = sup.ensure_running_one("ghost", false).await;
        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(ErrorKind::ServerNotFound(_))));
    }
}
