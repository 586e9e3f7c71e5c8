// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process Health Probe (C4): `is_healthy()` sequence over a running
//! server's OS process and wire connection (spec.md §4.2).

use std::sync::Arc;
use std::time::Duration;

use crate::application::launcher::ProcessTableHandle;
use crate::application::registry::ServerRegistry;
use crate::domain::errors::ErrorKind;
use crate::domain::server::{ExitMode, ServerConfig};
use crate::infrastructure::process::os_table::{ProcessTable, ResourceCeilings, STARTUP_GRACE_PERIOD};
use crate::infrastructure::process::wire::ClientMessage;

#[derive(Debug, Clone, PartialEq)]
pub enum HealthVerdict {
    Healthy,
    /// The OS process is gone; the caller should treat this as a crash.
    ProcessGone,
    /// Within the startup grace period; responsiveness isn't checked yet.
    StartingUp,
    /// CPU or RSS exceeded the configured ceiling.
    ResourceExceeded(String),
    /// The ping to the wire protocol failed or timed out.
    Unresponsive(ErrorKind),
}

pub struct HealthProbe {
    registry: Arc<ServerRegistry>,
    processes: Arc<ProcessTableHandle>,
    ceilings: ResourceCeilings,
}

impl HealthProbe {
    pub fn new(registry: Arc<ServerRegistry>, processes: Arc<ProcessTableHandle>) -> Self {
        Self { registry, processes, ceilings: ResourceCeilings::default() }
    }

    pub fn with_ceilings(mut self, ceilings: ResourceCeilings) -> Self {
        self.ceilings = ceilings;
        self
    }

    /// Runs the full spec.md §4.2 sequence for one server: (1) the OS
    /// process still exists, (2) it isn't over the resource ceilings, (3)
    /// past the startup grace period, it responds to a ping within its
    /// configured timeout (slow servers get the ping but failures on them
    /// don't mark failed — see spec.md §4.5 step 1).
    pub async fn check(&self, name: &str, table: &mut ProcessTable) -> Result<HealthVerdict, ErrorKind> {
        let entry = self.registry.get(name)?;

        let exit_mode = entry.status.lock().await.process_info.as_ref().map(|info| info.exit_mode);
        if exit_mode == Some(ExitMode::Stdio) {
            return Ok(HealthVerdict::Healthy);
        }

        let Some(pid) = self.processes.pid_of(name) else {
            return Ok(HealthVerdict::ProcessGone);
        };

        let Some(snapshot) = table.snapshot(pid) else {
            return Ok(HealthVerdict::ProcessGone);
        };

        if snapshot.cpu_percent > self.ceilings.max_cpu_percent {
            return Ok(HealthVerdict::ResourceExceeded(format!(
                "cpu {:.1}% exceeds ceiling {:.1}%",
                snapshot.cpu_percent, self.ceilings.max_cpu_percent
            )));
        }
        if snapshot.mem_mb > self.ceilings.max_mem_mb {
            return Ok(HealthVerdict::ResourceExceeded(format!(
                "rss {:.1}MB exceeds ceiling {:.1}MB",
                snapshot.mem_mb, self.ceilings.max_mem_mb
            )));
        }

        if snapshot.age() < chrono::Duration::from_std(STARTUP_GRACE_PERIOD).unwrap() {
            return Ok(HealthVerdict::StartingUp);
        }

        match self.ping(name, &entry.config).await {
            Ok(()) => Ok(HealthVerdict::Healthy),
            Err(e) => Ok(HealthVerdict::Unresponsive(e)),
        }
    }

    async fn ping(&self, name: &str, config: &ServerConfig) -> Result<(), ErrorKind> {
        let actor = self
            .processes
            .get_actor(name)
            .ok_or_else(|| ErrorKind::ConnectionLost)?;
        let timeout = if config.slow { config.timeouts.ping.max(Duration::from_secs(30)) } else { config.timeouts.ping };
        actor
            .request_untagged(
                ClientMessage::Hello { version: "1.0".into(), session_id: actor.session_id().to_string() },
                timeout,
            )
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::server::{ProcessInfo, ServerConfig, ServerStatus, Timeouts};
    use std::collections::HashMap;

    #[test]
    fn resource_exceeded_message_mentions_ceiling() {
        let verdict = HealthVerdict::ResourceExceeded("cpu 95.0% exceeds ceiling 90.0%".into());
        match verdict {
            HealthVerdict::ResourceExceeded(msg) => assert!(msg.contains("ceiling")),
            _ => panic!("wrong variant"),
        }
    }

    fn cfg(name: &str) -> ServerConfig {
        ServerConfig {
            name: name.into(),
            command: "echo-mcp".into(),
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

    #[tokio::test]
    async fn stdio_mode_server_is_always_healthy_even_without_a_pid() {
        let registry = Arc::new(ServerRegistry::new());
        let mut configs = HashMap::new();
        configs.insert("echo".to_string(), cfg("echo"));
        registry.load(configs);
        {
            let entry = registry.get("echo").unwrap();
            let mut status = entry.status.lock().await;
            status.running = true;
            status.process_info = Some(ProcessInfo {
                pid: None,
                cmdline: "echo-mcp".into(),
                started_at: chrono::Utc::now(),
                exit_mode: ExitMode::Stdio,
                cpu_percent: 0.0,
                mem_mb: 0.0,
                children: vec![],
            });
        }
        let processes = Arc::new(ProcessTableHandle::default());
        let probe = HealthProbe::new(registry, processes);
        let mut table = ProcessTable::new();
        let verdict = probe.check("echo", &mut table).await.unwrap();
        assert_eq!(verdict, HealthVerdict::Healthy);
    }

    fn _unused_status_ctor(cfg: &ServerConfig) -> ServerStatus {
        ServerStatus::new(cfg)
    }
}
