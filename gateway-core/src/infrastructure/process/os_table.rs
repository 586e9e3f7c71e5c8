// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! OS process table scanning backing C4 (Process Health Probe) and C5
//! (Leak & Zombie Reaper), spec.md §4.2/§4.3.

use chrono::{DateTime, Utc};
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, System};

#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub cmdline: String,
    pub cpu_percent: f32,
    pub mem_mb: f64,
    pub is_zombie: bool,
    pub is_stopped: bool,
    pub started_at: DateTime<Utc>,
    pub children: Vec<u32>,
}

impl ProcessSnapshot {
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

/// Thin wrapper around `sysinfo::System` refreshed on demand; the
/// supervisor and reaper each hold one and call `refresh()` once per tick
/// rather than per-server to keep the scan cost linear in ticks, not in
/// registry size.
pub struct ProcessTable {
    system: System,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        Self { system: System::new() }
    }

    pub fn refresh(&mut self) {
        self.system.refresh_all();
    }

    pub fn snapshot(&self, pid: u32) -> Option<ProcessSnapshot> {
        let process = self.system.process(Pid::from_u32(pid))?;
        Some(to_snapshot(pid, process))
    }

    pub fn exists(&self, pid: u32) -> bool {
        self.system.process(Pid::from_u32(pid)).is_some()
    }

    /// Enumerates every OS process whose command line matches any of
    /// `patterns` (case-insensitive substring match against the joined
    /// command + args), as used by the orphan scan (spec.md §4.3).
    pub fn matching(&self, patterns: &[String]) -> Vec<ProcessSnapshot> {
        if patterns.is_empty() {
            return Vec::new();
        }
        let lowered: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();
        self.system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let cmd = joined_cmdline(process);
                let lower_cmd = cmd.to_lowercase();
                if lowered.iter().any(|p| lower_cmd.contains(p.as_str())) {
                    Some(to_snapshot(pid.as_u32(), process))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Sends a kill signal to `pid` if it's still present in the last
    /// refresh. Returns `false` if the process was already gone.
    pub fn kill(&self, pid: u32) -> bool {
        self.system.process(Pid::from_u32(pid)).map(|p| p.kill()).unwrap_or(false)
    }

    pub fn descendants(&self, pid: u32) -> Vec<u32> {
        let root = Pid::from_u32(pid);
        self.system
            .processes()
            .iter()
            .filter(|(_, p)| p.parent() == Some(root))
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }
}

fn joined_cmdline(process: &sysinfo::Process) -> String {
    let mut parts = vec![process.name().to_string_lossy().to_string()];
    parts.extend(process.cmd().iter().map(|s| s.to_string_lossy().to_string()));
    parts.join(" ")
}

fn to_snapshot(pid: u32, process: &sysinfo::Process) -> ProcessSnapshot {
    let status = process.status();
    let started_secs = process.start_time();
    let started_at = DateTime::<Utc>::from_timestamp(started_secs as i64, 0).unwrap_or_else(Utc::now);
    ProcessSnapshot {
        pid,
        cmdline: joined_cmdline(process),
        cpu_percent: process.cpu_usage(),
        mem_mb: process.memory() as f64 / (1024.0 * 1024.0),
        is_zombie: status == ProcessStatus::Zombie,
        is_stopped: matches!(status, ProcessStatus::Stop | ProcessStatus::Tracing),
        started_at,
        children: Vec::new(),
    }
}

/// Default resource ceilings for the health probe (spec.md §4.2 step 4).
#[derive(Debug, Clone)]
pub struct ResourceCeilings {
    pub max_cpu_percent: f32,
    pub max_mem_mb: f64,
}

impl Default for ResourceCeilings {
    fn default() -> Self {
        Self { max_cpu_percent: 90.0, max_mem_mb: 1024.0 }
    }
}

/// Grace period during which a freshly-started process skips the
/// responsiveness check (spec.md §4.2 step 5).
pub const STARTUP_GRACE_PERIOD: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceilings_default_to_spec_values() {
        let c = ResourceCeilings::default();
        assert_eq!(c.max_cpu_percent, 90.0);
        assert_eq!(c.max_mem_mb, 1024.0);
    }

    #[test]
    fn process_table_reports_current_process_exists() {
        let mut table = ProcessTable::new();
        table.refresh();
        let pid = std::process::id();
        assert!(table.exists(pid));
    }
}
