// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Leak & Zombie Reaper (C5): finds OS processes matching a configured
//! server's `process_patterns` that the registry doesn't know about, and
//! kills them according to a tiered age policy (spec.md §4.3).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::application::launcher::ProcessTableHandle;
use crate::application::registry::ServerRegistry;
use crate::infrastructure::process::os_table::{ProcessSnapshot, ProcessTable, ResourceCeilings};

/// What the reaper decided to do with one orphaned process.
#[derive(Debug, Clone, PartialEq)]
pub enum ReapAction {
    /// Older than 6h: killed regardless of resource use.
    KillUnconditional,
    /// 2-6h old and over a resource ceiling: killed.
    KillOverCeiling,
    /// 0.5-2h old and a zombie: killed (reaps the defunct entry).
    KillZombie,
    /// Left alone: too young, or within tolerance for its age band.
    Skip,
}

#[derive(Debug, Clone)]
pub struct ReapDecision {
    pub pid: u32,
    pub cmdline: String,
    pub action: ReapAction,
}

/// Classifies one orphan snapshot per spec.md §4.3's tiered policy:
/// `>6h` unconditional, `2-6h` conditional on ceilings, `0.5-2h`
/// zombie-only, `<=30min` untouched (still warming up or briefly orphaned
/// during a reload).
pub fn classify(snapshot: &ProcessSnapshot, ceilings: &ResourceCeilings) -> ReapAction {
    let age = snapshot.age();
    if age > chrono::Duration::hours(6) {
        ReapAction::KillUnconditional
    } else if age > chrono::Duration::hours(2) {
        if snapshot.cpu_percent > ceilings.max_cpu_percent || snapshot.mem_mb > ceilings.max_mem_mb {
            ReapAction::KillOverCeiling
        } else {
            ReapAction::Skip
        }
    } else if age > chrono::Duration::minutes(30) {
        if snapshot.is_zombie {
            ReapAction::KillZombie
        } else {
            ReapAction::Skip
        }
    } else {
        ReapAction::Skip
    }
}

/// Counts consecutive reap rounds with nonzero kills, used by the
/// supervisor's leak monitor to raise an alert once a streak crosses a
/// threshold (spec.md §4.3 "leak alerting with counters").
#[derive(Default)]
pub struct LeakMonitor {
    consecutive_rounds_with_kills: AtomicU64,
}

impl LeakMonitor {
    pub const ALERT_THRESHOLD: u64 = 3;

    pub fn record_round(&self, kills: usize) -> bool {
        if kills > 0 {
            let streak = self.consecutive_rounds_with_kills.fetch_add(1, Ordering::SeqCst) + 1;
            streak >= Self::ALERT_THRESHOLD
        } else {
            self.consecutive_rounds_with_kills.store(0, Ordering::SeqCst);
            false
        }
    }
}

/// Tallies of every orphan currently sitting in the process table, grouped
/// by the same age/zombie bands `classify` uses, exported via the metrics
/// facade and checked against `alert_threshold_exceeded` (spec.md §4.3
/// "leak alerting with counters").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeakCounters {
    pub total_managed: usize,
    pub orphaned: usize,
    pub zombie: usize,
    pub old: usize,
    pub very_old: usize,
}

/// True once any single band crosses its threshold: more than 5 orphans,
/// any zombie at all, more than 3 very-old processes, or the orphan count
/// more than triples the number of configured servers.
pub fn alert_threshold_exceeded(counters: &LeakCounters, expected_servers: usize) -> bool {
    counters.orphaned > 5
        || counters.zombie > 0
        || counters.very_old > 3
        || counters.total_managed > 3 * expected_servers.max(1)
}

pub struct Reaper {
    registry: Arc<ServerRegistry>,
    processes: Arc<ProcessTableHandle>,
    ceilings: ResourceCeilings,
    pub leak_monitor: LeakMonitor,
}

impl Reaper {
    pub fn new(registry: Arc<ServerRegistry>, processes: Arc<ProcessTableHandle>) -> Self {
        Self { registry, processes, ceilings: ResourceCeilings::default(), leak_monitor: LeakMonitor::default() }
    }

    /// One reaper sweep: scans the OS process table for every configured
    /// server's `process_patterns`, excludes PIDs the registry already
    /// tracks as that server's live process, classifies the remainder, and
    /// kills the ones the policy calls for.
    pub fn sweep(&self, table: &mut ProcessTable) -> Vec<ReapDecision> {
        table.refresh();
        let mut decisions = Vec::new();
        let mut kill_count = 0usize;

        for entry in self.registry.all() {
            if entry.config.process_patterns.is_empty() {
                continue;
            }
            let tracked_pid = self.processes.pid_of(&entry.config.name);
            for snapshot in table.matching(&entry.config.process_patterns) {
                if Some(snapshot.pid) == tracked_pid {
                    continue;
                }
                let action = classify(&snapshot, &self.ceilings);
                if !matches!(action, ReapAction::Skip) {
                    table.kill(snapshot.pid);
                    kill_count += 1;
                }
                decisions.push(ReapDecision { pid: snapshot.pid, cmdline: snapshot.cmdline.clone(), action });
            }
        }

        if self.leak_monitor.record_round(kill_count) {
            warn!(kill_count, "leak reaper has killed orphaned processes for consecutive rounds");
        }
        metrics::counter!("aegis_reaper_kills_total").increment(kill_count as u64);
        decisions
    }

    /// Read-only variant of `sweep`: scans and classifies without killing
    /// anything, tallying the five leak-alert buckets for the supervisor's
    /// distinct 5-tick "leak monitor" cadence.
    pub fn counters(&self, table: &mut ProcessTable) -> LeakCounters {
        table.refresh();
        let mut counters = LeakCounters::default();

        for entry in self.registry.all() {
            if entry.config.process_patterns.is_empty() {
                continue;
            }
            let tracked_pid = self.processes.pid_of(&entry.config.name);
            for snapshot in table.matching(&entry.config.process_patterns) {
                if Some(snapshot.pid) == tracked_pid {
                    continue;
                }
                counters.total_managed += 1;
                counters.orphaned += 1;
                if snapshot.is_zombie {
                    counters.zombie += 1;
                }
                match classify(&snapshot, &self.ceilings) {
                    ReapAction::KillUnconditional => counters.very_old += 1,
                    ReapAction::KillOverCeiling => counters.old += 1,
                    _ => {}
                }
            }
        }

        metrics::gauge!("aegis_reaper_orphaned_processes").set(counters.orphaned as f64);
        metrics::gauge!("aegis_reaper_zombie_processes").set(counters.zombie as f64);
        metrics::gauge!("aegis_reaper_old_processes").set(counters.old as f64);
        metrics::gauge!("aegis_reaper_very_old_processes").set(counters.very_old as f64);
        metrics::gauge!("aegis_reaper_total_managed_processes").set(counters.total_managed as f64);
        counters
    }
}
