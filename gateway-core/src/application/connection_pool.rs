// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Connection Pool (C7): `acquire()` with an intelligent 5-attempt
//! recovery strategy (spec.md §4.5).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tracing::{info, warn};

use crate::application::launcher::{Launcher, ProcessTableHandle};
use crate::application::registry::{ServerEntry, ServerRegistry, FAILURE_THRESHOLD};
use crate::application::supervisor::Supervisor;
use crate::domain::connection::PooledConnectionMeta;
use crate::domain::errors::ErrorKind;
use crate::domain::tool::ToolDescriptor;
use crate::infrastructure::process::mcp_process::McpActorHandle;
use crate::infrastructure::process::wire::ClientMessage;

/// Max attempts `acquire()` makes before giving up (spec.md §4.5 "a
/// 5-attempt cap").
pub const MAX_ATTEMPTS: u32 = 5;

/// Cap on the exponential backoff between attempts (spec.md §4.5 "capped
/// at 30s").
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connections older than this are refreshed even if otherwise healthy
/// (spec.md §4.5 step 1, "age below 1h").
pub const MAX_CONNECTION_AGE: chrono::Duration = chrono::Duration::hours(1);

pub struct ConnectionPool {
    registry: Arc<ServerRegistry>,
    processes: Arc<ProcessTableHandle>,
    launcher: Arc<Launcher>,
    supervisor: Arc<Supervisor>,
    meta: DashMap<String, PooledConnectionMeta>,
}

/// What `acquire()` decided to do for one attempt, keyed by attempt number
/// per spec.md §4.5's per-attempt strategy table.
fn backoff_for_attempt(attempt: u32) -> Duration {
    let base = Duration::from_millis(250) * 2u32.pow(attempt.min(6));
    let capped = base.min(MAX_BACKOFF);
    let jitter_ms = rand::thread_rng().gen_range(0..=(capped.as_millis() as u64 / 4).max(1));
    capped + Duration::from_millis(jitter_ms)
}

impl ConnectionPool {
    pub fn new(
        registry: Arc<ServerRegistry>,
        processes: Arc<ProcessTableHandle>,
        launcher: Arc<Launcher>,
        supervisor: Arc<Supervisor>,
    ) -> Self {
        Self { registry, processes, launcher, supervisor, meta: DashMap::new() }
    }

    fn fresh_actor(&self, server_name: &str) -> Option<McpActorHandle> {
        let actor = self.processes.get_actor(server_name)?;
        let fresh = self.meta.get(server_name).map(|m| !m.is_expired(MAX_CONNECTION_AGE)).unwrap_or(false);
        fresh.then_some(actor)
    }

    /// Acquires a usable connection to `server_name`, up to `MAX_ATTEMPTS`
    /// tries, each step escalating the recovery strategy (spec.md §4.5):
    /// attempt 0 tries the existing connection then asks the supervisor to
    /// confirm (not spawn) the server; attempt 1 sweeps leaked processes
    /// before retrying; attempt 2 clears the server's `marked_failed`
    /// blacklist before asking the supervisor to start it; attempt 3+
    /// force-restarts the server outright.
    pub async fn acquire(&self, server_name: &str) -> Result<McpActorHandle, ErrorKind> {
        let entry = self.registry.get(server_name)?;
        let start = std::time::Instant::now();

        let mut last_err = ErrorKind::ConnectionFailed;
        for attempt in 0..MAX_ATTEMPTS {
            if let Some(actor) = self.fresh_actor(server_name) {
                entry.status.lock().await.record_success();
                metrics::histogram!("aegis_pool_acquire_seconds").record(start.elapsed().as_secs_f64());
                return Ok(actor);
            }
            if self.processes.get_actor(server_name).is_some() {
                self.evict(server_name).await;
            }

            if attempt < 2 && entry.status.lock().await.marked_failed {
                metrics::counter!("aegis_pool_acquire_failures_total").increment(1);
                return Err(ErrorKind::ServerUnavailable(server_name.to_string()));
            }

            let outcome = match attempt {
                0 => self.supervisor.ensure_running_one(server_name, true).await,
                1 => {
                    self.supervisor.sweep_leaks().await;
                    self.supervisor.ensure_running_one(server_name, true).await
                }
                2 => {
                    self.supervisor.reset_failures(server_name).await;
                    self.supervisor.ensure_running_one(server_name, false).await
                }
                _ => {
                    let _ = self.launcher.stop_server(server_name, true, Duration::from_secs(1)).await;
                    self.supervisor.ensure_running_one(server_name, false).await
                }
            };

            if outcome.running {
                match self.processes.get_actor(server_name) {
                    Some(actor) => match self.validate_and_warm_up(&actor, server_name, &entry).await {
                        Ok(()) => {
                            let tools = self.list_tools(&actor, server_name, entry.config.timeouts.validation).await.unwrap_or_default();
                            self.meta.insert(server_name.to_string(), PooledConnectionMeta::new(server_name, tools));
                            entry.status.lock().await.record_success();
                            metrics::histogram!("aegis_pool_acquire_seconds").record(start.elapsed().as_secs_f64());
                            return Ok(actor);
                        }
                        Err(e) => last_err = e,
                    },
                    None => last_err = ErrorKind::ConnectionLost,
                }
            } else {
                last_err = outcome.error.unwrap_or(ErrorKind::ConnectionFailed);
                entry.status.lock().await.record_failure(FAILURE_THRESHOLD, last_err.to_string());
                if !last_err.should_retry() && attempt < 2 {
                    metrics::counter!("aegis_pool_acquire_failures_total").increment(1);
                    return Err(last_err);
                }
            }

            let delay = backoff_for_attempt(attempt);
            warn!(server = server_name, attempt, ?delay, "connection attempt failed, backing off");
            tokio::time::sleep(delay).await;
        }

        metrics::counter!("aegis_pool_acquire_failures_total").increment(1);
        Err(last_err)
    }

    /// Validates a freshly (re)started connection with a `list_tools` ping
    /// under `config.timeouts.validation` — tolerated if it times out on a
    /// server flagged `slow` — then runs a separate best-effort warm-up ping
    /// under `config.timeouts.warmup` whose failure is always tolerated
    /// (spec.md §4.5 step 1, "validation vs warm-up handshake").
    async fn validate_and_warm_up(&self, actor: &McpActorHandle, server_name: &str, entry: &ServerEntry) -> Result<(), ErrorKind> {
        match self.list_tools(actor, server_name, entry.config.timeouts.validation).await {
            Ok(_) => {}
            Err(ErrorKind::ConnectionTimeout) if entry.config.slow => {
                warn!(server = server_name, "validation ping timed out on a server flagged slow, tolerating");
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self.list_tools(actor, server_name, entry.config.timeouts.warmup).await {
            warn!(server = server_name, error = %e, "warm-up ping failed, tolerating");
        }
        Ok(())
    }

    async fn list_tools(&self, actor: &McpActorHandle, server_name: &str, timeout: Duration) -> Result<Vec<ToolDescriptor>, ErrorKind> {
        let reply = actor
            .request_untagged(ClientMessage::ListTools { session_id: actor.session_id().to_string() }, timeout)
            .await?;
        match reply {
            crate::infrastructure::process::wire::ServerMessage::ListToolsResponse { tools } => {
                Ok(tools.into_iter().map(|t| t.into_domain(server_name)).collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Drops the pooled connection and the underlying process so the next
    /// `acquire()` starts clean (spec.md §4.6 step 3, connection-class
    /// errors evict the offending connection).
    pub async fn evict(&self, server_name: &str) {
        self.meta.remove(server_name);
        let _ = self.launcher.stop_server(server_name, false, Duration::from_secs(1)).await;
        info!(server = server_name, "connection evicted from pool");
    }

    pub fn cached_tools(&self, server_name: &str) -> Vec<ToolDescriptor> {
        self.meta.get(server_name).map(|m| m.cached_tools.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::server::{ServerConfig, Timeouts};
    use std::collections::HashMap;

    #[test]
    fn backoff_never_exceeds_cap_plus_jitter_quarter() {
        for attempt in 0..10 {
            let delay = backoff_for_attempt(attempt);
            assert!(delay <= MAX_BACKOFF + MAX_BACKOFF / 4);
        }
    }

    #[test]
    fn backoff_grows_with_attempt_number() {
        let early = backoff_for_attempt(0);
        let later = backoff_for_attempt(4);
        assert!(later >= early);
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

    fn pool_with_blacklisted(name: &str) -> (ConnectionPool, Arc<ServerRegistry>) {
        let registry = Arc::new(ServerRegistry::new());
        let mut configs = HashMap::new();
        configs.insert(name.to_string(), cfg(name));
        registry.load(configs);
        let processes = Arc::new(ProcessTableHandle::default());
        let launcher = Arc::new(Launcher::new(registry.clone(), processes.clone()));
        let supervisor = Arc::new(Supervisor::new(registry.clone(), processes.clone(), launcher.clone()));
        let pool = ConnectionPool::new(registry.clone(), processes, launcher, supervisor);
        (pool, registry)
    }

    #[tokio::test]
    async fn acquire_refuses_a_blacklisted_server_without_spawning() {
        let (pool, registry) = pool_with_blacklisted("flaky");
        {
            let entry = registry.get("flaky").unwrap();
            let mut status = entry.status.lock().await;
            status.record_failure(1, "boom");
            assert!(status.marked_failed);
        }
        let err = pool.acquire("flaky").await.unwrap_err();
        assert!(matches!(err, ErrorKind::ServerUnavailable(_)));
    }

    #[tokio::test]
    async fn acquire_reports_unknown_server() {
        let (pool, _registry) = pool_with_blacklisted("flaky");
        let err = pool.acquire("ghost").await.unwrap_err();
        assert!(matches!(err, ErrorKind::ServerNotFound(_)));
    }
}
