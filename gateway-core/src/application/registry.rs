// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Process Registry (C2): the in-memory map of configured servers, each
//! guarded by its own lock so one server's launch or health check never
//! blocks another's (spec.md §4 "per-server lock", I3).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::errors::ErrorKind;
use crate::domain::server::{ServerConfig, ServerStatus};

/// A configured server plus its mutable status, held behind one
/// `tokio::sync::Mutex` so launcher/health-probe/reaper/supervisor
/// operations on different servers never contend with each other.
pub struct ServerEntry {
    pub config: ServerConfig,
    pub status: Mutex<ServerStatus>,
}

/// Failure streak at which a server is marked failed and stops being
/// auto-restarted until an explicit admin reset (spec.md §4.5 I2).
pub const FAILURE_THRESHOLD: u32 = 3;

#[derive(Default)]
pub struct ServerRegistry {
    entries: std::sync::RwLock<HashMap<String, Arc<ServerEntry>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the full entry set from a freshly-parsed config map,
    /// preserving existing `ServerStatus` for servers that survive the
    /// reload untouched (only config_loader's diff determines what actually
    /// restarts; this just keeps bookkeeping state alive across reload).
    pub fn load(&self, configs: HashMap<String, ServerConfig>) {
        let mut guard = self.entries.write().expect("registry lock poisoned");
        let mut next = HashMap::with_capacity(configs.len());
        for (name, config) in configs {
            let entry = match guard.remove(&name) {
                Some(existing) if existing.config.command == config.command => existing,
                _ => Arc::new(ServerEntry { status: Mutex::new(ServerStatus::new(&config)), config }),
            };
            next.insert(name, entry);
        }
        *guard = next;
    }

    pub fn get(&self, name: &str) -> Result<Arc<ServerEntry>, ErrorKind> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| ErrorKind::ServerNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().expect("registry lock poisoned").keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<ServerEntry>> {
        self.entries.read().expect("registry lock poisoned").values().cloned().collect()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<ServerEntry>> {
        self.entries.write().expect("registry lock poisoned").remove(name)
    }

    pub fn upsert(&self, name: String, config: ServerConfig) {
        let entry = Arc::new(ServerEntry { status: Mutex::new(ServerStatus::new(&config)), config });
        self.entries.write().expect("registry lock poisoned").insert(name, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn cfg(name: &str) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            command: "echo-mcp".into(),
            args: vec![],
            env: Map::new(),
            required_env: vec![],
            enabled: true,
            success_indicators: vec![],
            process_patterns: vec![],
            timeouts: Default::default(),
            description: None,
            slow: false,
        }
    }

    #[test]
    fn missing_server_is_not_found() {
        let registry = ServerRegistry::new();
        assert!(registry.get("nope").is_err());
    }

    #[tokio::test]
    async fn reload_with_same_command_preserves_status() {
        let registry = ServerRegistry::new();
        let mut configs = Map::new();
        configs.insert("echo".to_string(), cfg("echo"));
        registry.load(configs);

        {
            let entry = registry.get("echo").unwrap();
            entry.status.lock().await.restart_count = 7;
        }

        let mut reload = Map::new();
        reload.insert("echo".to_string(), cfg("echo"));
        registry.load(reload);

        let entry = registry.get("echo").unwrap();
        assert_eq!(entry.status.lock().await.restart_count, 7);
    }

    #[test]
    fn reload_drops_removed_servers() {
        let registry = ServerRegistry::new();
        let mut configs = Map::new();
        configs.insert("echo".to_string(), cfg("echo"));
        registry.load(configs);
        registry.load(Map::new());
        assert!(registry.get("echo").is_err());
    }
}
