// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Config Loader (C1): parses the tool-server registry file and LLM
//! credentials, computes reload diffs (spec.md §6).

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::errors::ErrorKind;
use crate::domain::server::{ServerConfig, Timeouts};

#[derive(Debug, Deserialize)]
struct RawTimeouts {
    ping: Option<f64>,
    warmup: Option<f64>,
    validation: Option<f64>,
    default: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimeoutField {
    Scalar(f64),
    Detailed(RawTimeouts),
}

#[derive(Debug, Deserialize)]
struct RawServerEntry {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    required_env: Vec<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    success_indicators: Vec<String>,
    #[serde(default)]
    process_patterns: Vec<String>,
    #[serde(default)]
    timeout: Option<RawTimeoutField>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    slow: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(rename = "mcpServers")]
    mcp_servers: HashMap<String, RawServerEntry>,
}

fn resolve_timeouts(field: Option<RawTimeoutField>) -> Timeouts {
    let default = Timeouts::default();
    match field {
        None => default,
        Some(RawTimeoutField::Scalar(secs)) => {
            let d = Duration::from_secs_f64(secs);
            Timeouts { ping: d, warmup: d, validation: d, default: d }
        }
        Some(RawTimeoutField::Detailed(raw)) => Timeouts {
            ping: raw.ping.map(Duration::from_secs_f64).unwrap_or(default.ping),
            warmup: raw.warmup.map(Duration::from_secs_f64).unwrap_or(default.warmup),
            validation: raw.validation.map(Duration::from_secs_f64).unwrap_or(default.validation),
            default: raw.default.map(Duration::from_secs_f64).unwrap_or(default.default),
        },
    }
}

/// Parses the `{"mcpServers": {...}}` registry document into per-server
/// configs, validating required-env presence eagerly so a broken registry
/// file fails config load rather than surfacing later as a launch failure.
pub fn parse_registry(raw_json: &str) -> Result<HashMap<String, ServerConfig>, ErrorKind> {
    let parsed: RegistryFile =
        serde_json::from_str(raw_json).map_err(|e| ErrorKind::ConfigInvalid(e.to_string()))?;

    let mut out = HashMap::new();
    for (name, entry) in parsed.mcp_servers {
        let config = ServerConfig {
            name: name.clone(),
            command: entry.command,
            args: entry.args,
            env: entry.env,
            required_env: entry.required_env,
            enabled: entry.enabled,
            success_indicators: entry.success_indicators,
            process_patterns: entry.process_patterns,
            timeouts: resolve_timeouts(entry.timeout),
            description: entry.description,
            slow: entry.slow,
        };
        out.insert(name, config);
    }
    Ok(out)
}

/// Result of comparing two successive registry loads (spec.md §6 "computes
/// a diff, and restarts only affected servers").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl RegistryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn affected_servers(&self) -> Vec<String> {
        self.added.iter().chain(&self.changed).cloned().collect()
    }
}

pub fn diff_registries(
    previous: &HashMap<String, ServerConfig>,
    next: &HashMap<String, ServerConfig>,
) -> RegistryDiff {
    let mut diff = RegistryDiff::default();
    for name in next.keys() {
        if !previous.contains_key(name) {
            diff.added.push(name.clone());
        }
    }
    for name in previous.keys() {
        if !next.contains_key(name) {
            diff.removed.push(name.clone());
        }
    }
    for (name, new_cfg) in next {
        if let Some(old_cfg) = previous.get(name) {
            if !configs_equal(old_cfg, new_cfg) {
                diff.changed.push(name.clone());
            }
        }
    }
    diff
}

fn configs_equal(a: &ServerConfig, b: &ServerConfig) -> bool {
    a.command == b.command
        && a.args == b.args
        && a.env == b.env
        && a.required_env == b.required_env
        && a.enabled == b.enabled
        && a.success_indicators == b.success_indicators
        && a.process_patterns == b.process_patterns
        && a.description == b.description
        && a.slow == b.slow
}

/// Validates every `required_env` variable resolves to a non-empty value
/// once `env` overrides are applied on top of the ambient process
/// environment (spec.md §4.1 step 2).
pub fn resolve_environment(config: &ServerConfig) -> Result<HashMap<String, String>, ErrorKind> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    env.extend(config.env.clone());

    for required in &config.required_env {
        match env.get(required) {
            Some(v) if !v.is_empty() => {}
            _ => return Err(ErrorKind::ConfigMissingRequired(required.clone())),
        }
    }
    Ok(env)
}

/// Bounded ring of historical diffs, up to 50 retained in memory (spec.md
/// §6 "up to 50 historical diffs are retained in memory").
pub struct DiffHistory {
    entries: Vec<RegistryDiff>,
    capacity: usize,
}

impl Default for DiffHistory {
    fn default() -> Self {
        Self { entries: Vec::new(), capacity: 50 }
    }
}

impl DiffHistory {
    pub fn push(&mut self, diff: RegistryDiff) {
        self.entries.push(diff);
        if self.entries.len() > self.capacity {
            self.entries.remove(0);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "mcpServers": {
            "echo": {
                "command": "echo-mcp",
                "args": ["--stdio"],
                "success_indicators": ["ready"],
                "timeout": 5
            }
        }
    }"#;

    #[test]
    fn parses_scalar_timeout_into_all_fields() {
        let registry = parse_registry(SAMPLE).unwrap();
        let echo = &registry["echo"];
        assert_eq!(echo.timeouts.ping, Duration::from_secs(5));
        assert_eq!(echo.timeouts.default, Duration::from_secs(5));
    }

    #[test]
    fn invalid_json_is_config_invalid() {
        let err = parse_registry("not json").unwrap_err();
        assert!(matches!(err, ErrorKind::ConfigInvalid(_)));
    }

    #[test]
    fn identical_reload_produces_empty_diff() {
        let registry = parse_registry(SAMPLE).unwrap();
        let diff = diff_registries(&registry, &registry);
        assert!(diff.is_empty());
    }

    #[test]
    fn added_server_appears_in_diff() {
        let before = HashMap::new();
        let after = parse_registry(SAMPLE).unwrap();
        let diff = diff_registries(&before, &after);
        assert_eq!(diff.added, vec!["echo".to_string()]);
    }

    #[test]
    fn missing_required_env_fails_fast() {
        let mut registry = parse_registry(SAMPLE).unwrap();
        let config = registry.get_mut("echo").unwrap();
        config.required_env.push("DEFINITELY_UNSET_VAR_XYZ".into());
        let err = resolve_environment(config).unwrap_err();
        assert!(matches!(err, ErrorKind::ConfigMissingRequired(_)));
    }

    #[test]
    fn diff_history_caps_at_fifty() {
        let mut history = DiffHistory::default();
        for _ in 0..60 {
            history.push(RegistryDiff::default());
        }
        assert_eq!(history.len(), 50);
    }
}
