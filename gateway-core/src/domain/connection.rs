// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pooled-connection bookkeeping and the wire-protocol result shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tool::ToolDescriptor;

/// Handle to a single live tool-server connection owned by the pool. The
/// pool owns the actor that talks to the subprocess; this struct is the
/// bookkeeping record the pool keeps about it (spec.md §3 `PooledConnection`).
#[derive(Debug, Clone)]
pub struct PooledConnectionMeta {
    pub server_name: String,
    pub created_at: DateTime<Utc>,
    pub cached_tools: Vec<ToolDescriptor>,
}

impl PooledConnectionMeta {
    pub fn new(server_name: impl Into<String>, tools: Vec<ToolDescriptor>) -> Self {
        Self { server_name: server_name.into(), created_at: Utc::now(), cached_tools: tools }
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    /// I3: max connection lifetime before a fresh health-checked connection
    /// is required (spec.md §4.5 step 1, "age below 1 h").
    pub fn is_expired(&self, max_age: chrono::Duration) -> bool {
        self.age() >= max_age
    }
}

/// Replaces reflection-heavy result extraction with a small tagged variant
/// produced once by the wire-protocol parser (spec.md §9 design note).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolContent {
    Text(String),
    Json(Value),
    List(Vec<ToolContent>),
}

impl ToolContent {
    /// Flattens to a plain string following the server reply convention in
    /// spec.md §4.6 step 4: prefer a textual field, else concatenate list
    /// items, else stringify.
    pub fn into_plain_string(self) -> String {
        match self {
            ToolContent::Text(s) => s,
            ToolContent::Json(v) => match &v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            ToolContent::List(items) => items
                .into_iter()
                .map(ToolContent::into_plain_string)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}
