// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Tool descriptors and the catalogue offered to the LLM (C2/C9).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Mcp,
    Http,
}

/// A tool's static description, either parsed from an MCP
/// `list_tools_response` entry or read from the `tools` table (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub tool_id: String,
    pub name: String,
    pub description: String,
    pub kind: ToolKind,
    pub parameters: Value,
    pub server_name: Option<String>,
}

impl ToolDescriptor {
    pub fn to_llm_tool_spec(&self) -> crate::domain::llm::ToolSpec {
        crate::domain::llm::ToolSpec {
            name: self.tool_id.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// In-memory view of every tool known to the gateway, assembled from the
/// currently-running servers' `list_tools` responses (C2 "format for the LLM").
#[derive(Debug, Clone, Default)]
pub struct ToolCatalogue {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalogue {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    pub fn find(&self, tool_id: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.tool_id == tool_id)
    }

    pub fn as_llm_specs(&self) -> Vec<crate::domain::llm::ToolSpec> {
        self.tools.iter().map(ToolDescriptor::to_llm_tool_spec).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Picks the first configured server, used when a tool call omits
    /// `target_server` (spec.md §4.6 step 1).
    pub fn default_server(&self) -> Option<&str> {
        self.tools.first().and_then(|t| t.server_name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(id: &str, server: &str) -> ToolDescriptor {
        ToolDescriptor {
            tool_id: id.into(),
            name: id.into(),
            description: "desc".into(),
            kind: ToolKind::Mcp,
            parameters: serde_json::json!({"type": "object"}),
            server_name: Some(server.into()),
        }
    }

    #[test]
    fn find_returns_matching_tool() {
        let cat = ToolCatalogue::new(vec![tool("echo", "echo-server")]);
        assert!(cat.find("echo").is_some());
        assert!(cat.find("missing").is_none());
    }

    #[test]
    fn default_server_picks_first() {
        let cat = ToolCatalogue::new(vec![tool("echo", "echo-server"), tool("ping", "ping-server")]);
        assert_eq!(cat.default_server(), Some("echo-server"));
    }

    #[test]
    fn as_llm_specs_preserves_order() {
        let cat = ToolCatalogue::new(vec![tool("echo", "s"), tool("ping", "s")]);
        let specs = cat.as_llm_specs();
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[1].name, "ping");
    }
}
