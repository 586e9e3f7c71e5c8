// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Line-delimited JSON-RPC-like wire protocol spoken over an MCP child's
//! stdio (spec.md §6 "MCP server wire protocol (consumed)").

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::connection::ToolContent;
use crate::domain::tool::{ToolDescriptor, ToolKind};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "hello")]
    Hello { version: String, session_id: String },
    #[serde(rename = "list_tools")]
    ListTools { session_id: String },
    #[serde(rename = "tool_call")]
    ToolCall { session_id: String, id: String, name: String, parameters: Value },
    #[serde(rename = "goodbye")]
    Goodbye { session_id: String },
}

impl ClientMessage {
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut s = serde_json::to_string(self)?;
        s.push('\n');
        Ok(s)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub parameters: Value,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object"})
}

impl RawToolDescriptor {
    pub fn into_domain(self, server_name: &str) -> ToolDescriptor {
        ToolDescriptor {
            tool_id: self.name.clone(),
            name: self.name,
            description: self.description,
            kind: ToolKind::Mcp,
            parameters: self.parameters,
            server_name: Some(server_name.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "hello")]
    Hello { version: String },
    #[serde(rename = "list_tools_response")]
    ListToolsResponse { tools: Vec<RawToolDescriptor> },
    #[serde(rename = "tool_response")]
    ToolResponse {
        id: String,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed wire message: {0}")]
    Malformed(String),
    #[error("unexpected message type for this request")]
    UnexpectedType,
    #[error("server returned an error: {0}")]
    ServerError(String),
}

/// Parses one line of server output into a `ServerMessage`.
pub fn parse_line(line: &str) -> Result<ServerMessage, WireError> {
    serde_json::from_str(line.trim()).map_err(|e| WireError::Malformed(e.to_string()))
}

/// Extracts the tagged `ToolContent` a tool-call response carries, following
/// the "prefer textual field, else list, else raw JSON" convention (spec.md
/// §9 design note, §4.6 step 4).
pub fn extract_content(msg: ServerMessage) -> Result<ToolContent, WireError> {
    match msg {
        ServerMessage::ToolResponse { error: Some(e), .. } => Err(WireError::ServerError(e)),
        ServerMessage::ToolResponse { content: Some(value), .. } => Ok(value_to_tool_content(value)),
        ServerMessage::ToolResponse { content: None, error: None, .. } => {
            Ok(ToolContent::Text(String::new()))
        }
        _ => Err(WireError::UnexpectedType),
    }
}

fn value_to_tool_content(value: Value) -> ToolContent {
    match value {
        Value::String(s) => ToolContent::Text(s),
        Value::Array(items) => ToolContent::List(items.into_iter().map(value_to_tool_content).collect()),
        Value::Object(ref map) => {
            if let Some(Value::String(text)) = map.get("text") {
                ToolContent::Text(text.clone())
            } else {
                ToolContent::Json(value)
            }
        }
        other => ToolContent::Json(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_message_serializes_with_type_tag() {
        let msg = ClientMessage::Hello { version: "1.0".into(), session_id: "s1".into() };
        let line = msg.to_line().unwrap();
        assert!(line.starts_with('{'));
        assert!(line.contains("\"type\":\"hello\""));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn parses_tool_response_with_error() {
        let line = r#"{"type":"tool_response","id":"1","error":"boom"}"#;
        let msg = parse_line(line).unwrap();
        let err = extract_content(msg).unwrap_err();
        assert!(matches!(err, WireError::ServerError(_)));
    }

    #[test]
    fn extracts_text_field_from_object_content() {
        let line = r#"{"type":"tool_response","id":"1","content":{"text":"abc"}}"#;
        let msg = parse_line(line).unwrap();
        let content = extract_content(msg).unwrap();
        assert_eq!(content.into_plain_string(), "abc");
    }

    #[test]
    fn extracts_plain_string_content() {
        let line = r#"{"type":"tool_response","id":"1","content":"abc"}"#;
        let msg = parse_line(line).unwrap();
        let content = extract_content(msg).unwrap();
        assert_eq!(content.into_plain_string(), "abc");
    }

    #[test]
    fn parses_list_tools_response() {
        let line = r#"{"type":"list_tools_response","tools":[{"name":"echo","description":"echoes input"}]}"#;
        let msg = parse_line(line).unwrap();
        match msg {
            ServerMessage::ListToolsResponse { tools } => {
                assert_eq!(tools.len(), 1);
                assert_eq!(tools[0].name, "echo");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(parse_line("not json").is_err());
    }
}
