//! `tooltree-types` – shared data model.
//!
//! Everything the other crates pass around lives here: the declarative
//! [`CapabilityNode`] tree and its [`Snapshot`], the schema and handler
//! values carried by each node, and the error types a handler returns.
//! Call results are plain MCP [`CallToolResult`]s from `rmcp`.

pub mod node;

pub use node::{CapabilityNode, Handler, Snapshot, ToolDefinition, ToolSchema};
pub use rmcp::model::{CallToolResult, Content};

use std::ops::Deref;

use rmcp::model::RawContent;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A successful result holding a single text item.
pub fn text_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text)])
}

/// A failed result whose single text item carries `message`.  Returned to
/// the caller instead of propagating the handler's error.
pub fn failure_result(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(message)])
}

/// Concatenated text of every text item in `result`; other content kinds
/// are skipped.
pub fn text_of(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|item| match item.deref() {
            RawContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Error raised by a tool handler while processing an invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        ToolError::Failed(message.into())
    }
}

/// Why a [`ToolSchema`] could not be built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema serialization failed: {0}")]
    Serialize(String),

    #[error("tool input schema must be a JSON object, got {0}")]
    NotAnObject(String),
}

/// Deserialize handler arguments into `T`, mapping failures to
/// [`ToolError::InvalidArguments`].
pub fn parse_args<T: DeserializeOwned>(args: serde_json::Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
