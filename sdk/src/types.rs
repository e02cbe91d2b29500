//! Capability input/output types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Input to a capability invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    /// Root of the repository being analyzed. Every path a capability touches
    /// must resolve inside it.
    pub workspace: PathBuf,
    /// Paths named by the request, relative to `workspace` or absolute.
    #[serde(default)]
    pub target_paths: Vec<String>,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

impl ToolInput {
    /// Create a new ToolInput rooted at `workspace`
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            target_paths: Vec::new(),
            params: HashMap::new(),
        }
    }

    /// Set the target paths
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.target_paths = targets;
        self
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Get a string parameter
    pub fn param_str(&self, key: &str) -> Result<String, ToolError> {
        self.param_str_opt(key)
            .ok_or_else(|| ToolError::MissingParameter(key.to_string()))
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Get an optional unsigned parameter
    pub fn param_u64_opt(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| v.as_u64())
    }
}

/// Output from a capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub data: serde_json::Value,
}

impl ToolOutput {
    /// Create an output with JSON data
    pub fn json(data: serde_json::Value) -> Self {
        Self { data }
    }

    /// Create an output with text
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            data: serde_json::json!({ "text": text.into() }),
        }
    }
}

/// Capability-specific errors
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Path rejected: {0}")]
    PathRejected(String),

    #[error("Read failed: {0}")]
    Io(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        ToolError::Io(e.to_string())
    }
}
