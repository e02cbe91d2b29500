//! Capability contract
//!
//! A capability is a named analysis operation the engine's worker may invoke.
//! The worker only calls capabilities that declare themselves read-only; the
//! declaration is checked before every invocation, independent of any content
//! filtering done elsewhere in the pipeline.

use crate::types::{ToolError, ToolInput, ToolOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Trait that all analysis capabilities must implement
#[async_trait]
pub trait Capability: Send + Sync {
    /// Returns the unique name of the capability
    fn name(&self) -> &str;

    /// Returns true if the capability never mutates files, processes or the network
    fn read_only(&self) -> bool;

    /// JSON schema describing the accepted `ToolInput::params`
    fn input_schema(&self) -> serde_json::Value;

    /// One-line description shown in listings and prompts
    fn description(&self) -> &str {
        ""
    }

    /// Run the capability
    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError>;

    /// Serializable declaration of this capability
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name().to_string(),
            read_only: self.read_only(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Declared contract of a capability, as exposed to callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityDescriptor {
    pub name: String,
    pub read_only: bool,
    pub description: String,
    pub input_schema: serde_json::Value,
}
