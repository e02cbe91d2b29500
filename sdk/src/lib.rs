//! Warden SDK
//!
//! Shared library providing the capability contract, types and errors used by
//! the warden engine and by any analysis capability plugged into it.

/// Capability trait and descriptor
pub mod capability;

/// Error types and handling
pub mod errors;

/// Capability input/output types
pub mod types;

// Re-export commonly used types
pub use capability::{Capability, CapabilityDescriptor};
pub use errors::{EngineError, WardenErrorExt};
pub use types::{ToolError, ToolInput, ToolOutput};
