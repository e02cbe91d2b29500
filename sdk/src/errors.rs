//! Error types and handling
//!
//! This module provides the error types shared by the warden engine and any
//! capability implementation. All errors implement the `WardenErrorExt` trait
//! which provides user-friendly hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! Hints returned by `user_hint` are static strings:
//! - No secrets (API keys, tokens) are included
//! - No file paths from the analyzed repository are echoed back
//! - All messages are safe to display to end users

use thiserror::Error;

/// Trait for warden error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait WardenErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain:
    /// - Secrets (API keys, tokens, passwords)
    /// - File paths
    /// - Internal implementation details
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or degraded around. Non-recoverable
    /// errors typically require a configuration change.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Persistence**: Long-term store read/write failures
/// - **Reasoning service**: Provider failures, timeouts, missing credentials
/// - **Capability**: Read-only analysis tool failures and refusals
/// - **File System**: Path validation and access errors
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, WardenErrorExt};
/// use std::path::PathBuf;
///
/// let error = EngineError::PathDenied(PathBuf::from(".ssh"));
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::CredentialsUnavailable;
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Long-term store errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    // Reasoning service errors
    #[error("Reasoning provider error: {0}")]
    Provider(String),

    #[error("Reasoning provider timed out")]
    ProviderTimeout,

    #[error("No reasoning service credentials configured")]
    CredentialsUnavailable,

    #[error("Turn cancelled")]
    Cancelled,

    // Capability errors
    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("Capability is not read-only: {0}")]
    CapabilityNotReadOnly(String),

    #[error("Capability failed: {0}")]
    Capability(String),

    // File system security errors
    #[error("Path denied: {0:?}")]
    PathDenied(std::path::PathBuf),

    #[error("Path outside workspace: {0:?}")]
    PathOutsideWorkspace(std::path::PathBuf),

    #[error("Path canonicalization failed for {0:?}: {1}")]
    PathCanonicalization(std::path::PathBuf, String),

    // Keyring errors
    #[error("Keyring error: {0}")]
    KeyringError(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::Persistence(_) => "Preference store unavailable. Continuing without it",

            Self::Provider(_) => "Reasoning service unavailable. Falling back to local analysis",
            Self::ProviderTimeout => "Reasoning service took too long to respond. Try again",
            Self::CredentialsUnavailable => {
                "No API keys found. Set GEMINI_API_KEYS or run 'warden keys set'"
            }
            Self::Cancelled => "The request was cancelled",

            Self::CapabilityNotFound(_) => "The requested analysis is not available",
            Self::CapabilityNotReadOnly(_) => "Only read-only analysis is permitted",
            Self::Capability(_) => "Analysis step failed",

            Self::PathDenied(_) => "Access to this path is not allowed",
            Self::PathOutsideWorkspace(_) => "Path must be inside the analyzed repository",
            Self::PathCanonicalization(_, _) => "Invalid path specified",

            Self::KeyringError(_) => "Failed to access secure storage. Check system keychain",

            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::CredentialsUnavailable | Self::CapabilityNotReadOnly(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_hints_never_echo_paths() {
        let err = EngineError::PathOutsideWorkspace(PathBuf::from("/etc/shadow"));
        assert!(!err.user_hint().contains("/etc"));
        assert!(err.to_string().contains("/etc/shadow"));
    }

    #[test]
    fn test_recoverability() {
        assert!(EngineError::ProviderTimeout.is_recoverable());
        assert!(EngineError::Persistence("corrupt".to_string()).is_recoverable());
        assert!(!EngineError::CapabilityNotReadOnly("write_file".to_string()).is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
        assert_eq!(err.user_hint(), "File system operation failed");
    }
}
