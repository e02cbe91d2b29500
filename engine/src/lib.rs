//! Warden Engine Library
//!
//! Read-only codebase and log analysis agent. A request flows through the
//! Planner, Worker and Evaluator in [`conductor`], with session and
//! long-term [`memory`] feeding context and a shared [`safety`] filter
//! guarding both ends. Used by the `warden` binary and integration tests.

/// Configuration management module
pub mod config;

/// Secret management module
pub mod secrets;

/// Workspace path confinement
pub mod fs_guard;

/// Destructive-instruction classifier
pub mod safety;

/// Reasoning-service abstraction layer
pub mod llm;

/// Session and long-term memory
pub mod memory;

/// Built-in read-only analysis capabilities
pub mod tools;

/// Planner, Worker, Evaluator and Orchestrator
pub mod conductor;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
