//! Dual memory: bounded session history plus a persisted long-term profile

pub mod long_term;
pub mod session;

pub use long_term::{AnalyzedRepo, LongTermMemory, LongTermProfile, DEFAULT_MIGRATION_TARGET};
pub use session::{Role, SessionMemory, SessionStats, Turn};
