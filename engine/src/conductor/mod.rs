//! Conductor
//!
//! The per-turn pipeline: the Planner routes a request, the Worker runs
//! read-only capabilities and drafts a response, the Evaluator decides what
//! is delivered, and the Orchestrator sequences them and owns memory writes.

pub mod context;
pub mod evaluator;
pub mod orchestrator;
pub mod planner;
pub mod types;
pub mod worker;

pub use context::ContextAssembler;
pub use evaluator::{Evaluator, ScanOutcome, REFUSAL_TEMPLATE};
pub use orchestrator::{Conversation, Orchestrator, CANCELLED_NOTICE};
pub use planner::Planner;
pub use types::{
    ArtifactEntry, ClassificationSource, Complexity, Plan, ResultBundle, RiskLevel, SafetyStatus,
    SavePreference, TaskType, TurnContext, TurnState, TurnStats, Verdict, WorkerResult,
};
pub use worker::{boundary_draft, Worker};
