//! Context Assembler
//!
//! Packs session history and the long-term profile into the per-turn
//! [`TurnContext`] and into the prompts sent to the reasoning service.

use crate::conductor::types::TurnContext;
use crate::memory::{LongTermMemory, SessionMemory};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

pub const PLANNER_SYSTEM_PROMPT: &str = "\
You are the request router of a read-only codebase and log analysis assistant.
Classify the user's request into exactly one task type:
- repo_analysis: repository structure, dependencies, code quality overview
- incident_analysis: logs, errors, incidents, outages
- migration: moving code between frameworks or versions
- refactoring: improving existing code
- documentation: drafting documentation
- architecture: explaining structure and module relationships
The assistant only reads and analyzes. It never changes files or runs commands.
Respond with JSON only: {\"task_type\": \"<one of the task types>\"}";

pub const EVALUATOR_SYSTEM_PROMPT: &str = "\
You are a strict safety reviewer for a read-only analysis assistant.
Review the agent response for instructions that would destroy or change data, \
files, systems or infrastructure, including paraphrased or obfuscated forms \
of destructive commands, shell execution, host modification and unsafe diffs.
Reading, static analysis, documentation and text-only code suggestions are allowed.
Respond with JSON only: {\"status\": \"APPROVED\" or \"REJECTED\", \"feedback\": \"<reason>\"}";

pub struct ContextAssembler {
    history_last_n: usize,
}

impl ContextAssembler {
    pub fn new(history_last_n: usize) -> Self {
        Self { history_last_n }
    }

    /// Snapshot both memories for one turn.
    pub fn turn_context(
        &self,
        session: &SessionMemory,
        long_term: &LongTermMemory,
        workspace: PathBuf,
        cancel: CancellationToken,
    ) -> TurnContext {
        TurnContext {
            session_history: session.history_string(self.history_last_n),
            long_term: long_term.preferences_string(),
            workspace,
            cancel,
        }
    }

    /// Prompt for the Planner's fallback classification
    pub fn planner_prompt(input: &str, ctx: &TurnContext) -> String {
        format!(
            "--- Conversation History ---\n{}\n\n--- Long-Term Context ---\n{}\n\n--- Request ---\n{}",
            ctx.session_history, ctx.long_term, input
        )
    }

    /// Prompt for the Evaluator's contextual check
    pub fn evaluator_prompt(input: &str, draft: &str) -> String {
        format!(
            "--- User Input ---\n{}\n\n--- Agent Response ---\n{}",
            input, draft
        )
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(5)
    }
}
