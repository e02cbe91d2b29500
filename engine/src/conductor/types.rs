//! Conductor Types
//!
//! Per-turn data flowing between the Planner, Worker, Evaluator and
//! Orchestrator. All of it serializes in camelCase for `--json` output.

use crate::memory::SessionStats;
use crate::safety::SafetyCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskType {
    RepoAnalysis,
    IncidentAnalysis,
    Migration,
    Refactoring,
    Documentation,
    Architecture,
    BoundaryEnforcement,
}

impl TaskType {
    /// Every type a request may be routed to, in tie-break order
    pub const ANALYSIS: [TaskType; 6] = [
        TaskType::RepoAnalysis,
        TaskType::IncidentAnalysis,
        TaskType::Migration,
        TaskType::Refactoring,
        TaskType::Documentation,
        TaskType::Architecture,
    ];

    /// Parse an analysis task type, accepting camelCase and snake_case names.
    ///
    /// `boundaryEnforcement` is never accepted: only the safety filter decides it.
    pub fn parse_analysis(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "repoanalysis" | "repo" | "codeanalysis" => Some(TaskType::RepoAnalysis),
            "incidentanalysis" | "incident" | "loganalysis" => Some(TaskType::IncidentAnalysis),
            "migration" | "migrate" => Some(TaskType::Migration),
            "refactoring" | "refactor" => Some(TaskType::Refactoring),
            "documentation" | "docs" => Some(TaskType::Documentation),
            "architecture" => Some(TaskType::Architecture),
            _ => None,
        }
    }

    /// Heading of the drafted response
    pub fn heading(self) -> &'static str {
        match self {
            TaskType::RepoAnalysis => "Repository Analysis",
            TaskType::IncidentAnalysis => "Incident Analysis",
            TaskType::Migration => "Migration Plan",
            TaskType::Refactoring => "Refactoring Review",
            TaskType::Documentation => "Documentation Draft",
            TaskType::Architecture => "Architecture Overview",
            TaskType::BoundaryEnforcement => "Request Declined",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::RepoAnalysis => "repoAnalysis",
            TaskType::IncidentAnalysis => "incidentAnalysis",
            TaskType::Migration => "migration",
            TaskType::Refactoring => "refactoring",
            TaskType::Documentation => "documentation",
            TaskType::Architecture => "architecture",
            TaskType::BoundaryEnforcement => "boundaryEnforcement",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// How the Planner arrived at the task type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    Heuristic,
    Reasoning,
    Fallback,
}

impl fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationSource::Heuristic => write!(f, "heuristic"),
            ClassificationSource::Reasoning => write!(f, "reasoning"),
            ClassificationSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// Preference stated in a request, applied to long-term memory after the turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SavePreference {
    Migration { source: String, target: String },
    Preference { key: String, value: String },
}

/// Routing decision for one turn.
///
/// `risk_level == High` only for `BoundaryEnforcement` plans, and those never
/// name a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub task_type: TaskType,
    pub risk_level: RiskLevel,
    pub complexity: Complexity,
    pub tools_needed: Vec<String>,
    pub target_paths: Vec<String>,
    pub instruction: String,
    pub needs_validation: bool,
    pub classification: ClassificationSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boundary_category: Option<SafetyCategory>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_preference: Option<SavePreference>,
}

impl Plan {
    /// Plan for a request the safety filter flagged
    pub fn boundary(category: SafetyCategory, complexity: Complexity) -> Self {
        Self {
            task_type: TaskType::BoundaryEnforcement,
            risk_level: RiskLevel::High,
            complexity,
            tools_needed: Vec::new(),
            target_paths: Vec::new(),
            instruction: format!(
                "Decline the request: it asks for a {} operation.",
                category.description()
            ),
            needs_validation: true,
            classification: ClassificationSource::Heuristic,
            boundary_category: Some(category),
            parameters: BTreeMap::new(),
            save_preference: None,
        }
    }

    pub fn is_boundary(&self) -> bool {
        self.task_type == TaskType::BoundaryEnforcement
    }
}

/// Outcome of one capability invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ArtifactEntry {
    Ok { data: Value },
    Error { message: String },
}

impl ArtifactEntry {
    pub fn is_ok(&self) -> bool {
        matches!(self, ArtifactEntry::Ok { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    pub draft_response: String,
    /// Capabilities actually invoked, in plan order
    pub tools_used: Vec<String>,
    pub artifacts: BTreeMap<String, ArtifactEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafetyStatus {
    Approved,
    Rejected,
}

impl fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyStatus::Approved => write!(f, "APPROVED"),
            SafetyStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Evaluator decision. `final_response` is never empty, and a rejection
/// never carries any part of the draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub status: SafetyStatus,
    pub feedback: String,
    pub final_response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TurnState {
    Received,
    Planned,
    Boundary,
    Executing,
    Drafted,
    Evaluated,
    /// The pipeline panicked and the turn fell back to a refusal
    Faulted,
    Delivered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStats {
    pub turn_id: String,
    pub session: SessionStats,
    pub states: Vec<TurnState>,
    pub classification: ClassificationSource,
    pub feedback: String,
    pub duration_ms: u64,
}

/// Everything the caller receives for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBundle {
    pub response: String,
    pub plan: Plan,
    pub tools_used: Vec<String>,
    pub safety_status: SafetyStatus,
    pub stats: TurnStats,
    pub artifacts: BTreeMap<String, ArtifactEntry>,
}

/// Read-only context handed to the Planner and Worker
#[derive(Debug, Clone)]
pub struct TurnContext {
    /// Serialized recent session turns
    pub session_history: String,
    /// Serialized long-term profile
    pub long_term: String,
    /// Repository root every capability is confined to
    pub workspace: PathBuf,
    pub cancel: CancellationToken,
}
