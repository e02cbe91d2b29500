//! Conductor Planner
//!
//! Turns a raw request into a [`Plan`]. The safety filter runs first and a
//! match short-circuits everything else. Routing is keyword based, and only
//! an ambiguous request is handed to the reasoning service. The Planner never
//! fails: every error path ends in a conservative repository-analysis plan.

use crate::conductor::context::{ContextAssembler, PLANNER_SYSTEM_PROMPT};
use crate::conductor::types::{
    ClassificationSource, Complexity, Plan, RiskLevel, SavePreference, TaskType, TurnContext,
};
use crate::llm::{extract_json, ReasoningClient};
use crate::memory::LongTermMemory;
use crate::safety::SafetyFilter;
use crate::tools::names;
use anyhow::Result;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Routing keywords per task type. Each one matches whole words of the
/// lowercased request, so "log" is not found in "login".
const ROUTES: &[(TaskType, &[&str])] = &[
    (
        TaskType::RepoAnalysis,
        &[
            "repo",
            "repository",
            "codebase",
            "project",
            "dependency",
            "dependencies",
            "complexity",
            "imports",
            "dead code",
            "unused",
            "duplicate",
            "duplicates",
            "duplicated",
            "duplication",
            "hotspot",
            "hotspots",
        ],
    ),
    (
        TaskType::IncidentAnalysis,
        &[
            "log",
            "logs",
            "incident",
            "error",
            "errors",
            "exception",
            "stack trace",
            "crash",
            "outage",
            "postmortem",
        ],
    ),
    (
        TaskType::Migration,
        &["migrate", "migration", "migrating", "upgrade", "port to"],
    ),
    (
        TaskType::Refactoring,
        &["refactor", "refactoring", "clean up", "improve code", "simplify", "smell", "smells"],
    ),
    (
        TaskType::Documentation,
        &["document", "docs", "documentation", "readme"],
    ),
    (
        TaskType::Architecture,
        &["architecture", "structure", "design", "layers"],
    ),
];

/// Framework names recognized when a migration names only its source
const FRAMEWORKS: &[&str] = &[
    "flask", "django", "fastapi", "express", "fastify", "rails", "spring", "laravel", "koa",
    "nestjs", "sinatra", "tornado", "pyramid", "bottle",
];

const SHORT_REQUEST: usize = 80;
const LONG_REQUEST: usize = 300;

struct PlannerPatterns {
    words: Regex,
    migration_pair: Regex,
    preference: Regex,
    file_like: Regex,
}

impl PlannerPatterns {
    fn compile() -> Result<Self> {
        Ok(Self {
            words: Regex::new(r"[a-z0-9_]+")?,
            migration_pair: Regex::new(
                r"(?i)\b(?:from|migrate|port|convert)\s+(?:(?:this|the|my|our|a)\s+)?([a-z][\w.+-]*)(?:\s+(?:app|application|project|code|service|codebase))?\s+to\s+([a-z][\w.+-]*)",
            )?,
            preference: Regex::new(r"(?i)\bI\s+prefer\s+([^.!?\n]+)")?,
            file_like: Regex::new(
                r"(?i)^[\w.\-/~]*\.(py|rs|js|jsx|ts|tsx|go|java|rb|log|toml|json|txt|md|yaml|yml|cfg|ini|lock)$",
            )?,
        })
    }
}

pub struct Planner {
    safety: Arc<SafetyFilter>,
    reasoning: Option<ReasoningClient>,
    long_term: Arc<LongTermMemory>,
    patterns: PlannerPatterns,
}

impl Planner {
    pub fn new(
        safety: Arc<SafetyFilter>,
        reasoning: Option<ReasoningClient>,
        long_term: Arc<LongTermMemory>,
    ) -> Result<Self> {
        Ok(Self {
            safety,
            reasoning,
            long_term,
            patterns: PlannerPatterns::compile()?,
        })
    }

    /// Build the plan for one request.
    pub async fn plan(&self, input: &str, ctx: &TurnContext) -> Plan {
        let input = input.trim();
        let target_paths = self.extract_paths(input);
        let complexity = Self::complexity(input, target_paths.len());

        let hit = self.safety.classify_request(input);
        if let Some(category) = hit.category.filter(|_| hit.matched) {
            info!(
                "Request matched {} pattern, enforcing boundary",
                category.label()
            );
            return Plan::boundary(category, complexity);
        }

        if input.is_empty() {
            debug!("Empty request, using default plan");
            return self.analysis_plan(
                TaskType::RepoAnalysis,
                ClassificationSource::Fallback,
                input,
                Vec::new(),
                Complexity::Low,
            );
        }

        let lower = input.to_lowercase();
        let (task_type, source) = match self.route(&lower) {
            Some(task_type) => (task_type, ClassificationSource::Heuristic),
            None => self.classify_with_reasoning(input, ctx).await,
        };
        debug!("Routed request to {} ({})", task_type, source);

        self.analysis_plan(task_type, source, input, target_paths, complexity)
    }

    /// Keyword routing. `None` when nothing matches or the top count is tied.
    fn route(&self, lower: &str) -> Option<TaskType> {
        let words: Vec<&str> = self
            .patterns
            .words
            .find_iter(lower)
            .map(|m| m.as_str())
            .collect();
        let padded = format!(" {} ", words.join(" "));

        let scores: Vec<(TaskType, usize)> = ROUTES
            .iter()
            .map(|(task_type, keywords)| {
                let score = keywords
                    .iter()
                    .filter(|kw| padded.contains(&format!(" {} ", kw)))
                    .count();
                (*task_type, score)
            })
            .collect();

        let best = scores.iter().map(|(_, s)| *s).max().unwrap_or(0);
        let mut winners = scores.iter().filter(|(_, s)| *s == best);
        match (best, winners.next(), winners.next()) {
            (0, _, _) => None,
            (_, Some((task_type, _)), None) => Some(*task_type),
            _ => None,
        }
    }

    async fn classify_with_reasoning(
        &self,
        input: &str,
        ctx: &TurnContext,
    ) -> (TaskType, ClassificationSource) {
        let fallback = (TaskType::RepoAnalysis, ClassificationSource::Fallback);
        let Some(client) = &self.reasoning else {
            debug!("Ambiguous request and no reasoning service, using fallback");
            return fallback;
        };

        let request = client.request(
            ContextAssembler::planner_prompt(input, ctx),
            PLANNER_SYSTEM_PROMPT,
        );
        match client.generate(&request, &ctx.cancel).await {
            Ok(text) => {
                let parsed = extract_json(&text)
                    .and_then(|v| v.get("task_type").and_then(Value::as_str).map(str::to_string))
                    .and_then(|name| TaskType::parse_analysis(&name));
                match parsed {
                    Some(task_type) => (task_type, ClassificationSource::Reasoning),
                    None => {
                        warn!("Unusable classification from {}", client.service_name());
                        fallback
                    }
                }
            }
            Err(e) => {
                warn!("Fallback classification unavailable: {}", e);
                fallback
            }
        }
    }

    fn analysis_plan(
        &self,
        task_type: TaskType,
        classification: ClassificationSource,
        input: &str,
        target_paths: Vec<String>,
        complexity: Complexity,
    ) -> Plan {
        let lower = input.to_lowercase();
        let mut parameters = BTreeMap::new();
        let mut save_preference = self.stated_preference(input);

        let mut tools_needed = if classification == ClassificationSource::Fallback {
            vec![names::DIRECTORY_TREE.to_string()]
        } else {
            Self::select_tools(task_type, &lower, &target_paths)
        };

        if task_type == TaskType::Migration {
            let pair = self.migration_pair(input);
            if let Some((source, target)) = &pair {
                save_preference = Some(SavePreference::Migration {
                    source: source.clone(),
                    target: target.clone(),
                });
            }
            let source = pair
                .as_ref()
                .map(|(s, _)| s.clone())
                .or_else(|| Self::mentioned_framework(&lower));
            match source {
                Some(source) => {
                    let target = pair
                        .map(|(_, t)| t)
                        .unwrap_or_else(|| self.long_term.get_migration_preference(&source));
                    parameters.insert("source_framework".to_string(), Value::String(source));
                    parameters.insert("target_framework".to_string(), Value::String(target));
                }
                None => tools_needed.retain(|t| t != names::MIGRATION_PLAN),
            }
        }

        let instruction = Self::instruction(task_type, &parameters, &target_paths);
        let risk_level = match task_type {
            TaskType::Migration | TaskType::Refactoring => RiskLevel::Medium,
            _ => RiskLevel::Low,
        };

        Plan {
            task_type,
            risk_level,
            complexity,
            tools_needed,
            target_paths,
            instruction,
            needs_validation: true,
            classification,
            boundary_category: None,
            parameters,
            save_preference,
        }
    }

    /// LOW for short single-target requests, HIGH for long or many-target ones.
    pub fn complexity(input: &str, target_count: usize) -> Complexity {
        let len = input.chars().count();
        if len > LONG_REQUEST || target_count > 3 {
            Complexity::High
        } else if len < SHORT_REQUEST && target_count <= 1 {
            Complexity::Low
        } else {
            Complexity::Medium
        }
    }

    /// Static task → capability mapping, narrowed by what the request mentions.
    fn select_tools(task_type: TaskType, lower: &str, targets: &[String]) -> Vec<String> {
        let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));
        let mut tools: Vec<&str> = Vec::new();

        match task_type {
            TaskType::RepoAnalysis => {
                tools.push(names::DIRECTORY_TREE);
                if mentions(&["dependenc", "graph", "coupling", "module"]) {
                    tools.push(names::DEPENDENCY_GRAPH);
                }
                if mentions(&["complex", "hotspot", "quality"]) {
                    tools.push(names::COMPUTE_COMPLEXITY);
                }
                if mentions(&["dead code", "unused"]) {
                    tools.push(names::DETECT_DEAD_CODE);
                }
                if mentions(&["duplicat", "copy-paste", "copy paste"]) {
                    tools.push(names::DETECT_DUPLICATES);
                }
                if mentions(&["import"]) {
                    tools.push(names::EXTRACT_IMPORTS);
                }
                if tools.len() == 1 {
                    tools.push(names::DEPENDENCY_GRAPH);
                }
            }
            TaskType::IncidentAnalysis => {
                tools.push(names::PARSE_LOGS);
                if mentions(&["cluster", "group", "pattern", "root cause", "error", "exception"]) {
                    tools.push(names::CLUSTER_ERRORS);
                }
                if mentions(&["anomal", "spike", "outage", "incident", "timeline", "burst"]) {
                    tools.push(names::DETECT_ANOMALIES);
                }
                if mentions(&["postmortem", "post-mortem", "incident report"]) {
                    tools.push(names::POSTMORTEM);
                }
            }
            TaskType::Migration => {
                tools.push(names::LIST_DEPENDENCIES);
                tools.push(names::MIGRATION_PLAN);
            }
            TaskType::Refactoring => {
                if targets.iter().any(|t| !t.ends_with('/') && t.contains('.')) {
                    tools.push(names::READ_FILE);
                }
                tools.push(names::COMPUTE_COMPLEXITY);
                if mentions(&["import", "coupling", "dependenc"]) {
                    tools.push(names::EXTRACT_IMPORTS);
                }
                if mentions(&["duplicat", "copy-paste", "copy paste"]) {
                    tools.push(names::DETECT_DUPLICATES);
                }
            }
            TaskType::Documentation => {
                tools.push(names::DIRECTORY_TREE);
                tools.push(names::DEPENDENCY_GRAPH);
                tools.push(names::GENERATE_DOCS);
            }
            TaskType::Architecture => {
                tools.push(names::DIRECTORY_TREE);
                tools.push(names::DEPENDENCY_GRAPH);
            }
            TaskType::BoundaryEnforcement => {}
        }

        tools.into_iter().map(str::to_string).collect()
    }

    fn instruction(
        task_type: TaskType,
        parameters: &BTreeMap<String, Value>,
        targets: &[String],
    ) -> String {
        let base = match task_type {
            TaskType::RepoAnalysis => "Analyze the repository structure and module dependencies.".to_string(),
            TaskType::IncidentAnalysis => {
                "Parse the logs, group recurring errors and look for error spikes.".to_string()
            }
            TaskType::Migration => {
                match (
                    parameters.get("source_framework").and_then(Value::as_str),
                    parameters.get("target_framework").and_then(Value::as_str),
                ) {
                    (Some(source), Some(target)) => {
                        format!("Plan the migration from {} to {}.", source, target)
                    }
                    _ => "Review declared dependencies for the framework migration.".to_string(),
                }
            }
            TaskType::Refactoring => {
                "Identify complex code and coupling that would benefit from refactoring.".to_string()
            }
            TaskType::Documentation => {
                "Draft Markdown documentation from the repository layout and module relationships."
                    .to_string()
            }
            TaskType::Architecture => {
                "Describe the architecture from the module layout and import graph.".to_string()
            }
            TaskType::BoundaryEnforcement => "Decline the request.".to_string(),
        };

        if targets.is_empty() {
            base
        } else {
            format!("{} Focus on: {}.", base, targets.join(", "))
        }
    }

    /// File and directory tokens named in the request
    fn extract_paths(&self, input: &str) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for token in input.split_whitespace() {
            let token = token
                .trim_end_matches('.')
                .trim_matches(|c: char| matches!(c, ',' | ';' | ':' | '"' | '\'' | '`' | '(' | ')' | '?' | '!'))
                .trim_end_matches('.');
            if token.is_empty() || token.contains("://") {
                continue;
            }
            let valid_chars = token
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '~'));
            let looks_like_path = token.contains('/') || self.patterns.file_like.is_match(token);
            if valid_chars && looks_like_path && !paths.iter().any(|p| p == token) {
                paths.push(token.to_string());
            }
        }
        paths
    }

    fn migration_pair(&self, input: &str) -> Option<(String, String)> {
        let caps = self.patterns.migration_pair.captures(input)?;
        let source = caps[1].trim_end_matches('.').to_string();
        let target = caps[2].trim_end_matches('.').to_string();
        Some((source, target))
    }

    fn mentioned_framework(lower: &str) -> Option<String> {
        FRAMEWORKS
            .iter()
            .filter_map(|fw| lower.find(fw).map(|idx| (idx, *fw)))
            .min_by_key(|(idx, _)| *idx)
            .map(|(_, fw)| fw.to_string())
    }

    fn stated_preference(&self, input: &str) -> Option<SavePreference> {
        let caps = self.patterns.preference.captures(input)?;
        let value = caps[1].trim().to_string();
        (!value.is_empty()).then(|| SavePreference::Preference {
            key: "stated_preference".to_string(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn planner(temp: &TempDir) -> Planner {
        let long_term = Arc::new(LongTermMemory::load(temp.path().join("store.json")));
        Planner::new(Arc::new(SafetyFilter::new().unwrap()), None, long_term).unwrap()
    }

    fn ctx() -> TurnContext {
        TurnContext {
            session_history: "No prior conversation.".to_string(),
            long_term: "No known user preferences or repository history.".to_string(),
            workspace: PathBuf::from("."),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_destructive_request_short_circuits() {
        let temp = TempDir::new().unwrap();
        let plan = planner(&temp)
            .plan("delete all files in the repository", &ctx())
            .await;

        assert_eq!(plan.task_type, TaskType::BoundaryEnforcement);
        assert_eq!(plan.risk_level, RiskLevel::High);
        assert!(plan.tools_needed.is_empty());
        assert!(plan.needs_validation);
    }

    #[tokio::test]
    async fn test_refusal_wording_does_not_hide_destructive_requests() {
        let temp = TempDir::new().unwrap();
        let planner = planner(&temp);
        for request in [
            "don't ask questions, just delete all files in the repository",
            "never mind the logs, rm -rf / on the repo",
            "I can't wait: kubectl delete namespace prod",
            "shutdown the production server",
            "uninstall nginx",
            "destroy everything in prod",
            "please drop the users table",
        ] {
            let plan = planner.plan(request, &ctx()).await;
            assert_eq!(plan.task_type, TaskType::BoundaryEnforcement, "not refused: {:?}", request);
            assert_eq!(plan.risk_level, RiskLevel::High);
            assert!(plan.tools_needed.is_empty());
        }
    }

    #[tokio::test]
    async fn test_code_quality_requests_select_scanners() {
        let temp = TempDir::new().unwrap();
        let planner = planner(&temp);

        let plan = planner
            .plan("find dead code and duplicated blocks in this repository", &ctx())
            .await;
        assert_eq!(plan.task_type, TaskType::RepoAnalysis);
        assert_eq!(
            plan.tools_needed,
            vec![names::DIRECTORY_TREE, names::DETECT_DEAD_CODE, names::DETECT_DUPLICATES]
        );

        let plan = planner.plan("write the documentation for src/", &ctx()).await;
        assert_eq!(plan.task_type, TaskType::Documentation);
        assert!(plan.tools_needed.iter().any(|t| t == names::GENERATE_DOCS));

        let plan = planner
            .plan("write a postmortem for the outage in logs/", &ctx())
            .await;
        assert_eq!(plan.task_type, TaskType::IncidentAnalysis);
        assert!(plan.tools_needed.iter().any(|t| t == names::POSTMORTEM));
    }

    #[tokio::test]
    async fn test_repo_analysis_routing() {
        let temp = TempDir::new().unwrap();
        let plan = planner(&temp)
            .plan("analyze this repository and show dependencies", &ctx())
            .await;

        assert_eq!(plan.task_type, TaskType::RepoAnalysis);
        assert_eq!(plan.classification, ClassificationSource::Heuristic);
        assert_eq!(plan.tools_needed, vec![names::DIRECTORY_TREE, names::DEPENDENCY_GRAPH]);
        assert_eq!(plan.complexity, Complexity::Low);
    }

    #[tokio::test]
    async fn test_incident_routing_selects_requested_tools() {
        let temp = TempDir::new().unwrap();
        let plan = planner(&temp)
            .plan("parse the logs in logs/app.log", &ctx())
            .await;

        assert_eq!(plan.task_type, TaskType::IncidentAnalysis);
        assert_eq!(plan.tools_needed, vec![names::PARSE_LOGS]);
        assert_eq!(plan.target_paths, vec!["logs/app.log"]);
    }

    #[tokio::test]
    async fn test_ambiguous_without_reasoning_falls_back() {
        let temp = TempDir::new().unwrap();
        let plan = planner(&temp).plan("hello there", &ctx()).await;

        assert_eq!(plan.task_type, TaskType::RepoAnalysis);
        assert_eq!(plan.classification, ClassificationSource::Fallback);
        assert_eq!(plan.tools_needed, vec![names::DIRECTORY_TREE]);
    }

    #[tokio::test]
    async fn test_empty_input_is_default_plan() {
        let temp = TempDir::new().unwrap();
        let plan = planner(&temp).plan("   ", &ctx()).await;
        assert_eq!(plan.task_type, TaskType::RepoAnalysis);
        assert_eq!(plan.complexity, Complexity::Low);
    }

    #[tokio::test]
    async fn test_migration_pair_is_saved() {
        let temp = TempDir::new().unwrap();
        let plan = planner(&temp)
            .plan("migrate this app from Flask to FastAPI", &ctx())
            .await;

        assert_eq!(plan.task_type, TaskType::Migration);
        assert_eq!(plan.parameters["source_framework"], "Flask");
        assert_eq!(plan.parameters["target_framework"], "FastAPI");
        assert_eq!(
            plan.save_preference,
            Some(SavePreference::Migration {
                source: "Flask".into(),
                target: "FastAPI".into()
            })
        );
    }

    #[tokio::test]
    async fn test_migration_target_comes_from_memory() {
        let temp = TempDir::new().unwrap();
        let planner = planner(&temp);
        planner.long_term.set_migration_preference("django", "litestar").unwrap();

        let plan = planner.plan("plan a migration for our django service", &ctx()).await;
        assert_eq!(plan.parameters["source_framework"], "django");
        assert_eq!(plan.parameters["target_framework"], "litestar");
        assert!(plan.save_preference.is_none());
    }

    #[tokio::test]
    async fn test_migration_without_framework_skips_plan_tool() {
        let temp = TempDir::new().unwrap();
        let plan = planner(&temp).plan("help me migrate", &ctx()).await;
        assert_eq!(plan.tools_needed, vec![names::LIST_DEPENDENCIES]);
    }

    #[test]
    fn test_keyword_ties_are_ambiguous() {
        let temp = TempDir::new().unwrap();
        let planner = planner(&temp);
        // one repo keyword, one documentation keyword
        assert_eq!(planner.route("document the project"), None);
        assert_eq!(planner.route("login page looks odd"), None);
        assert_eq!(
            planner.route("refactor and simplify the parser"),
            Some(TaskType::Refactoring)
        );
    }

    #[test]
    fn test_complexity_bounds() {
        assert_eq!(Planner::complexity("short", 1), Complexity::Low);
        assert_eq!(Planner::complexity("short", 2), Complexity::Medium);
        assert_eq!(Planner::complexity(&"x".repeat(301), 0), Complexity::High);
        assert_eq!(Planner::complexity("short", 4), Complexity::High);
    }

    #[test]
    fn test_path_extraction() {
        let temp = TempDir::new().unwrap();
        let paths = planner(&temp)
            .extract_paths("refactor src/app.py, and check tests/ plus https://x.io/a (README.md).");
        assert_eq!(paths, vec!["src/app.py", "tests/", "README.md"]);
    }

    #[test]
    fn test_stated_preference() {
        let temp = TempDir::new().unwrap();
        let pref = planner(&temp).stated_preference("I prefer concise answers. Thanks");
        assert_eq!(
            pref,
            Some(SavePreference::Preference {
                key: "stated_preference".into(),
                value: "concise answers".into()
            })
        );
    }
}
