//! Conductor Worker
//!
//! Executes a [`Plan`] through the [`ToolRegistry`] and drafts the response.
//! Only capabilities declaring themselves read-only are ever invoked; that
//! check happens here regardless of what the safety filter decided upstream.
//! Drafting is deterministic and local.

use crate::conductor::types::{ArtifactEntry, Plan, TaskType, TurnContext, WorkerResult};
use crate::config::WorkerConfig;
use crate::safety::SafetyCategory;
use crate::tools::{names, ToolRegistry};
use futures::stream::{self, StreamExt};
use sdk::errors::EngineError;
use sdk::{ToolError, ToolInput};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Average complexity above which the refactoring draft suggests splitting functions
const COMPLEXITY_ADVICE: f64 = 10.0;

/// Imports in one file above which the refactoring draft flags coupling
const IMPORT_ADVICE: usize = 20;

/// Prefix of every boundary refusal draft
pub fn boundary_draft(category: SafetyCategory) -> String {
    format!(
        "I cannot help with that request: it asks for a {} operation.\n\n{}",
        category.description(),
        crate::conductor::evaluator::REFUSAL_TEMPLATE
    )
}

struct Invocation {
    name: String,
    entry: ArtifactEntry,
    invoked: bool,
}

pub struct Worker {
    registry: Arc<ToolRegistry>,
    max_concurrency: usize,
    tool_timeout: Duration,
}

impl Worker {
    pub fn new(registry: Arc<ToolRegistry>, config: &WorkerConfig) -> Self {
        Self {
            registry,
            max_concurrency: config.max_concurrency.max(1),
            tool_timeout: Duration::from_secs(config.tool_timeout_secs.max(1)),
        }
    }

    /// Invoke every planned capability and draft the response.
    ///
    /// A failing capability becomes an error artifact; it never aborts the turn.
    pub async fn execute(&self, plan: &Plan, ctx: &TurnContext) -> WorkerResult {
        let params: std::collections::HashMap<String, Value> = plan
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let base_input = ToolInput {
            workspace: ctx.workspace.clone(),
            target_paths: plan.target_paths.clone(),
            params,
        };

        let invocations: Vec<Invocation> = stream::iter(plan.tools_needed.iter().cloned())
            .map(|name| self.invoke_one(name, base_input.clone(), &ctx.cancel))
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut tools_used = Vec::new();
        let mut artifacts = BTreeMap::new();
        for invocation in invocations {
            if invocation.invoked {
                tools_used.push(invocation.name.clone());
            }
            artifacts.insert(invocation.name, invocation.entry);
        }

        let draft_response = draft(plan, &tools_used, &artifacts);
        WorkerResult {
            draft_response,
            tools_used,
            artifacts,
        }
    }

    async fn invoke_one(&self, name: String, input: ToolInput, cancel: &CancellationToken) -> Invocation {
        let refuse = |message: String| {
            warn!("{}", message);
            Invocation {
                name: name.clone(),
                entry: ArtifactEntry::Error { message },
                invoked: false,
            }
        };

        let Some(capability) = self.registry.get(&name) else {
            return refuse(EngineError::CapabilityNotFound(name.clone()).to_string());
        };
        if !capability.read_only() {
            return refuse(EngineError::CapabilityNotReadOnly(name.clone()).to_string());
        }

        debug!("Invoking capability '{}'", name);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled),
            outcome = tokio::time::timeout(self.tool_timeout, capability.invoke(input)) => {
                outcome.unwrap_or(Err(ToolError::Timeout(self.tool_timeout.as_secs())))
            }
        };

        let entry = match result {
            Ok(output) => ArtifactEntry::Ok { data: output.data },
            Err(e) => {
                warn!("Capability '{}' failed: {}", name, e);
                ArtifactEntry::Error {
                    message: e.to_string(),
                }
            }
        };

        Invocation {
            name,
            entry,
            invoked: true,
        }
    }
}

fn next_steps(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::RepoAnalysis => {
            "Ask for a closer look at a hotspot or a module to get a focused review."
        }
        TaskType::IncidentAnalysis => {
            "Share the surrounding log window or the affected service to narrow down the root cause."
        }
        TaskType::Migration => {
            "Start with the lowest-risk module and review each step as a text diff before applying it yourself."
        }
        TaskType::Refactoring => {
            "Request a text diff for a specific function to review the proposed change."
        }
        TaskType::Documentation => {
            "Ask for a README section or a module overview drafted from these results."
        }
        TaskType::Architecture => {
            "Ask about a specific module to see its incoming and outgoing dependencies."
        }
        TaskType::BoundaryEnforcement => "",
    }
}

fn draft(plan: &Plan, tools_used: &[String], artifacts: &BTreeMap<String, ArtifactEntry>) -> String {
    let mut out = format!("# {}\n\n{}\n\n## Analysis Results\n", plan.task_type.heading(), plan.instruction);

    let mut failures = Vec::new();
    for name in &plan.tools_needed {
        match artifacts.get(name) {
            Some(ArtifactEntry::Ok { data }) => {
                out.push_str(&format!("\n### {}\n{}\n", name, summarize(name, data)));
            }
            Some(ArtifactEntry::Error { message }) => failures.push(format!("- `{}`: {}", name, message)),
            None => {}
        }
    }

    if tools_used.is_empty() && failures.is_empty() {
        out.push_str("\nNo analysis capabilities were run for this request.\n");
    }

    if plan.task_type == TaskType::Refactoring {
        let suggestions = refactor_suggestions(artifacts);
        if !suggestions.is_empty() {
            out.push_str(&format!(
                "\n## Suggestions\n{}\n",
                suggestions.iter().map(|s| format!("- {}", s)).collect::<Vec<_>>().join("\n")
            ));
        }
    }

    if !failures.is_empty() {
        out.push_str(&format!(
            "\n## Notes\nSome capabilities did not complete, so these results are partial:\n{}\n",
            failures.join("\n")
        ));
    }

    out.push_str(&format!("\n## Next Steps\n{}", next_steps(plan.task_type)));
    out
}

fn count(data: &Value, key: &str) -> u64 {
    data.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// `name (n)` pairs from a list of objects
fn ranked(items: Option<&Value>, label: &str, value: &str, limit: usize) -> String {
    items
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .take(limit)
                .filter_map(|item| {
                    let name = item.get(label)?.as_str()?;
                    let n = item.get(value)?.as_u64()?;
                    Some(format!("`{}` ({})", name, n))
                })
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

/// `key (n)` pairs from a count map, largest first
fn top_counts(map: Option<&Value>, limit: usize) -> String {
    let Some(map) = map.and_then(Value::as_object) else {
        return String::new();
    };
    let mut pairs: Vec<(&String, u64)> = map
        .iter()
        .filter_map(|(k, v)| v.as_u64().map(|n| (k, n)))
        .collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    pairs
        .into_iter()
        .take(limit)
        .map(|(k, n)| format!("{} ({})", k, n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn truncated_note(data: &Value) -> &'static str {
    if data.get("truncated").and_then(Value::as_bool).unwrap_or(false) {
        " The scan hit its file limit, so counts are partial."
    } else {
        ""
    }
}

fn bullet_list(items: Option<&Value>) -> String {
    items
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(|s| format!("- {}", s))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

/// One prose paragraph per successful capability.
fn summarize(name: &str, data: &Value) -> String {
    match name {
        names::DIRECTORY_TREE => format!(
            "{} files across {} directories. Most common extensions: {}.{}",
            count(data, "file_count"),
            count(data, "dir_count"),
            top_counts(data.get("extensions"), 5),
            truncated_note(data)
        ),
        names::READ_FILE => format!(
            "`{}`: {} lines, {} bytes.{}",
            data.get("path").and_then(Value::as_str).unwrap_or_default(),
            count(data, "lines"),
            count(data, "size"),
            if data.get("truncated").and_then(Value::as_bool).unwrap_or(false) {
                " Only the beginning of the file was read."
            } else {
                ""
            }
        ),
        names::EXTRACT_IMPORTS => format!(
            "{} imports across {} source files.{}",
            count(data, "import_count"),
            count(data, "file_count"),
            truncated_note(data)
        ),
        names::DEPENDENCY_GRAPH => {
            let mut text = format!(
                "{} modules with {} internal import edges and {} external packages.",
                count(data, "node_count"),
                count(data, "edge_count"),
                data.get("external").and_then(Value::as_object).map(|m| m.len()).unwrap_or(0)
            );
            let top = ranked(data.get("most_imported"), "module", "count", 5);
            if !top.is_empty() {
                text.push_str(&format!(" Most imported: {}.", top));
            }
            text.push_str(truncated_note(data));
            text
        }
        names::COMPUTE_COMPLEXITY => {
            let mut text = format!(
                "Average complexity {} across {} files (max {}).",
                data.get("average_complexity").and_then(Value::as_f64).unwrap_or(0.0),
                count(data, "file_count"),
                count(data, "max_complexity")
            );
            let hotspots = ranked(data.get("hotspots"), "path", "complexity", 5);
            if !hotspots.is_empty() {
                text.push_str(&format!(" Hotspots: {}.", hotspots));
            }
            text
        }
        names::LIST_DEPENDENCIES => {
            let manifests = data.get("manifests").and_then(Value::as_array).map(|m| m.len()).unwrap_or(0);
            let mut text = format!(
                "{} declared dependencies in {} manifests.",
                count(data, "total_dependencies"),
                manifests
            );
            if let Some(suggestions) = data.get("suggestions").and_then(Value::as_array) {
                for s in suggestions {
                    if let (Some(package), Some(advice)) = (
                        s.get("package").and_then(Value::as_str),
                        s.get("suggestion").and_then(Value::as_str),
                    ) {
                        text.push_str(&format!("\n- `{}`: {}", package, advice));
                    }
                }
            }
            text
        }
        names::PARSE_LOGS => format!(
            "{} lines from {} log files: {} errors, {} warnings.",
            count(data, "total_lines"),
            data.get("files").and_then(Value::as_array).map(|f| f.len()).unwrap_or(0),
            count(data, "error_count"),
            count(data, "warning_count")
        ),
        names::CLUSTER_ERRORS => {
            let mut text = format!(
                "{} errors in {} patterns.",
                count(data, "total_errors"),
                count(data, "unique_patterns")
            );
            let clusters = top_counts(data.get("clusters"), 5);
            if !clusters.is_empty() {
                text.push_str(&format!(" Largest clusters: {}.", clusters));
            }
            text
        }
        names::DETECT_ANOMALIES => {
            let spikes = top_counts(data.get("spikes"), 5);
            if spikes.is_empty() {
                "No error spikes detected.".to_string()
            } else {
                format!("Error spikes (errors per minute): {}.", spikes)
            }
        }
        names::MIGRATION_PLAN => format!(
            "{} (compatibility: {}, effort: {}).\n\nSteps:\n{}\n\nBreaking changes:\n{}",
            data.get("plan").and_then(Value::as_str).unwrap_or_default(),
            data.get("compatibility").and_then(Value::as_str).unwrap_or("unknown"),
            data.get("estimated_effort").and_then(Value::as_str).unwrap_or("unknown"),
            bullet_list(data.get("steps")),
            bullet_list(data.get("breaking_changes"))
        ),
        names::DETECT_DEAD_CODE => {
            let mut text = format!(
                "{} of {} functions and {} of {} imports look unused.{}",
                count(data, "unused_function_count"),
                count(data, "total_functions"),
                count(data, "unused_import_count"),
                count(data, "total_imports"),
                truncated_note(data)
            );
            for (key, label) in [("unused_functions", "function"), ("unused_imports", "import")] {
                for item in data.get(key).and_then(Value::as_array).into_iter().flatten().take(5) {
                    if let (Some(name), Some(path)) = (
                        item.get("name").and_then(Value::as_str),
                        item.get("path").and_then(Value::as_str),
                    ) {
                        text.push_str(&format!("\n- {} `{}` in `{}`:{}", label, name, path, count(item, "line")));
                    }
                }
            }
            text
        }
        names::DETECT_DUPLICATES => {
            let mut text = format!(
                "{} file pairs share blocks of {} or more lines, across {} files.",
                count(data, "total_duplicates"),
                count(data, "min_lines"),
                count(data, "files_analyzed")
            );
            for pair in data.get("duplicates").and_then(Value::as_array).into_iter().flatten().take(5) {
                if let (Some(a), Some(b)) = (
                    pair.get("file1").and_then(Value::as_str),
                    pair.get("file2").and_then(Value::as_str),
                ) {
                    text.push_str(&format!(
                        "\n- `{}` and `{}`: {} duplicated lines",
                        a,
                        b,
                        count(pair, "duplicated_lines")
                    ));
                }
            }
            text
        }
        names::GENERATE_DOCS | names::POSTMORTEM => data
            .get("content")
            .and_then(Value::as_str)
            .map(nested_markdown)
            .unwrap_or_default(),
        _ => "Completed.".to_string(),
    }
}

/// Push a capability's Markdown headings below the draft's own sections.
fn nested_markdown(content: &str) -> String {
    let mut in_fence = false;
    content
        .lines()
        .map(|line| {
            if line.starts_with("```") {
                in_fence = !in_fence;
            }
            if !in_fence && line.starts_with('#') {
                format!("###{}", line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Refactoring advice from the complexity and import artifacts
fn refactor_suggestions(artifacts: &BTreeMap<String, ArtifactEntry>) -> Vec<String> {
    let data_of = |name: &str| match artifacts.get(name) {
        Some(ArtifactEntry::Ok { data }) => Some(data),
        _ => None,
    };

    let mut suggestions = Vec::new();
    if let Some(data) = data_of(names::COMPUTE_COMPLEXITY) {
        let average = data.get("average_complexity").and_then(Value::as_f64).unwrap_or(0.0);
        if average > COMPLEXITY_ADVICE {
            suggestions.push(format!(
                "Average complexity is {}. Consider breaking large functions into smaller units, starting with the hotspots.",
                average
            ));
        }
    }
    if let Some(files) = data_of(names::EXTRACT_IMPORTS)
        .and_then(|d| d.get("files"))
        .and_then(Value::as_object)
    {
        for (path, file) in files {
            let imports = file.get("imports").and_then(Value::as_array).map(Vec::len).unwrap_or(0);
            if imports > IMPORT_ADVICE {
                suggestions.push(format!(
                    "`{}` has {} imports. Consider reducing them, as this can indicate tight coupling.",
                    path, imports
                ));
            }
        }
    }
    if data_of(names::DETECT_DUPLICATES).is_some_and(|d| count(d, "total_duplicates") > 0) {
        suggestions.push("Extract the duplicated blocks into shared helpers.".to_string());
    }
    suggestions
}
