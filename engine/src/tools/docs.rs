//! Markdown documentation drafted from the repository layout.
//!
//! The output is text returned to the user. Nothing is written to disk.

use super::code::{build_graph, patterns, scan_sources, SourceScan};
use super::{guard_for, names, run_blocking, scan_roots, walk_files, ScanSettings};
use async_trait::async_trait;
use sdk::{Capability, ToolError, ToolInput, ToolOutput};
use serde_json::{json, Value};

const TREE_LIMIT: usize = 200;
const MODULE_LIMIT: usize = 50;
const EDGE_LIMIT: usize = 50;

/// Indented tree of sorted relative paths, directories suffixed with `/`.
fn render_tree(paths: &[String]) -> String {
    let mut out = String::new();
    let mut open: Vec<&str> = Vec::new();
    for path in paths {
        let parts: Vec<&str> = path.split('/').collect();
        let (file, dirs) = match parts.split_last() {
            Some(split) => split,
            None => continue,
        };
        let shared = open.iter().zip(dirs).take_while(|(a, b)| a == b).count();
        for (depth, dir) in dirs.iter().enumerate().skip(shared) {
            out.push_str(&format!("{}{}/\n", "  ".repeat(depth), dir));
        }
        out.push_str(&format!("{}{}\n", "  ".repeat(dirs.len()), file));
        open = dirs.to_vec();
    }
    out
}

fn modules_section(scan: &SourceScan) -> String {
    let mut out = String::new();
    for file in scan.files.iter().take(MODULE_LIMIT) {
        out.push_str(&format!(
            "- `{}` ({}, {} lines)\n",
            file.rel,
            file.language.label(),
            file.content.lines().count()
        ));
    }
    if scan.files.len() > MODULE_LIMIT {
        out.push_str(&format!("- ... and {} more\n", scan.files.len() - MODULE_LIMIT));
    }
    out
}

fn dependencies_section(graph: &Value) -> String {
    let edges: Vec<String> = graph["edges"]
        .as_array()
        .map(|edges| {
            edges
                .iter()
                .take(EDGE_LIMIT)
                .filter_map(|e| Some(format!("- `{}` → `{}`", e["from"].as_str()?, e["to"].as_str()?)))
                .collect()
        })
        .unwrap_or_default();
    let external: Vec<String> = graph["external"]
        .as_object()
        .map(|m| m.keys().map(|k| format!("`{}`", k)).collect())
        .unwrap_or_default();

    let mut out = String::new();
    if edges.is_empty() {
        out.push_str("No internal imports were found.\n");
    } else {
        out.push_str(&edges.join("\n"));
        out.push('\n');
    }
    if !external.is_empty() {
        out.push_str(&format!("\nExternal packages: {}\n", external.join(", ")));
    }
    out
}

/// Repository documentation skeleton: layout, modules, internal imports
pub struct GenerateDocs {
    settings: ScanSettings,
}

impl GenerateDocs {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Capability for GenerateDocs {
    fn name(&self) -> &str {
        names::GENERATE_DOCS
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Markdown overview of the repository layout, modules and imports"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "default": "Repository Documentation" }
            }
        })
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let max_files = self.settings.max_files;
        run_blocking(move || {
            let patterns = patterns()?;
            let guard = guard_for(&input)?;
            let roots = scan_roots(&guard, &input)?;
            let (paths, tree_truncated) =
                walk_files(&guard, &roots, max_files.min(TREE_LIMIT), |_| true);
            let rel: Vec<String> = paths.iter().map(|p| guard.display_relative(p)).collect();

            let scan = scan_sources(&input, max_files)?;
            let graph = build_graph(patterns, &scan);

            let title = input
                .param_str_opt("title")
                .unwrap_or_else(|| "Repository Documentation".to_string());
            let sections = ["Directory Structure", "Modules", "Module Dependencies"];
            let mut content = format!("# {}\n\n", title);
            content.push_str(&format!("## {}\n\n```\n{}```\n", sections[0], render_tree(&rel)));
            if tree_truncated {
                content.push_str(&format!("\nOnly the first {} files are shown.\n", rel.len()));
            }
            content.push_str(&format!("\n## {}\n\n{}", sections[1], modules_section(&scan)));
            content.push_str(&format!("\n## {}\n\n{}", sections[2], dependencies_section(&graph)));

            Ok(ToolOutput::json(json!({
                "length": content.chars().count(),
                "content": content,
                "sections": sections,
                "module_count": scan.files.len(),
                "truncated": tree_truncated || scan.truncated,
            })))
        })
        .await
    }
}
