//! Source-level capabilities: imports, module graph, complexity, declared
//! dependencies.
//!
//! All of them are pattern based. Nothing is compiled, imported or executed,
//! so results are estimates over Rust, Python and JavaScript/TypeScript files.

use super::{
    extension, guard_for, names, read_text, run_blocking, scan_roots, walk_files, ScanSettings,
};
use crate::fs_guard::FileSystemGuard;
use async_trait::async_trait;
use regex::Regex;
use sdk::{Capability, ToolError, ToolInput, ToolOutput};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Bytes of a source file considered
const SOURCE_CAP: usize = 512 * 1024;

const MOST_IMPORTED_LIMIT: usize = 10;
const HOTSPOT_LIMIT: usize = 5;

const MANIFESTS: &[&str] = &["Cargo.toml", "requirements.txt", "package.json"];

/// Known replacement advice for Python packages
const PACKAGE_ADVICE: &[(&str, &str)] = &[
    ("flask", "Consider FastAPI for async support"),
    ("django", "Check Django version compatibility"),
    ("requests", "Consider httpx for async"),
    ("urllib2", "Use urllib3 or requests (Python 2 -> 3)"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum Language {
    Rust,
    Python,
    JavaScript,
}

impl Language {
    fn of(path: &Path) -> Option<Self> {
        match extension(path)?.as_str() {
            "rs" => Some(Language::Rust),
            "py" => Some(Language::Python),
            "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" => Some(Language::JavaScript),
            _ => None,
        }
    }

    pub(super) fn label(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }
}

pub(super) struct CodePatterns {
    rust_use: Regex,
    rust_mod: Regex,
    python_import: Regex,
    python_from: Regex,
    js_import: Regex,
    js_require: Regex,
    decision: Regex,
    pub(super) function: Regex,
    pub(super) identifier: Regex,
    pub(super) rust_binding: Regex,
    pub(super) python_binding: Regex,
    requirement: Regex,
}

impl CodePatterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            rust_use: Regex::new(
                r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+((?:::)?[A-Za-z_]\w*(?:::[A-Za-z_]\w*)*)",
            )?,
            rust_mod: Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+([A-Za-z_]\w*)\s*;")?,
            python_import: Regex::new(r"(?m)^\s*import\s+([^\n#]+)")?,
            python_from: Regex::new(r"(?m)^\s*from\s+(\.*[\w.]*)\s+import\b")?,
            js_import: Regex::new(
                r#"(?m)^\s*(?:import|export)\s+(?:[\w*{}\s,$]+\s+from\s+)?['"]([^'"]+)['"]"#,
            )?,
            js_require: Regex::new(r#"\b(?:require|import)\(\s*['"]([^'"]+)['"]\s*\)"#)?,
            decision: Regex::new(
                r"\b(if|elif|for|while|case|catch|except|match|loop|and|or)\b|&&|\|\|",
            )?,
            function: Regex::new(
                r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:export\s+)?(?:async\s+)?(?:fn|def|function)\s+([A-Za-z_]\w*)",
            )?,
            identifier: Regex::new(r"[A-Za-z_]\w*")?,
            rust_binding: Regex::new(
                r"(?m)^\s*use\s+(?:::)?[A-Za-z_]\w*(?:::[A-Za-z_]\w*)*::([A-Za-z_]\w*)(?:\s+as\s+([A-Za-z_]\w*))?\s*;",
            )?,
            python_binding: Regex::new(
                r"(?m)^[ \t]*(?:from\s+\.*[\w.]*\s+import\s+([^\n#()]+)|import\s+([^\n#]+))",
            )?,
            requirement: Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)(\[[^\]]*\])?\s*(.*)$")?,
        })
    }
}

pub(super) fn patterns() -> Result<&'static CodePatterns, ToolError> {
    static PATTERNS: OnceLock<Result<CodePatterns, String>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| CodePatterns::compile().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| ToolError::Failed(format!("pattern compilation failed: {}", e)))
}

/// A readable source file inside the scan
pub(super) struct SourceFile {
    pub(super) rel: String,
    pub(super) language: Language,
    pub(super) content: String,
}

pub(super) struct SourceScan {
    pub(super) files: Vec<SourceFile>,
    pub(super) truncated: bool,
}

pub(super) fn scan_sources(input: &ToolInput, max_files: usize) -> Result<SourceScan, ToolError> {
    let guard = guard_for(input)?;
    let roots = scan_roots(&guard, input)?;
    let (paths, truncated) = walk_files(&guard, &roots, max_files, |p| Language::of(p).is_some());

    let files = paths
        .into_iter()
        .filter_map(|path| {
            let language = Language::of(&path)?;
            let (content, _) = read_text(&path, SOURCE_CAP).ok()?;
            Some(SourceFile {
                rel: guard.display_relative(&path),
                language,
                content,
            })
        })
        .collect();

    Ok(SourceScan { files, truncated })
}

fn push_unique(list: &mut Vec<String>, item: String) {
    if !item.is_empty() && !list.contains(&item) {
        list.push(item);
    }
}

/// Imported module paths, first occurrence wins.
fn imports_of(patterns: &CodePatterns, language: Language, content: &str) -> Vec<String> {
    let mut imports = Vec::new();
    match language {
        Language::Rust => {
            for caps in patterns.rust_use.captures_iter(content) {
                push_unique(&mut imports, caps[1].trim_start_matches("::").to_string());
            }
            for caps in patterns.rust_mod.captures_iter(content) {
                push_unique(&mut imports, format!("self::{}", &caps[1]));
            }
        }
        Language::Python => {
            for caps in patterns.python_import.captures_iter(content) {
                for part in caps[1].split(',') {
                    if let Some(module) = part.split_whitespace().next() {
                        push_unique(&mut imports, module.to_string());
                    }
                }
            }
            for caps in patterns.python_from.captures_iter(content) {
                push_unique(&mut imports, caps[1].to_string());
            }
        }
        Language::JavaScript => {
            for caps in patterns.js_import.captures_iter(content) {
                push_unique(&mut imports, caps[1].to_string());
            }
            for caps in patterns.js_require.captures_iter(content) {
                push_unique(&mut imports, caps[1].to_string());
            }
        }
    }
    imports
}

/// Per-file import listing
pub struct ExtractImports {
    settings: ScanSettings,
}

impl ExtractImports {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Capability for ExtractImports {
    fn name(&self) -> &str {
        names::EXTRACT_IMPORTS
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Imports declared by Rust, Python and JavaScript/TypeScript sources"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let max_files = self.settings.max_files;
        run_blocking(move || {
            let patterns = patterns()?;
            let scan = scan_sources(&input, max_files)?;

            let mut files = BTreeMap::new();
            let mut import_count = 0;
            for file in &scan.files {
                let imports = imports_of(patterns, file.language, &file.content);
                import_count += imports.len();
                files.insert(
                    file.rel.clone(),
                    json!({ "language": file.language.label(), "imports": imports }),
                );
            }

            Ok(ToolOutput::json(json!({
                "files": files,
                "file_count": scan.files.len(),
                "import_count": import_count,
                "truncated": scan.truncated,
            })))
        })
        .await
    }
}

/// Module key a file is addressed by from other files of its language
pub(super) fn module_key(language: Language, rel: &str) -> String {
    match language {
        Language::Python => {
            let stem = rel.trim_end_matches(".py").replace('/', ".");
            match stem.strip_suffix(".__init__") {
                Some(package) => package.to_string(),
                None => stem,
            }
        }
        Language::Rust => {
            let stem = rel.trim_end_matches(".rs");
            let inner = match stem.rfind("src/") {
                Some(idx) => &stem[idx + 4..],
                None => stem,
            };
            let inner = inner.strip_suffix("/mod").unwrap_or(inner);
            match inner {
                "lib" | "main" => "crate".to_string(),
                other => other.replace('/', "::"),
            }
        }
        Language::JavaScript => {
            let stem = match rel.rfind('.') {
                Some(idx) if !rel[idx..].contains('/') => &rel[..idx],
                _ => rel,
            };
            stem.strip_suffix("/index").unwrap_or(stem).to_string()
        }
    }
}

enum ImportTarget {
    Internal(String),
    External(String),
    Unresolved,
}

/// Longest dotted prefix of `segments` matching a node, by exact or suffix match.
fn match_prefixes(segments: &[&str], sep: &str, nodes: &BTreeSet<String>) -> Option<String> {
    (1..=segments.len()).rev().find_map(|len| {
        let candidate = segments[..len].join(sep);
        let suffix = format!("{}{}", sep, candidate);
        nodes
            .iter()
            .find(|node| **node == candidate || node.ends_with(&suffix))
            .cloned()
    })
}

fn normalize_relative(base_dir: &str, import: &str) -> String {
    let mut parts: Vec<&str> = base_dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in import.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn resolve_import(
    language: Language,
    from_rel: &str,
    import: &str,
    nodes: &BTreeSet<String>,
) -> ImportTarget {
    match language {
        Language::Python => {
            let relative = import.starts_with('.');
            let module = import.trim_start_matches('.');
            let segments: Vec<&str> = module.split('.').filter(|s| !s.is_empty()).collect();
            if segments.is_empty() {
                return ImportTarget::Unresolved;
            }
            match match_prefixes(&segments, ".", nodes) {
                Some(node) => ImportTarget::Internal(node),
                None if relative => ImportTarget::Unresolved,
                None => ImportTarget::External(segments[0].to_string()),
            }
        }
        Language::Rust => {
            let mut segments: Vec<&str> = import.split("::").filter(|s| !s.is_empty()).collect();
            let relative = matches!(segments.first(), Some(&("crate" | "self" | "super")));
            while matches!(segments.first(), Some(&("crate" | "self" | "super"))) {
                segments.remove(0);
            }
            if segments.is_empty() {
                return ImportTarget::Unresolved;
            }
            match match_prefixes(&segments, "::", nodes) {
                Some(node) => ImportTarget::Internal(node),
                None if relative => ImportTarget::Unresolved,
                None => ImportTarget::External(segments[0].to_string()),
            }
        }
        Language::JavaScript => {
            if import.starts_with('.') {
                let base_dir = from_rel.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
                let target = module_key(Language::JavaScript, &normalize_relative(base_dir, import));
                if nodes.contains(&target) {
                    ImportTarget::Internal(target)
                } else {
                    ImportTarget::Unresolved
                }
            } else {
                let mut parts = import.split('/');
                let package = match (parts.next(), parts.next()) {
                    (Some(scope), Some(name)) if scope.starts_with('@') => {
                        format!("{}/{}", scope, name)
                    }
                    (Some(name), _) => name.to_string(),
                    _ => return ImportTarget::Unresolved,
                };
                ImportTarget::External(package)
            }
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
struct Edge {
    from: String,
    to: String,
}

/// Internal module edges and external package usage
pub struct DependencyGraph {
    settings: ScanSettings,
}

impl DependencyGraph {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }
}

pub(super) fn build_graph(patterns: &CodePatterns, scan: &SourceScan) -> Value {
    let mut nodes_by_language: HashMap<Language, BTreeSet<String>> = HashMap::new();
    for file in &scan.files {
        nodes_by_language
            .entry(file.language)
            .or_default()
            .insert(module_key(file.language, &file.rel));
    }

    let mut edges = BTreeSet::new();
    let mut external: BTreeMap<String, usize> = BTreeMap::new();
    let mut usage: HashMap<String, usize> = HashMap::new();
    let empty = BTreeSet::new();

    for file in &scan.files {
        let from = module_key(file.language, &file.rel);
        let nodes = nodes_by_language.get(&file.language).unwrap_or(&empty);

        for import in imports_of(patterns, file.language, &file.content) {
            match resolve_import(file.language, &file.rel, &import, nodes) {
                ImportTarget::Internal(to) if to != from => {
                    *usage.entry(to.clone()).or_insert(0) += 1;
                    edges.insert(Edge { from: from.clone(), to });
                }
                ImportTarget::External(package) => {
                    *usage.entry(package.clone()).or_insert(0) += 1;
                    *external.entry(package).or_insert(0) += 1;
                }
                _ => {}
            }
        }
    }

    let mut most_imported: Vec<(String, usize)> = usage.into_iter().collect();
    most_imported.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    most_imported.truncate(MOST_IMPORTED_LIMIT);

    let nodes: BTreeSet<&String> = nodes_by_language.values().flatten().collect();

    json!({
        "nodes": nodes,
        "edges": edges,
        "external": external,
        "node_count": nodes.len(),
        "edge_count": edges.len(),
        "most_imported": most_imported
            .into_iter()
            .map(|(module, count)| json!({ "module": module, "count": count }))
            .collect::<Vec<_>>(),
        "truncated": scan.truncated,
    })
}

#[async_trait]
impl Capability for DependencyGraph {
    fn name(&self) -> &str {
        names::DEPENDENCY_GRAPH
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Module-to-module import graph with external package usage"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let max_files = self.settings.max_files;
        run_blocking(move || {
            let patterns = patterns()?;
            let scan = scan_sources(&input, max_files)?;
            debug!("dependency_graph scanning {} sources", scan.files.len());
            Ok(ToolOutput::json(build_graph(patterns, &scan)))
        })
        .await
    }
}

#[derive(Debug, Serialize)]
struct FileComplexity {
    path: String,
    language: &'static str,
    complexity: usize,
    functions: usize,
    lines: usize,
}

fn file_complexity(patterns: &CodePatterns, file: &SourceFile) -> FileComplexity {
    let code: String = file
        .content
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !(trimmed.starts_with("//") || trimmed.starts_with('#'))
        })
        .collect::<Vec<_>>()
        .join("\n");

    FileComplexity {
        path: file.rel.clone(),
        language: file.language.label(),
        complexity: 1 + patterns.decision.find_iter(&code).count(),
        functions: patterns.function.find_iter(&code).count(),
        lines: file.content.lines().count(),
    }
}

/// Decision-point cyclomatic estimate per file
pub struct ComputeComplexity {
    settings: ScanSettings,
}

impl ComputeComplexity {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Capability for ComputeComplexity {
    fn name(&self) -> &str {
        names::COMPUTE_COMPLEXITY
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Cyclomatic complexity estimate per file, with hotspots"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let max_files = self.settings.max_files;
        run_blocking(move || {
            let patterns = patterns()?;
            let scan = scan_sources(&input, max_files)?;
            let files: Vec<FileComplexity> =
                scan.files.iter().map(|f| file_complexity(patterns, f)).collect();

            let total: usize = files.iter().map(|f| f.complexity).sum();
            let average = if files.is_empty() {
                0.0
            } else {
                ((total as f64 / files.len() as f64) * 100.0).round() / 100.0
            };
            let max = files.iter().map(|f| f.complexity).max().unwrap_or(0);

            let mut ranked: Vec<&FileComplexity> = files.iter().collect();
            ranked.sort_by(|a, b| b.complexity.cmp(&a.complexity).then_with(|| a.path.cmp(&b.path)));
            let hotspots: Vec<Value> = ranked
                .into_iter()
                .take(HOTSPOT_LIMIT)
                .map(|f| json!({ "path": f.path, "complexity": f.complexity }))
                .collect();

            Ok(ToolOutput::json(json!({
                "files": files,
                "file_count": files.len(),
                "total_complexity": total,
                "average_complexity": average,
                "max_complexity": max,
                "hotspots": hotspots,
                "truncated": scan.truncated,
            })))
        })
        .await
    }
}

#[derive(Debug, Serialize)]
struct Dependency {
    name: String,
    spec: String,
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct Manifest {
    path: String,
    ecosystem: &'static str,
    dependencies: Vec<Dependency>,
}

fn cargo_spec(value: &toml::Value) -> String {
    let Some(table) = value.as_table() else {
        return value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
    };
    if let Some(version) = table.get("version").and_then(|v| v.as_str()) {
        return version.to_string();
    }
    if table.get("workspace").and_then(|v| v.as_bool()) == Some(true) {
        return "workspace".to_string();
    }
    if let Some(path) = table.get("path").and_then(|v| v.as_str()) {
        return format!("path:{}", path);
    }
    if let Some(git) = table.get("git").and_then(|v| v.as_str()) {
        return format!("git:{}", git);
    }
    "*".to_string()
}

fn parse_cargo(text: &str) -> Result<Vec<Dependency>, String> {
    let doc: toml::Table = toml::from_str(text).map_err(|e| e.to_string())?;
    let workspace_deps = doc.get("workspace").and_then(|w| w.get("dependencies"));
    let sections = [
        (doc.get("dependencies"), "normal"),
        (doc.get("dev-dependencies"), "dev"),
        (doc.get("build-dependencies"), "build"),
        (workspace_deps, "workspace"),
    ];

    let mut deps = Vec::new();
    for (section, kind) in sections {
        let Some(table) = section.and_then(|s| s.as_table()) else {
            continue;
        };
        for (name, value) in table {
            deps.push(Dependency {
                name: name.clone(),
                spec: cargo_spec(value),
                kind,
            });
        }
    }
    Ok(deps)
}

fn parse_requirements(patterns: &CodePatterns, text: &str) -> Vec<Dependency> {
    text.lines()
        .filter_map(|line| {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() || line.starts_with('-') {
                return None;
            }
            let caps = patterns.requirement.captures(line)?;
            let spec = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
            Some(Dependency {
                name: caps[1].to_ascii_lowercase(),
                spec: if spec.is_empty() { "*".to_string() } else { spec.to_string() },
                kind: "normal",
            })
        })
        .collect()
}

fn parse_package_json(text: &str) -> Result<Vec<Dependency>, String> {
    let doc: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let mut deps = Vec::new();
    for (key, kind) in [
        ("dependencies", "normal"),
        ("devDependencies", "dev"),
        ("peerDependencies", "peer"),
    ] {
        let Some(table) = doc.get(key).and_then(|t| t.as_object()) else {
            continue;
        };
        for (name, spec) in table {
            deps.push(Dependency {
                name: name.clone(),
                spec: spec.as_str().map(str::to_string).unwrap_or_else(|| spec.to_string()),
                kind,
            });
        }
    }
    Ok(deps)
}

/// Declared dependencies from Cargo, pip and npm manifests
pub struct ListDependencies {
    settings: ScanSettings,
}

impl ListDependencies {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }
}

fn read_manifest(
    patterns: &CodePatterns,
    guard: &FileSystemGuard,
    path: &Path,
) -> Result<Manifest, String> {
    let (text, _) = read_text(path, SOURCE_CAP).map_err(|e| e.to_string())?;
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let (ecosystem, dependencies) = match file_name {
        "Cargo.toml" => ("cargo", parse_cargo(&text)?),
        "requirements.txt" => ("pypi", parse_requirements(patterns, &text)),
        "package.json" => ("npm", parse_package_json(&text)?),
        other => return Err(format!("unsupported manifest {}", other)),
    };
    Ok(Manifest {
        path: guard.display_relative(path),
        ecosystem,
        dependencies,
    })
}

#[async_trait]
impl Capability for ListDependencies {
    fn name(&self) -> &str {
        names::LIST_DEPENDENCIES
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Dependencies declared in Cargo.toml, requirements.txt and package.json"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let max_files = self.settings.max_files;
        run_blocking(move || {
            let patterns = patterns()?;
            let guard = guard_for(&input)?;
            let roots = scan_roots(&guard, &input)?;
            let (paths, truncated) = walk_files(&guard, &roots, max_files, |p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| MANIFESTS.contains(&n))
            });

            let mut manifests = Vec::new();
            let mut errors = Vec::new();
            for path in &paths {
                match read_manifest(patterns, &guard, path) {
                    Ok(manifest) => manifests.push(manifest),
                    Err(message) => errors.push(json!({
                        "path": guard.display_relative(path),
                        "message": message,
                    })),
                }
            }

            let suggestions: Vec<Value> = manifests
                .iter()
                .filter(|m| m.ecosystem == "pypi")
                .flat_map(|m| m.dependencies.iter())
                .filter_map(|dep| {
                    PACKAGE_ADVICE
                        .iter()
                        .find(|(name, _)| *name == dep.name)
                        .map(|(name, advice)| json!({ "package": name, "suggestion": advice }))
                })
                .collect();

            let total: usize = manifests.iter().map(|m| m.dependencies.len()).sum();

            Ok(ToolOutput::json(json!({
                "manifests": manifests,
                "total_dependencies": total,
                "suggestions": suggestions,
                "errors": errors,
                "truncated": truncated,
            })))
        })
        .await
    }
}
