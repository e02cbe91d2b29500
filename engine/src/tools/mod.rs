//! Built-in read-only analysis capabilities and the registry the Worker
//! dispatches through.
//!
//! Every capability resolves paths through [`FileSystemGuard`] and does its
//! file I/O on the blocking pool. None of them write, spawn processes or touch
//! the network.

pub mod code;
pub mod docs;
pub mod filesystem;
pub mod logs;
pub mod migration;
pub mod quality;

pub use code::{ComputeComplexity, DependencyGraph, ExtractImports, ListDependencies};
pub use docs::GenerateDocs;
pub use filesystem::{DirectoryTree, ReadFile};
pub use logs::{ClusterErrors, DetectAnomalies, ParseLogs, Postmortem};
pub use migration::MigrationPlan;
pub use quality::{DetectDeadCode, DetectDuplicates};

use crate::config::WorkerConfig;
use crate::fs_guard::FileSystemGuard;
use sdk::{Capability, CapabilityDescriptor, ToolError, ToolInput};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Capability names, shared with the Planner's task mapping
pub mod names {
    pub const DIRECTORY_TREE: &str = "directory_tree";
    pub const READ_FILE: &str = "read_file";
    pub const EXTRACT_IMPORTS: &str = "extract_imports";
    pub const DEPENDENCY_GRAPH: &str = "dependency_graph";
    pub const COMPUTE_COMPLEXITY: &str = "compute_complexity";
    pub const LIST_DEPENDENCIES: &str = "list_dependencies";
    pub const PARSE_LOGS: &str = "parse_logs";
    pub const CLUSTER_ERRORS: &str = "cluster_errors";
    pub const DETECT_ANOMALIES: &str = "detect_anomalies";
    pub const MIGRATION_PLAN: &str = "migration_plan";
    pub const DETECT_DEAD_CODE: &str = "detect_dead_code";
    pub const DETECT_DUPLICATES: &str = "detect_duplicates";
    pub const GENERATE_DOCS: &str = "generate_docs";
    pub const POSTMORTEM: &str = "postmortem";
}

/// Directories never descended into
pub(crate) const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "target",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    "env",
    "dist",
    "build",
    ".pytest_cache",
    ".mypy_cache",
    ".tox",
    ".idea",
    ".vscode",
];

/// Limits applied by the scanning capabilities
#[derive(Debug, Clone, Copy)]
pub struct ScanSettings {
    pub max_files: usize,
    pub max_log_files: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for ScanSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_files: config.max_files.max(1),
            max_log_files: config.max_log_files.max(1),
        }
    }
}

/// Name → capability map
#[derive(Default, Clone)]
pub struct ToolRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in capability
    pub fn with_builtins(settings: ScanSettings) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DirectoryTree::new(settings)));
        registry.register(Arc::new(ReadFile));
        registry.register(Arc::new(ExtractImports::new(settings)));
        registry.register(Arc::new(DependencyGraph::new(settings)));
        registry.register(Arc::new(ComputeComplexity::new(settings)));
        registry.register(Arc::new(ListDependencies::new(settings)));
        registry.register(Arc::new(ParseLogs::new(settings)));
        registry.register(Arc::new(ClusterErrors::new(settings)));
        registry.register(Arc::new(DetectAnomalies::new(settings)));
        registry.register(Arc::new(MigrationPlan));
        registry.register(Arc::new(DetectDeadCode::new(settings)));
        registry.register(Arc::new(DetectDuplicates::new(settings)));
        registry.register(Arc::new(GenerateDocs::new(settings)));
        registry.register(Arc::new(Postmortem::new(settings)));
        registry
    }

    /// Register a capability, returning the one it replaced
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Option<Arc<dyn Capability>> {
        let name = capability.name().to_string();
        debug!("Registering capability '{}'", name);
        self.capabilities.insert(name, capability)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).map(Arc::clone)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Sorted capability names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    /// Declared contracts, sorted by name
    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        let mut descriptors: Vec<CapabilityDescriptor> =
            self.capabilities.values().map(|c| c.descriptor()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

/// Run blocking file work off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ToolError>
where
    F: FnOnce() -> Result<T, ToolError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolError::Failed(format!("capability task failed: {}", e)))?
}

pub(crate) fn guard_for(input: &ToolInput) -> Result<FileSystemGuard, ToolError> {
    FileSystemGuard::new(&input.workspace).map_err(|e| ToolError::PathRejected(e.to_string()))
}

/// Validated scan roots: the named targets, or the repository root.
pub(crate) fn scan_roots(guard: &FileSystemGuard, input: &ToolInput) -> Result<Vec<PathBuf>, ToolError> {
    if input.target_paths.is_empty() {
        return Ok(vec![guard.workspace().to_path_buf()]);
    }
    input
        .target_paths
        .iter()
        .map(|p| guard.resolve(p).map_err(|e| ToolError::PathRejected(e.to_string())))
        .collect()
}

/// Files under `roots` accepted by `keep`, in sorted order.
///
/// Ignored and denied directories are skipped, symlinks are not followed, and
/// at most `max_files` paths are returned. The flag reports truncation.
pub(crate) fn walk_files<F>(
    guard: &FileSystemGuard,
    roots: &[PathBuf],
    max_files: usize,
    keep: F,
) -> (Vec<PathBuf>, bool)
where
    F: Fn(&Path) -> bool,
{
    let mut files = Vec::new();
    let mut stack: Vec<PathBuf> = roots.iter().rev().cloned().collect();

    while let Some(path) = stack.pop() {
        if path.is_file() {
            if keep(&path) {
                if files.len() >= max_files {
                    return (files, true);
                }
                files.push(path);
            }
            continue;
        }

        let Ok(entries) = fs::read_dir(&path) else {
            continue;
        };
        let mut children: Vec<(PathBuf, fs::FileType)> = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_type().ok().map(|t| (e.path(), t)))
            .filter(|(p, t)| !t.is_symlink() && !guard.is_denied(p))
            .filter(|(p, t)| !(t.is_dir() && is_ignored_dir(p)))
            .collect();
        children.sort_by(|a, b| b.0.cmp(&a.0));
        stack.extend(children.into_iter().map(|(p, _)| p));
    }

    (files, false)
}

pub(crate) fn is_ignored_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| IGNORED_DIRS.contains(&n))
}

/// Read at most `cap` bytes of a file as lossy UTF-8. The flag reports truncation.
pub(crate) fn read_text(path: &Path, cap: usize) -> Result<(String, bool), ToolError> {
    let file = fs::File::open(path)?;
    let mut buf = Vec::new();
    file.take(cap as u64 + 1).read_to_end(&mut buf)?;
    let truncated = buf.len() > cap;
    buf.truncate(cap);
    Ok((String::from_utf8_lossy(&buf).into_owned(), truncated))
}

pub(crate) fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
