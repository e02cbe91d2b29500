//! Repository layout capabilities: `directory_tree` and `read_file`.

use super::{extension, guard_for, is_ignored_dir, names, read_text, run_blocking, ScanSettings};
use crate::fs_guard::FileSystemGuard;
use async_trait::async_trait;
use sdk::{Capability, ToolError, ToolInput, ToolOutput};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

const DEFAULT_MAX_DEPTH: u64 = 5;

/// Bytes returned by `read_file` before truncation
const READ_FILE_CAP: usize = 256 * 1024;

/// Nested directory listing with file and extension counts
pub struct DirectoryTree {
    settings: ScanSettings,
}

impl DirectoryTree {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }
}

struct TreeWalk<'a> {
    guard: &'a FileSystemGuard,
    max_depth: u64,
    max_files: usize,
    files: usize,
    dirs: usize,
    extensions: BTreeMap<String, usize>,
    truncated: bool,
}

impl TreeWalk<'_> {
    /// Files map to `"file"`, directories to nested objects.
    fn visit(&mut self, dir: &Path, depth: u64) -> Value {
        let mut node = Map::new();
        if depth > self.max_depth {
            return Value::Object(node);
        }

        let Ok(entries) = fs::read_dir(dir) else {
            return Value::Object(node);
        };
        let mut children: Vec<_> = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_type().ok().map(|t| (e.path(), t)))
            .filter(|(p, t)| !t.is_symlink() && !self.guard.is_denied(p))
            .collect();
        children.sort_by(|a, b| a.0.cmp(&b.0));

        for (path, file_type) in children {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            if file_type.is_dir() {
                if is_ignored_dir(&path) {
                    continue;
                }
                self.dirs += 1;
                let child = self.visit(&path, depth + 1);
                node.insert(name, child);
            } else {
                if self.files >= self.max_files {
                    self.truncated = true;
                    break;
                }
                self.files += 1;
                let ext = extension(&path).unwrap_or_else(|| "(none)".to_string());
                *self.extensions.entry(ext).or_insert(0) += 1;
                node.insert(name, Value::String("file".to_string()));
            }
        }

        Value::Object(node)
    }
}

#[async_trait]
impl Capability for DirectoryTree {
    fn name(&self) -> &str {
        names::DIRECTORY_TREE
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Nested directory tree with file and per-extension counts"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "max_depth": { "type": "integer", "minimum": 0, "default": DEFAULT_MAX_DEPTH }
            }
        })
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let max_depth = input.param_u64_opt("max_depth").unwrap_or(DEFAULT_MAX_DEPTH);
        let max_files = self.settings.max_files;

        run_blocking(move || {
            let guard = guard_for(&input)?;
            let root = match input.target_paths.first() {
                Some(target) => guard
                    .resolve(target)
                    .map_err(|e| ToolError::PathRejected(e.to_string()))?,
                None => guard.workspace().to_path_buf(),
            };
            if !root.is_dir() {
                return Err(ToolError::InvalidParameter(format!(
                    "{} is not a directory",
                    guard.display_relative(&root)
                )));
            }

            let mut walk = TreeWalk {
                guard: &guard,
                max_depth,
                max_files,
                files: 0,
                dirs: 0,
                extensions: BTreeMap::new(),
                truncated: false,
            };
            let tree = walk.visit(&root, 0);
            debug!("directory_tree visited {} files", walk.files);

            let root_label = match guard.display_relative(&root) {
                rel if rel.is_empty() => ".".to_string(),
                rel => rel,
            };

            Ok(ToolOutput::json(json!({
                "root": root_label,
                "tree": tree,
                "file_count": walk.files,
                "dir_count": walk.dirs,
                "extensions": walk.extensions,
                "truncated": walk.truncated,
            })))
        })
        .await
    }
}

/// Size-capped text read of one file
pub struct ReadFile;

#[async_trait]
impl Capability for ReadFile {
    fn name(&self) -> &str {
        names::READ_FILE
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Read one text file inside the repository"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Defaults to the first target path" }
            }
        })
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let path = input
            .param_str_opt("path")
            .or_else(|| input.target_paths.first().cloned())
            .ok_or_else(|| ToolError::MissingParameter("path".to_string()))?;

        run_blocking(move || {
            let guard = guard_for(&input)?;
            let resolved = guard
                .resolve(&path)
                .map_err(|e| ToolError::PathRejected(e.to_string()))?;
            if !resolved.is_file() {
                return Err(ToolError::InvalidParameter(format!("{} is not a file", path)));
            }

            let size = fs::metadata(&resolved)?.len();
            let (content, truncated) = read_text(&resolved, READ_FILE_CAP)?;

            Ok(ToolOutput::json(json!({
                "path": guard.display_relative(&resolved),
                "size": size,
                "lines": content.lines().count(),
                "truncated": truncated,
                "content": content,
            })))
        })
        .await
    }
}
