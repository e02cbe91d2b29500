//! Code-quality scanners: definitions nothing refers to, and blocks repeated
//! across files.
//!
//! Both work on tokens and normalized lines only. A name that appears once in
//! the whole scan is reported as unused, which misses dynamic dispatch and
//! reflection, so results are candidates for review rather than verdicts.

use super::code::{patterns, scan_sources, CodePatterns, Language, SourceFile};
use super::{names, run_blocking, ScanSettings};
use async_trait::async_trait;
use sdk::{Capability, ToolError, ToolInput, ToolOutput};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;

const REPORT_LIMIT: usize = 20;
const DEFAULT_MIN_LINES: u64 = 5;
const PREVIEW_LINES: usize = 3;

/// Names that are called by a runtime, a framework or a trait, never by name
const ENTRY_POINTS: &[&str] = &[
    "main", "new", "default", "fmt", "from", "drop", "clone", "eq", "hash", "deref", "setup",
    "teardown", "run",
];

#[derive(Debug, Serialize)]
struct Finding {
    name: String,
    path: String,
    line: usize,
}

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

fn is_entry_point(name: &str) -> bool {
    ENTRY_POINTS.contains(&name)
        || name.starts_with("test")
        || (name.starts_with("__") && name.ends_with("__"))
}

/// Names an import statement binds in its file, with their offsets.
fn import_bindings(patterns: &CodePatterns, file: &SourceFile) -> Vec<(String, usize)> {
    let mut bindings = Vec::new();
    match file.language {
        Language::Rust => {
            for caps in patterns.rust_binding.captures_iter(&file.content) {
                let Some(bound) = caps.get(2).or_else(|| caps.get(1)) else {
                    continue;
                };
                if bound.as_str() != "self" && bound.as_str() != "_" {
                    bindings.push((bound.as_str().to_string(), bound.start()));
                }
            }
        }
        Language::Python => {
            for caps in patterns.python_binding.captures_iter(&file.content) {
                let (list, dotted) = match (caps.get(1), caps.get(2)) {
                    (Some(list), _) => (list, false),
                    (None, Some(list)) => (list, true),
                    _ => continue,
                };
                for part in list.as_str().split(',') {
                    let words: Vec<&str> = part.split_whitespace().collect();
                    let bound = match words.as_slice() {
                        [_, "as", alias] => *alias,
                        [module] if dotted => module.split('.').next().unwrap_or_default(),
                        [name] => *name,
                        _ => continue,
                    };
                    if bound != "*" && !bound.is_empty() {
                        bindings.push((bound.to_string(), list.start()));
                    }
                }
            }
        }
        Language::JavaScript => {}
    }
    bindings
}

fn token_counts<'a>(patterns: &CodePatterns, text: &'a str) -> HashMap<&'a str, usize> {
    let mut counts = HashMap::new();
    for m in patterns.identifier.find_iter(text) {
        *counts.entry(m.as_str()).or_insert(0) += 1;
    }
    counts
}

fn dead_code(patterns: &CodePatterns, files: &[SourceFile]) -> Value {
    let mut global: HashMap<&str, usize> = HashMap::new();
    for file in files {
        for (token, n) in token_counts(patterns, &file.content) {
            *global.entry(token).or_insert(0) += n;
        }
    }

    let mut unused_functions = Vec::new();
    let mut total_functions = 0;
    for file in files {
        for caps in patterns.function.captures_iter(&file.content) {
            let Some(name) = caps.get(1) else {
                continue;
            };
            total_functions += 1;
            if is_entry_point(name.as_str()) {
                continue;
            }
            if global.get(name.as_str()).copied().unwrap_or(0) <= 1 {
                unused_functions.push(Finding {
                    name: name.as_str().to_string(),
                    path: file.rel.clone(),
                    line: line_of(&file.content, name.start()),
                });
            }
        }
    }

    let mut unused_imports = Vec::new();
    let mut total_imports = 0;
    for file in files {
        let local = token_counts(patterns, &file.content);
        for (name, offset) in import_bindings(patterns, file) {
            total_imports += 1;
            if local.get(name.as_str()).copied().unwrap_or(0) <= 1 {
                unused_imports.push(Finding {
                    line: line_of(&file.content, offset),
                    name,
                    path: file.rel.clone(),
                });
            }
        }
    }

    let unused_function_count = unused_functions.len();
    let unused_import_count = unused_imports.len();
    unused_functions.truncate(REPORT_LIMIT);
    unused_imports.truncate(REPORT_LIMIT);

    json!({
        "unused_functions": unused_functions,
        "unused_imports": unused_imports,
        "unused_function_count": unused_function_count,
        "unused_import_count": unused_import_count,
        "total_functions": total_functions,
        "total_imports": total_imports,
    })
}

/// Functions and imports referenced nowhere else in the scan
pub struct DetectDeadCode {
    settings: ScanSettings,
}

impl DetectDeadCode {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Capability for DetectDeadCode {
    fn name(&self) -> &str {
        names::DETECT_DEAD_CODE
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Functions and imports that are never referenced, by token count"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let max_files = self.settings.max_files;
        run_blocking(move || {
            let patterns = patterns()?;
            let scan = scan_sources(&input, max_files)?;
            debug!("detect_dead_code scanning {} sources", scan.files.len());

            let mut data = dead_code(patterns, &scan.files);
            data["file_count"] = json!(scan.files.len());
            data["truncated"] = json!(scan.truncated);
            Ok(ToolOutput::json(data))
        })
        .await
    }
}

/// A source line after trimming, with its 1-based position
struct NormalizedLine<'a> {
    number: usize,
    text: &'a str,
}

fn normalized_lines(content: &str) -> Vec<NormalizedLine<'_>> {
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| NormalizedLine {
            number: idx + 1,
            text: line.trim(),
        })
        .filter(|l| !l.text.is_empty() && !l.text.starts_with('#') && !l.text.starts_with("//"))
        .collect()
}

fn window_key(lines: &[NormalizedLine<'_>]) -> String {
    lines.iter().map(|l| l.text).collect::<Vec<_>>().join("\n")
}

#[derive(Debug, Serialize)]
struct Block {
    start_line: usize,
    lines: usize,
    preview: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DuplicatePair {
    file1: String,
    file2: String,
    blocks: Vec<Block>,
    duplicated_lines: usize,
    similarity: f64,
}

/// Runs of `first`'s lines that fall inside a window also present in `second`.
fn shared_blocks(
    first: &[NormalizedLine<'_>],
    second_windows: &HashSet<String>,
    min_lines: usize,
) -> (Vec<Block>, usize) {
    let mut covered = vec![false; first.len()];
    let mut shared_windows = 0;
    for start in 0..first.len().saturating_sub(min_lines - 1) {
        if second_windows.contains(&window_key(&first[start..start + min_lines])) {
            shared_windows += 1;
            covered[start..start + min_lines].iter_mut().for_each(|c| *c = true);
        }
    }

    let mut blocks = Vec::new();
    let mut idx = 0;
    while idx < first.len() {
        if !covered[idx] {
            idx += 1;
            continue;
        }
        let start = idx;
        while idx < first.len() && covered[idx] {
            idx += 1;
        }
        blocks.push(Block {
            start_line: first[start].number,
            lines: idx - start,
            preview: first[start..idx]
                .iter()
                .take(PREVIEW_LINES)
                .map(|l| l.text.to_string())
                .collect(),
        });
    }
    (blocks, shared_windows)
}

fn duplicates(files: &[SourceFile], min_lines: usize) -> Value {
    let normalized: Vec<Vec<NormalizedLine<'_>>> =
        files.iter().map(|f| normalized_lines(&f.content)).collect();
    let windows: Vec<HashSet<String>> = normalized
        .iter()
        .map(|lines| lines.windows(min_lines).map(window_key).collect())
        .collect();

    let mut pairs = Vec::new();
    for a in 0..files.len() {
        for b in (a + 1)..files.len() {
            if windows[a].is_empty() || windows[a].is_disjoint(&windows[b]) {
                continue;
            }
            let (blocks, shared) = shared_blocks(&normalized[a], &windows[b], min_lines);
            let most = windows[a].len().max(windows[b].len()).max(1);
            pairs.push(DuplicatePair {
                file1: files[a].rel.clone(),
                file2: files[b].rel.clone(),
                duplicated_lines: blocks.iter().map(|b| b.lines).sum(),
                blocks,
                similarity: ((shared as f64 / most as f64).min(1.0) * 100.0).round() / 100.0,
            });
        }
    }

    pairs.sort_by(|x, y| {
        y.duplicated_lines
            .cmp(&x.duplicated_lines)
            .then_with(|| x.file1.cmp(&y.file1))
            .then_with(|| x.file2.cmp(&y.file2))
    });
    let total = pairs.len();
    pairs.truncate(REPORT_LIMIT);

    json!({
        "duplicates": pairs,
        "total_duplicates": total,
        "files_analyzed": files.len(),
        "min_lines": min_lines,
    })
}

/// Blocks of identical normalized lines shared between files
pub struct DetectDuplicates {
    settings: ScanSettings,
}

impl DetectDuplicates {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Capability for DetectDuplicates {
    fn name(&self) -> &str {
        names::DETECT_DUPLICATES
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Code blocks repeated across files, ignoring whitespace, blank lines and comments"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "min_lines": { "type": "integer", "minimum": 2, "default": DEFAULT_MIN_LINES }
            }
        })
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let max_files = self.settings.max_files;
        run_blocking(move || {
            let min_lines = input
                .param_u64_opt("min_lines")
                .unwrap_or(DEFAULT_MIN_LINES)
                .max(2) as usize;
            let scan = scan_sources(&input, max_files)?;

            let mut data = duplicates(&scan.files, min_lines);
            data["truncated"] = json!(scan.truncated);
            Ok(ToolOutput::json(data))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const SHARED: &str = "\
    total = 0
    for item in items:
        if item.active:
            total += item.price
    # tax
    total = total * 1.2
    return round(total, 2)
";

    fn repo() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("shop")).unwrap();
        fs::write(
            root.join("shop/cart.py"),
            format!(
                "import os\nfrom typing import List, Dict as D\n\n\
                 def cart_total(items: List):\n{}\n\ndef helper():\n    return cart_total([])\n",
                SHARED
            ),
        )
        .unwrap();
        fs::write(
            root.join("shop/invoice.py"),
            format!(
                "import json\n\ndef invoice_total(items):\n{}\n\ndef render(x):\n    return json.dumps(x)\n",
                SHARED
            ),
        )
        .unwrap();
        fs::write(
            root.join("shop/main.rs"),
            "use std::collections::HashMap;\nuse std::fmt::Write as _;\nuse crate::cart::Cart;\n\n\
             fn main() {\n    let c = Cart::default();\n}\n\nfn orphan() {}\n",
        )
        .unwrap();
        temp
    }

    fn names_of(list: &Value) -> Vec<String> {
        list.as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_dead_code_reports_unreferenced_definitions() {
        let temp = repo();
        let output = DetectDeadCode::new(ScanSettings::default())
            .invoke(ToolInput::new(temp.path()))
            .await
            .unwrap();

        let functions = names_of(&output.data["unused_functions"]);
        assert!(functions.contains(&"invoice_total".to_string()));
        assert!(functions.contains(&"orphan".to_string()));
        assert!(functions.contains(&"render".to_string()));
        assert!(!functions.contains(&"cart_total".to_string()));
        assert!(!functions.contains(&"main".to_string()));

        let imports = names_of(&output.data["unused_imports"]);
        assert!(imports.contains(&"os".to_string()));
        assert!(imports.contains(&"D".to_string()));
        assert!(imports.contains(&"HashMap".to_string()));
        assert!(!imports.contains(&"json".to_string()));
        assert!(!imports.contains(&"List".to_string()));
        assert!(!imports.contains(&"Cart".to_string()));
        assert!(!imports.contains(&"_".to_string()));
        assert_eq!(output.data["file_count"], 3);
    }

    #[test]
    fn test_unused_function_line_numbers() {
        let patterns = patterns().unwrap();
        let files = vec![SourceFile {
            rel: "lib.rs".to_string(),
            language: Language::Rust,
            content: "fn used() {}\n\nfn unused() { used() }\n".to_string(),
        }];
        let data = dead_code(patterns, &files);
        assert_eq!(data["unused_functions"], json!([{ "name": "unused", "path": "lib.rs", "line": 3 }]));
        assert_eq!(data["total_functions"], 2);
    }

    #[tokio::test]
    async fn test_duplicates_across_files() {
        let temp = repo();
        let output = DetectDuplicates::new(ScanSettings::default())
            .invoke(ToolInput::new(temp.path()))
            .await
            .unwrap();

        assert_eq!(output.data["total_duplicates"], 1);
        assert_eq!(output.data["files_analyzed"], 3);
        let pair = &output.data["duplicates"][0];
        assert_eq!(pair["file1"], "shop/cart.py");
        assert_eq!(pair["file2"], "shop/invoice.py");
        // the comment line is dropped before comparison
        assert_eq!(pair["duplicated_lines"], 6);
        assert_eq!(pair["blocks"][0]["preview"][0], "total = 0");
        assert_eq!(pair["blocks"][0]["preview"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_min_lines_above_shared_run_finds_nothing() {
        let temp = repo();
        let output = DetectDuplicates::new(ScanSettings::default())
            .invoke(ToolInput::new(temp.path()).with_param("min_lines", json!(7)))
            .await
            .unwrap();
        assert_eq!(output.data["total_duplicates"], 0);
    }
}
