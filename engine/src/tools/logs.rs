//! Incident capabilities over plain-text log files.
//!
//! `parse_logs`, `cluster_errors`, `detect_anomalies` and `postmortem` are
//! dispatched concurrently, so each one scans the logs itself instead of
//! consuming the output of another.

use super::{guard_for, names, read_text, run_blocking, scan_roots, walk_files, ScanSettings};
use async_trait::async_trait;
use regex::Regex;
use sdk::{Capability, ToolError, ToolInput, ToolOutput};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Lines read per log file
const DEFAULT_MAX_LINES: u64 = 1000;

/// Bytes read per log file
const LOG_CAP: usize = 4 * 1024 * 1024;

const TOP_ERRORS: usize = 10;
const SAMPLE_LINES: usize = 20;
const MESSAGE_PREFIX: usize = 100;
const PATTERN_PREFIX: usize = 50;
const TIMELINE_ENTRIES: usize = 5;
const ROOT_CAUSES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum Level {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize)]
struct LogLine {
    file: String,
    line_number: usize,
    level: Level,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
    content: String,
}

struct LogPatterns {
    error: Regex,
    warning: Regex,
    timestamp: Regex,
    error_type: Regex,
    digits: Regex,
}

fn patterns() -> Result<&'static LogPatterns, ToolError> {
    static PATTERNS: OnceLock<Result<LogPatterns, String>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            let compile = || -> Result<LogPatterns, regex::Error> {
                Ok(LogPatterns {
                    error: Regex::new(r"(?i)(ERROR|CRITICAL|FATAL|Exception|Traceback)")?,
                    warning: Regex::new(r"(?i)(WARNING|WARN)")?,
                    timestamp: Regex::new(
                        r"(\d{4}-\d{2}-\d{2}[\sT]\d{2}:\d{2}:\d{2})|(\d{2}/\d{2}/\d{4}\s\d{2}:\d{2}:\d{2})",
                    )?,
                    error_type: Regex::new(r"(\w+Error|\w+Exception)")?,
                    digits: Regex::new(r"\d+")?,
                })
            };
            compile().map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| ToolError::Failed(format!("pattern compilation failed: {}", e)))
}

/// Every classified line of the selected log files
struct LogScan {
    files: Vec<String>,
    lines: Vec<LogLine>,
}

impl LogScan {
    fn errors(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter().filter(|l| l.level == Level::Error)
    }

    fn count(&self, level: Level) -> usize {
        self.lines.iter().filter(|l| l.level == level).count()
    }
}

/// Read the target logs, or discover `*.log` files when no target is given.
fn scan_logs(input: &ToolInput, max_log_files: usize) -> Result<LogScan, ToolError> {
    let patterns = patterns()?;
    let guard = guard_for(input)?;
    let roots = scan_roots(&guard, input)?;
    let max_lines = input
        .param_u64_opt("max_lines")
        .unwrap_or(DEFAULT_MAX_LINES)
        .max(1) as usize;

    let explicit_files = !input.target_paths.is_empty() && roots.iter().all(|r| r.is_file());
    let (paths, _) = walk_files(&guard, &roots, max_log_files, |p| {
        explicit_files || p.extension().and_then(|e| e.to_str()) == Some("log")
    });
    if paths.is_empty() {
        return Err(ToolError::InvalidParameter(
            "no log files found in the selected paths".to_string(),
        ));
    }

    let mut scan = LogScan {
        files: Vec::with_capacity(paths.len()),
        lines: Vec::new(),
    };

    for path in &paths {
        let rel = guard.display_relative(path);
        let (text, _) = read_text(path, LOG_CAP)?;
        for (idx, content) in text.lines().take(max_lines).enumerate() {
            let level = if patterns.error.is_match(content) {
                Level::Error
            } else if patterns.warning.is_match(content) {
                Level::Warning
            } else {
                Level::Info
            };
            scan.lines.push(LogLine {
                file: rel.clone(),
                line_number: idx + 1,
                level,
                timestamp: patterns
                    .timestamp
                    .find(content)
                    .map(|m| m.as_str().to_string()),
                content: content.to_string(),
            });
        }
        scan.files.push(rel);
    }

    Ok(scan)
}

fn prefix(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect::<String>().trim().to_string()
}

fn log_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "max_lines": { "type": "integer", "minimum": 1, "default": DEFAULT_MAX_LINES }
        }
    })
}

/// ERROR/WARNING/INFO classification with timestamps
pub struct ParseLogs {
    settings: ScanSettings,
}

impl ParseLogs {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Capability for ParseLogs {
    fn name(&self) -> &str {
        names::PARSE_LOGS
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Classify log lines by level and extract timestamps"
    }

    fn input_schema(&self) -> Value {
        log_schema()
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let max_log_files = self.settings.max_log_files;
        run_blocking(move || {
            let scan = scan_logs(&input, max_log_files)?;
            let errors: Vec<&LogLine> = scan.errors().take(SAMPLE_LINES).collect();
            let warnings: Vec<&LogLine> = scan
                .lines
                .iter()
                .filter(|l| l.level == Level::Warning)
                .take(SAMPLE_LINES)
                .collect();
            let timestamps: Vec<&str> = scan
                .lines
                .iter()
                .filter_map(|l| l.timestamp.as_deref())
                .collect();

            Ok(ToolOutput::json(json!({
                "files": scan.files,
                "total_lines": scan.lines.len(),
                "error_count": scan.count(Level::Error),
                "warning_count": scan.count(Level::Warning),
                "info_count": scan.count(Level::Info),
                "errors": errors,
                "warnings": warnings,
                "first_timestamp": timestamps.first(),
                "last_timestamp": timestamps.last(),
            })))
        })
        .await
    }
}

/// Groups error lines by exception type or normalized prefix
pub struct ClusterErrors {
    settings: ScanSettings,
}

impl ClusterErrors {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }
}

fn cluster_key(patterns: &LogPatterns, content: &str) -> String {
    match patterns.error_type.captures(content) {
        Some(caps) => caps[1].to_string(),
        None => {
            let without_time = patterns.timestamp.replace_all(content, "");
            let normalized = patterns.digits.replace_all(&without_time, "N");
            prefix(&normalized, PATTERN_PREFIX)
        }
    }
}

#[async_trait]
impl Capability for ClusterErrors {
    fn name(&self) -> &str {
        names::CLUSTER_ERRORS
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Cluster error lines by error type and list the most frequent messages"
    }

    fn input_schema(&self) -> Value {
        log_schema()
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let max_log_files = self.settings.max_log_files;
        run_blocking(move || {
            let patterns = patterns()?;
            let scan = scan_logs(&input, max_log_files)?;

            let mut clusters: BTreeMap<String, usize> = BTreeMap::new();
            let mut messages: HashMap<String, usize> = HashMap::new();
            let mut total = 0;
            for line in scan.errors() {
                total += 1;
                *clusters.entry(cluster_key(patterns, &line.content)).or_insert(0) += 1;
                *messages.entry(prefix(&line.content, MESSAGE_PREFIX)).or_insert(0) += 1;
            }

            let mut top: Vec<(String, usize)> = messages.into_iter().collect();
            top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            top.truncate(TOP_ERRORS);

            Ok(ToolOutput::json(json!({
                "total_errors": total,
                "unique_patterns": clusters.len(),
                "clusters": clusters,
                "top_errors": top
                    .into_iter()
                    .map(|(message, count)| json!({ "message": message, "count": count }))
                    .collect::<Vec<_>>(),
            })))
        })
        .await
    }
}

/// Per-minute error buckets with spike detection
pub struct DetectAnomalies {
    settings: ScanSettings,
}

impl DetectAnomalies {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }
}

/// Error count per minute, plus the number of errors without a timestamp
fn minute_buckets(scan: &LogScan) -> (BTreeMap<String, usize>, usize) {
    let mut buckets: BTreeMap<String, usize> = BTreeMap::new();
    let mut untimed = 0;
    for line in scan.errors() {
        match &line.timestamp {
            Some(ts) => {
                let minute: String = ts.chars().take(16).collect();
                *buckets.entry(minute).or_insert(0) += 1;
            }
            None => untimed += 1,
        }
    }
    (buckets, untimed)
}

/// Minutes whose error count exceeds twice the mean bucket
fn spikes(buckets: &BTreeMap<String, usize>) -> BTreeMap<String, usize> {
    if buckets.is_empty() {
        return BTreeMap::new();
    }
    let mean = buckets.values().sum::<usize>() as f64 / buckets.len() as f64;
    buckets
        .iter()
        .filter(|(_, count)| **count as f64 > mean * 2.0)
        .map(|(minute, count)| (minute.clone(), *count))
        .collect()
}

#[async_trait]
impl Capability for DetectAnomalies {
    fn name(&self) -> &str {
        names::DETECT_ANOMALIES
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Bucket errors per minute and flag spikes above twice the mean"
    }

    fn input_schema(&self) -> Value {
        log_schema()
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let max_log_files = self.settings.max_log_files;
        run_blocking(move || {
            let scan = scan_logs(&input, max_log_files)?;
            let (buckets, untimed) = minute_buckets(&scan);

            let spikes = spikes(&buckets);
            let anomalies: Vec<Value> = if spikes.is_empty() {
                Vec::new()
            } else {
                vec![json!({
                    "type": "error_spike",
                    "description": format!("Detected {} error spikes", spikes.len()),
                    "details": spikes,
                })]
            };

            Ok(ToolOutput::json(json!({
                "buckets": buckets,
                "untimed_errors": untimed,
                "spikes": spikes,
                "total_anomalies": anomalies.len(),
                "anomalies": anomalies,
            })))
        })
        .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    fn from_errors(errors: usize) -> Self {
        if errors > 50 {
            Severity::High
        } else if errors > 10 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// Error clusters by size, each with its first message
fn ranked_clusters(patterns: &LogPatterns, scan: &LogScan) -> Vec<(String, usize, String)> {
    let mut clusters: HashMap<String, (usize, String)> = HashMap::new();
    for line in scan.errors() {
        let entry = clusters
            .entry(cluster_key(patterns, &line.content))
            .or_insert_with(|| (0, prefix(&line.content, MESSAGE_PREFIX)));
        entry.0 += 1;
    }
    let mut ranked: Vec<(String, usize, String)> = clusters
        .into_iter()
        .map(|(key, (count, example))| (key, count, example))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

fn postmortem(patterns: &LogPatterns, scan: &LogScan, summary: Option<&str>) -> Value {
    let errors = scan.count(Level::Error);
    let warnings = scan.count(Level::Warning);
    let clusters = ranked_clusters(patterns, scan);
    let severity = Severity::from_errors(errors);
    let (buckets, _) = minute_buckets(scan);
    let peak = buckets.iter().max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)));

    let sections = [
        "Executive Summary",
        "Timeline",
        "Root Cause Analysis",
        "Impact Assessment",
        "Remediation Steps",
        "Prevention",
    ];
    let mut content = String::from("# Incident Postmortem\n");

    content.push_str(&format!(
        "\n## {}\n\n{} errors and {} warnings across {} log files, in {} distinct patterns.\n",
        sections[0],
        errors,
        warnings,
        scan.files.len(),
        clusters.len()
    ));
    if let Some(summary) = summary.map(str::trim).filter(|s| !s.is_empty()) {
        content.push_str(&format!("\n{}\n", summary));
    }

    content.push_str(&format!("\n## {}\n\n", sections[1]));
    let timeline: Vec<String> = scan
        .errors()
        .filter_map(|line| {
            let ts = line.timestamp.as_deref()?;
            Some(format!("- {}: {}", ts, prefix(&line.content, MESSAGE_PREFIX)))
        })
        .take(TIMELINE_ENTRIES)
        .collect();
    if timeline.is_empty() {
        content.push_str("No timestamped errors were found.\n");
    } else {
        content.push_str(&timeline.join("\n"));
        content.push('\n');
    }

    content.push_str(&format!("\n## {}\n\n", sections[2]));
    if clusters.is_empty() {
        content.push_str("No errors were recorded.\n");
    } else {
        for (key, count, example) in clusters.iter().take(ROOT_CAUSES) {
            content.push_str(&format!("- `{}` ({} occurrences): {}\n", key, count, example));
        }
    }

    content.push_str(&format!("\n## {}\n\nSeverity: {:?}\n", sections[3], severity));
    content.push_str(&format!("Affected log files: {}\n", scan.files.join(", ")));
    if let Some((minute, count)) = peak {
        content.push_str(&format!("Peak error minute: {} ({} errors)\n", minute, count));
    }

    content.push_str(&format!("\n## {}\n\n", sections[4]));
    match clusters.first() {
        Some((top, _, _)) => content.push_str(&format!(
            "1. Investigate the `{}` errors first, they make up the largest cluster\n\
             2. Prepare fixes for the identified issues and review them as diffs\n\
             3. Add monitoring and alerts for the recurring error patterns\n\
             4. Roll out the fixes and watch the error rate for a recurrence\n",
            top
        )),
        None => content.push_str("No remediation is needed for this window.\n"),
    }

    content.push_str(&format!(
        "\n## {}\n\n\
         - Add alerting on error rates per pattern\n\
         - Cover the failing paths with tests\n\
         - Review error handling around external dependencies\n",
        sections[5]
    ));

    json!({
        "length": content.chars().count(),
        "content": content,
        "sections": sections,
        "severity": severity,
        "total_errors": errors,
        "total_warnings": warnings,
        "unique_patterns": clusters.len(),
    })
}

/// Postmortem report drafted from the selected logs
pub struct Postmortem {
    settings: ScanSettings,
}

impl Postmortem {
    pub fn new(settings: ScanSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Capability for Postmortem {
    fn name(&self) -> &str {
        names::POSTMORTEM
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Markdown postmortem with timeline, root causes, impact and remediation"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "max_lines": { "type": "integer", "minimum": 1, "default": DEFAULT_MAX_LINES },
                "incident_summary": { "type": "string" }
            }
        })
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let max_log_files = self.settings.max_log_files;
        run_blocking(move || {
            let patterns = patterns()?;
            let scan = scan_logs(&input, max_log_files)?;
            let summary = input.param_str_opt("incident_summary");
            Ok(ToolOutput::json(postmortem(patterns, &scan, summary.as_deref())))
        })
        .await
    }
}
