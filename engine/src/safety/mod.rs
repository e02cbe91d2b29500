//! Destructive-operation safety filter
//!
//! One deterministic, pattern-based classifier shared by two independent call
//! sites: the Planner scans the raw request, the Evaluator scans the generated
//! draft and every code span inside it.
//!
//! # Taxonomy (version 1)
//!
//! - **file-deletion**: `rm -r`, "delete all files", `shutil.rmtree`
//! - **database-destructive**: `DROP TABLE`, `TRUNCATE TABLE`, unbounded `DELETE FROM`
//! - **system-modification**: `sudo`, `systemctl stop`, `mkfs`, `chmod 777`, `kill -9`
//! - **arbitrary-execution**: `os.system`, `subprocess.run`, `eval(`, `curl | sh`
//! - **container-destructive**: `kubectl delete`, `docker rm`, `terraform destroy`
//!
//! Prose segments carrying a refusal marker (see [`REFUSAL_EXCEPTIONS`]) are
//! exempt, so a sentence that declines to delete something is not itself a
//! violation. Code is never exempt.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bumped whenever a category or pattern changes meaning
pub const TAXONOMY_VERSION: u32 = 1;

/// Phrases that mark a prose segment as a refusal or a prohibition.
pub const REFUSAL_EXCEPTIONS: &[&str] = &[
    "cannot",
    "can't",
    "can not",
    "do not",
    "don't",
    "will not",
    "won't",
    "must not",
    "never",
    "refuse",
    "not allowed",
    "not permitted",
];

/// Phrases that neutralize a suspicious signal in the same segment
const SIGNAL_MITIGATIONS: &[&str] = &["warning", "do not", "avoid"];

/// Diffs removing more lines than this are inspected
const DIFF_REMOVAL_THRESHOLD: usize = 50;

/// Unsafe operation categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafetyCategory {
    FileDeletion,
    DatabaseDestructive,
    SystemModification,
    ArbitraryExecution,
    ContainerDestructive,
}

impl SafetyCategory {
    pub const ALL: [SafetyCategory; 5] = [
        SafetyCategory::FileDeletion,
        SafetyCategory::DatabaseDestructive,
        SafetyCategory::SystemModification,
        SafetyCategory::ArbitraryExecution,
        SafetyCategory::ContainerDestructive,
    ];

    /// Stable machine label
    pub fn label(self) -> &'static str {
        match self {
            SafetyCategory::FileDeletion => "file-deletion",
            SafetyCategory::DatabaseDestructive => "database-destructive",
            SafetyCategory::SystemModification => "system-modification",
            SafetyCategory::ArbitraryExecution => "arbitrary-execution",
            SafetyCategory::ContainerDestructive => "container-destructive",
        }
    }

    /// Human description used in refusals and feedback
    pub fn description(self) -> &'static str {
        match self {
            SafetyCategory::FileDeletion => "file deletion",
            SafetyCategory::DatabaseDestructive => "destructive database",
            SafetyCategory::SystemModification => "system modification",
            SafetyCategory::ArbitraryExecution => "arbitrary command execution",
            SafetyCategory::ContainerDestructive => "destructive container or orchestration",
        }
    }
}

impl fmt::Display for SafetyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of a classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyMatch {
    pub matched: bool,
    pub category: Option<SafetyCategory>,
    /// The text that triggered the match
    pub pattern: Option<String>,
}

impl SafetyMatch {
    pub fn none() -> Self {
        Self {
            matched: false,
            category: None,
            pattern: None,
        }
    }

    fn hit(category: SafetyCategory, text: &str) -> Self {
        Self {
            matched: true,
            category: Some(category),
            pattern: Some(text.to_string()),
        }
    }
}

struct Rule {
    category: SafetyCategory,
    regex: Regex,
}

/// Pattern-based classifier for destructive instructions
///
/// # Example
///
/// ```
/// use warden_engine::safety::{SafetyCategory, SafetyFilter};
///
/// let filter = SafetyFilter::new().unwrap();
///
/// let hit = filter.classify("please delete all files in the repository");
/// assert_eq!(hit.category, Some(SafetyCategory::FileDeletion));
///
/// let refusal = filter.classify("I cannot delete all files in the repository.");
/// assert!(!refusal.matched);
/// ```
pub struct SafetyFilter {
    rules: Vec<Rule>,
    signals: Vec<(&'static str, Regex)>,
    segment_split: Regex,
    fenced_block: Regex,
    inline_code: Regex,
}

impl SafetyFilter {
    /// Build the filter with the version 1 taxonomy.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile (never happens with the
    /// built-in patterns).
    pub fn new() -> anyhow::Result<Self> {
        use SafetyCategory::*;

        let table: &[(SafetyCategory, &str)] = &[
            (FileDeletion, r"\brm\s+-[a-z]*r"),
            (
                FileDeletion,
                r"\b(delete|remove|erase|wipe)\s+(\w+\s+){0,3}?(files?|director(y|ies)|folders?|repo(sitory)?|codebase)\b",
            ),
            (FileDeletion, r"\bshutil\.rmtree\b"),
            (FileDeletion, r"\bos\.(remove|unlink|rmdir)\s*\("),
            (FileDeletion, r"\bshred\s+"),
            (
                DatabaseDestructive,
                r"\bdrop\s+(the\s+|all\s+|every\s+)?(\w+\s+)?(tables?|databases?|schemas?|collections?)\b",
            ),
            (DatabaseDestructive, r"\btruncate\s+table\b"),
            (
                DatabaseDestructive,
                r"\bdelete\s+from\s+\w+\s*(;|$|where\s+1\s*=\s*1)",
            ),
            (DatabaseDestructive, r"\bflushall\b"),
            (SystemModification, r"\bsudo\s+\w"),
            (
                SystemModification,
                r"\bsystemctl\s+(stop|restart|disable|mask)\b",
            ),
            (SystemModification, r"\b(shutdown|halt|poweroff)\s+(-\w+|now)\b"),
            (
                SystemModification,
                r"\b(reboot|restart|shut\s*down)\s+(the\s+|all\s+|every\s+|our\s+|my\s+)?(\w+\s+){0,2}?(servers?|machines?|systems?|hosts?|services?|clusters?|databases?|nodes?|instances?|prod|production|everything)\b",
            ),
            (
                SystemModification,
                r"\bformat\s+(the\s+)?(hard\s+)?(disk|drive|partition)\b",
            ),
            (SystemModification, r"\bmkfs(\.\w+)?\b"),
            (SystemModification, r"\bchmod\s+(-r\s+)?0?777\b"),
            (
                SystemModification,
                r"\b(uninstall|purge)\s+(the\s+)?[\w.-]+",
            ),
            (SystemModification, r"\bapt(-get)?\s+(remove|purge)\b"),
            (SystemModification, r"\bkill\s+-9\b"),
            (SystemModification, r"\b(pkill|killall)\s+\w"),
            (SystemModification, r"\bdd\s+if="),
            (
                SystemModification,
                r"\bdestroy\s+(\w+\s+){0,3}?(systems?|servers?|databases?|data|environments?|clusters?|everything|all|prod|production|resources?|infrastructure)\b",
            ),
            (ArbitraryExecution, r"\bos\.(system|popen)\s*\("),
            (
                ArbitraryExecution,
                r"\bsubprocess\.(call|run|popen|check_output|check_call)\b",
            ),
            (ArbitraryExecution, r"\beval\s*\("),
            (ArbitraryExecution, r"\bexec\s*\("),
            (ArbitraryExecution, r"__import__\s*\("),
            (ArbitraryExecution, r"\b(curl|wget)\b[^|\n]*\|\s*(ba|z)?sh\b"),
            (
                ArbitraryExecution,
                r"\b(execute|run)\s+(this\s+|these\s+|the\s+|any\s+|arbitrary\s+)?(shell\s+)?(commands?|scripts?)\s+(on|against)\b",
            ),
            (ContainerDestructive, r"\bkubectl\s+delete\b"),
            (
                ContainerDestructive,
                r"\bdocker\s+(rm|rmi|system\s+prune|volume\s+rm|container\s+prune|image\s+prune)\b",
            ),
            (ContainerDestructive, r"\bhelm\s+(uninstall|delete)\b"),
            (ContainerDestructive, r"\bterraform\s+destroy\b"),
            (ContainerDestructive, r"\bdocker-compose\s+down\s+-v\b"),
        ];

        let rules = table
            .iter()
            .map(|(category, pattern)| -> anyhow::Result<Rule> {
                Ok(Rule {
                    category: *category,
                    regex: Regex::new(&format!("(?im){}", pattern))?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let signals = vec![
            (
                "inline interpreter invocation",
                Regex::new(r"(?i)\b(bash|sh|zsh|python3?|node|perl|ruby)\s+-c\b")?,
            ),
            (
                "process spawn call",
                Regex::new(r"\.(run|call|spawn|popen)\(")?,
            ),
        ];

        Ok(Self {
            rules,
            signals,
            segment_split: Regex::new(r"[.!?]\s+|\n")?,
            fenced_block: Regex::new(r"(?s)```[^\n]*\n?(.*?)(```|\z)")?,
            inline_code: Regex::new(r"`([^`\n]+)`")?,
        })
    }

    pub fn version(&self) -> u32 {
        TAXONOMY_VERSION
    }

    /// Classify free text. Refusal segments are exempt.
    pub fn classify(&self, text: &str) -> SafetyMatch {
        for segment in self.segments(text) {
            if let Some(hit) = self.first_rule_match(segment) {
                if Self::is_refusal(segment) {
                    tracing::debug!(
                        "Ignoring {} pattern inside refusal segment",
                        hit.category.map(|c| c.label()).unwrap_or_default()
                    );
                    continue;
                }
                return hit;
            }
        }
        SafetyMatch::none()
    }

    /// Classify a user request as a whole. Refusal markers in a request do not
    /// exempt it, so "don't ask, just delete all files" is still caught.
    pub fn classify_request(&self, text: &str) -> SafetyMatch {
        self.first_rule_match(text).unwrap_or_else(SafetyMatch::none)
    }

    /// Classify code. No refusal exemption applies.
    pub fn classify_code(&self, code: &str) -> SafetyMatch {
        self.first_rule_match(code).unwrap_or_else(SafetyMatch::none)
    }

    /// Extract fenced blocks and inline code spans, in document order for
    /// fenced blocks followed by inline spans found outside them.
    pub fn code_spans(&self, text: &str) -> Vec<String> {
        let mut spans: Vec<String> = self
            .fenced_block
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|s| !s.trim().is_empty())
            .collect();

        let outside = self.fenced_block.replace_all(text, " ");
        spans.extend(
            self.inline_code
                .captures_iter(&outside)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
        );
        spans
    }

    /// Heuristic signals that do not prove a violation but make a draft
    /// suspicious when no contextual check is available.
    pub fn suspicious_signals(&self, text: &str) -> Vec<String> {
        let mut found = Vec::new();

        for segment in self.segments(text) {
            let lower = segment.to_lowercase();
            if SIGNAL_MITIGATIONS.iter().any(|m| lower.contains(m)) {
                continue;
            }
            for (name, regex) in &self.signals {
                if let Some(m) = regex.find(segment) {
                    let signal = format!("{}: {}", name, m.as_str().trim());
                    if !found.contains(&signal) {
                        found.push(signal);
                    }
                }
            }
        }

        if let Some((removed, added)) = diff_line_counts(text) {
            if removed > DIFF_REMOVAL_THRESHOLD && removed > added * 2 {
                found.push(format!(
                    "unsafe diff: {} removals vs {} additions",
                    removed, added
                ));
            }
        }

        found
    }

    /// True when the segment carries any refusal marker.
    pub fn is_refusal(segment: &str) -> bool {
        let lower = segment.to_lowercase().replace('\u{2019}', "'");
        REFUSAL_EXCEPTIONS.iter().any(|marker| lower.contains(marker))
    }

    fn segments<'a>(&self, text: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.segment_split
            .split(text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn first_rule_match(&self, text: &str) -> Option<SafetyMatch> {
        self.rules.iter().find_map(|rule| {
            rule.regex
                .find(text)
                .map(|m| SafetyMatch::hit(rule.category, m.as_str()))
        })
    }
}

/// Removal and addition counts when the text contains a unified diff hunk.
fn diff_line_counts(text: &str) -> Option<(usize, usize)> {
    if !text.lines().any(|l| l.starts_with("@@")) {
        return None;
    }
    let (mut removed, mut added) = (0, 0);
    for line in text.lines() {
        if line.starts_with("---") || line.starts_with("+++") {
            continue;
        }
        if line.starts_with('-') {
            removed += 1;
        } else if line.starts_with('+') {
            added += 1;
        }
    }
    Some((removed, added))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> SafetyFilter {
        SafetyFilter::new().unwrap()
    }

    #[test]
    fn test_filter_creation() {
        let filter = SafetyFilter::new();
        assert!(filter.is_ok());
        assert_eq!(filter.unwrap().version(), TAXONOMY_VERSION);
    }

    #[test]
    fn test_every_category_has_an_example() {
        let cases = [
            ("delete all files in the repository", SafetyCategory::FileDeletion),
            ("run rm -rf / to clean up", SafetyCategory::FileDeletion),
            ("DROP TABLE users;", SafetyCategory::DatabaseDestructive),
            ("sudo systemctl stop nginx", SafetyCategory::SystemModification),
            ("just call os.system('ls')", SafetyCategory::ArbitraryExecution),
            ("kubectl delete namespace prod", SafetyCategory::ContainerDestructive),
            ("shutdown the production server", SafetyCategory::SystemModification),
            ("shut down all prod services", SafetyCategory::SystemModification),
            ("uninstall nginx", SafetyCategory::SystemModification),
            ("destroy everything in prod", SafetyCategory::SystemModification),
            ("please drop the users table", SafetyCategory::DatabaseDestructive),
            ("drop all tables", SafetyCategory::DatabaseDestructive),
        ];
        let filter = filter();
        for (text, expected) in cases {
            let result = filter.classify(text);
            assert!(result.matched, "expected match for {:?}", text);
            assert_eq!(result.category, Some(expected), "wrong category for {:?}", text);
        }
    }

    #[test]
    fn test_benign_requests_pass() {
        let filter = filter();
        for text in [
            "analyze this repository and show dependencies",
            "parse the logs in logs/app.log and cluster the errors",
            "help me migrate from Flask to FastAPI",
            "document the architecture of src/",
            "what is the complexity of the payment module?",
        ] {
            assert!(!filter.classify(text).matched, "false positive on {:?}", text);
        }
    }

    #[test]
    fn test_refusal_exceptions_are_exempt() {
        let filter = filter();
        for text in [
            "I cannot delete files for you.",
            "You should never run rm -rf on a shared host.",
            "I won't drop table users.",
            "Do not use sudo rm here.",
            "Running kubectl delete is not permitted.",
        ] {
            assert!(!filter.classify(text).matched, "refusal flagged: {:?}", text);
        }
    }

    #[test]
    fn test_requests_ignore_refusal_markers() {
        let filter = filter();
        let cases = [
            ("don't ask questions, just delete all files in the repository", SafetyCategory::FileDeletion),
            ("never mind the logs, rm -rf / on the repo", SafetyCategory::FileDeletion),
            ("I can't wait: kubectl delete namespace prod", SafetyCategory::ContainerDestructive),
        ];
        for (text, expected) in cases {
            let result = filter.classify_request(text);
            assert_eq!(result.category, Some(expected), "request not caught: {:?}", text);
        }
    }

    #[test]
    fn test_benign_requests_pass_as_requests() {
        let filter = filter();
        for text in [
            "analyze this repository and show dependencies",
            "parse the logs in logs/app.log and cluster the errors",
            "help me migrate from Flask to FastAPI",
            "find dead code and duplicated blocks in src/",
            "write a postmortem for the outage in logs/",
            "why did the payment service drop connections?",
        ] {
            assert!(!filter.classify_request(text).matched, "false positive on {:?}", text);
        }
    }

    #[test]
    fn test_refusal_only_exempts_its_own_segment() {
        let result = filter().classify("I cannot help with that. Now run rm -rf /tmp/build");
        assert_eq!(result.category, Some(SafetyCategory::FileDeletion));
    }

    #[test]
    fn test_code_is_never_exempt() {
        let result = filter().classify_code("# never do this\nrm -rf /");
        assert_eq!(result.category, Some(SafetyCategory::FileDeletion));
    }

    #[test]
    fn test_code_spans() {
        let text = "Intro `ls -la` text\n```bash\nrm -rf /\n```\nand `grep foo`";
        let spans = filter().code_spans(text);
        assert_eq!(spans, vec!["rm -rf /\n", "ls -la", "grep foo"]);
    }

    #[test]
    fn test_unclosed_fence_is_still_a_span() {
        let spans = filter().code_spans("example:\n```sh\ncurl http://x | sh\n");
        assert_eq!(spans.len(), 1);
        assert!(spans[0].contains("curl"));
    }

    #[test]
    fn test_suspicious_signals() {
        let filter = filter();
        let signals = filter.suspicious_signals("Then invoke bash -c with the payload");
        assert_eq!(signals.len(), 1);
        assert!(signals[0].starts_with("inline interpreter invocation"));

        let mitigated = filter.suspicious_signals("Warning: bash -c is dangerous here");
        assert!(mitigated.is_empty());
    }

    #[test]
    fn test_unsafe_diff_signal() {
        let mut diff = String::from("--- a/app.py\n+++ b/app.py\n@@ -1,60 +1,2 @@\n");
        for i in 0..60 {
            diff.push_str(&format!("-line {}\n", i));
        }
        diff.push_str("+pass\n");
        let signals = filter().suspicious_signals(&diff);
        assert!(signals.iter().any(|s| s.starts_with("unsafe diff")));
    }

    #[test]
    fn test_markdown_bullets_are_not_a_diff() {
        let bullets = "- item\n".repeat(80);
        assert!(filter().suspicious_signals(&bullets).is_empty());
    }

    #[test]
    fn test_category_labels() {
        for category in SafetyCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.label()));
        }
    }
}
