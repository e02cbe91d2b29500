//! Conductor Evaluator
//!
//! Second injection point of the safety filter. Scans the Worker's draft
//! and every embedded code span, then asks the reasoning service for a
//! contextual verdict on paraphrased or obfuscated violations. A rejected
//! draft is replaced wholesale by [`REFUSAL_TEMPLATE`].

use crate::conductor::context::{ContextAssembler, EVALUATOR_SYSTEM_PROMPT};
use crate::conductor::types::{SafetyStatus, Verdict, WorkerResult};
use crate::llm::{extract_json, ReasoningClient};
use crate::safety::{SafetyCategory, SafetyFilter};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const REFUSAL_TEMPLATE: &str = "\
I apologize, but I cannot perform that operation. I am a read-only analysis tool \
and I do not delete, modify, or execute anything on your system.

I CAN help you:
- Analyze repository structure and dependencies
- Parse and cluster log files
- Estimate code complexity
- Draft documentation and migration plans as text

Would you like me to suggest a safe, read-only alternative?";

/// Result of the deterministic scan over a draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Violation(SafetyCategory),
    Suspicious(Vec<String>),
    Clean,
}

pub struct Evaluator {
    safety: Arc<SafetyFilter>,
    reasoning: Option<ReasoningClient>,
}

impl Evaluator {
    pub fn new(safety: Arc<SafetyFilter>, reasoning: Option<ReasoningClient>) -> Self {
        Self { safety, reasoning }
    }

    /// Deterministic check over prose and code spans.
    ///
    /// Code spans get no refusal exemption: `rm -rf /` inside an example is
    /// still a violation.
    pub fn scan(&self, draft: &str) -> ScanOutcome {
        if let Some(category) = self.safety.classify(draft).category {
            return ScanOutcome::Violation(category);
        }
        for span in self.safety.code_spans(draft) {
            if let Some(category) = self.safety.classify_code(&span).category {
                return ScanOutcome::Violation(category);
            }
        }

        let signals = self.safety.suspicious_signals(draft);
        if signals.is_empty() {
            ScanOutcome::Clean
        } else {
            ScanOutcome::Suspicious(signals)
        }
    }

    /// Decide the verdict for a drafted response.
    ///
    /// Holds no state between calls, so an unchanged result and input
    /// always evaluate the same way as long as the contextual answer does.
    pub async fn evaluate(
        &self,
        result: &WorkerResult,
        input: &str,
        cancel: &CancellationToken,
    ) -> Verdict {
        let draft = &result.draft_response;

        let signals = match self.scan(draft) {
            ScanOutcome::Violation(category) => {
                warn!("Draft rejected by pattern scan: {}", category);
                return Self::refusal(format!(
                    "Draft contains a {} instruction ({})",
                    category.description(),
                    category
                ));
            }
            ScanOutcome::Suspicious(signals) => signals,
            ScanOutcome::Clean => Vec::new(),
        };

        if let Some(verdict) = self.contextual_check(draft, input, cancel).await {
            return verdict;
        }

        if !signals.is_empty() {
            warn!(
                "Contextual check unavailable and draft carries unsafe signals: {}",
                signals.join("; ")
            );
            return Self::refusal(format!(
                "Unverified unsafe signals in draft: {}",
                signals.join("; ")
            ));
        }

        debug!("Approving draft on the pattern scan alone");
        Self::approval(draft, "Approved by pattern scan; contextual check unavailable")
    }

    /// Verdict for a synthesized boundary refusal.
    ///
    /// The draft is rescanned and only delivered if it passes, otherwise the
    /// template goes out instead.
    pub fn evaluate_boundary(&self, draft: &str, category: SafetyCategory) -> Verdict {
        let final_response = match self.scan(draft) {
            ScanOutcome::Clean => draft.to_string(),
            outcome => {
                warn!("Boundary draft failed its own scan: {:?}", outcome);
                REFUSAL_TEMPLATE.to_string()
            }
        };
        Verdict {
            status: SafetyStatus::Rejected,
            feedback: format!(
                "Request asks for a {} operation ({})",
                category.description(),
                category
            ),
            final_response,
        }
    }

    /// Conservative rejection carrying the fixed template
    pub fn refusal(feedback: impl Into<String>) -> Verdict {
        Verdict {
            status: SafetyStatus::Rejected,
            feedback: feedback.into(),
            final_response: REFUSAL_TEMPLATE.to_string(),
        }
    }

    fn approval(draft: &str, feedback: impl Into<String>) -> Verdict {
        Verdict {
            status: SafetyStatus::Approved,
            feedback: feedback.into(),
            final_response: draft.to_string(),
        }
    }

    /// `None` when no service is configured, the call fails, or the answer
    /// cannot be parsed.
    async fn contextual_check(
        &self,
        draft: &str,
        input: &str,
        cancel: &CancellationToken,
    ) -> Option<Verdict> {
        let client = self.reasoning.as_ref()?;
        let request = client.request(
            ContextAssembler::evaluator_prompt(input, draft),
            EVALUATOR_SYSTEM_PROMPT,
        );

        let answer = match client.generate(&request, cancel).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Contextual check via {} failed: {}", client.service_name(), e);
                return None;
            }
        };

        let Some(json) = extract_json(&answer) else {
            warn!("Contextual check answer was not JSON");
            return None;
        };
        let feedback = json
            .get("feedback")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();

        match json
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_uppercase())
            .as_deref()
        {
            Some("APPROVED") => Some(Self::approval(draft, feedback)),
            Some("REJECTED") => {
                warn!("Contextual check rejected the draft: {}", feedback);
                let feedback = if feedback.is_empty() {
                    "Rejected by contextual check".to_string()
                } else {
                    format!("Rejected by contextual check: {}", feedback)
                };
                Some(Self::refusal(feedback))
            }
            other => {
                warn!("Contextual check returned unknown status {:?}", other);
                None
            }
        }
    }
}
