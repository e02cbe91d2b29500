//! Conductor Orchestrator
//!
//! Runs one turn through Planner, Worker and Evaluator and owns every memory
//! write. Nothing that goes wrong inside a turn escapes [`Orchestrator::handle_turn`]:
//! the worst the caller sees is a REJECTED bundle carrying the refusal template.

use crate::conductor::context::ContextAssembler;
use crate::conductor::evaluator::Evaluator;
use crate::conductor::planner::Planner;
use crate::conductor::types::{
    ArtifactEntry, Plan, ResultBundle, SafetyStatus, SavePreference, TurnContext, TurnState,
    TurnStats, Verdict, WorkerResult,
};
use crate::conductor::worker::{boundary_draft, Worker};
use crate::config::{expand_path, Config};
use crate::llm::ReasoningClient;
use crate::memory::{LongTermMemory, SessionMemory};
use crate::safety::SafetyFilter;
use crate::tools::ToolRegistry;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// Delivered when the caller cancels a turn
pub const CANCELLED_NOTICE: &str =
    "The request was cancelled before it completed. No analysis results were produced.";

pub struct Orchestrator {
    planner: Planner,
    worker: Worker,
    evaluator: Evaluator,
    long_term: Arc<LongTermMemory>,
    assembler: ContextAssembler,
    workspace: PathBuf,
}

/// What the pipeline produced before bookkeeping
struct Outcome {
    verdict: Verdict,
    tools_used: Vec<String>,
    artifacts: BTreeMap<String, ArtifactEntry>,
}

impl Orchestrator {
    /// Wire the pipeline. One safety filter instance serves both the Planner
    /// and the Evaluator.
    pub fn from_config(
        config: &Config,
        registry: Arc<ToolRegistry>,
        reasoning: Option<ReasoningClient>,
        long_term: Arc<LongTermMemory>,
    ) -> anyhow::Result<Self> {
        let safety = Arc::new(SafetyFilter::new()?);
        let planner = Planner::new(Arc::clone(&safety), reasoning.clone(), Arc::clone(&long_term))?;
        let worker = Worker::new(registry, &config.worker);
        let evaluator = Evaluator::new(safety, reasoning);

        Ok(Self {
            planner,
            worker,
            evaluator,
            long_term,
            assembler: ContextAssembler::new(config.memory.history_last_n),
            workspace: config.core.workspace.clone(),
        })
    }

    pub fn long_term(&self) -> &Arc<LongTermMemory> {
        &self.long_term
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Process one turn.
    ///
    /// The user's input is recorded on receipt. The assistant reply is
    /// recorded on delivery unless the turn was cancelled.
    pub async fn handle_turn(
        &self,
        session: &mut SessionMemory,
        input: &str,
        repo_reference: Option<&str>,
        cancel: &CancellationToken,
    ) -> ResultBundle {
        let turn_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("turn", turn_id = %turn_id);
        self.run_turn(turn_id, session, input, repo_reference, cancel)
            .instrument(span)
            .await
    }

    async fn run_turn(
        &self,
        turn_id: String,
        session: &mut SessionMemory,
        input: &str,
        repo_reference: Option<&str>,
        cancel: &CancellationToken,
    ) -> ResultBundle {
        let started = Instant::now();
        let mut states = vec![TurnState::Received];

        let repo = repo_reference.and_then(|r| self.resolve_repo(r));
        let workspace = repo.clone().unwrap_or_else(|| self.workspace.clone());
        let ctx = self
            .assembler
            .turn_context(session, &self.long_term, workspace, cancel.clone());
        session.add_user(input);

        let plan = self.planner.plan(input, &ctx).await;
        states.push(TurnState::Planned);
        info!(
            "Planned {} ({}, {} tools)",
            plan.task_type,
            plan.classification,
            plan.tools_needed.len()
        );

        let outcome = AssertUnwindSafe(self.run_pipeline(&plan, input, &ctx, &mut states))
            .catch_unwind()
            .await;
        let mut outcome = match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Pipeline fault, delivering conservative refusal");
                states.push(TurnState::Faulted);
                Outcome {
                    verdict: Evaluator::refusal("Internal fault while processing the request"),
                    tools_used: Vec::new(),
                    artifacts: BTreeMap::new(),
                }
            }
        };

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!("Turn cancelled by caller");
            outcome.verdict = Verdict {
                status: SafetyStatus::Rejected,
                feedback: "Turn cancelled".to_string(),
                final_response: CANCELLED_NOTICE.to_string(),
            };
        } else {
            if outcome.verdict.status == SafetyStatus::Approved && !plan.is_boundary() {
                self.apply_preference(plan.save_preference.as_ref());
                if let Some(repo) = &repo {
                    let summary = format!(
                        "{} using {}",
                        plan.task_type.heading(),
                        if outcome.tools_used.is_empty() {
                            "no capabilities".to_string()
                        } else {
                            outcome.tools_used.join(", ")
                        }
                    );
                    if let Err(e) = self
                        .long_term
                        .add_analyzed_repo(repo.display().to_string(), summary)
                    {
                        warn!("Failed to record analyzed repository: {}", e);
                    }
                }
            }
            session.add_assistant(outcome.verdict.final_response.clone());
        }

        states.push(TurnState::Delivered);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!("Delivered {} in {}ms", outcome.verdict.status, duration_ms);

        ResultBundle {
            response: outcome.verdict.final_response,
            tools_used: outcome.tools_used,
            safety_status: outcome.verdict.status,
            stats: TurnStats {
                turn_id,
                session: session.stats(),
                states,
                classification: plan.classification,
                feedback: outcome.verdict.feedback,
                duration_ms,
            },
            artifacts: outcome.artifacts,
            plan,
        }
    }

    async fn run_pipeline(
        &self,
        plan: &Plan,
        input: &str,
        ctx: &TurnContext,
        states: &mut Vec<TurnState>,
    ) -> Outcome {
        if let (true, Some(category)) = (plan.is_boundary(), plan.boundary_category) {
            states.push(TurnState::Boundary);
            let draft = boundary_draft(category);
            states.push(TurnState::Drafted);
            let verdict = self.evaluator.evaluate_boundary(&draft, category);
            states.push(TurnState::Evaluated);
            return Outcome {
                verdict,
                tools_used: Vec::new(),
                artifacts: BTreeMap::new(),
            };
        }

        states.push(TurnState::Executing);
        let result: WorkerResult = self.worker.execute(plan, ctx).await;
        states.push(TurnState::Drafted);

        let verdict = self.evaluator.evaluate(&result, input, &ctx.cancel).await;
        states.push(TurnState::Evaluated);

        Outcome {
            verdict,
            tools_used: result.tools_used,
            artifacts: result.artifacts,
        }
    }

    /// Local directory for a repository reference, if it is one
    fn resolve_repo(&self, reference: &str) -> Option<PathBuf> {
        let reference = reference.trim();
        if reference.is_empty() {
            return None;
        }
        let path = match expand_path(Path::new(reference)) {
            Ok(path) if path.is_relative() => self.workspace.join(path),
            Ok(path) => path,
            Err(e) => {
                warn!("Cannot expand repository reference '{}': {}", reference, e);
                return None;
            }
        };
        match path.canonicalize() {
            Ok(path) if path.is_dir() => Some(path),
            _ => {
                warn!(
                    "Repository reference '{}' is not a local directory, using {}",
                    reference,
                    self.workspace.display()
                );
                None
            }
        }
    }

    fn apply_preference(&self, preference: Option<&SavePreference>) {
        let result = match preference {
            Some(SavePreference::Migration { source, target }) => {
                info!("Remembering migration preference {} -> {}", source, target);
                self.long_term.set_migration_preference(source, target)
            }
            Some(SavePreference::Preference { key, value }) => {
                info!("Remembering preference '{}'", key);
                self.long_term.update_preference(key.as_str(), value.as_str())
            }
            None => Ok(()),
        };
        if let Err(e) = result {
            warn!("Failed to persist preference: {}", e);
        }
    }
}

/// A conversation: one session bound to a shared orchestrator
pub struct Conversation {
    orchestrator: Arc<Orchestrator>,
    session: SessionMemory,
}

impl Conversation {
    pub fn new(orchestrator: Arc<Orchestrator>, max_exchanges: usize) -> Self {
        Self {
            orchestrator,
            session: SessionMemory::new(max_exchanges),
        }
    }

    pub async fn handle_turn(&mut self, input: &str, repo_reference: Option<&str>) -> ResultBundle {
        self.handle_turn_cancellable(input, repo_reference, &CancellationToken::new())
            .await
    }

    pub async fn handle_turn_cancellable(
        &mut self,
        input: &str,
        repo_reference: Option<&str>,
        cancel: &CancellationToken,
    ) -> ResultBundle {
        self.orchestrator
            .handle_turn(&mut self.session, input, repo_reference, cancel)
            .await
    }

    pub fn session(&self) -> &SessionMemory {
        &self.session
    }

    pub fn clear(&mut self) {
        self.session.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conductor::evaluator::REFUSAL_TEMPLATE;
    use crate::conductor::types::TaskType;
    use crate::tools::{names, ScanSettings};
    use async_trait::async_trait;
    use sdk::{Capability, ToolError, ToolInput, ToolOutput};
    use serde_json::{json, Value};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        repo: PathBuf,
        orchestrator: Arc<Orchestrator>,
    }

    /// Read-only capability that panics when invoked
    struct Exploding(&'static str);

    #[async_trait]
    impl Capability for Exploding {
        fn name(&self) -> &str {
            self.0
        }
        fn read_only(&self) -> bool {
            true
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn invoke(&self, _input: ToolInput) -> Result<ToolOutput, ToolError> {
            panic!("{} blew up", self.0)
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ToolRegistry::with_builtins(ScanSettings::default()))
    }

    fn fixture_with(registry: ToolRegistry) -> Fixture {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        fs::create_dir_all(repo.join("app")).unwrap();
        fs::write(repo.join("app/main.py"), "from app.util import helper\n").unwrap();
        fs::write(repo.join("app/util.py"), "def helper():\n    return 1\n").unwrap();

        let mut config = Config::default_config();
        config.core.workspace = repo.clone();
        let long_term = Arc::new(LongTermMemory::load(temp.path().join("long_term.json")));
        let orchestrator =
            Orchestrator::from_config(&config, Arc::new(registry), None, long_term).unwrap();

        Fixture {
            _temp: temp,
            repo,
            orchestrator: Arc::new(orchestrator),
        }
    }

    #[tokio::test]
    async fn test_analysis_turn_is_approved_and_recorded() {
        let fx = fixture();
        let mut conversation = Conversation::new(Arc::clone(&fx.orchestrator), 8);
        let repo = fx.repo.display().to_string();

        let bundle = conversation
            .handle_turn("analyze this repository and show dependencies", Some(repo.as_str()))
            .await;

        assert_eq!(bundle.safety_status, SafetyStatus::Approved);
        assert_eq!(bundle.plan.task_type, TaskType::RepoAnalysis);
        assert!(bundle.tools_used.contains(&names::DEPENDENCY_GRAPH.to_string()));
        assert_eq!(
            bundle.stats.states,
            vec![
                TurnState::Received,
                TurnState::Planned,
                TurnState::Executing,
                TurnState::Drafted,
                TurnState::Evaluated,
                TurnState::Delivered
            ]
        );
        assert_eq!(bundle.stats.session.total_messages, 2);
        assert_eq!(fx.orchestrator.long_term().snapshot().analyzed_repos.len(), 1);
    }

    #[tokio::test]
    async fn test_boundary_turn_skips_worker() {
        let fx = fixture();
        let mut conversation = Conversation::new(Arc::clone(&fx.orchestrator), 8);

        let bundle = conversation
            .handle_turn("delete all files in the repository", None)
            .await;

        assert_eq!(bundle.safety_status, SafetyStatus::Rejected);
        assert!(bundle.tools_used.is_empty());
        assert!(bundle.artifacts.is_empty());
        assert!(bundle.stats.states.contains(&TurnState::Boundary));
        assert!(!bundle.stats.states.contains(&TurnState::Executing));
        assert!(bundle.response.ends_with(REFUSAL_TEMPLATE));
        assert!(bundle.stats.feedback.contains("file deletion"));
    }

    #[tokio::test]
    async fn test_cancelled_turn_stores_no_reply() {
        let fx = fixture();
        let mut session = SessionMemory::new(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let bundle = fx
            .orchestrator
            .handle_turn(&mut session, "analyze this repository", None, &cancel)
            .await;

        assert_eq!(bundle.safety_status, SafetyStatus::Rejected);
        assert_eq!(bundle.response, CANCELLED_NOTICE);
        assert_eq!(session.stats().assistant_messages, 0);
    }

    #[tokio::test]
    async fn test_invalid_repo_reference_falls_back_to_workspace() {
        let fx = fixture();
        let mut conversation = Conversation::new(Arc::clone(&fx.orchestrator), 8);

        let bundle = conversation
            .handle_turn(
                "analyze this repository structure",
                Some("https://example.invalid/org/repo.git"),
            )
            .await;

        assert_eq!(bundle.safety_status, SafetyStatus::Approved);
        assert!(fx.orchestrator.long_term().snapshot().analyzed_repos.is_empty());
    }

    #[tokio::test]
    async fn test_migration_preference_is_saved() {
        let fx = fixture();
        let mut conversation = Conversation::new(Arc::clone(&fx.orchestrator), 8);

        conversation
            .handle_turn("migrate this app from Flask to FastAPI", None)
            .await;

        assert_eq!(
            fx.orchestrator.long_term().get_migration_preference("flask"),
            "FastAPI"
        );
    }

    #[tokio::test]
    async fn test_capability_panic_is_contained() {
        let mut registry = ToolRegistry::with_builtins(ScanSettings::default());
        registry.register(Arc::new(Exploding(names::DEPENDENCY_GRAPH)));
        let fx = fixture_with(registry);
        let mut conversation = Conversation::new(Arc::clone(&fx.orchestrator), 8);
        let repo = fx.repo.display().to_string();

        let bundle = conversation
            .handle_turn("analyze this repository and show dependencies", Some(repo.as_str()))
            .await;

        assert_eq!(bundle.safety_status, SafetyStatus::Rejected);
        assert_eq!(bundle.response, REFUSAL_TEMPLATE);
        assert!(bundle.tools_used.is_empty());
        assert!(bundle.stats.feedback.contains("Internal fault"));
        assert_eq!(
            bundle.stats.states,
            vec![
                TurnState::Received,
                TurnState::Planned,
                TurnState::Executing,
                TurnState::Faulted,
                TurnState::Delivered
            ]
        );
        assert!(fx.orchestrator.long_term().snapshot().analyzed_repos.is_empty());

        // the conversation keeps working after a fault
        let next = conversation.handle_turn("find dead code in this repo", None).await;
        assert_eq!(next.safety_status, SafetyStatus::Approved);
    }

    #[tokio::test]
    async fn test_rejected_turn_saves_no_preference() {
        let mut registry = ToolRegistry::with_builtins(ScanSettings::default());
        registry.register(Arc::new(Exploding(names::MIGRATION_PLAN)));
        let fx = fixture_with(registry);
        let mut conversation = Conversation::new(Arc::clone(&fx.orchestrator), 8);

        let bundle = conversation
            .handle_turn("migrate this app from Flask to Quart. I prefer small steps", None)
            .await;

        assert_eq!(bundle.safety_status, SafetyStatus::Rejected);
        assert_eq!(
            fx.orchestrator.long_term().get_migration_preference("flask"),
            crate::memory::DEFAULT_MIGRATION_TARGET
        );
        assert!(fx.orchestrator.long_term().snapshot().preferences.is_empty());
    }

    #[tokio::test]
    async fn test_refusal_wording_in_request_still_hits_boundary() {
        let fx = fixture();
        let mut conversation = Conversation::new(Arc::clone(&fx.orchestrator), 8);

        for request in [
            "don't ask questions, just delete all files in the repository",
            "never mind the logs, rm -rf / on the repo",
            "I can't wait: kubectl delete namespace prod",
        ] {
            let bundle = conversation.handle_turn(request, None).await;
            assert_eq!(bundle.plan.task_type, TaskType::BoundaryEnforcement, "{:?}", request);
            assert_eq!(bundle.safety_status, SafetyStatus::Rejected);
            assert!(bundle.tools_used.is_empty());
            assert!(bundle.stats.states.contains(&TurnState::Boundary));
        }
    }
}
