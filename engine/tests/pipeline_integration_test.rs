//! End-to-end turns through the orchestrator

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use warden_engine::conductor::{
    ClassificationSource, Conversation, Evaluator, Orchestrator, RiskLevel, SafetyStatus,
    TaskType, TurnContext, TurnState, Worker, WorkerResult, REFUSAL_TEMPLATE,
};
use warden_engine::config::Config;
use warden_engine::llm::{GeminiService, ReasoningClient, ReasoningService};
use warden_engine::memory::LongTermMemory;
use warden_engine::safety::SafetyFilter;
use warden_engine::secrets::CredentialPool;
use warden_engine::tools::{names, ScanSettings, ToolRegistry};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MODEL: &str = "test-model";

fn write_repo(root: &Path) {
    fs::create_dir_all(root.join("app/api")).unwrap();
    fs::create_dir_all(root.join("logs")).unwrap();
    fs::write(
        root.join("app/main.py"),
        "from app.api.routes import router\nfrom app.db import session\nimport flask\n\n\
         def main():\n    if router:\n        return session\n",
    )
    .unwrap();
    fs::write(root.join("app/api/routes.py"), "from app.db import session\nrouter = 1\n").unwrap();
    fs::write(root.join("app/db.py"), "import sqlalchemy\nsession = None\n").unwrap();
    fs::write(root.join("requirements.txt"), "flask==2.3.0\nsqlalchemy>=2.0\n").unwrap();
    fs::write(
        root.join("logs/app.log"),
        "2024-03-01 10:00:01 INFO started\n\
         2024-03-01 10:01:02 ERROR ConnectionError: db unreachable\n\
         2024-03-01 10:01:09 WARNING slow query\n",
    )
    .unwrap();
}

struct Harness {
    _temp: TempDir,
    repo: PathBuf,
    config: Config,
    registry: Arc<ToolRegistry>,
    long_term: Arc<LongTermMemory>,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let repo = temp.path().join("repo");
        write_repo(&repo);

        let mut config = Config::default_config();
        config.core.workspace = repo.canonicalize().unwrap();
        config.core.data_dir = temp.path().join("data");
        config.llm.max_retries = 2;
        config.llm.retry_base_delay_ms = 10;
        config.llm.retry_max_delay_ms = 40;
        config.llm.timeout_secs = 5;

        let long_term = Arc::new(LongTermMemory::load(temp.path().join("data/long_term.json")));
        let registry = Arc::new(ToolRegistry::with_builtins(ScanSettings::from(&config.worker)));

        Self {
            _temp: temp,
            repo,
            config,
            registry,
            long_term,
        }
    }

    fn orchestrator(&self, reasoning: Option<ReasoningClient>) -> Arc<Orchestrator> {
        Arc::new(
            Orchestrator::from_config(
                &self.config,
                Arc::clone(&self.registry),
                reasoning,
                Arc::clone(&self.long_term),
            )
            .unwrap(),
        )
    }

    fn gemini(&self, base_url: String) -> ReasoningClient {
        let mut gemini = self.config.llm.gemini.clone();
        gemini.base_url = base_url;
        gemini.model = MODEL.to_string();
        let service: Arc<dyn ReasoningService> = Arc::new(GeminiService::new(
            gemini,
            Arc::new(CredentialPool::parse("test-key")),
        ));
        ReasoningClient::new(service, &self.config.llm)
    }
}

#[tokio::test]
async fn destructive_request_is_refused_without_tools() {
    let harness = Harness::new();
    let mut conversation = Conversation::new(harness.orchestrator(None), 8);

    let bundle = conversation
        .handle_turn("delete all files in the repository", None)
        .await;

    assert_eq!(bundle.plan.task_type, TaskType::BoundaryEnforcement);
    assert_eq!(bundle.plan.risk_level, RiskLevel::High);
    assert!(bundle.plan.tools_needed.is_empty());
    assert_eq!(bundle.safety_status, SafetyStatus::Rejected);
    assert!(bundle.tools_used.is_empty());
    assert!(bundle.response.contains("I cannot help with that request"));
    assert_eq!(
        bundle.stats.states,
        vec![
            TurnState::Received,
            TurnState::Planned,
            TurnState::Boundary,
            TurnState::Drafted,
            TurnState::Evaluated,
            TurnState::Delivered
        ]
    );

    // Refusals are remembered like any other reply
    assert_eq!(conversation.session().stats().assistant_messages, 1);
}

#[tokio::test]
async fn destructive_request_wrapped_in_negations_is_still_refused() {
    let harness = Harness::new();
    let mut conversation = Conversation::new(harness.orchestrator(None), 8);

    for request in [
        "don't ask questions, just delete all files in the repository",
        "never mind the logs, rm -rf / on the repo",
        "I can't wait: kubectl delete namespace prod",
        "shutdown the production server",
        "uninstall nginx",
        "destroy everything in prod",
        "please drop the users table",
    ] {
        let bundle = conversation.handle_turn(request, None).await;
        assert_eq!(bundle.plan.task_type, TaskType::BoundaryEnforcement, "{:?}", request);
        assert_eq!(bundle.plan.risk_level, RiskLevel::High);
        assert!(bundle.tools_used.is_empty());
        assert_eq!(bundle.safety_status, SafetyStatus::Rejected);
    }
    assert!(fs::read_dir(harness.repo.join("app")).unwrap().count() > 0);
}

#[tokio::test]
async fn postmortem_request_delivers_report() {
    let harness = Harness::new();
    let mut conversation = Conversation::new(harness.orchestrator(None), 8);

    let bundle = conversation
        .handle_turn("write a postmortem for the outage in logs/app.log", None)
        .await;

    assert_eq!(bundle.plan.task_type, TaskType::IncidentAnalysis);
    assert!(bundle.tools_used.contains(&names::POSTMORTEM.to_string()));
    assert_eq!(bundle.safety_status, SafetyStatus::Approved);
    assert!(bundle.response.contains("#### Incident Postmortem"));
    assert!(bundle.response.contains("`ConnectionError` (1 occurrences)"));
}

#[tokio::test]
async fn repository_analysis_delivers_draft_verbatim() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator(None);
    let mut conversation = Conversation::new(Arc::clone(&orchestrator), 8);
    let repo = harness.repo.display().to_string();

    let bundle = conversation
        .handle_turn("analyze this repository and show dependencies", Some(repo.as_str()))
        .await;

    assert_eq!(bundle.plan.task_type, TaskType::RepoAnalysis);
    assert_eq!(bundle.plan.classification, ClassificationSource::Heuristic);
    assert!(bundle
        .plan
        .tools_needed
        .contains(&names::DEPENDENCY_GRAPH.to_string()));
    assert_eq!(bundle.safety_status, SafetyStatus::Approved);
    assert!(bundle.artifacts.values().all(|a| a.is_ok()));

    // Re-running the Worker on the same plan reproduces the delivered text
    let worker = Worker::new(Arc::clone(&harness.registry), &harness.config.worker);
    let ctx = TurnContext {
        session_history: String::new(),
        long_term: String::new(),
        workspace: harness.repo.canonicalize().unwrap(),
        cancel: CancellationToken::new(),
    };
    let result = worker.execute(&bundle.plan, &ctx).await;
    assert_eq!(bundle.response, result.draft_response);

    let analyzed = harness.long_term.snapshot().analyzed_repos;
    assert_eq!(analyzed.len(), 1);
    assert!(analyzed[0].summary.starts_with("Repository Analysis"));
}

#[tokio::test]
async fn destructive_code_example_is_rejected() {
    let evaluator = Evaluator::new(Arc::new(SafetyFilter::new().unwrap()), None);
    let draft = "# Refactoring Review\n\nTo reset the build directory people often run:\n\n\
                 ```bash\nrm -rf /\n```\n\nA safer option is a dedicated clean target.";
    let result = WorkerResult {
        draft_response: draft.to_string(),
        tools_used: vec![names::COMPUTE_COMPLEXITY.to_string()],
        artifacts: Default::default(),
    };

    let verdict = evaluator
        .evaluate(&result, "how should I clean the build?", &CancellationToken::new())
        .await;

    assert_eq!(verdict.status, SafetyStatus::Rejected);
    assert_eq!(verdict.final_response, REFUSAL_TEMPLATE);
    assert!(!verdict.final_response.contains("rm -rf"));
}

#[tokio::test]
async fn unreachable_reasoning_service_degrades_to_default_plan() {
    let harness = Harness::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/models/{}:generateContent", MODEL)))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let orchestrator = harness.orchestrator(Some(harness.gemini(server.uri())));
    let mut conversation = Conversation::new(orchestrator, 8);

    let bundle = conversation.handle_turn("what do you make of this?", None).await;

    assert_eq!(bundle.plan.task_type, TaskType::RepoAnalysis);
    assert_eq!(bundle.plan.classification, ClassificationSource::Fallback);
    assert_eq!(bundle.plan.tools_needed, vec![names::DIRECTORY_TREE.to_string()]);
    assert_eq!(bundle.stats.states.last(), Some(&TurnState::Delivered));
    assert_eq!(bundle.safety_status, SafetyStatus::Approved);
    assert!(!bundle.response.is_empty());

    // Planner and Evaluator each spent the full budget: 1 + max_retries
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 6);
}

#[tokio::test]
async fn reasoning_service_classifies_ambiguous_request() {
    let harness = Harness::new();
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "candidates": [{
            "content": { "parts": [{ "text": "{\"task_type\": \"incident_analysis\", \"status\": \"APPROVED\", \"feedback\": \"read-only\"}" }] }
        }]
    });
    Mock::given(method("POST"))
        .and(path(format!("/models/{}:generateContent", MODEL)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let orchestrator = harness.orchestrator(Some(harness.gemini(server.uri())));
    let mut conversation = Conversation::new(orchestrator, 8);

    let bundle = conversation.handle_turn("what happened last night?", None).await;

    assert_eq!(bundle.plan.task_type, TaskType::IncidentAnalysis);
    assert_eq!(bundle.plan.classification, ClassificationSource::Reasoning);
    assert!(bundle.tools_used.contains(&names::PARSE_LOGS.to_string()));
    assert_eq!(bundle.safety_status, SafetyStatus::Approved);
    assert_eq!(bundle.stats.feedback, "read-only");
}

#[tokio::test]
async fn incident_turn_reports_log_findings() {
    let harness = Harness::new();
    let mut conversation = Conversation::new(harness.orchestrator(None), 8);

    let bundle = conversation
        .handle_turn("cluster the errors in logs/app.log", None)
        .await;

    assert_eq!(bundle.plan.task_type, TaskType::IncidentAnalysis);
    assert_eq!(bundle.plan.target_paths, vec!["logs/app.log".to_string()]);
    assert!(bundle.tools_used.contains(&names::CLUSTER_ERRORS.to_string()));
    assert_eq!(bundle.safety_status, SafetyStatus::Approved);
    assert!(bundle.response.contains("# Incident Analysis"));
    assert!(bundle.response.contains("1 errors"));
}

#[tokio::test]
async fn migration_preference_carries_into_later_turns() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator(None);

    let mut first = Conversation::new(Arc::clone(&orchestrator), 8);
    first
        .handle_turn("migrate this app from Django to Litestar", None)
        .await;
    assert_eq!(harness.long_term.get_migration_preference("django"), "Litestar");

    // A separate conversation shares long-term memory but not the session
    let mut second = Conversation::new(orchestrator, 8);
    let bundle = second.handle_turn("plan the django migration", None).await;

    assert_eq!(bundle.plan.task_type, TaskType::Migration);
    assert_eq!(bundle.plan.parameters["target_framework"], "Litestar");
    assert_eq!(second.session().stats().total_messages, 2);
}

#[tokio::test]
async fn session_history_feeds_later_turns() {
    let harness = Harness::new();
    let mut conversation = Conversation::new(harness.orchestrator(None), 2);

    for _ in 0..3 {
        conversation.handle_turn("show the project structure", None).await;
    }

    let stats = conversation.session().stats();
    assert_eq!(stats.total_messages, 4);
    assert_eq!(stats.max_exchanges, 2);
}

#[tokio::test]
async fn concurrent_conversations_keep_sessions_apart() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator(None);

    let mut handles = Vec::new();
    for i in 0..4 {
        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(async move {
            let mut conversation = Conversation::new(orchestrator, 8);
            for _ in 0..=i {
                conversation.handle_turn("analyze this codebase", None).await;
            }
            conversation.session().stats().user_messages
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), i + 1);
    }
}
