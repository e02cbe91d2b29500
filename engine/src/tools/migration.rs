use super::names;
use async_trait::async_trait;
use sdk::{Capability, ToolError, ToolInput, ToolOutput};
use serde_json::{json, Value};

use crate::memory::DEFAULT_MIGRATION_TARGET;

struct KnownMigration {
    source: &'static str,
    target: &'static str,
    steps: &'static [&'static str],
    breaking_changes: &'static [&'static str],
    compatibility: &'static str,
}

const KNOWN_MIGRATIONS: &[KnownMigration] = &[
    KnownMigration {
        source: "flask",
        target: "fastapi",
        steps: &[
            "Replace Flask routes with FastAPI path operation decorators",
            "Convert request.json access to Pydantic request models",
            "Move shared resources to FastAPI dependency injection",
            "Swap Flask-CORS for the FastAPI CORS middleware",
            "Convert blocking handlers to async where the I/O allows it",
        ],
        breaking_changes: &[
            "Synchronous routes need async conversion",
            "Request object access changes",
            "Middleware syntax differs",
        ],
        compatibility: "High - similar patterns",
    },
    KnownMigration {
        source: "django",
        target: "fastapi",
        steps: &[
            "Extract business logic from Django views",
            "Create Pydantic models for serialization",
            "Replace the Django ORM with SQLAlchemy or a similar ORM",
            "Move authentication to JWT or OAuth2",
            "Turn Django template responses into API responses",
        ],
        breaking_changes: &[
            "ORM changes required",
            "No counterpart for the template system",
            "Admin panel needs a separate solution",
        ],
        compatibility: "Medium - significant refactoring",
    },
    KnownMigration {
        source: "express",
        target: "fastify",
        steps: &[
            "Register routes through Fastify route declarations",
            "Wrap Express middleware with @fastify/express or port it to hooks",
            "Declare JSON schemas for request validation and serialization",
            "Replace res.send chains with returned payloads or reply.send",
            "Move error middleware to setErrorHandler",
        ],
        breaking_changes: &[
            "Middleware runs as hooks with a different lifecycle",
            "req and res are wrapped in Fastify request and reply objects",
            "Plugin encapsulation scopes decorators",
        ],
        compatibility: "High - similar routing model",
    },
];

/// Known steps and breaking changes for a framework migration
pub struct MigrationPlan;

fn plan_for(source: &str, target: &str) -> Value {
    let known = KNOWN_MIGRATIONS
        .iter()
        .find(|m| m.source == source.to_lowercase() && m.target == target.to_lowercase());

    let (steps, breaking_changes, compatibility): (Vec<String>, Vec<String>, &str) = match known {
        Some(m) => (
            m.steps.iter().map(|s| s.to_string()).collect(),
            m.breaking_changes.iter().map(|s| s.to_string()).collect(),
            m.compatibility,
        ),
        None => (
            vec![
                format!("Analyze the {} codebase", source),
                format!("Identify {} equivalents", target),
                "Define a migration strategy".to_string(),
                "Test incrementally".to_string(),
                "Roll out gradually".to_string(),
            ],
            vec!["Framework-specific changes required".to_string()],
            "Unknown - manual analysis needed",
        ),
    };

    let steps: Vec<String> = steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect();

    json!({
        "plan": format!("Migration from {} to {}", source, target),
        "source_framework": source,
        "target_framework": target,
        "steps": steps,
        "breaking_changes": breaking_changes,
        "compatibility": compatibility,
        "estimated_effort": "Medium to High",
        "known": known.is_some(),
    })
}

#[async_trait]
impl Capability for MigrationPlan {
    fn name(&self) -> &str {
        names::MIGRATION_PLAN
    }

    fn read_only(&self) -> bool {
        true
    }

    fn description(&self) -> &str {
        "Migration steps, breaking changes and compatibility for a framework pair"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "source_framework": { "type": "string" },
                "target_framework": { "type": "string", "default": DEFAULT_MIGRATION_TARGET }
            },
            "required": ["source_framework"]
        })
    }

    async fn invoke(&self, input: ToolInput) -> Result<ToolOutput, ToolError> {
        let source = input.param_str("source_framework")?;
        if source.trim().is_empty() {
            return Err(ToolError::InvalidParameter("source_framework is empty".to_string()));
        }
        let target = input
            .param_str_opt("target_framework")
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MIGRATION_TARGET.to_string());

        Ok(ToolOutput::json(plan_for(source.trim(), target.trim())))
    }
}
