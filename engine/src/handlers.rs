//! Command handlers for CLI operations
//!
//! - ask / chat: run turns through the orchestrator
//! - memory: inspect and edit long-term memory
//! - keys: keychain-backed reasoning-service credentials
//! - capabilities: list the tool registry
//! - config: show, locate and validate configuration

use anyhow::{Context, Result};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::cli::{ConfigAction, KeysAction, MemoryAction};
use crate::conductor::{Conversation, Orchestrator, ResultBundle};
use crate::config::Config;
use crate::llm::client_from_config;
use crate::memory::LongTermMemory;
use crate::secrets::{SecretManager, API_KEYS_SECRET, KEYRING_SERVICE};
use crate::tools::{ScanSettings, ToolRegistry};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Wire the full pipeline from configuration.
pub fn build_orchestrator(config: &Config) -> Result<Arc<Orchestrator>> {
    let registry = Arc::new(ToolRegistry::with_builtins(ScanSettings::from(&config.worker)));
    let long_term = Arc::new(LongTermMemory::load(config.long_term_store_path()));
    let reasoning = client_from_config(&config.llm, &SecretManager::new(KEYRING_SERVICE));

    match &reasoning {
        Some(client) => tracing::info!("Reasoning service: {}", client.service_name()),
        None => tracing::info!("Reasoning service: none (deterministic mode)"),
    }

    let orchestrator = Orchestrator::from_config(config, registry, reasoning, long_term)
        .context("Failed to initialize the analysis pipeline")?;
    Ok(Arc::new(orchestrator))
}

fn print_bundle(bundle: &ResultBundle, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{}", bundle.response);
            println!();
            println!(
                "[{} | {} | {} | {}ms]",
                bundle.safety_status,
                bundle.plan.task_type,
                if bundle.tools_used.is_empty() {
                    "no tools".to_string()
                } else {
                    bundle.tools_used.join(", ")
                },
                bundle.stats.duration_ms
            );
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(bundle)?),
    }
    Ok(())
}

/// Run one request
pub async fn handle_ask(
    input: String,
    repo: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let mut conversation = Conversation::new(orchestrator, config.memory.max_exchanges);

    let cancel = CancellationToken::new();
    let guard = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            guard.cancel();
        }
    });

    let bundle = conversation
        .handle_turn_cancellable(&input, repo.as_deref(), &cancel)
        .await;
    print_bundle(&bundle, format)
}

/// Line-oriented conversation
///
/// Ctrl-C cancels the turn in flight; at the prompt it ends the session.
pub async fn handle_chat(repo: Option<String>, config: &Config, format: OutputFormat) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let mut conversation = Conversation::new(orchestrator, config.memory.max_exchanges);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Warden chat. Commands: /stats, /clear, /exit");

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();

        match input {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                conversation.clear();
                println!("Session memory cleared.");
                continue;
            }
            "/stats" => {
                let stats = conversation.session().stats();
                match format {
                    OutputFormat::Text => println!(
                        "{} messages ({} user, {} assistant), keeping the last {} exchanges",
                        stats.total_messages,
                        stats.user_messages,
                        stats.assistant_messages,
                        stats.max_exchanges
                    ),
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                }
                continue;
            }
            _ => {}
        }

        let cancel = CancellationToken::new();
        let turn = conversation.handle_turn_cancellable(input, repo.as_deref(), &cancel);
        tokio::pin!(turn);

        let bundle = tokio::select! {
            bundle = &mut turn => bundle,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                turn.await
            }
        };
        print_bundle(&bundle, format)?;
        println!();
    }

    Ok(())
}

/// Long-term memory management
pub async fn handle_memory(action: MemoryAction, config: &Config, format: OutputFormat) -> Result<()> {
    let memory = LongTermMemory::load(config.long_term_store_path());

    match action {
        MemoryAction::Show => {
            let profile = memory.snapshot();
            match format {
                OutputFormat::Text => {
                    println!("Store: {}", memory.path().display());
                    if profile.is_empty() {
                        println!("Long-term memory is empty.");
                    } else {
                        println!();
                        println!("{}", memory.preferences_string());
                    }
                }
                OutputFormat::Json => {
                    let output = json!({
                        "store": memory.path(),
                        "profile": profile,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
        }
        MemoryAction::Clear => {
            memory.clear()?;
            report(format, "Long-term memory cleared.", json!({ "cleared": true }))?;
        }
        MemoryAction::Set { key, value } => {
            memory.update_preference(key.as_str(), value.as_str())?;
            report(
                format,
                &format!("Stored preference '{}'.", key),
                json!({ "key": key, "value": value }),
            )?;
        }
        MemoryAction::Migration { source, target } => {
            memory.set_migration_preference(&source, &target)?;
            report(
                format,
                &format!("Migrations from {} will target {}.", source, target),
                json!({ "source": source.to_lowercase(), "target": target.trim() }),
            )?;
        }
    }

    Ok(())
}

/// Credential management
pub async fn handle_keys(action: KeysAction, config: &Config, format: OutputFormat) -> Result<()> {
    let manager = SecretManager::new(KEYRING_SERVICE);

    match action {
        KeysAction::Set { keys } => {
            let pool = crate::secrets::CredentialPool::parse(&keys);
            if pool.is_empty() {
                anyhow::bail!("No API keys found in input");
            }
            manager.set_secret(API_KEYS_SECRET, &keys)?;
            report(
                format,
                &format!("Stored {} API key(s) in the OS keychain.", pool.len()),
                json!({ "stored": pool.len() }),
            )?;
        }
        KeysAction::Status => {
            let from_env = std::env::var(&config.llm.api_keys_env)
                .map(|raw| crate::secrets::CredentialPool::parse(&raw).len())
                .unwrap_or(0);
            let in_keychain = manager.has_secret(API_KEYS_SECRET);
            let available = manager.load_credentials(&config.llm).len();

            match format {
                OutputFormat::Text => {
                    println!("Reasoning service: {}", config.llm.provider);
                    println!("  Enabled:            {}", config.llm.enabled);
                    println!("  ${}: {} key(s)", config.llm.api_keys_env, from_env);
                    println!(
                        "  Keychain:           {}",
                        if in_keychain { "configured" } else { "not configured" }
                    );
                    println!("  Keys in use:        {}", available);
                }
                OutputFormat::Json => {
                    let output = json!({
                        "provider": config.llm.provider,
                        "enabled": config.llm.enabled,
                        "env_var": config.llm.api_keys_env,
                        "env_keys": from_env,
                        "keychain": in_keychain,
                        "available": available,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }
        }
        KeysAction::Delete => {
            manager.delete_secret(API_KEYS_SECRET)?;
            report(format, "API keys removed from the OS keychain.", json!({ "deleted": true }))?;
        }
    }

    Ok(())
}

/// List registry descriptors
pub async fn handle_capabilities(config: &Config, format: OutputFormat) -> Result<()> {
    let registry = ToolRegistry::with_builtins(ScanSettings::from(&config.worker));
    let descriptors = registry.descriptors();

    match format {
        OutputFormat::Text => {
            println!("Capabilities ({}):", descriptors.len());
            println!();
            for descriptor in &descriptors {
                println!(
                    "  {:<20} {} {}",
                    descriptor.name,
                    if descriptor.read_only { "[read-only]" } else { "[mutating]" },
                    descriptor.description
                );
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "capabilities": descriptors,
                "count": descriptors.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Configuration management
///
/// `validate` loads the file itself, so it reports errors the startup path
/// would otherwise have turned into a failure.
pub async fn handle_config(
    action: ConfigAction,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::default_config_path()?,
    };

    match action {
        ConfigAction::Path => {
            report(format, &path.display().to_string(), json!({ "path": path }))?;
        }
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            match format {
                OutputFormat::Text => print!("{}", toml::to_string_pretty(&config)?),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
            }
        }
        ConfigAction::Validate => match Config::load_from_path(&path) {
            Ok(_) => report(
                format,
                &format!("{} is valid.", path.display()),
                json!({ "path": path, "valid": true }),
            )?,
            Err(e) => {
                report(
                    format,
                    &format!("{} is invalid: {}", path.display(), e),
                    json!({ "path": path, "valid": false, "error": e.to_string() }),
                )?;
                anyhow::bail!("Configuration is invalid");
            }
        },
    }

    Ok(())
}

/// Load from an explicit path, or the default location (created on first use).
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::load_or_create()?,
    };
    Ok(config)
}

fn report(format: OutputFormat, text: &str, value: serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", text),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&value)?),
    }
    Ok(())
}
