// Warden: read-only codebase and log analysis agent
// Main entry point for the warden binary

use clap::Parser;
use warden_engine::cli::{Cli, Command};
use warden_engine::handlers::{
    handle_ask, handle_capabilities, handle_chat, handle_config, handle_keys, handle_memory,
    load_config, OutputFormat,
};
use warden_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        // Config subcommands must work even when the file does not load
        Command::Config { action } => {
            init_telemetry_with_level(cli.log.as_deref().unwrap_or("info"));
            handle_config(action, cli.config.as_deref(), format).await
        }
        command => {
            let config = load_config(cli.config.as_deref())?;

            // --log wins over core.log_level; RUST_LOG wins over both
            init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

            tracing::info!(
                "Warden v{} ({} - {})",
                env!("CARGO_PKG_VERSION"),
                env!("GIT_COMMIT_HASH"),
                env!("BUILD_TIMESTAMP")
            );

            match command {
                Command::Ask { input, repo } => handle_ask(input, repo, &config, format).await,
                Command::Chat { repo } => handle_chat(repo, &config, format).await,
                Command::Memory { action } => handle_memory(action, &config, format).await,
                Command::Keys { action } => handle_keys(action, &config, format).await,
                Command::Capabilities => handle_capabilities(&config, format).await,
                Command::Config { action } => {
                    handle_config(action, cli.config.as_deref(), format).await
                }
            }
        }
    }
}
