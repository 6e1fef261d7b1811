use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use deepresearch_core::{
    ConfigLoader, DeepResearchArgs, JobClient, JsonFileStateStore, ProviderChoice,
    ResearchJobManager, ResearchTools, SessionRegistry, TelemetryOptions, ToolResponse,
    init_telemetry,
};
use serde::Serialize;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "deepresearch-cli",
    version,
    about = "Run and resume DeepResearch threads from the command line"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Configuration file (defaults to `DEEPRESEARCH_CONFIG` or `config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON file holding this conversation's research sessions.
    #[arg(
        long,
        global = true,
        env = "DEEPRESEARCH_STATE_FILE",
        default_value = "data/research_sessions.json"
    )]
    state_file: PathBuf,

    /// Use the offline stub provider instead of the hosted API.
    #[arg(long, global = true)]
    offline: bool,

    /// Verbose tracing of provider calls and poll iterations.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new research thread, or continue one with `--interaction`.
    Research(ResearchArgs),
    /// List resumable research threads.
    Sessions,
    /// Forget one research thread.
    Clear(InteractionArgs),
    /// Forget every research thread.
    ClearAll,
    /// Fetch the provider-side status of an interaction.
    Status(InteractionArgs),
    /// Ask the provider to stop an interaction. The session list is not changed.
    Cancel(InteractionArgs),
    /// Print the tool declarations exposed to the agent.
    Tools,
}

impl Command {
    fn needs_provider(&self) -> bool {
        matches!(
            self,
            Command::Research(_) | Command::Status(_) | Command::Cancel(_)
        )
    }
}

#[derive(Args, Debug)]
struct ResearchArgs {
    /// Research topic or question.
    #[arg(long)]
    query: String,

    /// Interaction id of the thread to continue.
    #[arg(long)]
    interaction: Option<String>,
}

#[derive(Args, Debug)]
struct InteractionArgs {
    /// Interaction id as listed by `sessions`.
    #[arg(long)]
    interaction: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load(cli.global.config.clone())?;
    config.logging.debug |= cli.global.debug;

    init_telemetry(TelemetryOptions {
        env_filter: std::env::var("RUST_LOG")
            .ok()
            .or_else(|| Some(config.logging.level.clone())),
        debug: config.logging.debug,
        ..TelemetryOptions::default()
    })?;

    // Session maintenance never reaches the provider, so it needs no credentials.
    let provider = if cli.command.needs_provider() {
        ProviderChoice::offline(cli.global.offline)
    } else {
        ProviderChoice::Stub
    };
    let tools = ResearchTools::new(ResearchJobManager::from_config(
        provider.build(&config)?,
        &config,
    ));
    let registry = SessionRegistry::new(Arc::new(JsonFileStateStore::new(
        cli.global.state_file.clone(),
    )));

    let rt = Runtime::new()?;
    rt.block_on(async move {
        match cli.command {
            Command::Research(args) => research_command(&tools, &registry, args).await,
            Command::Sessions => print_json(&tools.list_research_sessions(&registry).await),
            Command::Clear(args) => print_json(
                &tools
                    .clear_research_session(&registry, &args.interaction)
                    .await,
            ),
            Command::ClearAll => print_json(&tools.clear_all_research_sessions(&registry).await),
            Command::Status(args) => status_command(&tools, &args.interaction).await,
            Command::Cancel(args) => cancel_command(&tools, &args.interaction).await,
            Command::Tools => print_json(&ResearchTools::declarations()),
        }
    })
}

async fn research_command(
    tools: &ResearchTools,
    registry: &SessionRegistry,
    args: ResearchArgs,
) -> Result<()> {
    info!(query = %args.query, interaction = ?args.interaction, "starting research");

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; abandoning local polling");
                cancel.cancel();
            }
        })
    };

    let response = tools
        .deep_research_until_cancelled(
            registry,
            DeepResearchArgs::new(args.query, args.interaction),
            &cancel,
        )
        .await;
    watcher.abort();

    print_json(&response)?;
    exit_status(&response)
}

async fn status_command(tools: &ResearchTools, interaction: &str) -> Result<()> {
    let job = tools
        .manager()
        .client()
        .get(interaction)
        .await
        .with_context(|| format!("failed to fetch interaction {interaction}"))?;
    print_json(&job)
}

async fn cancel_command(tools: &ResearchTools, interaction: &str) -> Result<()> {
    let job = tools
        .manager()
        .client()
        .cancel(interaction)
        .await
        .with_context(|| format!("failed to cancel interaction {interaction}"))?;
    info!(interaction, status = %job.status, "cancel requested");
    print_json(&job)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_status(response: &ToolResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    anyhow::bail!(
        "research did not complete: {}",
        response.message.as_deref().unwrap_or("unknown error")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn research_accepts_resume_handle_and_global_flags() {
        let cli = Cli::try_parse_from([
            "deepresearch-cli",
            "research",
            "--query",
            "What is quantum computing?",
            "--interaction",
            "J1",
            "--offline",
        ])
        .unwrap();

        assert!(cli.global.offline);
        match cli.command {
            Command::Research(args) => {
                assert_eq!(args.query, "What is quantum computing?");
                assert_eq!(args.interaction.as_deref(), Some("J1"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn only_provider_commands_need_credentials() {
        let sessions = Cli::try_parse_from(["deepresearch-cli", "sessions"]).unwrap();
        assert!(!sessions.command.needs_provider());
        let status =
            Cli::try_parse_from(["deepresearch-cli", "status", "--interaction", "J1"]).unwrap();
        assert!(status.command.needs_provider());
    }

    #[test]
    fn clear_requires_interaction() {
        assert!(Cli::try_parse_from(["deepresearch-cli", "clear"]).is_err());
    }
}
