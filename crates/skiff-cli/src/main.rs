//! Skiff - headless driver for the skiff coding agent
//!
//! Runs one prompt through the agentic loop:
//! - Streams the model's answer and tool results to stdout
//! - Asks for confirmation of mutating tools on stdin
//! - Ctrl-C aborts the current operation
//! - `skiff mcp list` shows configured MCP servers

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use skiff_core::agent::{
    Agent, AgentConfig, AgentEvent, ConfirmationGate, ToolDispatcher, TurnOutcome,
    DEFAULT_MAX_ROUNDS,
};
use skiff_core::ai::{ModelClientConfig, OpenAiClient};
use skiff_core::mcp::McpManager;
use skiff_core::paths;
use skiff_core::tools::{register_builtin_tools, ToolRegistry};

mod confirm;

/// Skiff - terminal coding agent
#[derive(Parser)]
#[command(name = "skiff")]
#[command(about = "Run a coding agent turn from the terminal", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Model to use (defaults to SKIFF_MODEL or the built-in default)
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum tool rounds before the agent stops
    #[arg(long, default_value_t = DEFAULT_MAX_ROUNDS)]
    max_rounds: usize,

    /// Working directory for tools and MCP servers
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Approve every operation without asking
    #[arg(short, long)]
    yes: bool,

    /// Request complete responses instead of streaming
    #[arg(long)]
    no_stream: bool,

    /// What to ask the agent
    prompt: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage MCP servers from .mcp.json
    Mcp {
        #[command(subcommand)]
        action: McpCommand,
    },
}

#[derive(Subcommand)]
enum McpCommand {
    /// Connect to every configured server and print its status and tools
    List,
}

fn init_logging() -> Result<()> {
    let log_dir = paths::logs_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory: {}", e);
    }

    #[cfg(unix)]
    let null_device = "/dev/null";
    #[cfg(windows)]
    let null_device = "NUL";

    let log_file = match std::fs::File::create(log_dir.join("skiff.log")) {
        Ok(file) => file,
        Err(e) => {
            eprintln!(
                "Failed to create log file: {}, falling back to null device",
                e
            );
            std::fs::File::create(null_device)
                .with_context(|| format!("Failed to open null device {}", null_device))?
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let working_dir = match &cli.directory {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let working_dir = working_dir
        .canonicalize()
        .with_context(|| format!("Working directory {:?} is not accessible", working_dir))?;

    let mcp = Arc::new(McpManager::new(working_dir.clone()));
    let connected = mcp
        .load_and_connect()
        .await
        .context("Failed to load MCP configuration")?;
    tracing::info!(connected, "MCP servers ready");

    let result = match &cli.command {
        Some(Commands::Mcp {
            action: McpCommand::List,
        }) => {
            list_servers(&mcp).await;
            Ok(())
        }
        None if cli.prompt.is_empty() => {
            Cli::command().print_help()?;
            Ok(())
        }
        None => {
            let prompt = cli.prompt.join(" ");
            run_prompt(&cli, prompt, working_dir, mcp.clone()).await
        }
    };

    mcp.shutdown().await;
    result
}

async fn list_servers(mcp: &McpManager) {
    let servers = mcp.servers().await;
    if servers.is_empty() {
        println!("No MCP servers configured");
        return;
    }
    for server in servers {
        println!("{} ({}) - {}", server.name, server.transport, server.state);
        for tool in server.tools {
            match tool.description.as_deref().filter(|d| !d.is_empty()) {
                Some(description) => println!("  {} - {}", tool.name, description),
                None => println!("  {}", tool.name),
            }
        }
    }
}

async fn run_prompt(
    cli: &Cli,
    prompt: String,
    working_dir: PathBuf,
    mcp: Arc<McpManager>,
) -> Result<()> {
    let mut client_config = ModelClientConfig::from_env();
    if let Some(model) = &cli.model {
        client_config.model = model.clone();
    }
    let model = client_config.model.clone();
    let client = OpenAiClient::new(client_config).context("Failed to build model client")?;

    let registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(&registry).await?;

    let gate = if cli.yes {
        ConfirmationGate::auto_approve()
    } else {
        let (gate, prompts) = ConfirmationGate::new();
        tokio::spawn(confirm::run_prompt_loop(prompts));
        gate
    };

    let dispatcher = ToolDispatcher::new(registry, gate).with_mcp(mcp);
    let agent = Agent::new(
        Arc::new(client),
        dispatcher,
        AgentConfig {
            model,
            max_rounds: cli.max_rounds,
            working_dir,
            streaming: !cli.no_stream,
            ..Default::default()
        },
    );

    let abort_handle = agent.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nAborting...");
            abort_handle.abort_current_operation();
        }
    });

    let mut events = agent.process_user_message_stream(prompt);
    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::ContentDelta { content } => {
                write!(stdout, "{}", content).context("Failed to write to stdout")?;
                stdout.flush().context("Failed to write to stdout")?;
            }
            AgentEvent::ToolCalls { tool_calls } => {
                writeln!(stdout).context("Failed to write to stdout")?;
                for call in tool_calls {
                    writeln!(stdout, "> {} {}", call.name, call.raw_arguments)
                        .context("Failed to write to stdout")?;
                }
            }
            AgentEvent::ToolResult { tool_call, result } => {
                let status = if result.success { "ok" } else { "failed" };
                writeln!(stdout, "< {} [{}]", tool_call.name, status)
                    .context("Failed to write to stdout")?;
                let content = result.model_content();
                if !content.is_empty() {
                    writeln!(stdout, "{}", indent(&content)).context("Failed to write to stdout")?;
                }
            }
            AgentEvent::TokenCount { usage } => {
                tracing::info!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Token usage"
                );
            }
            AgentEvent::Error { error } => {
                eprintln!("\nError: {}", error);
            }
            AgentEvent::Done { outcome } => {
                writeln!(stdout).context("Failed to write to stdout")?;
                match outcome {
                    TurnOutcome::Completed | TurnOutcome::Failed { .. } => {}
                    TurnOutcome::Aborted => eprintln!("Aborted"),
                    TurnOutcome::RoundLimit { rounds } => {
                        eprintln!("Stopped after {} tool rounds", rounds)
                    }
                }
            }
        }
    }

    Ok(())
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("  {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}
