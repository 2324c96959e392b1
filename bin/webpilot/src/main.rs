mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use webpilot_agent::{AgentSession, ToolCatalog};
use webpilot_core::{Config, ConfigOverrides};
use webpilot_mcp::McpServer;
use webpilot_provider::{AzureCredential, AzureOpenAIProvider};

#[derive(Parser)]
#[command(name = "webpilot")]
#[command(about = "Drive a web browser with natural-language tasks", long_about = None)]
#[command(version)]
struct Cli {
    /// Azure OpenAI endpoint URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Azure OpenAI deployment name
    #[arg(long)]
    deployment: Option<String>,

    /// Azure OpenAI API key (an ambient bearer token is used when absent)
    #[arg(long)]
    api_key: Option<String>,

    /// Azure OpenAI API version
    #[arg(long)]
    api_version: Option<String>,

    /// System instruction override
    #[arg(long)]
    instructions: Option<String>,

    /// MCP server display name
    #[arg(long)]
    mcp_name: Option<String>,

    /// MCP server launch command
    #[arg(long)]
    mcp_command: Option<String>,

    /// MCP server launch arguments, as one whitespace-separated string
    #[arg(long)]
    mcp_args: Option<String>,

    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            endpoint: self.endpoint.clone(),
            deployment: self.deployment.clone(),
            api_key: self.api_key.clone(),
            api_version: self.api_version.clone(),
            instructions: self.instructions.clone(),
            mcp_name: self.mcp_name.clone(),
            mcp_command: self.mcp_command.clone(),
            mcp_args: self.mcp_args.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = Config::resolve(cli.config.as_deref(), &cli.overrides())?;

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let credential =
        AzureCredential::resolve(config.model.api_key.as_deref(), |var| std::env::var(var).ok())?;

    println!(
        "Using Azure OpenAI deployment '{}' at '{}'.\n",
        config.model.deployment,
        config.endpoint()
    );
    let provider = Arc::new(AzureOpenAIProvider::new(
        config.endpoint(),
        &config.model.deployment,
        &config.model.api_version,
        credential,
        config.model.max_tokens,
        config.model.temperature,
    ));

    println!(
        "Using MCP server '{}' ({} {}).\n",
        config.mcp.name,
        config.mcp.command,
        config.mcp.args.join(" ")
    );
    let server = Arc::new(
        McpServer::start(
            &config.mcp.name,
            &config.mcp.command,
            &config.mcp.args,
            Duration::from_secs(config.mcp.request_timeout_secs),
        )
        .await?,
    );

    // Discovery failure is fatal at startup, but the child is already
    // running and must still be torn down.
    let catalog = match ToolCatalog::build(server.clone()).await {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            server.shutdown().await;
            return Err(e.into());
        }
    };

    info!(
        server = %server.name(),
        tools = catalog.len(),
        "Connected to MCP server and discovered tools"
    );

    let session = AgentSession::new(
        provider,
        catalog,
        &config.agent.instructions,
        config.agent.max_tool_iterations,
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    info!("Ready. Type natural-language tasks (or 'exit' to quit). The agent will call browser tools as needed.");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let result = console::run_loop(stdin, &session, &cancel).await;

    // Every exit path, including cancellation and task-fatal errors, passes
    // through here before the process ends.
    server.shutdown().await;

    result.map_err(Into::into)
}
