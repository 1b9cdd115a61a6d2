//! mcproute CLI entrypoint
//! Loads the server fleet configuration, brings every server up and dispatches one command.
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use mcproute::orchestrator::IDENTIFIER_DELIMITER;
use mcproute::{Deadline, Orchestrator, OrchestratorConfig, notify, report};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

/// How long the notification logger may take to drain its queue at exit
const LOGGER_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "mcproute")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server fleet configuration (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overall time budget in seconds, shared by every stage
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// List the tools every reachable server exposes
    List {
        /// Print the full per-server tool catalog as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call a tool, addressed as <alias>.<tool>
    Call {
        /// Tool identifier, e.g. default.pull_image
        tool: String,
        /// JSON object of arguments for the tool
        #[arg(long)]
        args: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => OrchestratorConfig::default_path()
            .context("No --config given and no platform config directory found")?,
    };
    let mut config = OrchestratorConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    if let Some(secs) = cli.timeout {
        config = config.with_timeout(Duration::from_secs(secs))?;
    }

    info!(
        servers = config.endpoints.len(),
        timeout_secs = config.timeout.as_secs(),
        "Starting mcproute"
    );

    let deadline = Deadline::after(config.timeout);
    let canceller = deadline.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight operations");
            canceller.cancel();
        }
    });

    let (sink, stream) = notify::channel(notify::DEFAULT_CAPACITY);
    let notification_logger = notify::spawn_logger(stream);

    let mut orchestrator = Orchestrator::connect_all(&config, deadline, &sink)
        .context("Failed to construct server sessions")?;
    drop(sink);

    let outcome = run_command(&mut orchestrator, &cli.command).await;

    let close_report = orchestrator.close().await;
    if !close_report.is_clean() {
        warn!(
            failed = close_report.failures.len(),
            closed = close_report.closed.len(),
            "Some servers did not close cleanly"
        );
    }
    if let Some(seen) = notify::drain_logger(notification_logger, LOGGER_GRACE).await {
        debug!(notifications = seen, "Notification logger finished");
    }

    outcome
}

async fn run_command(orchestrator: &mut Orchestrator, command: &Commands) -> anyhow::Result<()> {
    match command {
        Commands::List { json } => run_list(orchestrator, *json).await,
        Commands::Call { tool, args } => run_call(orchestrator, tool, args.as_deref()).await,
    }
}

/// Bring the fleet up and print its tools
async fn run_list(orchestrator: &mut Orchestrator, json: bool) -> anyhow::Result<()> {
    orchestrator
        .bring_up()
        .await
        .context("Failed to bring up MCP servers")?;

    if json {
        let catalogs = orchestrator.tools_as_json()?;
        println!("{}", serde_json::to_string_pretty(&catalogs)?);
        return Ok(());
    }

    for record in orchestrator.registry().iter() {
        println!("Available tools on '{}':", record.name);
        if record.tools.is_empty() {
            println!("  (none)");
        }
        for tool in &record.tools {
            println!(" - {}: {}", tool.name, tool.description);
        }
    }
    Ok(())
}

/// Bring the fleet up, dispatch one call and print the report
async fn run_call(
    orchestrator: &mut Orchestrator,
    tool: &str,
    args: Option<&str>,
) -> anyhow::Result<()> {
    // Parse arguments JSON or use empty object
    let parsed_args = match args {
        Some(json_str) => {
            serde_json::from_str(json_str).context("Failed to parse JSON arguments")?
        }
        None => serde_json::Value::Object(serde_json::Map::new()),
    };
    let arguments = match parsed_args {
        serde_json::Value::Object(arguments) => arguments,
        other => bail!("Tool arguments must be a JSON object, got: {}", other),
    };

    orchestrator
        .bring_up()
        .await
        .context("Failed to bring up MCP servers")?;

    info!(tool, "Calling tool");
    let result = orchestrator
        .call_tool(tool, arguments)
        .await
        .with_context(|| format!("Failed to call tool '{}'", tool))?;

    print!("{}", report::render(tool_name(tool), &result));
    Ok(())
}

/// The tool segment of `<alias>.<tool>`, for the report header
fn tool_name(identifier: &str) -> &str {
    identifier
        .split(IDENTIFIER_DELIMITER)
        .nth(1)
        .unwrap_or(identifier)
}
