//! Conduit CLI - Command-line interface for the Conduit dispatch middleware
//!
//! This CLI provides a `conduit` command for routing prompts to logical
//! models, inspecting the registry and backend health, and running
//! multi-step workflows.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::types::{RouteArgs, WorkflowCommand};
use commands::{GlobalOptions, health, models, route, workflow};

/// Conduit CLI - LLM request routing and workflow execution
///
/// Conduit resolves logical model names through a registry, serves repeat
/// requests from a TTL cache, and guards each backend with a circuit breaker.
#[derive(Parser, Debug)]
#[command(
    name = "conduit",
    author,
    version,
    about = "Conduit - LLM request routing and workflow execution",
    long_about = "Conduit routes prompts for logical model names to backend adapters.\nResponses are cached, failing backends are isolated by circuit breakers, and multi-step workflows pass outputs between steps."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Settings file (defaults to ./conduit.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Model registry YAML (overrides settings and CONDUIT_REGISTRY)
    #[arg(short, long, global = true)]
    registry: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a prompt to a logical model
    Route(RouteArgs),

    /// List models in the registry
    Models {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show circuit breaker state for every backend
    Health {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run or validate workflows
    #[command(subcommand)]
    Workflow(WorkflowCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so command output stays machine-readable.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = GlobalOptions { config: args.config, registry: args.registry };

    match args.command {
        Command::Route(route_args) => route::execute(&options, route_args).await,
        Command::Models { json } => models::execute(&options, json),
        Command::Health { json } => health::execute(&options, json),
        Command::Workflow(command) => workflow::execute(&options, command).await,
    }
}
