//! Route command implementation.

use std::io::Read;

use anyhow::{Context, Result, anyhow};
use colored::Colorize;
use conduit_abstraction::ModelParameters;

use super::types::RouteArgs;
use super::{GlobalOptions, load_runtime};

/// Execute the route command.
pub async fn execute(options: &GlobalOptions, args: RouteArgs) -> Result<()> {
    let runtime = load_runtime(options)?;

    let prompt = match args.prompt {
        Some(prompt) => prompt,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer).context("Failed to read prompt from stdin")?;
            buffer
        }
    };

    let mut params = ModelParameters::new();
    if let Some(temperature) = args.temperature {
        params = params.with_temperature(temperature);
    }
    if let Some(max_tokens) = args.max_tokens {
        params = params.with_max_tokens(max_tokens);
    }

    let response = runtime
        .router()
        .route(&args.model, &prompt, &params)
        .await
        .map_err(|err| anyhow!("{} [{}]", err, err.kind()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.content);
    let source = if response.cached { "cache".green() } else { response.backend.cyan() };
    eprintln!("{}", format!("{} via {} in {}ms", response.model, source, response.latency_ms).dimmed());
    Ok(())
}
