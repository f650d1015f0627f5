//! Command type definitions shared between main.rs and the command modules.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};

#[derive(Args, Debug, Clone)]
pub struct RouteArgs {
    /// Logical model name from the registry
    pub model: String,

    /// Prompt text (read from stdin when omitted)
    pub prompt: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Output the full routed response as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum WorkflowCommand {
    /// Execute a workflow definition
    Run {
        /// Workflow YAML file
        file: PathBuf,

        /// Template input as key=value (repeatable)
        #[arg(short, long = "input", value_parser = parse_input)]
        inputs: Vec<(String, String)>,

        /// Output the run outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a workflow definition without running it
    Validate {
        /// Workflow YAML file
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parses `key=value` into its parts. The value may itself contain `=`.
pub fn parse_input(raw: &str) -> Result<(String, String)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected key=value, got '{}'", raw);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("input key must not be empty");
    }
    Ok((key.to_string(), value.to_string()))
}
