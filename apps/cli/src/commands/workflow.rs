//! Workflow command implementation.

use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use comfy_table::{Cell, Table};
use conduit_core::workflow::{RunInputs, RunStatus, Workflow, WorkflowDefinition, WorkflowOutcome};
use conduit_orchestrator::ModelRegistry;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::types::WorkflowCommand;
use super::{GlobalOptions, load_runtime, load_settings};

/// Result of `workflow validate`.
#[derive(Debug, Serialize)]
struct ValidationReport {
    name: String,
    steps: usize,
    entry: String,
    models_checked: bool,
}

/// Execute the workflow command.
pub async fn execute(options: &GlobalOptions, command: WorkflowCommand) -> Result<()> {
    match command {
        WorkflowCommand::Run { file, inputs, json } => run_workflow(options, &file, inputs, json).await,
        WorkflowCommand::Validate { file, json } => validate_workflow(options, &file, json),
    }
}

fn compile(file: &Path) -> Result<Workflow> {
    WorkflowDefinition::load(file)
        .and_then(WorkflowDefinition::compile)
        .with_context(|| format!("Invalid workflow {}", file.display()))
}

async fn run_workflow(options: &GlobalOptions, file: &Path, inputs: Vec<(String, String)>, json: bool) -> Result<()> {
    let workflow = compile(file)?;
    let runtime = load_runtime(options)?;
    workflow.validate_models(runtime.registry()).with_context(|| format!("Invalid workflow {}", file.display()))?;

    let inputs: RunInputs = inputs.into_iter().collect();

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling workflow");
            interrupt.cancel();
        }
    });

    let outcome = runtime.engine().run_with_cancellation(&workflow, inputs, token).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    match &outcome.error {
        None => Ok(()),
        Some(err) => bail!("Workflow '{}' {}: {} [{}]", outcome.workflow, outcome.status, err, err.kind()),
    }
}

fn print_outcome(outcome: &WorkflowOutcome) {
    println!();
    println!("{}", format!("Workflow: {}", outcome.workflow).bold().cyan());
    println!("  Run ID: {}", outcome.run_id.to_string().dimmed());

    let status = outcome.status.to_string();
    let status = match outcome.status {
        RunStatus::Succeeded => status.green(),
        RunStatus::Cancelled => status.yellow(),
        RunStatus::Failed | RunStatus::Running => status.red(),
    };
    println!("  Status: {}", status);
    println!("  Transitions: {}", outcome.transitions);
    println!();

    if !outcome.steps.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Step", "Model", "Iteration", "Cached", "Duration", "Result"]);
        for record in &outcome.steps {
            let result = match &record.error {
                Some(err) => err.clone(),
                None => "ok".to_string(),
            };
            table.add_row(vec![
                Cell::new(&record.step_id),
                Cell::new(&record.model),
                Cell::new(record.iteration),
                Cell::new(if record.cached { "yes" } else { "no" }),
                Cell::new(format!("{}ms", record.duration_ms)),
                Cell::new(result),
            ]);
        }
        println!("{}", table);
        println!();
    }

    for (step_id, output) in outcome.outputs.iter() {
        println!("{}", format!("[{}]", step_id).bold());
        println!("{}", output);
        println!();
    }
}

fn validate_workflow(options: &GlobalOptions, file: &Path, json: bool) -> Result<()> {
    let workflow = compile(file)?;

    let settings = load_settings(options)?;
    let models_checked = match &settings.registry {
        Some(path) => {
            let registry = ModelRegistry::load(path)
                .with_context(|| format!("Failed to load model registry {}", path.display()))?;
            workflow
                .validate_models(&registry)
                .with_context(|| format!("Invalid workflow {}", file.display()))?;
            true
        }
        None => false,
    };

    let report = ValidationReport {
        name: workflow.name().to_string(),
        steps: workflow.definition().steps.len(),
        entry: workflow.entry().to_string(),
        models_checked,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{} Workflow '{}' is valid ({} steps, entry '{}')",
        "✓".green(),
        report.name,
        report.steps,
        report.entry
    );
    if !report.models_checked {
        println!("  {}", "No registry configured; model names were not checked".yellow());
    }
    Ok(())
}
