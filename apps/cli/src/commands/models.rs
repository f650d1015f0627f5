//! Models command implementation.

use anyhow::Result;
use colored::Colorize;
use comfy_table::{Cell, Table};
use conduit_orchestrator::Capability;

use super::{GlobalOptions, load_runtime};

/// Execute the models command.
pub fn execute(options: &GlobalOptions, json_output: bool) -> Result<()> {
    let runtime = load_runtime(options)?;
    let models = runtime.router().describe_models();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Registered Models ({})", models.len()).bold().cyan());
    println!();

    if models.is_empty() {
        println!("  {}", "No models in registry".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Model", "Backend", "Provider Model", "Context", "Capabilities", "Status"]);
    for summary in &models {
        let descriptor = &summary.descriptor;
        let capabilities: Vec<&str> = descriptor.capabilities.iter().map(|c| capability_label(*c)).collect();
        table.add_row(vec![
            Cell::new(&descriptor.name),
            Cell::new(&descriptor.backend),
            Cell::new(&descriptor.model_name),
            Cell::new(descriptor.context_window.map_or_else(|| "-".to_string(), |w| w.to_string())),
            Cell::new(capabilities.join(", ")),
            Cell::new(if summary.available { "available" } else { "no backend" }),
        ]);
    }
    println!("{}", table);
    println!();
    Ok(())
}

fn capability_label(capability: Capability) -> &'static str {
    match capability {
        Capability::Text => "text",
        Capability::Vision => "vision",
        Capability::Tools => "tools",
        Capability::Audio => "audio",
        Capability::Video => "video",
        Capability::Other => "other",
    }
}
