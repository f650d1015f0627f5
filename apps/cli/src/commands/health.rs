//! Health command implementation.

use anyhow::Result;
use colored::Colorize;
use comfy_table::{Cell, Color, Table};
use conduit_orchestrator::CircuitState;

use super::{GlobalOptions, load_runtime};

/// Execute the health command.
pub fn execute(options: &GlobalOptions, json_output: bool) -> Result<()> {
    let runtime = load_runtime(options)?;
    let health = runtime.router().backend_health();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&health)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Backend Health ({})", health.len()).bold().cyan());
    println!();

    if health.is_empty() {
        println!("  {}", "No backends configured".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Backend", "State", "Failures", "Threshold", "Trips", "Cooldown"]);
    for snapshot in health.values() {
        let color = match snapshot.state {
            CircuitState::Closed => Color::Green,
            CircuitState::HalfOpen => Color::Yellow,
            CircuitState::Open => Color::Red,
        };
        table.add_row(vec![
            Cell::new(&snapshot.backend),
            Cell::new(snapshot.state).fg(color),
            Cell::new(snapshot.consecutive_failures),
            Cell::new(snapshot.failure_threshold),
            Cell::new(snapshot.total_trips),
            Cell::new(format!("{}ms", snapshot.cooldown_ms)),
        ]);
    }
    println!("{}", table);
    println!();
    Ok(())
}
