//! CLI command implementations.

pub mod health;
pub mod models;
pub mod route;
pub mod types;
pub mod workflow;

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use conduit_core::{Runtime, Settings};
use conduit_models::ModelFactory;

/// Settings file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "conduit.toml";

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Explicit settings file.
    pub config: Option<PathBuf>,
    /// Registry path that wins over settings and environment.
    pub registry: Option<PathBuf>,
}

/// Resolves settings: file, then `CONDUIT_*` variables, then command-line flags.
pub fn load_settings(options: &GlobalOptions) -> Result<Settings> {
    let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
    let path = options.config.clone().or_else(|| default_path.exists().then_some(default_path));

    let mut settings = Settings::load(path.as_deref()).with_context(|| match &path {
        Some(path) => format!("Failed to load settings from {}", path.display()),
        None => "Failed to load settings".to_string(),
    })?;
    if let Some(registry) = &options.registry {
        settings.registry = Some(registry.clone());
    }
    Ok(settings)
}

/// Builds the runtime and reports backends that could not start.
pub fn load_runtime(options: &GlobalOptions) -> Result<Runtime> {
    let settings = load_settings(options)?;
    let runtime =
        Runtime::from_settings(settings, &ModelFactory::with_builtin()).context("Failed to start Conduit runtime")?;

    for skipped in runtime.skipped_backends() {
        eprintln!("{} backend '{}' unavailable: {}", "⚠".yellow(), skipped.id, skipped.reason);
    }
    Ok(runtime)
}
