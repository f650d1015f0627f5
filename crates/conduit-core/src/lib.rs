//! Conduit Core - workflow execution and runtime assembly.
//!
//! This crate provides:
//! - the workflow engine (definitions, templates, conditional transitions)
//! - settings loading (`conduit.toml` plus `CONDUIT_*` overrides)
//! - the [`bootstrap::Runtime`] that wires adapters, breakers, cache,
//!   router and engine together
//!
//! # Example
//!
//! ```rust,no_run
//! use conduit_core::{Runtime, Settings, workflow::{RunInputs, WorkflowDefinition}};
//! use conduit_models::ModelFactory;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load(Some(std::path::Path::new("conduit.toml")))?;
//! let runtime = Runtime::from_settings(settings, &ModelFactory::with_builtin())?;
//! let workflow = WorkflowDefinition::load(std::path::Path::new("review.yaml"))?.compile()?;
//! let outcome = runtime.engine().run(&workflow, RunInputs::new()).await;
//! println!("{:?}", outcome.status);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod workflow;

pub use bootstrap::{BootstrapError, Runtime, SkippedBackend};
pub use config::{BackendSettings, Settings, SettingsError, WorkflowSettings};
pub use error::{Result, WorkflowError};
pub use workflow::{
    RunInputs, RunStatus, StepDispatcher, Workflow, WorkflowDefinition, WorkflowEngine, WorkflowOutcome,
};
