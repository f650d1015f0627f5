//! Prompt template resolution.
//!
//! `{{ outputs.<step_id> }}` is replaced with that step's latest output and
//! `{{ inputs.<key> }}` with a run input. A reference that cannot be resolved
//! is an error, never an empty string. Placeholders in any other namespace
//! are left untouched.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;

use super::state::{RunInputs, StepOutputs};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    // Constant pattern.
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\.([^\s}]+)\s*\}\}").expect("valid placeholder pattern")
});

/// A placeholder that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The referenced step has not produced output in this run.
    #[error("no output for step '{0}' yet")]
    MissingOutput(String),
    /// The referenced input was not supplied.
    #[error("missing input '{0}'")]
    MissingInput(String),
}

impl TemplateError {
    /// The placeholder as written, e.g. `outputs.writer`.
    pub fn reference(&self) -> String {
        match self {
            Self::MissingOutput(step) => format!("outputs.{step}"),
            Self::MissingInput(key) => format!("inputs.{key}"),
        }
    }
}

/// Resolves every `outputs.*` and `inputs.*` placeholder in `template`.
///
/// # Errors
/// Returns the first placeholder that has no value.
pub fn render(template: &str, outputs: &StepOutputs, inputs: &RunInputs) -> Result<String, TemplateError> {
    let mut failure = None;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| {
        let namespace = &caps[1];
        let key = &caps[2];
        let value = match namespace {
            "outputs" => outputs.get(key).ok_or_else(|| TemplateError::MissingOutput(key.to_string())),
            "inputs" => inputs.get(key).map(String::as_str).ok_or_else(|| TemplateError::MissingInput(key.to_string())),
            _ => return caps[0].to_string(),
        };
        match value {
            Ok(value) => value.to_string(),
            Err(err) => {
                failure.get_or_insert(err);
                String::new()
            }
        }
    });

    match failure {
        Some(err) => Err(err),
        None => Ok(rendered.into_owned()),
    }
}

/// Step ids referenced through `outputs.*`, in order of appearance.
pub fn referenced_outputs(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .filter(|caps| &caps[1] == "outputs")
        .map(|caps| caps[2].to_string())
        .collect()
}
