//! Error types for Conduit Core.

use conduit_orchestrator::RoutingError;
use thiserror::Error;

use crate::workflow::DefinitionError;

/// Why a workflow run stopped without reaching `END`.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// A prompt referenced an output or input that does not exist yet.
    #[error("Step '{step}' cannot resolve '{{{{ {reference} }}}}'")]
    TemplateResolution {
        /// Step whose prompt failed to resolve.
        step: String,
        /// Placeholder as written, e.g. `outputs.writer`.
        reference: String,
    },

    /// The run took more transitions than allowed.
    #[error("Workflow exceeded max_iterations ({limit})")]
    MaxIterationsExceeded {
        /// Configured bound.
        limit: u32,
    },

    /// The definition is invalid, or a conditional node had nowhere to go.
    #[error("Workflow definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Routing the step's request failed.
    #[error("Step '{step}' failed: {source}")]
    Routing {
        /// Step that failed.
        step: String,
        /// Router error.
        #[source]
        source: RoutingError,
    },

    /// The run was cancelled.
    #[error("Workflow run cancelled")]
    Cancelled,
}

impl WorkflowError {
    /// Short machine-readable label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TemplateResolution { .. } => "template_resolution",
            Self::MaxIterationsExceeded { .. } => "max_iterations_exceeded",
            Self::Definition(_) => "workflow_definition",
            Self::Routing { source, .. } => source.kind(),
            Self::Cancelled => "cancelled",
        }
    }
}

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_error_display() {
        let err = WorkflowError::TemplateResolution {
            step: "B".to_string(),
            reference: "outputs.C".to_string(),
        };
        assert_eq!(err.to_string(), "Step 'B' cannot resolve '{{ outputs.C }}'");
        assert_eq!(err.kind(), "template_resolution");
    }

    #[test]
    fn test_definition_error_conversion() {
        let err: WorkflowError = DefinitionError::NoMatchingTransition("qa".to_string()).into();
        assert_eq!(err.kind(), "workflow_definition");
        assert!(err.to_string().contains("qa"));
    }

    #[test]
    fn test_routing_kind_passes_through() {
        let err = WorkflowError::Routing {
            step: "A".to_string(),
            source: RoutingError::ModelNotFound { model: "ghost".to_string() },
        };
        assert_eq!(err.kind(), "model_not_found");
    }
}
