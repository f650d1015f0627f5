//! Workflow execution for Conduit Core.
//!
//! Definitions are loaded from YAML, compiled into a transition table and
//! run step by step through the router, with conditional branching and a
//! bound on the number of transitions.

pub mod control_flow;
pub mod definition;
pub mod engine;
pub mod state;
pub mod template;

pub use control_flow::{ConditionContext, ConditionEvaluator, FnEvaluator, KeywordEvaluator};
pub use definition::{
    ConditionalTransition, DefinitionError, END, GraphSpec, NodeSpec, StepSpec, Target, Transition, Workflow,
    WorkflowDefinition,
};
pub use engine::{ActiveRunInfo, DEFAULT_MAX_ITERATIONS, RunHandle, StepDispatcher, WorkflowEngine};
pub use state::{RunInputs, RunStatus, StepOutputs, StepRecord, WorkflowOutcome};
pub use template::TemplateError;
