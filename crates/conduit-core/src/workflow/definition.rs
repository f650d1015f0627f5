//! Workflow definitions.
//!
//! A definition is loaded from YAML and compiled into a [`Workflow`]: the
//! steps keyed by id plus an explicit transition table. Two shapes are
//! accepted:
//!
//! ```yaml
//! # linear: steps run in order, the last one ends the run
//! name: summarize
//! steps:
//!   - { id: extract, model: fast, prompt: "Extract facts from {{ inputs.doc }}" }
//!   - { id: summary, model: smart, prompt: "Summarize: {{ outputs.extract }}" }
//! ```
//!
//! ```yaml
//! # graph: transitions are explicit and may form cycles
//! name: review
//! max_iterations: 5
//! steps:
//!   - { id: writer, model: smart, prompt: "Draft {{ inputs.topic }}" }
//!   - { id: qa, model: fast, prompt: "Review: {{ outputs.writer }}" }
//! graph:
//!   entry_point: writer
//!   nodes:
//!     writer: { transitions_to: qa }
//!     qa:
//!       conditional_transitions:
//!         - { condition: approved, target: END }
//!       default: writer
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use conduit_abstraction::ModelParameters;
use conduit_orchestrator::ModelRegistry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal sentinel in transition targets.
pub const END: &str = "END";

/// Errors found while loading or validating a workflow definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The definition file could not be read.
    #[error("Failed to read workflow '{path}': {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The YAML was malformed.
    #[error("Failed to parse workflow definition: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The definition has no steps.
    #[error("Workflow '{0}' has no steps")]
    NoSteps(String),

    /// Two steps share an id.
    #[error("Duplicate step id '{0}'")]
    DuplicateStep(String),

    /// A step id collides with the terminal sentinel.
    #[error("Step id 'END' is reserved")]
    ReservedStepId,

    /// The graph's entry point is not a step.
    #[error("Entry point '{0}' is not a step")]
    UnknownEntryPoint(String),

    /// A graph node has no matching step.
    #[error("Graph node '{0}' does not name a step")]
    UnknownNode(String),

    /// A transition points at something that is neither a step nor `END`.
    #[error("Step '{from}' transitions to unknown target '{target}'")]
    UnknownTarget {
        /// Source step.
        from: String,
        /// Offending target.
        target: String,
    },

    /// A node declares both or neither transition forms.
    #[error("Graph node '{0}' must declare exactly one of transitions_to or conditional_transitions")]
    AmbiguousTransition(String),

    /// A conditional node has no branches.
    #[error("Graph node '{0}' has an empty conditional_transitions list")]
    EmptyConditional(String),

    /// A step references a model missing from the registry.
    #[error("Step '{step}' references unknown model '{model}'")]
    UnknownModel {
        /// Step id.
        step: String,
        /// Model name.
        model: String,
    },

    /// No condition held and the node has no default.
    #[error("No transition from step '{0}': no condition matched and no default is declared")]
    NoMatchingTransition(String),

    /// `max_iterations` is zero.
    #[error("max_iterations must be greater than 0")]
    InvalidMaxIterations,
}

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique step id; outputs are stored under it.
    pub id: String,
    /// Logical model name to route to.
    pub model: String,
    /// Prompt template.
    pub prompt: String,
    /// Generation parameters.
    #[serde(default)]
    pub params: ModelParameters,
}

/// One `(condition, target)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalTransition {
    /// Condition name handed to the evaluator.
    pub condition: String,
    /// Step id or `END`.
    pub target: String,
}

/// Transition declaration for one graph node, as written in YAML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unconditional successor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transitions_to: Option<String>,
    /// Ordered conditional successors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional_transitions: Option<Vec<ConditionalTransition>>,
    /// Successor when no condition holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Graph section of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSpec {
    /// First step to run.
    pub entry_point: String,
    /// Transitions keyed by step id. Steps without a node end the run.
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeSpec>,
}

/// A workflow definition as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Bound on transitions per run; falls back to the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// Steps in declaration order.
    pub steps: Vec<StepSpec>,
    /// Explicit transitions; absent means linear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphSpec>,
}

impl WorkflowDefinition {
    /// Parses a definition from YAML.
    ///
    /// # Errors
    /// Returns `DefinitionError::Yaml` if the text is malformed.
    pub fn from_yaml_str(content: &str) -> Result<Self, DefinitionError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Reads a definition from a YAML file.
    ///
    /// # Errors
    /// Returns `DefinitionError` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, DefinitionError> {
        let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Validates the definition and builds its transition table.
    ///
    /// # Errors
    /// Returns the first structural problem found.
    pub fn compile(self) -> Result<Workflow, DefinitionError> {
        if self.steps.is_empty() {
            return Err(DefinitionError::NoSteps(self.name));
        }
        if self.max_iterations == Some(0) {
            return Err(DefinitionError::InvalidMaxIterations);
        }

        let mut index = HashMap::with_capacity(self.steps.len());
        for (position, step) in self.steps.iter().enumerate() {
            if step.id == END {
                return Err(DefinitionError::ReservedStepId);
            }
            if index.insert(step.id.clone(), position).is_some() {
                return Err(DefinitionError::DuplicateStep(step.id.clone()));
            }
        }

        let (entry, transitions) = match &self.graph {
            None => (self.steps[0].id.clone(), linear_transitions(&self.steps)),
            Some(graph) => {
                if !index.contains_key(&graph.entry_point) {
                    return Err(DefinitionError::UnknownEntryPoint(graph.entry_point.clone()));
                }
                (graph.entry_point.clone(), graph_transitions(graph, &index)?)
            }
        };

        Ok(Workflow { definition: self, entry, index, transitions })
    }
}

/// Where a transition leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Run the named step next.
    Step(String),
    /// Finish the run successfully.
    End,
}

impl Target {
    fn parse(raw: &str) -> Self {
        if raw == END { Self::End } else { Self::Step(raw.to_string()) }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(id) => f.write_str(id),
            Self::End => f.write_str(END),
        }
    }
}

/// Compiled transition for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Always go to the target.
    Next(Target),
    /// First branch whose condition holds wins; otherwise `default`.
    Conditional {
        /// Ordered `(condition, target)` pairs.
        branches: Vec<(String, Target)>,
        /// Fallback when no condition holds.
        default: Option<Target>,
    },
}

/// A validated workflow ready to run.
#[derive(Debug, Clone)]
pub struct Workflow {
    definition: WorkflowDefinition,
    entry: String,
    index: HashMap<String, usize>,
    transitions: HashMap<String, Transition>,
}

impl Workflow {
    /// Workflow name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The definition this was compiled from.
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// First step id.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Looks up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.index.get(id).map(|&position| &self.definition.steps[position])
    }

    /// Outgoing transition of a step.
    pub fn transition(&self, id: &str) -> &Transition {
        static TERMINAL: Transition = Transition::Next(Target::End);
        self.transitions.get(id).unwrap_or(&TERMINAL)
    }

    /// Per-definition transition bound, if any.
    pub fn max_iterations(&self) -> Option<u32> {
        self.definition.max_iterations
    }

    /// Checks that every step's model is registered.
    ///
    /// # Errors
    /// Returns `DefinitionError::UnknownModel` for the first missing model.
    pub fn validate_models(&self, registry: &ModelRegistry) -> Result<(), DefinitionError> {
        for step in &self.definition.steps {
            if registry.get(&step.model).is_none() {
                return Err(DefinitionError::UnknownModel {
                    step: step.id.clone(),
                    model: step.model.clone(),
                });
            }
        }
        Ok(())
    }
}

fn linear_transitions(steps: &[StepSpec]) -> HashMap<String, Transition> {
    steps
        .iter()
        .enumerate()
        .map(|(position, step)| {
            let target = steps
                .get(position + 1)
                .map_or(Target::End, |next| Target::Step(next.id.clone()));
            (step.id.clone(), Transition::Next(target))
        })
        .collect()
}

fn graph_transitions(
    graph: &GraphSpec,
    index: &HashMap<String, usize>,
) -> Result<HashMap<String, Transition>, DefinitionError> {
    let resolve = |from: &str, raw: &str| -> Result<Target, DefinitionError> {
        let target = Target::parse(raw);
        match &target {
            Target::Step(id) if !index.contains_key(id) => Err(DefinitionError::UnknownTarget {
                from: from.to_string(),
                target: raw.to_string(),
            }),
            _ => Ok(target),
        }
    };

    let mut transitions = HashMap::with_capacity(graph.nodes.len());
    for (id, node) in &graph.nodes {
        if !index.contains_key(id) {
            return Err(DefinitionError::UnknownNode(id.clone()));
        }
        let transition = match (&node.transitions_to, &node.conditional_transitions) {
            (Some(next), None) if node.default.is_none() => Transition::Next(resolve(id, next)?),
            (None, Some(branches)) => {
                if branches.is_empty() {
                    return Err(DefinitionError::EmptyConditional(id.clone()));
                }
                let branches = branches
                    .iter()
                    .map(|b| Ok((b.condition.clone(), resolve(id, &b.target)?)))
                    .collect::<Result<Vec<_>, DefinitionError>>()?;
                let default = node.default.as_deref().map(|d| resolve(id, d)).transpose()?;
                Transition::Conditional { branches, default }
            }
            _ => return Err(DefinitionError::AmbiguousTransition(id.clone())),
        };
        transitions.insert(id.clone(), transition);
    }

    Ok(transitions)
}
