//! Workflow execution engine.
//!
//! Runs a compiled [`Workflow`] one step at a time: resolve the prompt,
//! dispatch it to the step's model, store the output, then follow the
//! step's transition. Runs never return `Err`; every ending, including
//! failure and cancellation, is a [`WorkflowOutcome`] carrying whatever
//! outputs were produced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_abstraction::ModelParameters;
use conduit_orchestrator::{RoutedResponse, Router, RoutingError};
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::control_flow::{ConditionContext, ConditionEvaluator, KeywordEvaluator, next_target};
use super::definition::{DefinitionError, Target, Workflow, WorkflowDefinition};
use super::state::{RunInputs, RunStatus, StepOutputs, StepRecord, WorkflowOutcome};
use super::template;
use crate::error::WorkflowError;

/// Transition bound used when neither the definition nor the engine
/// configuration sets one.
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

/// Sends one step's prompt to a model.
#[async_trait]
pub trait StepDispatcher: Send + Sync {
    /// Routes `prompt` to the logical `model`.
    ///
    /// # Errors
    /// Returns the router's error unchanged.
    async fn dispatch(
        &self,
        model: &str,
        prompt: &str,
        params: &ModelParameters,
    ) -> Result<RoutedResponse, RoutingError>;
}

#[async_trait]
impl StepDispatcher for Router {
    async fn dispatch(
        &self,
        model: &str,
        prompt: &str,
        params: &ModelParameters,
    ) -> Result<RoutedResponse, RoutingError> {
        self.route(model, prompt, params).await
    }
}

/// A run that has started and not yet finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveRunInfo {
    /// Run identifier.
    pub run_id: Uuid,
    /// Workflow name.
    pub workflow: String,
    /// Step currently executing.
    pub current_step: String,
    /// Step executions finished so far.
    pub steps_completed: usize,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

struct ActiveRun {
    info: ActiveRunInfo,
    token: CancellationToken,
}

type ActiveRuns = Arc<Mutex<HashMap<Uuid, ActiveRun>>>;

/// Keeps a run listed as active until dropped.
struct ActiveGuard {
    runs: ActiveRuns,
    run_id: Uuid,
}

impl ActiveGuard {
    fn update(&self, current_step: &str, steps_completed: usize) {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(run) = runs.get_mut(&self.run_id) {
            current_step.clone_into(&mut run.info.current_step);
            run.info.steps_completed = steps_completed;
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.run_id);
    }
}

/// Handle to a run started with [`WorkflowEngine::spawn`].
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    token: CancellationToken,
    join: JoinHandle<WorkflowOutcome>,
}

impl RunHandle {
    /// Run identifier.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Requests cancellation; the in-flight step is dropped.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the run to finish.
    ///
    /// # Errors
    /// Returns the `JoinError` if the run's task panicked or was aborted.
    pub async fn outcome(self) -> Result<WorkflowOutcome, JoinError> {
        self.join.await
    }
}

/// Executes workflows against a [`StepDispatcher`].
pub struct WorkflowEngine {
    dispatcher: Arc<dyn StepDispatcher>,
    evaluator: Arc<dyn ConditionEvaluator>,
    max_iterations: u32,
    active: ActiveRuns,
}

impl WorkflowEngine {
    /// Creates an engine with the keyword condition evaluator and the
    /// default transition bound.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn StepDispatcher>) -> Self {
        Self {
            dispatcher,
            evaluator: Arc::new(KeywordEvaluator),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replaces the condition evaluator.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Sets the transition bound for definitions that do not declare one.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Runs `workflow` to completion.
    pub async fn run(&self, workflow: &Workflow, inputs: RunInputs) -> WorkflowOutcome {
        self.run_with_cancellation(workflow, inputs, CancellationToken::new()).await
    }

    /// Compiles and runs a definition. An invalid definition yields a
    /// `FAILED` outcome with no steps.
    pub async fn run_definition(&self, definition: WorkflowDefinition, inputs: RunInputs) -> WorkflowOutcome {
        let name = definition.name.clone();
        match definition.compile() {
            Ok(workflow) => self.run(&workflow, inputs).await,
            Err(err) => {
                warn!(workflow = %name, error = %err, "Rejected workflow definition");
                let now = Utc::now();
                WorkflowOutcome {
                    run_id: Uuid::new_v4(),
                    workflow: name,
                    status: RunStatus::Failed,
                    outputs: StepOutputs::new(),
                    steps: Vec::new(),
                    transitions: 0,
                    error: Some(err.into()),
                    started_at: now,
                    finished_at: now,
                }
            }
        }
    }

    /// Runs `workflow` until it finishes or `token` is cancelled.
    pub async fn run_with_cancellation(
        &self,
        workflow: &Workflow,
        inputs: RunInputs,
        token: CancellationToken,
    ) -> WorkflowOutcome {
        let guard = self.register(workflow, token.clone());
        self.execute(guard, workflow, inputs, token).await
    }

    /// Starts `workflow` on a background task.
    ///
    /// The run is listed in [`active_runs`](Self::active_runs) before this
    /// returns.
    pub fn spawn(self: &Arc<Self>, workflow: Arc<Workflow>, inputs: RunInputs) -> RunHandle {
        let token = CancellationToken::new();
        let guard = self.register(&workflow, token.clone());
        let run_id = guard.run_id;
        let engine = Arc::clone(self);
        let run_token = token.clone();
        let join = tokio::spawn(async move { engine.execute(guard, &workflow, inputs, run_token).await });
        RunHandle { run_id, token, join }
    }

    /// Cancels a running run. Returns `false` if no such run is active.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        let runs = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match runs.get(&run_id) {
            Some(run) => {
                info!(run_id = %run_id, workflow = %run.info.workflow, "Cancelling workflow run");
                run.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Runs currently executing, oldest first.
    pub fn active_runs(&self) -> Vec<ActiveRunInfo> {
        let runs = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let mut infos: Vec<ActiveRunInfo> = runs.values().map(|run| run.info.clone()).collect();
        infos.sort_by_key(|info| info.started_at);
        infos
    }

    fn register(&self, workflow: &Workflow, token: CancellationToken) -> ActiveGuard {
        let run_id = Uuid::new_v4();
        let info = ActiveRunInfo {
            run_id,
            workflow: workflow.name().to_string(),
            current_step: workflow.entry().to_string(),
            steps_completed: 0,
            started_at: Utc::now(),
        };
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id, ActiveRun { info, token });
        ActiveGuard { runs: Arc::clone(&self.active), run_id }
    }

    #[allow(clippy::too_many_lines)]
    async fn execute(
        &self,
        guard: ActiveGuard,
        workflow: &Workflow,
        inputs: RunInputs,
        token: CancellationToken,
    ) -> WorkflowOutcome {
        let run_id = guard.run_id;
        let limit = workflow.max_iterations().unwrap_or(self.max_iterations);
        let started_at = Utc::now();
        let mut outputs = StepOutputs::new();
        let mut steps: Vec<StepRecord> = Vec::new();
        let mut executions: HashMap<String, u32> = HashMap::new();
        let mut transitions = 0u32;
        let mut current = workflow.entry().to_string();
        let mut previous: Option<String> = None;

        info!(run_id = %run_id, workflow = %workflow.name(), entry = %current, max_iterations = limit, "Starting workflow run");

        let error = loop {
            if token.is_cancelled() {
                break Some(WorkflowError::Cancelled);
            }
            let Some(step) = workflow.step(&current) else {
                break Some(missing_step(previous.as_deref(), &current).into());
            };
            guard.update(&step.id, steps.len());

            let iteration = {
                let count = executions.entry(step.id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            let mut record = StepRecord {
                step_id: step.id.clone(),
                model: step.model.clone(),
                iteration,
                prompt_len: 0,
                response_len: None,
                cached: false,
                duration_ms: 0,
                success: false,
                error: None,
            };
            let step_started = Instant::now();

            let prompt = match template::render(&step.prompt, &outputs, &inputs) {
                Ok(prompt) => prompt,
                Err(err) => {
                    let error =
                        WorkflowError::TemplateResolution { step: step.id.clone(), reference: err.reference() };
                    record.error = Some(error.to_string());
                    steps.push(record);
                    break Some(error);
                }
            };
            record.prompt_len = prompt.len();
            debug!(run_id = %run_id, step_id = %step.id, model = %step.model, iteration, "Dispatching step");

            let result = tokio::select! {
                biased;
                () = token.cancelled() => None,
                result = self.dispatcher.dispatch(&step.model, &prompt, &step.params) => Some(result),
            };
            record.duration_ms = step_started.elapsed().as_millis() as u64;

            let response = match result {
                None => {
                    record.error = Some(WorkflowError::Cancelled.to_string());
                    steps.push(record);
                    break Some(WorkflowError::Cancelled);
                }
                Some(Err(source)) => {
                    let error = WorkflowError::Routing { step: step.id.clone(), source };
                    record.error = Some(error.to_string());
                    steps.push(record);
                    break Some(error);
                }
                Some(Ok(response)) => response,
            };

            record.success = true;
            record.cached = response.cached;
            record.response_len = Some(response.content.len());
            steps.push(record);
            outputs.insert(step.id.clone(), response.content);

            let context = ConditionContext {
                condition: "",
                step_id: &step.id,
                last_output: outputs.get(&step.id).unwrap_or_default(),
                outputs: &outputs,
                inputs: &inputs,
                transitions,
            };
            let target = match next_target(workflow.transition(&step.id), context, self.evaluator.as_ref()) {
                Ok(target) => target,
                Err(err) => break Some(err.into()),
            };
            debug!(run_id = %run_id, from = %step.id, to = %target, "Transition");

            match target {
                Target::End => break None,
                Target::Step(next) => {
                    transitions += 1;
                    if transitions > limit {
                        break Some(WorkflowError::MaxIterationsExceeded { limit });
                    }
                    previous = Some(std::mem::replace(&mut current, next));
                }
            }
        };

        let status = match &error {
            None => RunStatus::Succeeded,
            Some(WorkflowError::Cancelled) => RunStatus::Cancelled,
            Some(_) => RunStatus::Failed,
        };
        match &error {
            None => info!(run_id = %run_id, workflow = %workflow.name(), steps = steps.len(), transitions, "Workflow run succeeded"),
            Some(err) => warn!(
                run_id = %run_id,
                workflow = %workflow.name(),
                status = ?status,
                error_kind = err.kind(),
                error = %err,
                completed_outputs = outputs.len(),
                "Workflow run stopped"
            ),
        }
        drop(guard);

        WorkflowOutcome {
            run_id,
            workflow: workflow.name().to_string(),
            status,
            outputs,
            steps,
            transitions,
            error,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Error for a lookup of a step the validated graph should never reach.
fn missing_step(previous: Option<&str>, current: &str) -> DefinitionError {
    match previous {
        Some(from) => DefinitionError::UnknownTarget { from: from.to_string(), target: current.to_string() },
        None => DefinitionError::UnknownEntryPoint(current.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::control_flow::FnEvaluator;
    use std::time::Duration;

    /// Replies with a fixed text per model and records prompts.
    struct ScriptedDispatcher {
        replies: HashMap<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedDispatcher {
        fn new(replies: &[(&str, &str)]) -> Self {
            Self {
                replies: replies.iter().map(|(m, r)| ((*m).to_string(), (*r).to_string())).collect(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StepDispatcher for ScriptedDispatcher {
        async fn dispatch(
            &self,
            model: &str,
            prompt: &str,
            _params: &ModelParameters,
        ) -> Result<RoutedResponse, RoutingError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.replies.get(model) {
                Some(reply) => Ok(RoutedResponse {
                    content: reply.clone(),
                    model: model.to_string(),
                    backend: "scripted".to_string(),
                    cached: false,
                    usage: None,
                    latency_ms: 0,
                }),
                None => Err(RoutingError::ModelNotFound { model: model.to_string() }),
            }
        }
    }

    fn compile(yaml: &str) -> Workflow {
        WorkflowDefinition::from_yaml_str(yaml).unwrap().compile().unwrap()
    }

    #[tokio::test]
    async fn test_linear_run_substitutes_outputs() {
        let dispatcher = Arc::new(ScriptedDispatcher::new(&[("m1", "42"), ("m2", "done")]));
        let engine = WorkflowEngine::new(dispatcher.clone());
        let workflow = compile(
            "name: ab\nsteps:\n  - { id: A, model: m1, prompt: x }\n  - { id: B, model: m2, prompt: 'use {{outputs.A}}' }\n",
        );

        let outcome = engine.run(&workflow, RunInputs::new()).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.output("A"), Some("42"));
        assert_eq!(outcome.output("B"), Some("done"));
        assert_eq!(outcome.transitions, 1);
        assert_eq!(dispatcher.prompts.lock().unwrap()[1], "use 42");
        assert!(engine.active_runs().is_empty());
    }

    #[tokio::test]
    async fn test_forward_reference_fails_with_template_error() {
        let engine = WorkflowEngine::new(Arc::new(ScriptedDispatcher::new(&[("m", "ok")])));
        let workflow = compile(
            "name: fwd\nsteps:\n  - { id: A, model: m, prompt: x }\n  - { id: B, model: m, prompt: '{{ outputs.C }}' }\n  - { id: C, model: m, prompt: z }\n",
        );

        let outcome = engine.run(&workflow, RunInputs::new()).await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(matches!(
            outcome.error,
            Some(WorkflowError::TemplateResolution { ref step, ref reference }) if step == "B" && reference == "outputs.C"
        ));
        assert_eq!(outcome.output("A"), Some("ok"));
        assert_eq!(outcome.steps.len(), 2);
        assert!(!outcome.steps[1].success);
    }

    #[tokio::test]
    async fn test_routing_failure_keeps_partial_outputs() {
        let engine = WorkflowEngine::new(Arc::new(ScriptedDispatcher::new(&[("good", "first")])));
        let workflow = compile(
            "name: p\nsteps:\n  - { id: one, model: good, prompt: x }\n  - { id: two, model: missing, prompt: y }\n",
        );

        let outcome = engine.run(&workflow, RunInputs::new()).await;

        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.error.as_ref().unwrap().kind(), "model_not_found");
        assert_eq!(outcome.outputs.len(), 1);
        assert_eq!(outcome.output("one"), Some("first"));
    }

    #[tokio::test]
    async fn test_cycle_is_bounded() {
        let engine = WorkflowEngine::new(Arc::new(ScriptedDispatcher::new(&[
            ("smart", "draft"),
            ("fast", "needs more work"),
        ])));
        let workflow = compile(
            r"
name: loop
max_iterations: 5
steps:
  - { id: writer, model: smart, prompt: write }
  - { id: qa, model: fast, prompt: 'review {{ outputs.writer }}' }
graph:
  entry_point: writer
  nodes:
    writer: { transitions_to: qa }
    qa:
      conditional_transitions:
        - { condition: approved, target: END }
      default: writer
",
        );

        let outcome = engine.run(&workflow, RunInputs::new()).await;

        assert!(matches!(outcome.error, Some(WorkflowError::MaxIterationsExceeded { limit: 5 })));
        assert_eq!(outcome.steps.len(), 6);
        assert_eq!(outcome.steps[4].step_id, "writer");
        assert_eq!(outcome.steps[4].iteration, 3);
    }

    #[tokio::test]
    async fn test_injected_evaluator_ends_loop() {
        let evaluator = FnEvaluator::new(|ctx: &ConditionContext<'_>| ctx.transitions >= 3);
        let engine = WorkflowEngine::new(Arc::new(ScriptedDispatcher::new(&[("m", "text")])))
            .with_evaluator(Arc::new(evaluator));
        let workflow = compile(
            r"
name: loop
steps:
  - { id: a, model: m, prompt: x }
  - { id: b, model: m, prompt: y }
graph:
  entry_point: a
  nodes:
    a: { transitions_to: b }
    b:
      conditional_transitions:
        - { condition: done, target: END }
      default: a
",
        );

        let outcome = engine.run(&workflow, RunInputs::new()).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.transitions, 3);
        let order: Vec<_> = outcome.outputs.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_invalid_definition_fails_without_steps() {
        let engine = WorkflowEngine::new(Arc::new(ScriptedDispatcher::new(&[])));
        let definition = WorkflowDefinition::from_yaml_str("name: empty\nsteps: []\n").unwrap();

        let outcome = engine.run_definition(definition, RunInputs::new()).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.error.unwrap().kind(), "workflow_definition");
        assert!(outcome.steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_by_run_id() {
        struct Stalled;

        #[async_trait]
        impl StepDispatcher for Stalled {
            async fn dispatch(
                &self,
                _model: &str,
                _prompt: &str,
                _params: &ModelParameters,
            ) -> Result<RoutedResponse, RoutingError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(RoutingError::ModelNotFound { model: "never".to_string() })
            }
        }

        let engine = Arc::new(WorkflowEngine::new(Arc::new(Stalled)));
        let workflow = Arc::new(compile("name: slow\nsteps:\n  - { id: only, model: m, prompt: x }\n"));

        let handle = engine.spawn(workflow, RunInputs::new());
        let active = engine.active_runs();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].run_id, handle.run_id());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.cancel(handle.run_id()));

        let outcome = handle.outcome().await.unwrap();
        assert_eq!(outcome.status, RunStatus::Cancelled);
        assert!(engine.active_runs().is_empty());
        assert!(!engine.cancel(outcome.run_id));
    }

    #[test]
    fn test_missing_step_names_the_transition_source() {
        let err = missing_step(Some("writer"), "ghost");
        assert!(matches!(err, DefinitionError::UnknownTarget { ref from, ref target } if from == "writer" && target == "ghost"));
        assert_eq!(err.to_string(), "Step 'writer' transitions to unknown target 'ghost'");

        let err = missing_step(None, "start");
        assert!(matches!(err, DefinitionError::UnknownEntryPoint(ref step) if step == "start"));
    }
}
