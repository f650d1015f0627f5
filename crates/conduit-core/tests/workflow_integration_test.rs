//! Integration tests for workflows routed through the real router.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conduit_abstraction::{Model, ModelError, ModelParameters, ModelResponse};
use conduit_core::workflow::{FnEvaluator, RunInputs, RunStatus, WorkflowDefinition, WorkflowEngine};
use conduit_core::{Runtime, Settings, WorkflowError};
use conduit_models::{CacheConfig, ModelFactory, ResponseCache};
use conduit_orchestrator::{BreakerConfig, CircuitBreaker, ModelDescriptor, ModelRegistry, RouterBuilder};
use tokio_util::sync::CancellationToken;

/// Answers by provider model name and records every prompt it sees.
struct ScriptedBackend {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self { calls: AtomicUsize::new(0), prompts: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl Model for ScriptedBackend {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let model = parameters.and_then(|p| p.model).unwrap_or_default();
        match model.as_str() {
            "answer-v1" => Ok(ModelResponse::text("42")),
            "writer-v1" => Ok(ModelResponse::text(format!("draft of: {prompt}"))),
            "critic-v1" => Ok(ModelResponse::text("Needs more detail.")),
            "slow-v1" => {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(ModelResponse::text("too late"))
            }
            _ => Err(ModelError::ModelResponseError(format!("Server error (500): no script for {model}"))),
        }
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

fn engine(backend: Arc<ScriptedBackend>) -> WorkflowEngine {
    let registry = ModelRegistry::new()
        .with_descriptor(ModelDescriptor::new("answer", "scripted").with_model_name("answer-v1"))
        .with_descriptor(ModelDescriptor::new("echo-writer", "scripted").with_model_name("writer-v1"))
        .with_descriptor(ModelDescriptor::new("critic", "scripted").with_model_name("critic-v1"))
        .with_descriptor(ModelDescriptor::new("slow", "scripted").with_model_name("slow-v1"))
        .with_descriptor(ModelDescriptor::new("broken", "scripted").with_model_name("broken-v1"));
    let router = RouterBuilder::new(Arc::new(registry))
        .with_backend(
            "scripted",
            backend,
            Arc::new(CircuitBreaker::new("scripted", BreakerConfig::new(10, Duration::from_secs(30)))),
        )
        .with_cache(Arc::new(ResponseCache::new(CacheConfig::default()).unwrap()))
        .build();
    WorkflowEngine::new(Arc::new(router))
}

#[tokio::test]
async fn test_outputs_flow_into_later_prompts() {
    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine(backend.clone());
    let workflow = WorkflowDefinition::from_yaml_str(
        r"
name: answer-then-write
steps:
  - { id: A, model: answer, prompt: x }
  - { id: B, model: echo-writer, prompt: 'use {{outputs.A}} about {{ inputs.topic }}' }
",
    )
    .unwrap()
    .compile()
    .unwrap();

    let mut inputs = RunInputs::new();
    inputs.insert("topic".to_string(), "routers".to_string());
    let outcome = engine.run(&workflow, inputs).await;

    assert_eq!(outcome.status, RunStatus::Succeeded);
    assert_eq!(outcome.output("B"), Some("draft of: use 42 about routers"));
    assert!(backend.prompts.lock().unwrap()[1].contains("use 42"));
    assert_eq!(outcome.steps.iter().filter(|s| s.success).count(), 2);
}

#[tokio::test]
async fn test_writer_qa_loop_hits_max_iterations() {
    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine(backend.clone());
    let workflow = WorkflowDefinition::from_yaml_str(
        r"
name: writer-qa
max_iterations: 5
steps:
  - { id: writer, model: echo-writer, prompt: 'Write about {{ inputs.topic }}' }
  - { id: qa_agent, model: critic, prompt: 'Review: {{ outputs.writer }}' }
graph:
  entry_point: writer
  nodes:
    writer: { transitions_to: qa_agent }
    qa_agent:
      conditional_transitions:
        - { condition: approved, target: END }
      default: writer
",
    )
    .unwrap()
    .compile()
    .unwrap();

    let mut inputs = RunInputs::new();
    inputs.insert("topic".to_string(), "caching".to_string());
    let outcome = engine.run(&workflow, inputs).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(matches!(outcome.error, Some(WorkflowError::MaxIterationsExceeded { limit: 5 })));
    assert_eq!(outcome.output("qa_agent"), Some("Needs more detail."));
    // Identical prompts repeat every lap, so only the first lap reaches the backend.
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert!(outcome.steps.iter().skip(2).all(|s| s.cached));
}

#[tokio::test]
async fn test_injected_condition_approves() {
    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine(backend).with_evaluator(Arc::new(FnEvaluator::new(|ctx: &conduit_core::workflow::ConditionContext<'_>| {
        ctx.condition == "approved" && ctx.last_output.contains("detail")
    })));
    let definition = WorkflowDefinition::from_yaml_str(
        r"
name: approve
steps:
  - { id: writer, model: echo-writer, prompt: go }
  - { id: qa_agent, model: critic, prompt: 'Review: {{ outputs.writer }}' }
graph:
  entry_point: writer
  nodes:
    writer: { transitions_to: qa_agent }
    qa_agent:
      conditional_transitions:
        - { condition: approved, target: END }
",
    )
    .unwrap();

    let outcome = engine.run_definition(definition, RunInputs::new()).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.transitions, 1);
}

#[tokio::test]
async fn test_failure_keeps_partial_outputs() {
    let engine = engine(Arc::new(ScriptedBackend::new()));
    let workflow = WorkflowDefinition::from_yaml_str(
        "name: partial\nsteps:\n  - { id: first, model: answer, prompt: x }\n  - { id: second, model: broken, prompt: y }\n  - { id: third, model: answer, prompt: z }\n",
    )
    .unwrap()
    .compile()
    .unwrap();

    let outcome = engine.run(&workflow, RunInputs::new()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.error.as_ref().unwrap().kind(), "adapter_error");
    assert_eq!(outcome.output("first"), Some("42"));
    assert_eq!(outcome.output("third"), None);
    assert_eq!(outcome.steps.len(), 2);

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["status"], "FAILED");
    assert_eq!(json["outputs"]["first"], "42");
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_mid_step() {
    let engine = engine(Arc::new(ScriptedBackend::new()));
    let workflow = WorkflowDefinition::from_yaml_str(
        "name: cancel\nsteps:\n  - { id: quick, model: answer, prompt: x }\n  - { id: stuck, model: slow, prompt: y }\n",
    )
    .unwrap()
    .compile()
    .unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        canceller.cancel();
    });

    let outcome = engine.run_with_cancellation(&workflow, RunInputs::new(), token).await;

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert!(matches!(outcome.error, Some(WorkflowError::Cancelled)));
    assert_eq!(outcome.output("quick"), Some("42"));
    assert_eq!(outcome.steps.last().unwrap().step_id, "stuck");
    assert!(!outcome.steps.last().unwrap().success);
}

#[tokio::test]
async fn test_runtime_runs_workflow_on_echo_backend() {
    let registry = ModelRegistry::from_yaml_str("echo:\n  backend: echo\n").unwrap();
    let runtime =
        Runtime::build_with_env(Settings::new(), registry, &ModelFactory::with_builtin(), |_| None).unwrap();
    let workflow = WorkflowDefinition::from_yaml_str(
        "name: echo\nsteps:\n  - { id: a, model: echo, prompt: hi }\n  - { id: b, model: echo, prompt: '{{ outputs.a }} again' }\n",
    )
    .unwrap()
    .compile()
    .unwrap();
    workflow.validate_models(runtime.registry()).unwrap();

    let outcome = runtime.engine().run(&workflow, RunInputs::new()).await;
    assert_eq!(outcome.output("b"), Some("hi again"));
    assert_eq!(runtime.events().recent(Some("routing_success"), 10).len(), 2);
}
