//! Integration tests for workflow commands.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const REGISTRY: &str = "echo:\n  backend: echo\n";

const LINEAR: &str = r"
name: echo-chain
steps:
  - id: greet
    model: echo
    prompt: 'hello {{ inputs.name }}'
  - id: shout
    model: echo
    prompt: '{{ outputs.greet }}!'
";

const LOOP: &str = r"
name: endless-review
max_iterations: 3
steps:
  - { id: writer, model: echo, prompt: 'draft' }
  - { id: qa_agent, model: echo, prompt: 'review {{ outputs.writer }}' }
graph:
  entry_point: writer
  nodes:
    writer: { transitions_to: qa_agent }
    qa_agent:
      conditional_transitions:
        - { condition: approved, target: END }
      default: writer
";

fn workspace(workflows: &[(&str, &str)]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("models.yaml"), REGISTRY).unwrap();
    for (name, content) in workflows {
        std::fs::write(temp_dir.path().join(name), content).unwrap();
    }
    temp_dir
}

fn conduit(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("conduit-cli").unwrap();
    cmd.current_dir(dir.path()).env_remove("CONDUIT_REGISTRY").args(["--log-level", "error"]);
    cmd
}

#[test]
fn test_workflow_run_passes_outputs_between_steps() {
    let temp_dir = workspace(&[("chain.yaml", LINEAR)]);
    conduit(&temp_dir)
        .args(["--registry", "models.yaml", "workflow", "run", "chain.yaml", "--input", "name=ada"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SUCCEEDED"))
        .stdout(predicate::str::contains("hello ada!"));
}

#[test]
fn test_workflow_run_json_outcome() {
    let temp_dir = workspace(&[("chain.yaml", LINEAR)]);
    let output = conduit(&temp_dir)
        .args(["--registry", "models.yaml", "workflow", "run", "chain.yaml", "-i", "name=bob", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["status"], "SUCCEEDED");
    assert_eq!(outcome["outputs"]["greet"], "hello bob");
    assert_eq!(outcome["outputs"]["shout"], "hello bob!");
    assert_eq!(outcome["steps"].as_array().unwrap().len(), 2);
}

#[test]
fn test_workflow_run_missing_input_fails_with_partial_outcome() {
    let temp_dir = workspace(&[("chain.yaml", LINEAR)]);
    let output = conduit(&temp_dir)
        .args(["--registry", "models.yaml", "workflow", "run", "chain.yaml", "--json"])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["status"], "FAILED");
    assert!(outcome["error"].as_str().unwrap().contains("inputs.name"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("template_resolution"));
}

#[test]
fn test_workflow_run_loop_hits_max_iterations() {
    let temp_dir = workspace(&[("loop.yaml", LOOP)]);
    conduit(&temp_dir)
        .args(["--registry", "models.yaml", "workflow", "run", "loop.yaml"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAILED"))
        .stderr(predicate::str::contains("max_iterations_exceeded"));
}

#[test]
fn test_workflow_run_rejects_unknown_model_before_running() {
    let temp_dir = workspace(&[("ghost.yaml", "name: ghost\nsteps:\n  - { id: a, model: ghost, prompt: hi }\n")]);
    conduit(&temp_dir)
        .args(["--registry", "models.yaml", "workflow", "run", "ghost.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown model 'ghost'"));
}

#[test]
fn test_workflow_validate_with_registry() {
    let temp_dir = workspace(&[("loop.yaml", LOOP)]);
    conduit(&temp_dir)
        .args(["--registry", "models.yaml", "workflow", "validate", "loop.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Workflow 'endless-review' is valid (2 steps, entry 'writer')"));
}

#[test]
fn test_workflow_validate_without_registry_skips_models() {
    let temp_dir = workspace(&[("ghost.yaml", "name: ghost\nsteps:\n  - { id: a, model: ghost, prompt: hi }\n")]);
    let output = conduit(&temp_dir).args(["workflow", "validate", "ghost.yaml", "--json"]).output().unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["name"], "ghost");
    assert_eq!(report["models_checked"], false);
}

#[test]
fn test_workflow_validate_rejects_bad_target() {
    let temp_dir = workspace(&[(
        "bad.yaml",
        "name: bad\nsteps:\n  - { id: a, model: echo, prompt: hi }\ngraph:\n  entry_point: a\n  nodes:\n    a: { transitions_to: nowhere }\n",
    )]);
    conduit(&temp_dir)
        .args(["workflow", "validate", "bad.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown target 'nowhere'"));
}
