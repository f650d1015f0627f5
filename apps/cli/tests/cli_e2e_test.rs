use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn conduit(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("conduit-cli").unwrap();
    cmd.current_dir(dir.path()).env_remove("CONDUIT_REGISTRY").args(["--log-level", "error"]);
    cmd
}

#[test]
fn test_version() {
    let mut cmd = Command::cargo_bin("conduit-cli").unwrap();
    cmd.arg("--version").assert().success().stdout(predicate::str::contains("conduit 0.1.0"));
}

#[test]
fn test_help() {
    let mut cmd = Command::cargo_bin("conduit-cli").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Conduit routes prompts for logical model names"));
}

#[test]
fn test_missing_registry_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    conduit(&temp_dir)
        .arg("models")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No model registry configured"));
}

#[test]
fn test_config_file_is_picked_up_from_working_directory() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("models.yaml"), "echo:\n  backend: echo\n").unwrap();
    std::fs::write(temp_dir.path().join("conduit.toml"), "registry = \"models.yaml\"\n").unwrap();

    conduit(&temp_dir).args(["route", "echo", "from config"]).assert().success().stdout("from config\n");
}

#[test]
fn test_invalid_env_override_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(temp_dir.path().join("models.yaml"), "echo:\n  backend: echo\n").unwrap();

    conduit(&temp_dir)
        .env("CONDUIT_CACHE_TTL_SECS", "soon")
        .args(["--registry", "models.yaml", "models"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONDUIT_CACHE_TTL_SECS"));
}
