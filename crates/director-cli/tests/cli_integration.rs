//! CLI subprocess integration tests.
//!
//! These tests invoke the `director` binary against the mock backend, whose
//! jail table is persisted between invocations, and verify exit codes,
//! human output and JSON output.

use std::path::PathBuf;
use std::process::{Command, Output};

const DIRECTOR_FILE: &str = r"
services:
  db:
    name: db
    priority: 10
  web:
    name: web
    priority: 50
    scripts:
      - text: echo ready
";

struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("app")).unwrap();
        std::fs::write(
            root.join("director.toml"),
            format!(
                r#"[projects]
directory = "{root}/projects"

[locks]
directory = "{root}/locks"
wait_seconds = 1

[logs]
directory = "{root}/logs"
"#,
                root = root.display()
            ),
        )
        .unwrap();
        Self { dir }
    }

    fn app(&self) -> PathBuf {
        self.dir.path().join("app")
    }

    fn write_director_file(&self, content: &str) -> PathBuf {
        let path = self.app().join("director.yml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn director(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_director"));
        cmd.current_dir(self.app())
            .env("DIRECTOR_BACKEND", "mock")
            .env("DIRECTOR_MOCK_STATE", self.dir.path().join("mock.json"))
            .env("DIRECTOR_CONFIG", self.dir.path().join("director.toml"))
            .env_remove("DIRECTOR_PROJECT")
            .env_remove("DIRECTOR_LOG");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.director().args(args).output().unwrap()
    }

    fn mock_state(&self) -> serde_json::Value {
        let content = std::fs::read_to_string(self.dir.path().join("mock.json")).unwrap();
        serde_json::from_str(&content).unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn assert_exit(output: &Output, code: i32) {
    assert_eq!(
        output.status.code(),
        Some(code),
        "stdout: {}\nstderr: {}",
        stdout(output),
        stderr(output)
    );
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|e| panic!("invalid JSON ({e}): {}", stdout(output)))
}

#[test]
fn cli_version_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_director"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("director"));
}

#[test]
fn cli_help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_director"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["up", "down", "ls", "info", "check"] {
        assert!(text.contains(command), "help must list '{command}': {text}");
    }
}

#[test]
fn cli_up_then_idempotent_up() {
    let sandbox = Sandbox::new();
    sandbox.write_director_file(DIRECTOR_FILE);

    let first = sandbox.run(&["up", "--project", "demo"]);
    assert_exit(&first, 0);
    assert!(stdout(&first).contains("created"));

    let second = sandbox.run(&["--json", "up", "--project", "demo"]);
    assert_exit(&second, 0);
    let report = json(&second);
    let services = report["services"].as_array().unwrap();
    assert_eq!(services.len(), 2);
    assert_eq!(services[0]["service"], "db");
    for service in services {
        assert_eq!(service["action"], "skipped_unchanged");
    }

    let state = sandbox.mock_state();
    assert_eq!(state["web"]["builds"], 1);
    assert_eq!(state["web"]["running"], true);
}

#[test]
fn cli_up_with_alternate_file() {
    let sandbox = Sandbox::new();
    let path = sandbox.app().join("stack.yml");
    std::fs::write(&path, DIRECTOR_FILE).unwrap();

    let output = sandbox.run(&["up", "-p", "demo", "-f", &path.to_string_lossy()]);
    assert_exit(&output, 0);
}

#[test]
fn cli_up_invalid_document_exits_spec_error() {
    let sandbox = Sandbox::new();
    sandbox.write_director_file("services:\n  web:\n    bogus: 1\n");

    let output = sandbox.run(&["up", "--project", "demo"]);
    assert_exit(&output, 2);
    assert!(stderr(&output).contains("specification error"));
}

#[test]
fn cli_up_missing_file_exits_spec_error() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["up", "--project", "demo"]);
    assert_exit(&output, 2);
}

#[test]
fn cli_failed_script_exits_one_and_marks_project() {
    let sandbox = Sandbox::new();
    sandbox.write_director_file(
        r"
services:
  web:
    name: web
    scripts:
      - text: echo one
      - text: exit 3
",
    );

    let output = sandbox.run(&["up", "--project", "demo"]);
    assert_exit(&output, 1);
    assert!(stdout(&output).contains("failed at script"));

    let ls = sandbox.run(&["--json", "ls", "--state", "failed"]);
    assert_exit(&ls, 0);
    let projects = json(&ls);
    assert_eq!(projects.as_array().unwrap().len(), 1);
    assert_eq!(projects[0]["name"], "demo");

    let info = sandbox.run(&["--json", "info", "--project", "demo"]);
    assert_exit(&info, 0);
    let info = json(&info);
    assert_eq!(info["state"], "failed");
    assert_eq!(info["services"][0]["outcome"]["status"], "failure");
    assert_eq!(info["services"][0]["outcome"]["script_index"], 1);
}

#[test]
fn cli_ls_shows_state_symbols() {
    let sandbox = Sandbox::new();
    let empty = sandbox.run(&["ls"]);
    assert_exit(&empty, 0);
    assert!(stdout(&empty).contains("No project has been created."));

    sandbox.write_director_file(DIRECTOR_FILE);
    assert_exit(&sandbox.run(&["up", "--project", "demo"]), 0);

    let ls = sandbox.run(&["ls"]);
    assert_exit(&ls, 0);
    assert!(stdout(&ls).contains(" + demo"));
}

#[test]
fn cli_ls_rejects_unknown_state() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["ls", "--state", "sleeping"]);
    assert_exit(&output, 2);
}

#[test]
fn cli_info_reports_services() {
    let sandbox = Sandbox::new();
    sandbox.write_director_file(DIRECTOR_FILE);
    assert_exit(&sandbox.run(&["up", "--project", "demo"]), 0);

    let info = sandbox.run(&["info", "--project", "demo"]);
    assert_exit(&info, 0);
    let text = stdout(&info);
    assert!(text.contains("state:"));
    assert!(text.contains("+ web (web): running"));
    assert!(text.contains("locked: false"));
}

#[test]
fn cli_info_unknown_project_fails() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["info", "--project", "ghost"]);
    assert_exit(&output, 1);
    assert!(stderr(&output).contains("project not found"));
}

#[test]
fn cli_check_reflects_existence() {
    let sandbox = Sandbox::new();
    assert_exit(&sandbox.run(&["check", "--project", "demo"]), 1);

    sandbox.write_director_file(DIRECTOR_FILE);
    assert_exit(&sandbox.run(&["up", "--project", "demo"]), 0);
    assert_exit(&sandbox.run(&["check", "--project", "demo"]), 0);
}

#[test]
fn cli_down_destroy_removes_everything() {
    let sandbox = Sandbox::new();
    sandbox.write_director_file(DIRECTOR_FILE);
    assert_exit(&sandbox.run(&["up", "--project", "demo"]), 0);

    let stop = sandbox.run(&["down", "--project", "demo"]);
    assert_exit(&stop, 0);
    assert_eq!(sandbox.mock_state()["web"]["running"], false);

    let destroy = sandbox.run(&["--json", "down", "--project", "demo", "--destroy"]);
    assert_exit(&destroy, 0);
    assert_eq!(json(&destroy)["project_removed"], true);
    assert!(sandbox.mock_state().as_object().unwrap().is_empty());
    assert_exit(&sandbox.run(&["check", "--project", "demo"]), 1);
}

#[test]
fn cli_down_requires_project() {
    let sandbox = Sandbox::new();
    let output = sandbox.run(&["down"]);
    assert_exit(&output, 1);
    assert!(stderr(&output).contains("no project specified"));
}

#[test]
fn cli_project_from_environment() {
    let sandbox = Sandbox::new();
    sandbox.write_director_file(DIRECTOR_FILE);
    let output = sandbox
        .director()
        .env("DIRECTOR_PROJECT", "envproj")
        .arg("up")
        .output()
        .unwrap();
    assert_exit(&output, 0);
    assert_exit(&sandbox.run(&["check", "--project", "envproj"]), 0);
}

#[test]
fn cli_env_file_feeds_interpolation_and_project() {
    let sandbox = Sandbox::new();
    std::fs::write(
        sandbox.app().join(".env"),
        "DIRECTOR_PROJECT=fromfile\nJAIL_NAME=\"custom\"\n",
    )
    .unwrap();
    sandbox.write_director_file(
        r#"
services:
  web:
    name: !ENV "${JAIL_NAME}"
"#,
    );

    let output = sandbox.run(&["up"]);
    assert_exit(&output, 0);
    assert_exit(&sandbox.run(&["check", "--project", "fromfile"]), 0);
    assert_eq!(sandbox.mock_state()["custom"]["running"], true);
}

#[test]
fn cli_up_generates_project_name() {
    let sandbox = Sandbox::new();
    sandbox.write_director_file(DIRECTOR_FILE);
    let output = sandbox.run(&["--json", "up"]);
    assert_exit(&output, 0);
    let project = json(&output)["project"].as_str().unwrap().to_owned();
    assert_eq!(project.len(), 10);
    assert_exit(&sandbox.run(&["check", "--project", &project]), 0);
}

#[test]
fn cli_completions_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_director"))
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("director"));
}

#[test]
fn cli_invalid_config_exits_spec_error() {
    let sandbox = Sandbox::new();
    let config = sandbox.dir.path().join("bad.toml");
    std::fs::write(&config, "[unknown]\nkey = 1\n").unwrap();
    sandbox.write_director_file(DIRECTOR_FILE);

    let output = sandbox.run(&["--config", &config.to_string_lossy(), "ls"]);
    assert_exit(&output, 2);
}
