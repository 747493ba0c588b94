pub mod check;
pub mod completions;
pub mod down;
pub mod info;
pub mod ls;
pub mod up;

use director_core::{DotEnv, ServiceAction, ServiceReport};
use director_runtime::{select_backend, JailBackend, MockBackend};
use director_schema::EnvLookup;
use director_store::ProjectState;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_SPEC_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

const BACKEND_ENV: &str = "DIRECTOR_BACKEND";
const MOCK_STATE_ENV: &str = "DIRECTOR_MOCK_STATE";
const PROJECT_ENV: &str = "DIRECTOR_PROJECT";
const DEFAULT_BACKEND: &str = "appjail";

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Status line shown while a project converges or is torn down.
pub fn progress(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("|/-\\ "),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Final progress line, marked like a service line: `+` done, `-` failed.
pub fn outcome_line(succeeded: bool, msg: &str) -> String {
    use console::Style;
    if succeeded {
        format!("{} {msg}", Style::new().green().apply_to('+'))
    } else {
        format!("{} {msg}", Style::new().red().bold().apply_to('-'))
    }
}

pub fn finish_progress(pb: &ProgressBar, succeeded: bool, msg: &str) {
    pb.set_style(
        ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.finish_with_message(outcome_line(succeeded, msg));
}

pub fn colorize_state(state: ProjectState) -> String {
    use console::Style;
    let text = state.to_string();
    match state {
        ProjectState::Done => Style::new().green().apply_to(text).to_string(),
        ProjectState::Failed => Style::new().red().bold().apply_to(text).to_string(),
        ProjectState::Unfinished => Style::new().yellow().apply_to(text).to_string(),
        ProjectState::Destroying => Style::new().dim().apply_to(text).to_string(),
    }
}

/// One human-readable line describing what `up` did to a service.
pub fn service_line(report: &ServiceReport) -> String {
    use console::Style;
    let jail = report.jail.as_ref().map_or("-", |j| j.as_str());
    let (symbol, detail) = match &report.action {
        ServiceAction::SkippedUnchanged => ('=', "unchanged".to_owned()),
        ServiceAction::Rebuilt {
            reason: Some(reason),
        } => ('+', format!("rebuilt ({reason})")),
        ServiceAction::Rebuilt { reason: None } => ('+', "created".to_owned()),
        ServiceAction::Started => ('+', "started".to_owned()),
        ServiceAction::Removed => ('x', "removed".to_owned()),
        ServiceAction::Failed {
            stage: Some(stage),
            reason,
            ..
        } => ('-', format!("failed at {stage}: {reason}")),
        ServiceAction::Failed {
            stage: None,
            reason,
            ..
        } => ('-', format!("failed: {reason}")),
    };
    let detail = if report.is_failed() {
        Style::new().red().apply_to(detail).to_string()
    } else {
        detail
    };
    format!(" {symbol} {} ({jail}): {detail}", report.service)
}

/// `--project`, else `DIRECTOR_PROJECT` (process environment, then the env file).
pub fn resolve_project(explicit: Option<&str>, env: &DotEnv) -> Option<String> {
    explicit
        .map(str::to_owned)
        .or_else(|| env.lookup(PROJECT_ENV))
        .filter(|p| !p.is_empty())
}

pub fn require_project(explicit: Option<&str>, env: &DotEnv) -> Result<String, String> {
    resolve_project(explicit, env).ok_or_else(|| {
        format!("no project specified: use --project or set {PROJECT_ENV}")
    })
}

/// The jail backend named by `DIRECTOR_BACKEND`, `appjail` by default.
///
/// The mock backend keeps its jails in `DIRECTOR_MOCK_STATE` when set so
/// that consecutive invocations see the same jails.
pub fn make_backend() -> Result<Arc<dyn JailBackend>, String> {
    let name = std::env::var(BACKEND_ENV).unwrap_or_else(|_| DEFAULT_BACKEND.to_owned());
    if name == "mock" {
        if let Some(path) = std::env::var_os(MOCK_STATE_ENV) {
            let backend = MockBackend::persistent(path).map_err(|e| e.to_string())?;
            return Ok(Arc::new(backend));
        }
    }
    select_backend(&name)
        .map(Arc::from)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use director_schema::{JailName, ServiceId};
    use std::collections::BTreeMap;

    fn report(action: ServiceAction) -> ServiceReport {
        ServiceReport {
            service: ServiceId::new("web"),
            jail: Some(JailName::new("nginx")),
            state: director_core::ServiceState::Committed,
            action,
        }
    }

    #[test]
    fn json_pretty_serializes_string() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_state_keeps_text() {
        for state in [
            ProjectState::Done,
            ProjectState::Failed,
            ProjectState::Unfinished,
            ProjectState::Destroying,
        ] {
            assert!(colorize_state(state).contains(&state.to_string()));
        }
    }

    #[test]
    fn service_line_mentions_jail_and_outcome() {
        let line = service_line(&report(ServiceAction::SkippedUnchanged));
        assert!(line.contains("web (nginx)"));
        assert!(line.contains("unchanged"));

        let line = service_line(&report(ServiceAction::Failed {
            stage: Some(director_store::Stage::Script),
            reason: "script #1 failed: exit status 1".to_owned(),
            script_index: Some(1),
        }));
        assert!(line.contains("failed at script"));
    }

    #[test]
    fn explicit_project_wins() {
        let env = DotEnv::new(BTreeMap::from([(
            "DIRECTOR_PROJECT".to_owned(),
            "from-file".to_owned(),
        )]));
        assert_eq!(resolve_project(Some("cli"), &env).as_deref(), Some("cli"));
    }

    #[test]
    fn empty_project_is_rejected() {
        let env = DotEnv::default();
        assert!(require_project(Some(""), &env).is_err());
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_SPEC_ERROR);
        assert_ne!(EXIT_SPEC_ERROR, EXIT_STORE_ERROR);
    }

    #[test]
    fn progress_finishes_with_marked_line() {
        let pb = progress("converging demo");
        finish_progress(&pb, true, "project demo is up");
        assert!(pb.is_finished());
        let pb = progress("converging demo");
        finish_progress(&pb, false, "project demo failed");
        assert!(pb.is_finished());
    }

    #[test]
    fn outcome_line_marks_result() {
        let plain = |line: String| console::strip_ansi_codes(&line).into_owned();
        assert_eq!(plain(outcome_line(true, "project demo stopped")), "+ project demo stopped");
        assert_eq!(plain(outcome_line(false, "down failed")), "- down failed");
    }
}
