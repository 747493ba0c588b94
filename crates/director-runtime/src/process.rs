use crate::RuntimeError;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long a child gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// How an external process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited(i32),
    TimedOut,
    SpawnFailed(String),
    Interrupted,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited(0))
    }

    fn from_status(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ProcessOutcome::Exited(code),
            (None, Some(signal)) => ProcessOutcome::Exited(128 + signal),
            (None, None) => ProcessOutcome::Exited(-1),
        }
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessOutcome::Exited(code) => write!(f, "exit status {code}"),
            ProcessOutcome::TimedOut => write!(f, "timed out"),
            ProcessOutcome::SpawnFailed(msg) => write!(f, "failed to spawn: {msg}"),
            ProcessOutcome::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Bounds and destination for one external process.
#[derive(Debug, Clone, Copy)]
pub struct ExecContext<'a> {
    pub timeout: Duration,
    /// Output of the process is appended here; discarded when `None`.
    pub log: Option<&'a Path>,
    pub cancel: &'a AtomicBool,
}

impl<'a> ExecContext<'a> {
    pub fn new(timeout: Duration, cancel: &'a AtomicBool) -> Self {
        Self {
            timeout,
            log: None,
            cancel,
        }
    }

    #[must_use]
    pub fn with_log(self, log: &'a Path) -> Self {
        Self {
            log: Some(log),
            ..self
        }
    }

    /// Same bounds, output discarded.
    #[must_use]
    pub fn quiet(self) -> Self {
        Self { log: None, ..self }
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Run `command` to completion, its output going to the context's log.
pub fn run(command: &mut Command, ctx: &ExecContext<'_>) -> Result<ProcessOutcome, RuntimeError> {
    let (stdout, stderr) = match ctx.log {
        Some(path) => {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "+ {}", describe(command))?;
            let err = file.try_clone()?;
            (Stdio::from(file), Stdio::from(err))
        }
        None => (Stdio::null(), Stdio::null()),
    };
    command.stdin(Stdio::null()).stdout(stdout).stderr(stderr);
    Ok(supervise(command, ctx))
}

/// Run `command` to completion and return what it printed on stdout.
pub fn run_captured(
    command: &mut Command,
    ctx: &ExecContext<'_>,
) -> Result<(ProcessOutcome, String), RuntimeError> {
    let mut out = tempfile::tempfile()?;
    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(out.try_clone()?))
        .stderr(Stdio::null());
    let outcome = supervise(command, ctx);
    let mut text = String::new();
    out.seek(SeekFrom::Start(0))?;
    out.read_to_string(&mut text)?;
    Ok((outcome, text))
}

fn supervise(command: &mut Command, ctx: &ExecContext<'_>) -> ProcessOutcome {
    if ctx.cancelled() {
        return ProcessOutcome::Interrupted;
    }

    tracing::debug!("exec: {}", describe(command));
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ProcessOutcome::SpawnFailed(format!(
                "{}: {e}",
                command.get_program().to_string_lossy()
            ))
        }
    };

    let deadline = Instant::now() + ctx.timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return ProcessOutcome::from_status(status),
            Ok(None) => {}
            Err(e) => {
                terminate(&mut child);
                return ProcessOutcome::SpawnFailed(format!("wait failed: {e}"));
            }
        }
        if ctx.cancelled() {
            tracing::warn!("interrupted: {}", describe(command));
            terminate(&mut child);
            return ProcessOutcome::Interrupted;
        }
        if Instant::now() >= deadline {
            tracing::warn!(
                "timed out after {}s: {}",
                ctx.timeout.as_secs(),
                describe(command)
            );
            terminate(&mut child);
            return ProcessOutcome::TimedOut;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// SIGTERM, then SIGKILL if the child outlives the grace period.
fn terminate(child: &mut Child) {
    if let Ok(pid) = i32::try_from(child.id()) {
        send_sigterm(pid);
    }
    let deadline = Instant::now() + TERMINATE_GRACE;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) | Err(_) => return,
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[allow(unsafe_code)]
fn send_sigterm(pid: i32) {
    // SAFETY: pid belongs to a child we spawned and have not reaped yet.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}

fn describe(command: &Command) -> String {
    let mut out = command.get_program().to_string_lossy().into_owned();
    for arg in command.get_args() {
        out.push(' ');
        out.push_str(&arg.to_string_lossy());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    static NEVER: AtomicBool = AtomicBool::new(false);

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn exit_code_is_reported() {
        let ctx = ExecContext::new(Duration::from_secs(10), &NEVER);
        assert_eq!(run(&mut sh("exit 3"), &ctx).unwrap(), ProcessOutcome::Exited(3));
        assert!(run(&mut sh("true"), &ctx).unwrap().success());
    }

    #[test]
    fn timeout_kills_child() {
        let ctx = ExecContext::new(Duration::from_millis(200), &NEVER);
        let started = Instant::now();
        let outcome = run(&mut sh("sleep 30"), &ctx).unwrap();
        assert_eq!(outcome, ProcessOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_spawn_failure() {
        let ctx = ExecContext::new(Duration::from_secs(1), &NEVER);
        let outcome = run(&mut Command::new("/nonexistent/director-test"), &ctx).unwrap();
        assert!(matches!(outcome, ProcessOutcome::SpawnFailed(_)));
    }

    #[test]
    fn preset_cancel_skips_spawn() {
        let cancel = AtomicBool::new(true);
        let ctx = ExecContext::new(Duration::from_secs(10), &cancel);
        assert_eq!(
            run(&mut sh("exit 0"), &ctx).unwrap(),
            ProcessOutcome::Interrupted
        );
    }

    #[test]
    fn cancel_terminates_running_child() {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let setter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
        });
        let ctx = ExecContext::new(Duration::from_secs(60), &cancel);
        let outcome = run(&mut sh("sleep 30"), &ctx).unwrap();
        setter.join().unwrap();
        assert_eq!(outcome, ProcessOutcome::Interrupted);
    }

    #[test]
    fn output_is_appended_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("stage.log");
        let ctx = ExecContext::new(Duration::from_secs(10), &NEVER).with_log(&log);
        run(&mut sh("echo out; echo err >&2"), &ctx).unwrap();
        run(&mut sh("echo second"), &ctx).unwrap();
        let content = std::fs::read_to_string(&log).unwrap();
        assert!(content.contains("+ /bin/sh -c echo out"));
        assert!(content.contains("out\n"));
        assert!(content.contains("err\n"));
        assert!(content.contains("second\n"));
    }

    #[test]
    fn captured_stdout() {
        let ctx = ExecContext::new(Duration::from_secs(10), &NEVER);
        let (outcome, text) = run_captured(&mut sh("printf 0"), &ctx).unwrap();
        assert!(outcome.success());
        assert_eq!(text, "0");
    }

    #[test]
    fn signal_exit_maps_above_128() {
        let ctx = ExecContext::new(Duration::from_secs(10), &NEVER);
        let outcome = run(&mut sh("kill -9 $$"), &ctx).unwrap();
        assert_eq!(outcome, ProcessOutcome::Exited(128 + 9));
    }
}
