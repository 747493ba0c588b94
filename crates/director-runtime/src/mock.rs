use crate::backend::{BuildRequest, DestroyOptions, JailBackend};
use crate::process::{ExecContext, ProcessOutcome};
use crate::RuntimeError;
use director_schema::{Argument, KeyValue, Script, ScriptKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Build,
    ConfigureStart,
    Start,
    Stop,
    Destroy,
    Script,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockJail {
    pub running: bool,
    /// Builds under this name, counting those of jails destroyed since.
    pub builds: u32,
    pub makejail: String,
    #[serde(default)]
    pub build_args: Vec<String>,
    #[serde(default)]
    pub start_args: Vec<String>,
}

/// In-memory jail backend.
///
/// Scripts are not executed: `false` exits 1, `exit N` exits N and any other
/// text succeeds. Failures for other operations are injected with
/// [`fail_once`](Self::fail_once). With [`persistent`](Self::persistent) the
/// jail table survives across processes, which the CLI tests rely on.
pub struct MockBackend {
    jails: Mutex<BTreeMap<String, MockJail>>,
    failures: Mutex<HashMap<(MockOp, String), ProcessOutcome>>,
    calls: Mutex<Vec<String>>,
    build_counts: Mutex<HashMap<String, u32>>,
    state_file: Option<PathBuf>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            jails: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            build_counts: Mutex::new(HashMap::new()),
            state_file: None,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, RuntimeError> {
    m.lock()
        .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock whose jail table is loaded from and saved to `path`.
    pub fn persistent(path: impl Into<PathBuf>) -> Result<Self, RuntimeError> {
        let path = path.into();
        let jails = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)
                .map_err(|e| RuntimeError::ExecFailed(format!("mock state: {e}")))?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            jails: Mutex::new(jails),
            state_file: Some(path),
            ..Self::default()
        })
    }

    /// Make the next `op` on `jail` report `outcome` without side effects.
    pub fn fail_once(&self, op: MockOp, jail: &str, outcome: ProcessOutcome) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert((op, jail.to_owned()), outcome);
        }
    }

    /// Every mutating call so far, as `"<op> <jail>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn jail(&self, name: &str) -> Option<MockJail> {
        self.jails.lock().ok().and_then(|j| j.get(name).cloned())
    }

    pub fn jail_names(&self) -> Vec<String> {
        self.jails
            .lock()
            .map(|j| j.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Record the call and return an injected or cancellation outcome, if any.
    fn enter(
        &self,
        op: MockOp,
        jail: &str,
        ctx: &ExecContext<'_>,
    ) -> Result<Option<ProcessOutcome>, RuntimeError> {
        let label = format!("{} {jail}", op_name(op));
        lock(&self.calls)?.push(label.clone());
        if let Some(path) = ctx.log {
            let mut log = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(log, "+ mock {label}")?;
        }
        if ctx.cancelled() {
            return Ok(Some(ProcessOutcome::Interrupted));
        }
        Ok(lock(&self.failures)?.remove(&(op, jail.to_owned())))
    }

    fn save(&self, jails: &BTreeMap<String, MockJail>) -> Result<(), RuntimeError> {
        if let Some(path) = &self.state_file {
            let content = serde_json::to_string_pretty(jails)
                .map_err(|e| RuntimeError::ExecFailed(format!("mock state: {e}")))?;
            std::fs::write(path, content)?;
        }
        Ok(())
    }

    /// Apply `f` to an existing jail; exit 1 when the jail is unknown.
    fn with_jail(
        &self,
        jail: &str,
        f: impl FnOnce(&mut MockJail),
    ) -> Result<ProcessOutcome, RuntimeError> {
        let mut jails = lock(&self.jails)?;
        let Some(entry) = jails.get_mut(jail) else {
            return Ok(ProcessOutcome::Exited(1));
        };
        f(entry);
        self.save(&jails)?;
        Ok(ProcessOutcome::Exited(0))
    }
}

fn op_name(op: MockOp) -> &'static str {
    match op {
        MockOp::Build => "build",
        MockOp::ConfigureStart => "configure-start",
        MockOp::Start => "start",
        MockOp::Stop => "stop",
        MockOp::Destroy => "destroy",
        MockOp::Script => "script",
    }
}

fn script_exit_code(text: &str) -> i32 {
    let text = text.trim();
    if text == "false" {
        return 1;
    }
    text.strip_prefix("exit ")
        .and_then(|code| code.trim().parse().ok())
        .unwrap_or(0)
}

impl JailBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn exists(&self, jail: &str, _ctx: &ExecContext<'_>) -> Result<bool, RuntimeError> {
        Ok(lock(&self.jails)?.contains_key(jail))
    }

    fn is_running(&self, jail: &str, _ctx: &ExecContext<'_>) -> Result<bool, RuntimeError> {
        Ok(lock(&self.jails)?.get(jail).is_some_and(|j| j.running))
    }

    fn build(
        &self,
        request: &BuildRequest<'_>,
        ctx: &ExecContext<'_>,
    ) -> Result<ProcessOutcome, RuntimeError> {
        if let Some(outcome) = self.enter(MockOp::Build, request.jail, ctx)? {
            return Ok(outcome);
        }
        let mut jails = lock(&self.jails)?;
        let mut counts = lock(&self.build_counts)?;
        let builds = counts
            .entry(request.jail.to_owned())
            .or_insert_with(|| jails.get(request.jail).map_or(0, |j| j.builds));
        *builds += 1;
        let builds = *builds;
        drop(counts);
        jails.insert(
            request.jail.to_owned(),
            MockJail {
                running: false,
                builds,
                makejail: request.makejail.to_owned(),
                build_args: crate::appjail::makejail_args(request),
                start_args: Vec::new(),
            },
        );
        self.save(&jails)?;
        Ok(ProcessOutcome::Exited(0))
    }

    fn configure_start(
        &self,
        jail: &str,
        arguments: &[Argument],
        environment: &[KeyValue],
        ctx: &ExecContext<'_>,
    ) -> Result<ProcessOutcome, RuntimeError> {
        if let Some(outcome) = self.enter(MockOp::ConfigureStart, jail, ctx)? {
            return Ok(outcome);
        }
        let args = crate::appjail::enable_start_args(jail, arguments, environment);
        self.with_jail(jail, |j| j.start_args = args)
    }

    fn start(&self, jail: &str, ctx: &ExecContext<'_>) -> Result<ProcessOutcome, RuntimeError> {
        if let Some(outcome) = self.enter(MockOp::Start, jail, ctx)? {
            return Ok(outcome);
        }
        self.with_jail(jail, |j| j.running = true)
    }

    fn stop(&self, jail: &str, ctx: &ExecContext<'_>) -> Result<ProcessOutcome, RuntimeError> {
        if let Some(outcome) = self.enter(MockOp::Stop, jail, ctx)? {
            return Ok(outcome);
        }
        self.with_jail(jail, |j| j.running = false)
    }

    fn destroy(
        &self,
        jail: &str,
        _options: DestroyOptions,
        ctx: &ExecContext<'_>,
    ) -> Result<ProcessOutcome, RuntimeError> {
        if let Some(outcome) = self.enter(MockOp::Destroy, jail, ctx)? {
            return Ok(outcome);
        }
        let mut jails = lock(&self.jails)?;
        if jails.remove(jail).is_none() {
            return Ok(ProcessOutcome::Exited(1));
        }
        self.save(&jails)?;
        Ok(ProcessOutcome::Exited(0))
    }

    fn exec_script(
        &self,
        jail: &str,
        script: &Script,
        ctx: &ExecContext<'_>,
    ) -> Result<ProcessOutcome, RuntimeError> {
        // Shell validation matches the real backend.
        crate::script::script_args(jail, script)?;
        if let Some(outcome) = self.enter(MockOp::Script, jail, ctx)? {
            return Ok(outcome);
        }
        let jails = lock(&self.jails)?;
        let Some(entry) = jails.get(jail) else {
            return Ok(ProcessOutcome::Exited(1));
        };
        if script.kind == ScriptKind::Jexec && !entry.running {
            return Ok(ProcessOutcome::Exited(1));
        }
        Ok(ProcessOutcome::Exited(script_exit_code(&script.text)))
    }
}
