use crate::change::{detect, makejail_mtime, ChangeDecision, Observation, RebuildReason};
use crate::concurrency::{shutdown_flag, LockManager};
use crate::config::DirectorConfig;
use crate::lifecycle::{validate_transition, ServiceState};
use crate::volume::resolve_volume;
use crate::CoreError;
use director_runtime::{BuildRequest, ExecContext, JailBackend, MountDescriptor, ProcessOutcome};
use director_schema::{
    compute_config_digest, execution_order, parse_director_str, EnvLookup, JailName, ProjectSpec,
    ServiceId, ServiceSpec, SpecError,
};
use director_store::{
    check_project_name, ExecutionRecord, Fingerprint, Outcome, ProjectMeta, ProjectState,
    ProjectStore, RecordStore, RunLog, Stage, StoreLayout,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts at drawing a jail name that no existing jail uses.
const RANDOM_NAME_ATTEMPTS: usize = 16;

/// A resolved Director file together with where it came from.
#[derive(Debug, Clone)]
pub struct ProjectSource {
    pub spec: ProjectSpec,
    /// Relative volume devices and Makejail paths resolve against this.
    pub base_dir: PathBuf,
    /// Raw document text, kept as the applied copy.
    pub document: String,
}

impl ProjectSource {
    pub fn load(path: &Path, env: &dyn EnvLookup) -> Result<Self, CoreError> {
        let document = fs::read_to_string(path).map_err(SpecError::Io)?;
        let base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let base_dir = base_dir.canonicalize().unwrap_or(base_dir);
        Self::from_document(document, base_dir, env)
    }

    pub fn from_document(
        document: String,
        base_dir: impl Into<PathBuf>,
        env: &dyn EnvLookup,
    ) -> Result<Self, CoreError> {
        let spec = parse_director_str(&document, env)?.resolve()?;
        Ok(Self {
            spec,
            base_dir: base_dir.into(),
            document,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpOptions {
    /// Rebuild every service regardless of its record.
    pub overwrite: bool,
    /// Stop after the first failed service.
    pub fail_fast: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DownOptions {
    /// Destroy jails and forget the project instead of only stopping.
    pub destroy: bool,
    /// Keep going when a jail cannot be destroyed.
    pub ignore_failed: bool,
    /// Leave jails alone and only update or remove the project itself.
    pub ignore_services: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServiceAction {
    SkippedUnchanged,
    Rebuilt { reason: Option<RebuildReason> },
    Started,
    Removed,
    Failed {
        stage: Option<Stage>,
        reason: String,
        script_index: Option<usize>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub service: ServiceId,
    pub jail: Option<JailName>,
    pub state: ServiceState,
    #[serde(flatten)]
    pub action: ServiceAction,
}

impl ServiceReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.action, ServiceAction::Failed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpReport {
    pub project: String,
    pub log_dir: PathBuf,
    pub removed: Vec<ServiceReport>,
    pub services: Vec<ServiceReport>,
    pub interrupted: bool,
}

impl UpReport {
    pub fn success(&self) -> bool {
        !self.interrupted
            && !self.removed.iter().any(ServiceReport::is_failed)
            && !self.services.iter().any(ServiceReport::is_failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TeardownEntry {
    pub service: ServiceId,
    pub jail: JailName,
    pub stopped: bool,
    pub destroyed: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownReport {
    pub project: String,
    pub log_dir: PathBuf,
    pub services: Vec<TeardownEntry>,
    pub project_removed: bool,
    pub failures_ignored: bool,
    pub interrupted: bool,
}

impl DownReport {
    pub fn success(&self) -> bool {
        !self.interrupted
            && (self.failures_ignored || self.services.iter().all(|s| s.error.is_none()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JailStatus {
    Running,
    Stopped,
    Missing,
    Unknown,
}

impl JailStatus {
    /// Single-character marker used by `info`.
    pub fn symbol(self) -> char {
        match self {
            JailStatus::Running => '+',
            JailStatus::Stopped => '-',
            JailStatus::Missing | JailStatus::Unknown => '!',
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub service: ServiceId,
    pub jail: JailName,
    pub status: JailStatus,
    pub outcome: Outcome,
    pub last_build_time: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub state: ProjectState,
    pub last_log: Option<String>,
    pub locked: bool,
    pub services: Vec<ServiceInfo>,
}

/// Per-service bookkeeping while it moves through the lifecycle.
struct ServiceRun {
    service: ServiceId,
    state: ServiceState,
    stage: Stage,
    jail: Option<JailName>,
    fingerprint: Option<Fingerprint>,
    last_build_time: Option<String>,
}

impl ServiceRun {
    fn new(service: ServiceId) -> Self {
        Self {
            service,
            state: ServiceState::Pending,
            stage: Stage::Build,
            jail: None,
            fingerprint: None,
            last_build_time: None,
        }
    }

    fn advance(&mut self, to: ServiceState) -> Result<(), CoreError> {
        validate_transition(self.state, to)?;
        debug!("{}: {} -> {}", self.service, self.state, to);
        self.state = to;
        Ok(())
    }

    fn report(&self, action: ServiceAction) -> ServiceReport {
        ServiceReport {
            service: self.service.clone(),
            jail: self.jail.clone(),
            state: self.state,
            action,
        }
    }
}

/// Drives projects toward the state their Director file declares.
pub struct Engine {
    config: DirectorConfig,
    layout: StoreLayout,
    backend: Arc<dyn JailBackend>,
    locks: LockManager,
    projects: ProjectStore,
    cancel: &'static AtomicBool,
}

impl Engine {
    pub fn new(config: DirectorConfig, backend: Arc<dyn JailBackend>) -> Self {
        let layout = config.layout();
        let locks = LockManager::new(layout.clone(), config.lock_wait());
        let projects = ProjectStore::new(layout.clone());
        Self {
            config,
            layout,
            backend,
            locks,
            projects,
            cancel: shutdown_flag(),
        }
    }

    /// Use `cancel` instead of the process-wide shutdown flag.
    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: &'static AtomicBool) -> Self {
        self.locks = self.locks.with_cancel_flag(cancel);
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &DirectorConfig {
        &self.config
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn backend(&self) -> &dyn JailBackend {
        self.backend.as_ref()
    }

    fn ctx(&self) -> ExecContext<'_> {
        ExecContext::new(self.config.command_timeout(), self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn exists(&self, project: &str) -> bool {
        self.projects.exists(project)
    }

    /// Converge `project` onto `source`.
    ///
    /// Returns `Err` only when the run cannot begin or its state cannot be
    /// persisted; per-service failures are reported in the `UpReport`.
    pub fn up(
        &self,
        project: &str,
        source: &ProjectSource,
        options: UpOptions,
    ) -> Result<UpReport, CoreError> {
        check_project_name(project)?;
        self.layout.initialize(project)?;
        let _lock = self.locks.lock_project(project)?;

        let run_log = RunLog::create(&self.layout, project)?;
        info!("project {project}: up (logs in {})", run_log.dir().display());
        self.projects
            .set_state(project, ProjectState::Unfinished, Some(run_log.dir()))?;
        self.projects
            .save_applied(project, source.document.as_bytes())?;

        let records = RecordStore::new(self.layout.clone(), project);
        let mut report = UpReport {
            project: project.to_owned(),
            log_dir: run_log.dir().to_path_buf(),
            removed: Vec::new(),
            services: Vec::new(),
            interrupted: false,
        };

        report.removed = self.remove_stale_services(project, source, &records, &run_log)?;

        let order = execution_order(&source.spec.services);
        self.projects.set_services(
            project,
            order.iter().map(|s| s.id.as_str().to_owned()).collect(),
        )?;

        for service in order {
            if self.cancelled() {
                report.interrupted = true;
                break;
            }
            let (service_report, interrupted) =
                self.apply_service(project, source, service, &records, &run_log, options);
            let failed = service_report.is_failed();
            report.services.push(service_report);
            if interrupted || self.cancelled() {
                report.interrupted = true;
                break;
            }
            if failed && options.fail_fast {
                warn!("project {project}: stopping after failure of '{}'", service.id);
                break;
            }
        }

        let state = if report.success() {
            ProjectState::Done
        } else {
            ProjectState::Failed
        };
        self.projects.set_state(project, state, None)?;
        info!("project {project}: {state}");
        Ok(report)
    }

    /// Tear down services that have a record but are no longer declared.
    fn remove_stale_services(
        &self,
        project: &str,
        source: &ProjectSource,
        records: &RecordStore,
        run_log: &RunLog,
    ) -> Result<Vec<ServiceReport>, CoreError> {
        let mut removed = Vec::new();
        for (id, record) in records.load()? {
            if source.spec.service(&id).is_some() {
                continue;
            }
            if self.cancelled() {
                break;
            }
            info!("{id}: no longer declared, removing jail {}", record.jail_name);
            let mut run = ServiceRun::new(id.clone());
            run.jail = Some(record.jail_name.clone());
            run.stage = Stage::Destroy;

            let result = self.locks.lock_service(project, &id).and_then(|_guard| {
                self.teardown_jail(&id, &record.jail_name, true, run_log)?;
                records.remove(&id)?;
                Ok(())
            });
            match result {
                Ok(()) => removed.push(run.report(ServiceAction::Removed)),
                Err(e) => {
                    warn!("{id}: removal failed: {e}");
                    run.state = ServiceState::Failed;
                    removed.push(run.report(ServiceAction::Failed {
                        stage: Some(Stage::Destroy),
                        reason: e.to_string(),
                        script_index: None,
                    }));
                }
            }
        }
        Ok(removed)
    }

    fn apply_service(
        &self,
        project: &str,
        source: &ProjectSource,
        service: &ServiceSpec,
        records: &RecordStore,
        run_log: &RunLog,
        options: UpOptions,
    ) -> (ServiceReport, bool) {
        let mut run = ServiceRun::new(service.id.clone());

        // Without the lock another run may own the record, so nothing is written.
        let _guard = match self.locks.lock_service(project, &service.id) {
            Ok(guard) => guard,
            Err(e) => {
                warn!("{}: {e}", service.id);
                run.state = ServiceState::Failed;
                let interrupted = matches!(e, CoreError::Interrupted);
                let report = run.report(ServiceAction::Failed {
                    stage: None,
                    reason: e.to_string(),
                    script_index: None,
                });
                return (report, interrupted);
            }
        };

        match self.converge(source, service, records, run_log, options, &mut run) {
            Ok(action) => {
                info!("{}: {}", service.id, describe_action(&action));
                (run.report(action), false)
            }
            Err(e) => {
                warn!("{}: {} stage failed: {e}", service.id, run.stage);
                let interrupted = matches!(e, CoreError::Interrupted);
                let script_index = match &e {
                    CoreError::ScriptFailed { index, .. } => Some(*index),
                    _ => None,
                };
                // An interrupted stage stays unfinished so the next run rebuilds it.
                let outcome = if interrupted {
                    Outcome::Unfinished { stage: run.stage }
                } else {
                    Outcome::Failure {
                        stage: run.stage,
                        reason: e.to_string(),
                        script_index,
                    }
                };
                if let Err(commit_err) = self.commit(records, &run, outcome) {
                    warn!("{}: could not record failure: {commit_err}", service.id);
                }
                if let Err(transition) = run.advance(ServiceState::Failed) {
                    debug!("{}: {transition}", service.id);
                }
                let report = run.report(ServiceAction::Failed {
                    stage: Some(run.stage),
                    reason: e.to_string(),
                    script_index,
                });
                (report, interrupted)
            }
        }
    }

    fn converge(
        &self,
        source: &ProjectSource,
        service: &ServiceSpec,
        records: &RecordStore,
        run_log: &RunLog,
        options: UpOptions,
        run: &mut ServiceRun,
    ) -> Result<ServiceAction, CoreError> {
        let ctx = self.ctx();
        run.advance(ServiceState::Locked)?;

        let (previous, salvaged) = match records.get(&service.id) {
            Ok(record) => (record, None),
            Err(e) => {
                warn!("{}: ignoring unreadable record: {e}", service.id);
                (None, records.salvage_jail_name(&service.id))
            }
        };
        run.last_build_time = previous.as_ref().and_then(|r| r.last_build_time.clone());

        let jail = self.choose_jail_name(service, previous.as_ref(), salvaged, &ctx)?;
        run.jail = Some(jail.clone());

        let fingerprint = Fingerprint {
            makejail_mtime: makejail_mtime(&source.base_dir, &service.makejail),
            serial: service.serial,
            config_digest: compute_config_digest(&source.spec, service)?,
        };
        run.fingerprint = Some(fingerprint.clone());

        let jail_exists = self.backend.exists(&jail, &ctx)?;
        let decision = detect(
            service,
            previous.as_ref(),
            &Observation {
                fingerprint: &fingerprint,
                jail_exists,
                overwrite: options.overwrite,
            },
        );

        let built = match decision {
            ChangeDecision::Unchanged => {
                run.advance(ServiceState::Unchanged)?;
                run.stage = Stage::Start;
                if self.backend.is_running(&jail, &ctx)? {
                    run.advance(ServiceState::Committed)?;
                    return Ok(ServiceAction::SkippedUnchanged);
                }
                None
            }
            ChangeDecision::RebuildRequired(reason) => {
                info!("{}: rebuilding ({reason})", service.id);
                run.advance(ServiceState::Building)?;
                self.rebuild(source, service, previous.as_ref(), &jail, records, run_log, run)?;
                Some(Some(reason))
            }
            ChangeDecision::NotYetBuilt => {
                info!("{}: building jail {jail}", service.id);
                run.advance(ServiceState::Building)?;
                self.rebuild(source, service, previous.as_ref(), &jail, records, run_log, run)?;
                Some(None)
            }
        };

        run.advance(ServiceState::Starting)?;
        run.stage = Stage::Start;
        self.start(service, &jail, built.is_some(), run_log)?;

        run.advance(ServiceState::Scripting)?;
        if built.is_some() {
            run.stage = Stage::Script;
            self.run_scripts(service, &jail, run_log)?;
        }

        run.advance(ServiceState::Committed)?;
        self.commit(records, run, Outcome::Success)?;

        Ok(match built {
            Some(reason) => ServiceAction::Rebuilt { reason },
            None => ServiceAction::Started,
        })
    }

    /// Explicit name, then the recorded one (or what a damaged record still
    /// shows), then a fresh random name.
    fn choose_jail_name(
        &self,
        service: &ServiceSpec,
        previous: Option<&ExecutionRecord>,
        salvaged: Option<JailName>,
        ctx: &ExecContext<'_>,
    ) -> Result<JailName, CoreError> {
        if let Some(name) = &service.jail_name {
            return Ok(name.clone());
        }
        if let Some(record) = previous {
            return Ok(record.jail_name.clone());
        }
        if let Some(name) = salvaged {
            debug!("{}: reusing jail {name} from a damaged record", service.id);
            return Ok(name);
        }
        for _ in 0..RANDOM_NAME_ATTEMPTS {
            let candidate = random_jail_name();
            if !self.backend.exists(&candidate, ctx)? {
                return Ok(candidate);
            }
        }
        Err(CoreError::BuildFailed(
            "could not find an unused jail name".to_owned(),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn rebuild(
        &self,
        source: &ProjectSource,
        service: &ServiceSpec,
        previous: Option<&ExecutionRecord>,
        jail: &JailName,
        records: &RecordStore,
        run_log: &RunLog,
        run: &mut ServiceRun,
    ) -> Result<(), CoreError> {
        // Mark the work in progress before anything is torn down.
        self.commit(records, run, Outcome::Unfinished { stage: Stage::Build })?;

        run.stage = Stage::Destroy;
        let mut stale = vec![jail.clone()];
        if let Some(record) = previous {
            if record.jail_name != *jail {
                stale.push(record.jail_name.clone());
            }
        }
        for name in &stale {
            self.teardown_jail(&service.id, name, true, run_log)?;
        }

        run.stage = Stage::Volumes;
        let mounts = service
            .volumes
            .iter()
            .map(|binding| {
                let volume = source.spec.volume(&binding.volume).ok_or_else(|| {
                    CoreError::VolumeResolution {
                        volume: binding.volume.clone(),
                        message: "not declared".to_owned(),
                    }
                })?;
                resolve_volume(volume, &binding.mountpoint, &source.base_dir)
            })
            .collect::<Result<Vec<MountDescriptor>, CoreError>>()?;

        run.stage = Stage::Build;
        // A local Makejail is passed by absolute path so the build is cwd-independent.
        let makejail = if makejail_mtime(&source.base_dir, &service.makejail).is_some() {
            source
                .base_dir
                .join(&service.makejail)
                .to_string_lossy()
                .into_owned()
        } else {
            service.makejail.clone()
        };
        let request = BuildRequest {
            jail: jail.as_str(),
            makejail: &makejail,
            options: &service.options,
            environment: &service.environment,
            arguments: &service.arguments,
            mounts: &mounts,
            oci: service.oci.as_ref(),
        };
        let log = run_log.prepare(&service.id, Stage::Build)?;
        match self.backend.build(&request, &self.ctx().with_log(&log))? {
            outcome if outcome.success() => {}
            ProcessOutcome::TimedOut => return Err(CoreError::BuildTimeout),
            ProcessOutcome::Interrupted => return Err(CoreError::Interrupted),
            other => return Err(CoreError::BuildFailed(other.to_string())),
        }
        run.last_build_time = Some(chrono::Utc::now().to_rfc3339());
        Ok(())
    }

    fn start(
        &self,
        service: &ServiceSpec,
        jail: &JailName,
        built: bool,
        run_log: &RunLog,
    ) -> Result<(), CoreError> {
        let log = run_log.prepare(&service.id, Stage::Start)?;
        let ctx = self.ctx().with_log(&log);

        if built && !(service.start_arguments.is_empty() && service.start_environment.is_empty()) {
            let outcome = self.backend.configure_start(
                jail,
                &service.start_arguments,
                &service.start_environment,
                &ctx,
            )?;
            check_start(outcome)?;
        }

        if self.backend.is_running(jail, &ctx)? {
            debug!("{}: jail {jail} already running", service.id);
            return Ok(());
        }
        check_start(self.backend.start(jail, &ctx)?)
    }

    fn run_scripts(
        &self,
        service: &ServiceSpec,
        jail: &JailName,
        run_log: &RunLog,
    ) -> Result<(), CoreError> {
        let log = run_log.prepare(&service.id, Stage::Script)?;
        let ctx = self.ctx().with_log(&log);
        for (index, script) in service.scripts.iter().enumerate() {
            debug!("{}: script #{index} ({})", service.id, script.kind);
            let outcome = self
                .backend
                .exec_script(jail, script, &ctx)
                .map_err(|e| CoreError::ScriptFailed {
                    index,
                    reason: e.to_string(),
                })?;
            match outcome {
                outcome if outcome.success() => {}
                ProcessOutcome::Interrupted => return Err(CoreError::Interrupted),
                other => {
                    return Err(CoreError::ScriptFailed {
                        index,
                        reason: other.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Stop `jail` if it runs and, when `destroy` is set, destroy it.
    ///
    /// Returns whether the jail was stopped and whether it was destroyed. A
    /// failed stop is only logged; a failed destroy is an error.
    fn teardown_jail(
        &self,
        service: &str,
        jail: &JailName,
        destroy: bool,
        run_log: &RunLog,
    ) -> Result<(bool, bool), CoreError> {
        let ctx = self.ctx();
        if !self.backend.exists(jail, &ctx)? {
            debug!("{service}: jail {jail} does not exist");
            return Ok((false, false));
        }

        let mut stopped = false;
        if self.backend.is_running(jail, &ctx)? {
            let log = run_log.prepare(service, Stage::Stop)?;
            match self.backend.stop(jail, &ctx.with_log(&log))? {
                outcome if outcome.success() => stopped = true,
                ProcessOutcome::Interrupted => return Err(CoreError::Interrupted),
                other => warn!("{service}: stopping jail {jail} failed: {other}"),
            }
        }

        if !destroy {
            return Ok((stopped, false));
        }
        let log = run_log.prepare(service, Stage::Destroy)?;
        match self
            .backend
            .destroy(jail, self.config.destroy_options(), &ctx.with_log(&log))?
        {
            outcome if outcome.success() => Ok((stopped, true)),
            ProcessOutcome::Interrupted => Err(CoreError::Interrupted),
            other => Err(CoreError::DestroyFailed {
                jail: jail.to_string(),
                reason: other.to_string(),
            }),
        }
    }

    fn commit(
        &self,
        records: &RecordStore,
        run: &ServiceRun,
        outcome: Outcome,
    ) -> Result<(), CoreError> {
        let (Some(jail), Some(fingerprint)) = (&run.jail, &run.fingerprint) else {
            debug!("{}: nothing to record yet", run.service);
            return Ok(());
        };
        records.commit(&ExecutionRecord {
            service: run.service.clone(),
            jail_name: jail.clone(),
            fingerprint: fingerprint.clone(),
            last_build_time: run.last_build_time.clone(),
            outcome,
            updated_at: String::new(),
            checksum: None,
        })?;
        Ok(())
    }

    /// Stop every jail of `project`, newest priority first.
    pub fn down(&self, project: &str, options: DownOptions) -> Result<DownReport, CoreError> {
        check_project_name(project)?;
        if !self.projects.exists(project) {
            return Err(CoreError::ProjectNotFound(project.to_owned()));
        }
        let _lock = self.locks.lock_project(project)?;

        let run_log = RunLog::create(&self.layout, project)?;
        let meta = self
            .projects
            .set_state(project, ProjectState::Destroying, Some(run_log.dir()))?;
        info!(
            "project {project}: down{} (logs in {})",
            if options.destroy { " --destroy" } else { "" },
            run_log.dir().display()
        );

        let records = RecordStore::new(self.layout.clone(), project).load()?;
        let mut report = DownReport {
            project: project.to_owned(),
            log_dir: run_log.dir().to_path_buf(),
            services: Vec::new(),
            project_removed: false,
            failures_ignored: options.ignore_failed,
            interrupted: false,
        };

        let sequence = if options.ignore_services {
            Vec::new()
        } else {
            service_sequence(meta.services.iter().rev(), &records)
        };
        for id in sequence {
            let Some(record) = records.get(&id) else {
                continue;
            };
            if self.cancelled() {
                report.interrupted = true;
                break;
            }
            let result = self.locks.lock_service(project, &id).and_then(|_guard| {
                self.teardown_jail(&id, &record.jail_name, options.destroy, &run_log)
            });
            let entry = match result {
                Ok((stopped, destroyed)) => TeardownEntry {
                    service: id.clone(),
                    jail: record.jail_name.clone(),
                    stopped,
                    destroyed,
                    error: None,
                },
                Err(e) => {
                    warn!("{id}: {e}");
                    TeardownEntry {
                        service: id.clone(),
                        jail: record.jail_name.clone(),
                        stopped: false,
                        destroyed: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            let failed = entry.error.is_some();
            report.services.push(entry);
            if failed && !options.ignore_failed {
                return Ok(report);
            }
        }

        if options.destroy && !report.interrupted {
            self.projects.remove(project)?;
            report.project_removed = true;
            info!("project {project}: destroyed");
        }
        Ok(report)
    }

    /// Current state of `project` and each of its jails.
    pub fn info(&self, project: &str) -> Result<ProjectInfo, CoreError> {
        check_project_name(project)?;
        if !self.projects.exists(project) {
            return Err(CoreError::ProjectNotFound(project.to_owned()));
        }
        let meta = match self.projects.get(project) {
            Ok(meta) => meta,
            Err(director_store::StoreError::ProjectNotFound(_)) => ProjectMeta {
                name: project.to_owned(),
                state: ProjectState::Unfinished,
                last_log: None,
                services: Vec::new(),
                updated_at: String::new(),
            },
            Err(e) => return Err(e.into()),
        };
        let records = RecordStore::new(self.layout.clone(), project).load()?;
        let ctx = self.ctx().quiet();

        let mut services = Vec::new();
        for id in service_sequence(meta.services.iter(), &records) {
            let Some(record) = records.get(&id) else {
                continue;
            };
            let status = match self.backend.exists(&record.jail_name, &ctx) {
                Ok(false) => JailStatus::Missing,
                Ok(true) => match self.backend.is_running(&record.jail_name, &ctx) {
                    Ok(true) => JailStatus::Running,
                    Ok(false) => JailStatus::Stopped,
                    Err(_) => JailStatus::Unknown,
                },
                Err(e) => {
                    debug!("{id}: status unavailable: {e}");
                    JailStatus::Unknown
                }
            };
            services.push(ServiceInfo {
                service: id,
                jail: record.jail_name.clone(),
                status,
                outcome: record.outcome.clone(),
                last_build_time: record.last_build_time.clone(),
            });
        }

        Ok(ProjectInfo {
            name: meta.name,
            state: meta.state,
            last_log: meta.last_log,
            locked: self.locks.is_project_locked(project)?,
            services,
        })
    }

    /// Every known project, optionally restricted to `states`.
    pub fn list(&self, states: &[ProjectState]) -> Result<Vec<ProjectMeta>, CoreError> {
        let mut projects = self.projects.list()?;
        if !states.is_empty() {
            projects.retain(|p| states.contains(&p.state));
        }
        Ok(projects)
    }
}

/// `declared` followed by any other recorded service.
fn service_sequence<'a>(
    declared: impl Iterator<Item = &'a String>,
    records: &BTreeMap<ServiceId, ExecutionRecord>,
) -> Vec<ServiceId> {
    let mut sequence: Vec<ServiceId> = declared.map(|s| ServiceId::new(s.as_str())).collect();
    for id in records.keys() {
        if !sequence.contains(id) {
            sequence.push(id.clone());
        }
    }
    sequence
}

fn check_start(outcome: ProcessOutcome) -> Result<(), CoreError> {
    match outcome {
        outcome if outcome.success() => Ok(()),
        ProcessOutcome::TimedOut => Err(CoreError::StartTimeout),
        ProcessOutcome::Interrupted => Err(CoreError::Interrupted),
        other => Err(CoreError::StartFailed(other.to_string())),
    }
}

fn describe_action(action: &ServiceAction) -> String {
    match action {
        ServiceAction::SkippedUnchanged => "unchanged".to_owned(),
        ServiceAction::Rebuilt { reason: Some(reason) } => format!("rebuilt ({reason})"),
        ServiceAction::Rebuilt { reason: None } => "built".to_owned(),
        ServiceAction::Started => "started".to_owned(),
        ServiceAction::Removed => "removed".to_owned(),
        ServiceAction::Failed { reason, .. } => format!("failed: {reason}"),
    }
}

/// Ten lowercase hex characters, never all digits.
fn random_token() -> String {
    loop {
        let bytes: [u8; 5] = rand::random();
        let mut token = String::with_capacity(10);
        for byte in bytes {
            let _ = write!(token, "{byte:02x}");
        }
        if !token.bytes().all(|b| b.is_ascii_digit()) {
            return token;
        }
    }
}

pub fn random_jail_name() -> JailName {
    JailName::new(random_token())
}

pub fn random_project_name() -> String {
    random_token()
}

#[cfg(test)]
mod tests {
    use super::*;
    use director_schema::{validate_jail_name, validate_service_name};

    #[test]
    fn random_names_are_valid() {
        for _ in 0..200 {
            let jail = random_jail_name();
            assert_eq!(jail.len(), 10);
            assert!(validate_jail_name(&jail));
            assert!(!jail.bytes().all(|b| b.is_ascii_digit()));
            assert!(validate_service_name(&random_project_name()));
        }
    }

    #[test]
    fn service_sequence_appends_unlisted_records() {
        let meta = ProjectMeta {
            name: "demo".to_owned(),
            state: ProjectState::Done,
            last_log: None,
            services: vec!["db".to_owned(), "web".to_owned()],
            updated_at: String::new(),
        };
        let record = |service: &str| ExecutionRecord {
            service: ServiceId::new(service),
            jail_name: JailName::new(service),
            fingerprint: Fingerprint {
                makejail_mtime: None,
                serial: 0,
                config_digest: director_schema::ConfigDigest::new("d"),
            },
            last_build_time: None,
            outcome: Outcome::Success,
            updated_at: String::new(),
            checksum: None,
        };
        let records: BTreeMap<_, _> = ["db", "web", "orphan"]
            .into_iter()
            .map(|s| (ServiceId::new(s), record(s)))
            .collect();
        let sequence = service_sequence(meta.services.iter().rev(), &records);
        assert_eq!(sequence, vec!["web", "db", "orphan"]);
        let sequence = service_sequence(meta.services.iter(), &records);
        assert_eq!(sequence, vec!["db", "web", "orphan"]);
    }

    #[test]
    fn failed_action_marks_report_failed() {
        let run = ServiceRun::new(ServiceId::new("web"));
        let report = run.report(ServiceAction::Failed {
            stage: Some(Stage::Build),
            reason: "boom".to_owned(),
            script_index: None,
        });
        assert!(report.is_failed());
        assert!(!run.report(ServiceAction::Started).is_failed());
    }
}
