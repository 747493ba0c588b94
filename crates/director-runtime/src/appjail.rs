use crate::backend::{BuildRequest, DestroyOptions, JailBackend};
use crate::process::{self, ExecContext, ProcessOutcome};
use crate::script::script_args;
use crate::RuntimeError;
use director_schema::{Argument, KeyValue, Script};
use std::path::PathBuf;
use std::process::Command;

const DEFAULT_PROGRAM: &str = "appjail";

/// Drives jails through the `appjail` command line.
pub struct AppJailBackend {
    program: PathBuf,
}

impl Default for AppJailBackend {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
        }
    }
}

impl AppJailBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd
    }

    /// Exit status of a query command; anything but a normal exit is an error.
    fn query(&self, args: &[&str], ctx: &ExecContext<'_>) -> Result<i32, RuntimeError> {
        match process::run(&mut self.command(args), &ctx.quiet())? {
            ProcessOutcome::Exited(code) => Ok(code),
            ProcessOutcome::SpawnFailed(msg) => Err(RuntimeError::BackendUnavailable(msg)),
            other => Err(RuntimeError::ExecFailed(format!(
                "appjail {}: {other}",
                args.join(" ")
            ))),
        }
    }

    /// A jail left half-built by an interrupted makejail is flagged dirty.
    fn is_dirty(&self, jail: &str, ctx: &ExecContext<'_>) -> Result<bool, RuntimeError> {
        let mut cmd = self.command(["jail", "get", "--", jail, "dirty"]);
        match process::run_captured(&mut cmd, &ctx.quiet())? {
            (ProcessOutcome::Exited(0), out) => Ok(out.trim() != "0"),
            (ProcessOutcome::Exited(_), _) => Ok(true),
            (ProcessOutcome::SpawnFailed(msg), _) => Err(RuntimeError::BackendUnavailable(msg)),
            (other, _) => Err(RuntimeError::ExecFailed(format!(
                "appjail jail get dirty: {other}"
            ))),
        }
    }
}

fn push_pair(args: &mut Vec<String>, flag: &str, pair: &KeyValue) {
    args.push(flag.to_owned());
    match &pair.value {
        Some(value) => args.push(format!("{}={value}", pair.key)),
        None => args.push(pair.key.clone()),
    }
}

/// Arguments of `appjail makejail` for a build request.
pub fn makejail_args(request: &BuildRequest<'_>) -> Vec<String> {
    let mut args = vec![
        "makejail".to_owned(),
        "-j".to_owned(),
        request.jail.to_owned(),
        "-f".to_owned(),
        request.makejail.to_owned(),
    ];

    for var in request.environment {
        push_pair(&mut args, "-V", var);
    }

    for mount in request.mounts {
        args.push("-o".to_owned());
        args.push(format!("fstab={}", mount.fstab_line()));
    }

    for option in request.options {
        push_pair(&mut args, "-o", option);
    }

    if let Some(oci) = request.oci {
        if let Some(user) = &oci.user {
            args.push("-o".to_owned());
            args.push(format!("oci_user={user}"));
        }
        if let Some(workdir) = &oci.workdir {
            args.push("-o".to_owned());
            args.push(format!("oci_workdir={workdir}"));
        }
        for var in &oci.environment {
            args.push("-o".to_owned());
            args.push(format!("oci_environment={}={}", var.key, var.value));
        }
    }

    if !request.arguments.is_empty() {
        args.push("--".to_owned());
        for arg in request.arguments {
            args.push(format!("--{}", arg.key));
            args.push(arg.value.clone());
        }
    }

    args
}

/// Arguments of `appjail enable JAIL start`.
pub fn enable_start_args(
    jail: &str,
    arguments: &[Argument],
    environment: &[KeyValue],
) -> Vec<String> {
    let mut args = vec!["enable".to_owned(), jail.to_owned(), "start".to_owned()];
    for arg in arguments {
        args.push("-s".to_owned());
        args.push(format!("{}={}", arg.key, arg.value));
    }
    for var in environment {
        push_pair(&mut args, "-V", var);
    }
    args
}

pub fn destroy_args(jail: &str, options: DestroyOptions) -> Vec<String> {
    let mut args = vec!["jail".to_owned(), "destroy".to_owned()];
    if options.recursive {
        args.push("-R".to_owned());
    }
    if options.force {
        args.push("-f".to_owned());
    }
    args.push("--".to_owned());
    args.push(jail.to_owned());
    args
}

impl JailBackend for AppJailBackend {
    fn name(&self) -> &'static str {
        "appjail"
    }

    fn exists(&self, jail: &str, ctx: &ExecContext<'_>) -> Result<bool, RuntimeError> {
        if self.query(&["jail", "get", "--", jail, "name"], ctx)? != 0 {
            return Ok(false);
        }
        if self.is_dirty(jail, ctx)? {
            tracing::debug!("jail {jail} is dirty");
            return Ok(false);
        }
        Ok(true)
    }

    fn is_running(&self, jail: &str, ctx: &ExecContext<'_>) -> Result<bool, RuntimeError> {
        Ok(self.query(&["status", "-q", "--", jail], ctx)? == 0)
    }

    fn build(
        &self,
        request: &BuildRequest<'_>,
        ctx: &ExecContext<'_>,
    ) -> Result<ProcessOutcome, RuntimeError> {
        let mut cmd = self.command(makejail_args(request));
        // Private repositories must fail instead of prompting for credentials.
        cmd.env("GIT_ASKPASS", "true");
        process::run(&mut cmd, ctx)
    }

    fn configure_start(
        &self,
        jail: &str,
        arguments: &[Argument],
        environment: &[KeyValue],
        ctx: &ExecContext<'_>,
    ) -> Result<ProcessOutcome, RuntimeError> {
        process::run(
            &mut self.command(enable_start_args(jail, arguments, environment)),
            ctx,
        )
    }

    fn start(&self, jail: &str, ctx: &ExecContext<'_>) -> Result<ProcessOutcome, RuntimeError> {
        process::run(&mut self.command(["start", "--", jail]), ctx)
    }

    fn stop(&self, jail: &str, ctx: &ExecContext<'_>) -> Result<ProcessOutcome, RuntimeError> {
        process::run(&mut self.command(["stop", "--", jail]), ctx)
    }

    fn destroy(
        &self,
        jail: &str,
        options: DestroyOptions,
        ctx: &ExecContext<'_>,
    ) -> Result<ProcessOutcome, RuntimeError> {
        process::run(&mut self.command(destroy_args(jail, options)), ctx)
    }

    fn exec_script(
        &self,
        jail: &str,
        script: &Script,
        ctx: &ExecContext<'_>,
    ) -> Result<ProcessOutcome, RuntimeError> {
        process::run(&mut self.command(script_args(jail, script)?), ctx)
    }
}
