use crate::process::{ExecContext, ProcessOutcome};
use crate::RuntimeError;
use director_schema::{Argument, KeyValue, OciSpec, Script};
use serde::{Deserialize, Serialize};

/// A resolved volume ready to be handed to the jail as an fstab entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountDescriptor {
    pub device: String,
    pub mountpoint: String,
    pub fs_type: String,
    pub options: String,
    pub dump: u32,
    pub pass: u32,
}

impl MountDescriptor {
    /// `"device" "mountpoint" "type" "options" dump pass`, with embedded quotes escaped.
    pub fn fstab_line(&self) -> String {
        format!(
            "\"{}\" \"{}\" \"{}\" \"{}\" {} {}",
            escape_quotes(&self.device),
            escape_quotes(&self.mountpoint),
            escape_quotes(&self.fs_type),
            escape_quotes(&self.options),
            self.dump,
            self.pass
        )
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('"', "\\\"")
}

/// Everything a backend needs to build one jail from its Makejail.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub jail: &'a str,
    pub makejail: &'a str,
    pub options: &'a [KeyValue],
    pub environment: &'a [KeyValue],
    pub arguments: &'a [Argument],
    pub mounts: &'a [MountDescriptor],
    pub oci: Option<&'a OciSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestroyOptions {
    pub recursive: bool,
    pub force: bool,
}

/// Operations Director performs on jails.
///
/// Query methods return `Err` only when the backend itself cannot be driven;
/// mutating methods report the external process result as a `ProcessOutcome`.
pub trait JailBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether a usable jail with this name exists.
    fn exists(&self, jail: &str, ctx: &ExecContext<'_>) -> Result<bool, RuntimeError>;

    fn is_running(&self, jail: &str, ctx: &ExecContext<'_>) -> Result<bool, RuntimeError>;

    fn build(
        &self,
        request: &BuildRequest<'_>,
        ctx: &ExecContext<'_>,
    ) -> Result<ProcessOutcome, RuntimeError>;

    /// Persist start arguments and start environment for later starts.
    fn configure_start(
        &self,
        jail: &str,
        arguments: &[Argument],
        environment: &[KeyValue],
        ctx: &ExecContext<'_>,
    ) -> Result<ProcessOutcome, RuntimeError>;

    fn start(&self, jail: &str, ctx: &ExecContext<'_>) -> Result<ProcessOutcome, RuntimeError>;

    fn stop(&self, jail: &str, ctx: &ExecContext<'_>) -> Result<ProcessOutcome, RuntimeError>;

    fn destroy(
        &self,
        jail: &str,
        options: DestroyOptions,
        ctx: &ExecContext<'_>,
    ) -> Result<ProcessOutcome, RuntimeError>;

    fn exec_script(
        &self,
        jail: &str,
        script: &Script,
        ctx: &ExecContext<'_>,
    ) -> Result<ProcessOutcome, RuntimeError>;
}

pub fn select_backend(name: &str) -> Result<Box<dyn JailBackend>, RuntimeError> {
    match name {
        "appjail" => Ok(Box::new(crate::appjail::AppJailBackend::new())),
        "mock" => Ok(Box::new(crate::mock::MockBackend::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_backends() {
        assert_eq!(select_backend("appjail").unwrap().name(), "appjail");
        assert_eq!(select_backend("mock").unwrap().name(), "mock");
    }

    #[test]
    fn select_invalid_backend_fails() {
        assert!(select_backend("bastille").is_err());
    }

    #[test]
    fn fstab_line_quotes_fields() {
        let mount = MountDescriptor {
            device: "/var/data".to_owned(),
            mountpoint: "/usr/local/www".to_owned(),
            fs_type: "nullfs".to_owned(),
            options: "rw".to_owned(),
            dump: 0,
            pass: 0,
        };
        assert_eq!(
            mount.fstab_line(),
            r#""/var/data" "/usr/local/www" "nullfs" "rw" 0 0"#
        );
    }

    #[test]
    fn fstab_line_escapes_embedded_quotes() {
        let mount = MountDescriptor {
            device: "/odd\"dir".to_owned(),
            mountpoint: "/mnt".to_owned(),
            fs_type: "<pseudofs>".to_owned(),
            options: "rw".to_owned(),
            dump: 1,
            pass: 2,
        };
        assert_eq!(
            mount.fstab_line(),
            r#""/odd\"dir" "/mnt" "<pseudofs>" "rw" 1 2"#
        );
    }
}
