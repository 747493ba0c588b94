use crate::document::{parse_director_file, parse_director_str, DirectorFile, KeyValue, RawVolume, SpecError};
use crate::interpolate::EnvLookup;
use crate::types::{validate_jail_name, validate_service_name, JailName, ServiceId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

pub const DEFAULT_PRIORITY: i64 = 99;
pub const DEFAULT_MAKEJAIL: &str = "Makejail";
pub const DEFAULT_SHELL: &str = "/bin/sh -c";
pub const DEFAULT_VOLUME_TYPE: &str = "<pseudofs>";
pub const DEFAULT_VOLUME_OPTIONS: &str = "rw";

/// Filesystem types whose `device` is a host directory managed by director.
pub fn is_directory_backed(fs_type: &str) -> bool {
    matches!(fs_type, "nullfs" | "<pseudofs>")
}

/// Where a script runs relative to the service's jail.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    /// Inside the running jail.
    #[default]
    Jexec,
    /// On the host.
    Local,
    /// Root-changed into the jail's filesystem.
    Chroot,
}

impl ScriptKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "jexec" => Some(Self::Jexec),
            "local" => Some(Self::Local),
            "chroot" => Some(Self::Chroot),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jexec => "jexec",
            Self::Local => "local",
            Self::Chroot => "chroot",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Script {
    pub shell: String,
    pub kind: ScriptKind,
    pub text: String,
}

/// A key/value pair whose value is mandatory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Argument {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeBinding {
    pub volume: String,
    pub mountpoint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OciSpec {
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub environment: Vec<Argument>,
}

/// Owner or group given either numerically or by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IdOrName {
    Id(u32),
    Name(String),
}

impl IdOrName {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.bytes().all(|b| b.is_ascii_digit()) {
            raw.parse().ok().map(Self::Id)
        } else {
            Some(Self::Name(raw.to_owned()))
        }
    }
}

impl fmt::Display for IdOrName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeSpec {
    pub name: String,
    pub device: String,
    pub fs_type: String,
    pub options: String,
    pub dump: u32,
    pub pass: u32,
    pub umask: Option<u32>,
    pub mode: Option<u32>,
    pub owner: Option<IdOrName>,
    pub group: Option<IdOrName>,
}

impl VolumeSpec {
    pub fn is_directory_backed(&self) -> bool {
        is_directory_backed(&self.fs_type)
    }
}

/// A service with every default applied and global options merged in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    pub id: ServiceId,
    pub jail_name: Option<JailName>,
    pub priority: i64,
    pub makejail: String,
    pub reset_options: bool,
    pub ignore_mtime: bool,
    pub options: Vec<KeyValue>,
    pub arguments: Vec<Argument>,
    pub environment: Vec<KeyValue>,
    pub start_environment: Vec<KeyValue>,
    pub oci: Option<OciSpec>,
    pub volumes: Vec<VolumeBinding>,
    pub scripts: Vec<Script>,
    pub start_arguments: Vec<Argument>,
    pub serial: i64,
}

/// Fully-typed project model produced from a Director file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectSpec {
    pub options: Vec<KeyValue>,
    /// Declaration order.
    pub services: Vec<ServiceSpec>,
    pub volumes: BTreeMap<String, VolumeSpec>,
    pub default_volume_type: String,
}

impl ProjectSpec {
    pub fn service(&self, id: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.id == id)
    }

    pub fn volume(&self, name: &str) -> Option<&VolumeSpec> {
        self.volumes.get(name)
    }

    /// The volume declarations a service references, in binding order.
    pub fn volumes_for(&self, service: &ServiceSpec) -> Vec<&VolumeSpec> {
        service
            .volumes
            .iter()
            .filter_map(|b| self.volumes.get(&b.volume))
            .collect()
    }
}

impl DirectorFile {
    /// Validate the document and apply defaults.
    #[allow(clippy::too_many_lines)]
    pub fn resolve(&self) -> Result<ProjectSpec, SpecError> {
        let default_volume_type = self
            .default_volume_type
            .as_deref()
            .map_or_else(|| DEFAULT_VOLUME_TYPE.to_owned(), |s| s.trim().to_owned());

        let mut volumes = BTreeMap::new();
        for (name, raw) in &self.volumes {
            let spec = resolve_volume(name, raw, &default_volume_type)?;
            if volumes.insert(name.clone(), spec).is_some() {
                return Err(SpecError::invalid(
                    format!("volumes/{name}"),
                    "duplicate volume name",
                ));
            }
        }

        let mut services = Vec::with_capacity(self.services.len());
        let mut seen = HashSet::new();
        let mut jail_names = HashSet::new();
        for (nro, (name, raw)) in self.services.iter().enumerate() {
            let field = format!("services/{name}");
            if !validate_service_name(name) {
                return Err(SpecError::invalid(
                    field,
                    format!("service name is incorrect (#{})", nro + 1),
                ));
            }
            if !seen.insert(name.clone()) {
                return Err(SpecError::invalid(field, "duplicate service name"));
            }

            let jail_name = match &raw.name {
                Some(n) => {
                    let n = n.0.trim();
                    if !validate_jail_name(n) {
                        return Err(SpecError::invalid(
                            format!("{field}/name"),
                            format!("jail name '{n}' is incorrect"),
                        ));
                    }
                    if !jail_names.insert(n.to_owned()) {
                        return Err(SpecError::invalid(
                            format!("{field}/name"),
                            format!("jail name '{n}' is used by another service"),
                        ));
                    }
                    Some(JailName::new(n))
                }
                None => None,
            };

            let reset_options = raw.reset_options.unwrap_or(false);
            let mut options = Vec::new();
            if !reset_options {
                options.extend(self.options.iter().cloned());
            }
            options.extend(raw.options.iter().flatten().cloned());

            let volume_bindings = required_values(raw.volumes.as_deref(), &format!("{field}/volumes"))?
                .into_iter()
                .map(|a| VolumeBinding {
                    volume: a.key,
                    mountpoint: a.value,
                })
                .collect::<Vec<_>>();
            for binding in &volume_bindings {
                if !volumes.contains_key(&binding.volume) {
                    return Err(SpecError::invalid(
                        format!("{field}/volumes"),
                        format!("unknown volume '{}'", binding.volume),
                    ));
                }
            }

            let mut scripts = Vec::new();
            for (i, script) in raw.scripts.iter().flatten().enumerate() {
                let script_field = format!("{field}/scripts (#{})", i + 1);
                let kind = match &script.kind {
                    Some(k) => ScriptKind::parse(k.0.trim()).ok_or_else(|| {
                        SpecError::invalid(
                            script_field.clone(),
                            "only jexec, local and chroot can be used",
                        )
                    })?,
                    None => ScriptKind::default(),
                };
                let shell = script
                    .shell
                    .as_ref()
                    .map_or(DEFAULT_SHELL, |s| s.0.as_str())
                    .trim()
                    .to_owned();
                if shell.is_empty() {
                    return Err(SpecError::invalid(script_field, "shell must not be empty"));
                }
                scripts.push(Script {
                    shell,
                    kind,
                    text: script.text.0.clone(),
                });
            }

            let oci = match &raw.oci {
                Some(oci) => Some(OciSpec {
                    user: oci.user.as_ref().map(|s| s.0.clone()),
                    workdir: oci.workdir.as_ref().map(|s| s.0.clone()),
                    environment: required_values(
                        oci.environment.as_deref(),
                        &format!("{field}/oci/environment"),
                    )?,
                }),
                None => None,
            };

            let makejail = raw
                .makejail
                .as_ref()
                .map_or(DEFAULT_MAKEJAIL, |s| s.0.as_str())
                .trim()
                .to_owned();
            if makejail.is_empty() {
                return Err(SpecError::invalid(
                    format!("{field}/makejail"),
                    "must not be empty",
                ));
            }

            services.push(ServiceSpec {
                id: ServiceId::new(name.as_str()),
                jail_name,
                priority: raw.priority.unwrap_or(DEFAULT_PRIORITY),
                makejail,
                reset_options,
                ignore_mtime: raw.ignore_mtime.unwrap_or(false),
                options,
                arguments: required_values(raw.arguments.as_deref(), &format!("{field}/arguments"))?,
                environment: raw.environment.clone().unwrap_or_default(),
                start_environment: raw.start_environment.clone().unwrap_or_default(),
                oci,
                volumes: volume_bindings,
                scripts,
                start_arguments: required_values(raw.start.as_deref(), &format!("{field}/start"))?,
                serial: raw.serial.unwrap_or(0),
            });
        }

        Ok(ProjectSpec {
            options: self.options.clone(),
            services,
            volumes,
            default_volume_type,
        })
    }
}

pub fn resolve_str(input: &str, env: &dyn EnvLookup) -> Result<ProjectSpec, SpecError> {
    parse_director_str(input, env)?.resolve()
}

pub fn resolve_file(path: impl AsRef<Path>, env: &dyn EnvLookup) -> Result<ProjectSpec, SpecError> {
    parse_director_file(path, env)?.resolve()
}

fn required_values(entries: Option<&[KeyValue]>, field: &str) -> Result<Vec<Argument>, SpecError> {
    entries
        .unwrap_or_default()
        .iter()
        .map(|kv| match &kv.value {
            Some(value) => Ok(Argument {
                key: kv.key.clone(),
                value: value.clone(),
            }),
            None => Err(SpecError::invalid(
                field,
                format!("value of '{}' is required but not defined", kv.key),
            )),
        })
        .collect()
}

fn resolve_volume(name: &str, raw: &RawVolume, default_type: &str) -> Result<VolumeSpec, SpecError> {
    let field = format!("volumes/{name}");

    let device = raw.device.0.trim().to_owned();
    if device.is_empty() {
        return Err(SpecError::invalid(format!("{field}/device"), "must not be empty"));
    }

    let fs_type = raw
        .fs_type
        .as_ref()
        .map_or(default_type, |s| s.0.as_str())
        .trim()
        .to_owned();

    let umask = raw
        .umask
        .as_ref()
        .map(|s| parse_octal(&s.0, 0o777, &format!("{field}/umask")))
        .transpose()?;
    let mode = raw
        .mode
        .as_ref()
        .map(|s| parse_octal(&s.0, 0o7777, &format!("{field}/mode")))
        .transpose()?;
    let owner = raw
        .owner
        .as_ref()
        .map(|s| {
            IdOrName::parse(&s.0)
                .ok_or_else(|| SpecError::invalid(format!("{field}/owner"), "must not be empty"))
        })
        .transpose()?;
    let group = raw
        .group
        .as_ref()
        .map(|s| {
            IdOrName::parse(&s.0)
                .ok_or_else(|| SpecError::invalid(format!("{field}/group"), "must not be empty"))
        })
        .transpose()?;

    if !is_directory_backed(&fs_type)
        && (umask.is_some() || mode.is_some() || owner.is_some() || group.is_some())
    {
        return Err(SpecError::invalid(
            field,
            format!("umask, mode, owner and group only apply to nullfs and <pseudofs> volumes, not '{fs_type}'"),
        ));
    }

    Ok(VolumeSpec {
        name: name.to_owned(),
        device,
        fs_type,
        options: raw
            .options
            .as_ref()
            .map_or(DEFAULT_VOLUME_OPTIONS, |s| s.0.as_str())
            .to_owned(),
        dump: non_negative(raw.dump, &format!("{field}/dump"))?,
        pass: non_negative(raw.pass_, &format!("{field}/pass"))?,
        umask,
        mode,
        owner,
        group,
    })
}

fn non_negative(value: Option<i64>, field: &str) -> Result<u32, SpecError> {
    let v = value.unwrap_or(0);
    u32::try_from(v).map_err(|_| SpecError::invalid(field, format!("must be a non-negative integer, got {v}")))
}

/// Permission bits are written the way `chmod` takes them: `755`, `0755`
/// and `0o755` all mean rwxr-xr-x.
fn parse_octal(raw: &str, max: u32, field: &str) -> Result<u32, SpecError> {
    let raw = raw.trim();
    let digits = raw.strip_prefix("0o").unwrap_or(raw);
    let bits = u32::from_str_radix(digits, 8)
        .map_err(|_| SpecError::invalid(field, format!("'{raw}' is not an octal permission value")))?;
    if bits > max {
        return Err(SpecError::invalid(field, format!("'{raw}' is out of range")));
    }
    Ok(bits)
}
