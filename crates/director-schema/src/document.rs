use crate::interpolate::{interpolate_tree, EnvLookup};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read director file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse director file: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("invalid specification: {field}: {message}")]
    Invalid { field: String, message: String },
    #[error("environment variable '{0}' is not set and has no default")]
    MissingEnvironmentVariable(String),
    #[error("interpolation error: {0}")]
    Interpolation(String),
}

impl SpecError {
    pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A `- KEY: value` list entry. Values may be absent (`- KEY:`).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Option<String>,
}

impl<'de> Deserialize<'de> for KeyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Mapping::deserialize(deserializer)?;
        if map.len() != 1 {
            return Err(de::Error::custom(format!(
                "list entries must have exactly one key, found {}",
                map.len()
            )));
        }
        let Some((key, value)) = map.into_iter().next() else {
            return Err(de::Error::custom("empty list entry"));
        };
        let key = scalar_to_string(&key)
            .ok_or_else(|| de::Error::custom("list entry key must be a scalar"))?;
        let value = match value {
            Value::Null => None,
            other => Some(scalar_to_string(&other).ok_or_else(|| {
                de::Error::custom(format!("value of '{key}' must be a scalar"))
            })?),
        };
        Ok(Self { key, value })
    }
}

/// A scalar coerced to its string form (`8080` and `"8080"` are equivalent).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Scalar(pub String);

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        scalar_to_string(&value)
            .map(Scalar)
            .ok_or_else(|| de::Error::custom("expected a scalar value"))
    }
}

pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawScript {
    #[serde(default)]
    pub shell: Option<Scalar>,
    #[serde(default, rename = "type")]
    pub kind: Option<Scalar>,
    pub text: Scalar,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawOci {
    #[serde(default)]
    pub user: Option<Scalar>,
    #[serde(default)]
    pub workdir: Option<Scalar>,
    #[serde(default)]
    pub environment: Option<Vec<KeyValue>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawService {
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub name: Option<Scalar>,
    #[serde(default)]
    pub makejail: Option<Scalar>,
    #[serde(default)]
    pub reset_options: Option<bool>,
    #[serde(default)]
    pub ignore_mtime: Option<bool>,
    #[serde(default)]
    pub options: Option<Vec<KeyValue>>,
    #[serde(default)]
    pub arguments: Option<Vec<KeyValue>>,
    #[serde(default)]
    pub environment: Option<Vec<KeyValue>>,
    #[serde(default, rename = "start-environment")]
    pub start_environment: Option<Vec<KeyValue>>,
    #[serde(default)]
    pub oci: Option<RawOci>,
    #[serde(default)]
    pub volumes: Option<Vec<KeyValue>>,
    #[serde(default)]
    pub scripts: Option<Vec<RawScript>>,
    #[serde(default)]
    pub start: Option<Vec<KeyValue>>,
    #[serde(default)]
    pub serial: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RawVolume {
    pub device: Scalar,
    #[serde(default, rename = "type")]
    pub fs_type: Option<Scalar>,
    #[serde(default)]
    pub options: Option<Scalar>,
    #[serde(default)]
    pub dump: Option<i64>,
    #[serde(default, rename = "pass")]
    pub pass_: Option<i64>,
    #[serde(default)]
    pub umask: Option<Scalar>,
    #[serde(default)]
    pub mode: Option<Scalar>,
    #[serde(default)]
    pub owner: Option<Scalar>,
    #[serde(default)]
    pub group: Option<Scalar>,
}

/// A parsed and interpolated Director file, before defaults and validation.
///
/// Services and volumes keep their declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorFile {
    pub options: Vec<KeyValue>,
    pub services: Vec<(String, RawService)>,
    pub volumes: Vec<(String, RawVolume)>,
    pub default_volume_type: Option<String>,
}

const TOP_LEVEL_KEYS: &[&str] = &["options", "services", "volumes", "default_volume_type"];

/// Volume fields whose source text matters beyond the YAML value it resolves
/// to: `mode: 0o755` resolves to the integer 493 and `mode: 0755` to 755.
const VERBATIM_VOLUME_KEYS: &[&str] = &["umask", "mode"];

/// A scalar exactly as written in the document, whatever type it resolves to.
struct Verbatim(String);

impl<'de> Deserialize<'de> for Verbatim {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct VerbatimVisitor;

        impl de::Visitor<'_> for VerbatimVisitor {
            type Value = String;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a scalar")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
                Ok(v.to_owned())
            }
        }

        deserializer.deserialize_str(VerbatimVisitor).map(Verbatim)
    }
}

#[derive(Default, Deserialize)]
struct VerbatimVolume {
    #[serde(default)]
    umask: Option<Verbatim>,
    #[serde(default)]
    mode: Option<Verbatim>,
}

impl VerbatimVolume {
    fn get(&self, key: &str) -> Option<&str> {
        let field = match key {
            "umask" => &self.umask,
            "mode" => &self.mode,
            _ => return None,
        };
        field.as_ref().map(|v| v.0.as_str())
    }
}

#[derive(Default, Deserialize)]
struct VerbatimDocument {
    #[serde(default)]
    volumes: Option<BTreeMap<String, Option<VerbatimVolume>>>,
}

/// Source text of every volume's permission fields.
///
/// Documents this cannot read are reported by the regular parse, so failure
/// here only means nothing is restored.
fn verbatim_volumes(input: &str) -> BTreeMap<String, VerbatimVolume> {
    serde_yaml::from_str::<VerbatimDocument>(input)
        .ok()
        .and_then(|doc| doc.volumes)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, volume)| volume.map(|v| (name, v)))
        .collect()
}

/// Put the source text back where a permission field resolved to a number.
/// Interpolated values are strings already and stay as they are.
fn restore_verbatim(value: &Value, source: Option<&VerbatimVolume>) -> Value {
    let mut value = value.clone();
    if let (Value::Mapping(map), Some(source)) = (&mut value, source) {
        for key in VERBATIM_VOLUME_KEYS {
            if !matches!(map.get(*key), Some(Value::Number(_))) {
                continue;
            }
            if let Some(text) = source.get(key) {
                map.insert(Value::from(*key), Value::String(text.to_owned()));
            }
        }
    }
    value
}

pub fn parse_director_str(input: &str, env: &dyn EnvLookup) -> Result<DirectorFile, SpecError> {
    let document: Value = serde_yaml::from_str(input)?;
    let document = interpolate_tree(document, env)?;

    let Value::Mapping(top) = document else {
        return Err(SpecError::invalid("<document>", "must be a mapping"));
    };

    for key in top.keys() {
        let name = scalar_to_string(key).unwrap_or_default();
        if !TOP_LEVEL_KEYS.contains(&name.as_str()) {
            return Err(SpecError::invalid("<document>", format!("unknown key '{name}'")));
        }
    }

    let options = match top.get("options") {
        None | Some(Value::Null) => Vec::new(),
        Some(v) => from_value(v, "options")?,
    };

    let services = match top.get("services") {
        None | Some(Value::Null) => {
            return Err(SpecError::invalid("services", "required but not defined"))
        }
        Some(Value::Mapping(map)) => {
            let mut out = Vec::with_capacity(map.len());
            for (key, value) in map {
                let name = scalar_to_string(key)
                    .ok_or_else(|| SpecError::invalid("services", "service names must be scalars"))?;
                let field = format!("services/{name}");
                let service = match value {
                    Value::Null => RawService::default(),
                    v => from_value(v, &field)?,
                };
                out.push((name, service));
            }
            out
        }
        Some(_) => return Err(SpecError::invalid("services", "must be a mapping")),
    };

    let volumes = match top.get("volumes") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Mapping(map)) => {
            let verbatim = verbatim_volumes(input);
            let mut out = Vec::with_capacity(map.len());
            for (key, value) in map {
                let name = scalar_to_string(key)
                    .ok_or_else(|| SpecError::invalid("volumes", "volume names must be scalars"))?;
                let field = format!("volumes/{name}");
                let value = restore_verbatim(value, verbatim.get(&name));
                out.push((name, from_value(&value, &field)?));
            }
            out
        }
        Some(_) => return Err(SpecError::invalid("volumes", "must be a mapping")),
    };

    let default_volume_type = match top.get("default_volume_type") {
        None | Some(Value::Null) => None,
        Some(v) => Some(scalar_to_string(v).ok_or_else(|| {
            SpecError::invalid("default_volume_type", "must be a scalar")
        })?),
    };

    Ok(DirectorFile {
        options,
        services,
        volumes,
        default_volume_type,
    })
}

pub fn parse_director_file(
    path: impl AsRef<Path>,
    env: &dyn EnvLookup,
) -> Result<DirectorFile, SpecError> {
    let content = fs::read_to_string(path)?;
    parse_director_str(&content, env)
}

fn from_value<T: de::DeserializeOwned>(value: &Value, field: &str) -> Result<T, SpecError> {
    serde_yaml::from_value(value.clone()).map_err(|e| SpecError::invalid(field, e.to_string()))
}
