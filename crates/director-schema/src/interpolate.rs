use crate::document::SpecError;
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};

/// Source of environment variables consulted while resolving `!ENV` values.
pub trait EnvLookup {
    fn lookup(&self, name: &str) -> Option<String>;
}

/// Looks variables up in the environment of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl EnvLookup for BTreeMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

const ENV_TAG: &str = "ENV";

/// Substitute every `${VAR}` / `${VAR:default}` token in `text`.
pub fn interpolate(text: &str, env: &dyn EnvLookup) -> Result<String, SpecError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let token = &rest[start + 2..];
        let Some(end) = token.find('}') else {
            return Err(SpecError::Interpolation(format!(
                "unterminated '${{' in '{text}'"
            )));
        };
        let body = &token[..end];
        let (name, default) = match body.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (body, None),
        };
        if name.is_empty() {
            return Err(SpecError::Interpolation(format!(
                "empty variable name in '{text}'"
            )));
        }
        match (env.lookup(name), default) {
            (Some(value), _) => out.push_str(&value),
            (None, Some(default)) => out.push_str(default),
            (None, None) => return Err(SpecError::MissingEnvironmentVariable(name.to_owned())),
        }
        rest = &token[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

/// Replace every `!ENV`-tagged scalar in the document with its interpolated string.
///
/// Untagged scalars are left alone, so shell text such as `echo ${HOME}` in a
/// script body reaches the jail verbatim.
pub(crate) fn interpolate_tree(value: Value, env: &dyn EnvLookup) -> Result<Value, SpecError> {
    match value {
        Value::Tagged(tagged) if tagged.tag == ENV_TAG => {
            let raw = match tagged.value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                _ => {
                    return Err(SpecError::Interpolation(
                        "!ENV can only be applied to scalar values".to_owned(),
                    ))
                }
            };
            Ok(Value::String(interpolate(&raw, env)?))
        }
        Value::Tagged(mut tagged) => {
            tagged.value = interpolate_tree(tagged.value, env)?;
            Ok(Value::Tagged(tagged))
        }
        Value::Sequence(items) => Ok(Value::Sequence(
            items
                .into_iter()
                .map(|v| interpolate_tree(v, env))
                .collect::<Result<_, _>>()?,
        )),
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, interpolate_tree(v, env)?);
            }
            Ok(Value::Mapping(out))
        }
        other => Ok(other),
    }
}
