use crate::CoreError;
use director_runtime::DestroyOptions;
use director_schema::EnvLookup;
use director_store::StoreLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_ENV: &str = "DIRECTOR_CONFIG";
const USER_CONFIG: &str = "~/.config/director/director.toml";

/// Runtime configuration, built once at startup and passed by reference.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DirectorConfig {
    #[serde(default)]
    pub logs: LogsSection,
    #[serde(default)]
    pub projects: ProjectsSection,
    #[serde(default)]
    pub locks: LocksSection,
    #[serde(default)]
    pub jails: JailsSection,
    #[serde(default)]
    pub commands: CommandsSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LogsSection {
    #[serde(default = "default_logs_dir")]
    pub directory: PathBuf,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            directory: default_logs_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProjectsSection {
    #[serde(default = "default_projects_dir")]
    pub directory: PathBuf,
}

impl Default for ProjectsSection {
    fn default() -> Self {
        Self {
            directory: default_projects_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LocksSection {
    #[serde(default = "default_locks_dir")]
    pub directory: PathBuf,
    /// Upper bound on waiting for a held lock.
    #[serde(default = "default_lock_wait")]
    pub wait_seconds: u64,
}

impl Default for LocksSection {
    fn default() -> Self {
        Self {
            directory: default_locks_dir(),
            wait_seconds: default_lock_wait(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct JailsSection {
    #[serde(default)]
    pub remove_recursive: bool,
    #[serde(default = "default_true")]
    pub remove_force: bool,
}

impl Default for JailsSection {
    fn default() -> Self {
        Self {
            remove_recursive: false,
            remove_force: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CommandsSection {
    /// Per-process timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for CommandsSection {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

fn default_logs_dir() -> PathBuf {
    expand_tilde(Path::new("~/.director/logs"))
}

fn default_projects_dir() -> PathBuf {
    expand_tilde(Path::new("~/.director/projects"))
}

fn default_locks_dir() -> PathBuf {
    PathBuf::from("/tmp/director/locks")
}

fn default_lock_wait() -> u64 {
    30
}

fn default_timeout() -> u64 {
    1800
}

fn default_true() -> bool {
    true
}

/// Expand a leading `~/` using `$HOME`.
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}

impl DirectorConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, CoreError> {
        let mut config: Self =
            toml::from_str(input).map_err(|e| CoreError::Config(e.to_string()))?;
        config.logs.directory = expand_tilde(&config.logs.directory);
        config.projects.directory = expand_tilde(&config.projects.directory);
        config.locks.directory = expand_tilde(&config.locks.directory);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Load from `explicit`, else `$DIRECTOR_CONFIG`, else the user config file
    /// when present, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, CoreError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let user = expand_tilde(Path::new(USER_CONFIG));
        if user.is_file() {
            tracing::debug!("using configuration {}", user.display());
            return Self::from_file(&user);
        }
        Ok(Self::default())
    }

    pub fn layout(&self) -> StoreLayout {
        StoreLayout::new(
            &self.projects.directory,
            &self.locks.directory,
            &self.logs.directory,
        )
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.commands.timeout)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.locks.wait_seconds)
    }

    pub fn destroy_options(&self) -> DestroyOptions {
        DestroyOptions {
            recursive: self.jails.remove_recursive,
            force: self.jails.remove_force,
        }
    }
}

/// Variables from a `.env` file layered under the process environment.
#[derive(Debug, Clone, Default)]
pub struct DotEnv {
    vars: BTreeMap<String, String>,
}

impl DotEnv {
    pub fn new(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Load `path` if it exists; a missing file yields an empty layer.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(Self::new(load_env_file(path)?))
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

impl EnvLookup for DotEnv {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name)
            .ok()
            .or_else(|| self.vars.get(name).cloned())
    }
}

pub fn load_env_file(path: &Path) -> Result<BTreeMap<String, String>, CoreError> {
    let content = std::fs::read_to_string(path)?;
    parse_env(&content).map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))
}

/// Parse `KEY=VALUE` lines. Blank lines and `#` comments are skipped, an
/// `export ` prefix is allowed and values may be single or double quoted.
fn parse_env(content: &str) -> Result<BTreeMap<String, String>, String> {
    let mut vars = BTreeMap::new();
    for (n, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("line {}: expected KEY=VALUE", n + 1));
        };
        let key = key.trim();
        let valid = key
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(format!("line {}: invalid variable name '{key}'", n + 1));
        }
        vars.insert(key.to_owned(), unquote(value.trim()));
    }
    Ok(vars)
}

fn unquote(value: &str) -> String {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            let inner = &value[1..value.len() - 1];
            return if quote == '"' {
                inner.replace("\\n", "\n").replace("\\\"", "\"")
            } else {
                inner.to_owned()
            };
        }
    }
    // Unquoted values end at an inline comment.
    match value.find(" #") {
        Some(pos) => value[..pos].trim_end().to_owned(),
        None => value.to_owned(),
    }
}
