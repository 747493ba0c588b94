use crate::layout::StoreLayout;
use crate::{write_atomic, StoreError};
use director_schema::{validate_jail_name, ConfigDigest, JailName, ServiceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;

/// Lifecycle stage a service was in when its record was written.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Stop,
    Destroy,
    Volumes,
    Build,
    Start,
    Script,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Stop => "stop",
            Stage::Destroy => "destroy",
            Stage::Volumes => "volumes",
            Stage::Build => "build",
            Stage::Start => "start",
            Stage::Script => "script",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure {
        stage: Stage,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        script_index: Option<usize>,
    },
    /// Written before a destructive stage; a later run treats it as a failure.
    Unfinished { stage: Stage },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Failure {
                stage,
                reason,
                script_index: Some(index),
            } => write!(f, "failed at {stage} #{index}: {reason}"),
            Outcome::Failure { stage, reason, .. } => write!(f, "failed at {stage}: {reason}"),
            Outcome::Unfinished { stage } => write!(f, "unfinished at {stage}"),
        }
    }
}

/// Inputs whose change forces a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fingerprint {
    /// Makejail modification time in nanoseconds since the epoch, when the
    /// recipe is a local file.
    pub makejail_mtime: Option<i64>,
    pub serial: i64,
    pub config_digest: ConfigDigest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub service: ServiceId,
    pub jail_name: JailName,
    pub fingerprint: Fingerprint,
    #[serde(default)]
    pub last_build_time: Option<String>,
    pub outcome: Outcome,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ExecutionRecord {
    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// Per-service execution records of one project.
///
/// Callers must hold the service lock when committing or removing a record.
pub struct RecordStore {
    layout: StoreLayout,
    project: String,
}

impl RecordStore {
    pub fn new(layout: StoreLayout, project: impl Into<String>) -> Self {
        Self {
            layout,
            project: project.into(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Atomically replace the record of `record.service`.
    pub fn commit(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let mut sealed = record.clone();
        sealed.checksum = None;
        sealed.updated_at = chrono::Utc::now().to_rfc3339();
        sealed.checksum = Some(sealed.compute_checksum()?);
        let content = serde_json::to_string_pretty(&sealed)?;
        let dest = self.layout.record_file(&self.project, &record.service);
        write_atomic(&dest, content.as_bytes())?;
        tracing::debug!(
            "committed record {}/{}: {}",
            self.project,
            record.service,
            sealed.outcome
        );
        Ok(())
    }

    pub fn get(&self, service: &str) -> Result<Option<ExecutionRecord>, StoreError> {
        let path = self.layout.record_file(&self.project, service);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let record: ExecutionRecord = serde_json::from_str(&content)?;

        if let Some(ref expected) = record.checksum {
            let actual = record.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    name: format!("{}/{service}", self.project),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(Some(record))
    }

    /// Every readable record, keyed by service. Corrupted entries are skipped
    /// with a warning, which makes the service look never built.
    pub fn load(&self) -> Result<BTreeMap<ServiceId, ExecutionRecord>, StoreError> {
        let dir = self.layout.records_dir(&self.project);
        let mut records = BTreeMap::new();
        if !dir.exists() {
            return Ok(records);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(service) = file_name
                .to_str()
                .filter(|n| !n.starts_with('.'))
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            match self.get(service) {
                Ok(Some(record)) => {
                    records.insert(record.service.clone(), record);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("skipping corrupted record '{}/{service}': {e}", self.project);
                }
            }
        }
        Ok(records)
    }

    /// Jail name of a record that fails to parse or verify, if it still
    /// names a valid jail. Lets a damaged record keep its jail.
    pub fn salvage_jail_name(&self, service: &str) -> Option<JailName> {
        let path = self.layout.record_file(&self.project, service);
        let content = fs::read_to_string(path).ok()?;
        let value: serde_json::Value = serde_json::from_str(&content).ok()?;
        value
            .get("jail_name")
            .and_then(serde_json::Value::as_str)
            .filter(|name| validate_jail_name(name))
            .map(JailName::new)
    }

    pub fn remove(&self, service: &str) -> Result<(), StoreError> {
        let path = self.layout.record_file(&self.project, service);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
