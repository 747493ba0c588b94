use director_schema::ServiceSpec;
use director_store::{ExecutionRecord, Fingerprint, Outcome};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RebuildReason {
    Overwrite,
    PreviousFailure,
    PreviousUnfinished,
    SerialChanged { from: i64, to: i64 },
    MakejailModified,
    ConfigChanged,
    JailMissing,
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildReason::Overwrite => f.write_str("overwrite requested"),
            RebuildReason::PreviousFailure => f.write_str("previous run failed"),
            RebuildReason::PreviousUnfinished => f.write_str("previous run did not finish"),
            RebuildReason::SerialChanged { from, to } => write!(f, "serial {from} -> {to}"),
            RebuildReason::MakejailModified => f.write_str("makejail modified"),
            RebuildReason::ConfigChanged => f.write_str("configuration changed"),
            RebuildReason::JailMissing => f.write_str("jail missing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    Unchanged,
    RebuildRequired(RebuildReason),
    NotYetBuilt,
}

impl ChangeDecision {
    pub fn needs_build(&self) -> bool {
        !matches!(self, ChangeDecision::Unchanged)
    }
}

/// What the current run sees for a service.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub fingerprint: &'a Fingerprint,
    pub jail_exists: bool,
    pub overwrite: bool,
}

/// Decide whether `service` must be rebuilt given its last record.
pub fn detect(
    service: &ServiceSpec,
    record: Option<&ExecutionRecord>,
    observed: &Observation<'_>,
) -> ChangeDecision {
    let Some(record) = record else {
        return ChangeDecision::NotYetBuilt;
    };
    let previous = &record.fingerprint;
    let current = observed.fingerprint;

    let reason = if observed.overwrite {
        RebuildReason::Overwrite
    } else if matches!(record.outcome, Outcome::Failure { .. }) {
        RebuildReason::PreviousFailure
    } else if matches!(record.outcome, Outcome::Unfinished { .. }) {
        RebuildReason::PreviousUnfinished
    } else if previous.serial != current.serial {
        RebuildReason::SerialChanged {
            from: previous.serial,
            to: current.serial,
        }
    } else if !service.ignore_mtime && previous.makejail_mtime != current.makejail_mtime {
        RebuildReason::MakejailModified
    } else if previous.config_digest != current.config_digest {
        RebuildReason::ConfigChanged
    } else if !observed.jail_exists {
        RebuildReason::JailMissing
    } else {
        return ChangeDecision::Unchanged;
    };

    ChangeDecision::RebuildRequired(reason)
}

/// Modification time of a local Makejail in nanoseconds since the epoch.
///
/// Remote recipes (`gh+...`, URLs) and missing files have no mtime.
pub fn makejail_mtime(base_dir: &Path, makejail: &str) -> Option<i64> {
    let path = base_dir.join(makejail);
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let since = modified.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(since.as_nanos()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use director_schema::{resolve_str, ConfigDigest, JailName, ServiceId};
    use director_store::Stage;
    use std::collections::HashMap;

    fn service(extra: &str) -> ServiceSpec {
        let doc = format!("services:\n  web:\n    makejail: Makejail\n{extra}");
        resolve_str(&doc, &HashMap::new()).unwrap().services[0].clone()
    }

    fn fingerprint(mtime: Option<i64>, serial: i64, digest: &str) -> Fingerprint {
        Fingerprint {
            makejail_mtime: mtime,
            serial,
            config_digest: ConfigDigest::new(digest),
        }
    }

    fn record(fp: Fingerprint, outcome: Outcome) -> ExecutionRecord {
        ExecutionRecord {
            service: ServiceId::new("web"),
            jail_name: JailName::new("web"),
            fingerprint: fp,
            last_build_time: None,
            outcome,
            updated_at: String::new(),
            checksum: None,
        }
    }

    fn observe(fp: &Fingerprint) -> Observation<'_> {
        Observation {
            fingerprint: fp,
            jail_exists: true,
            overwrite: false,
        }
    }

    #[test]
    fn no_record_is_not_yet_built() {
        let fp = fingerprint(Some(1), 0, "d");
        assert_eq!(
            detect(&service(""), None, &observe(&fp)),
            ChangeDecision::NotYetBuilt
        );
    }

    #[test]
    fn identical_fingerprint_is_unchanged() {
        let fp = fingerprint(Some(1), 0, "d");
        let rec = record(fp.clone(), Outcome::Success);
        assert_eq!(
            detect(&service(""), Some(&rec), &observe(&fp)),
            ChangeDecision::Unchanged
        );
    }

    #[test]
    fn serial_bump_forces_rebuild_even_with_ignore_mtime() {
        let svc = service("    ignore_mtime: true\n    serial: 1\n");
        let rec = record(fingerprint(Some(1), 0, "d"), Outcome::Success);
        let now = fingerprint(Some(1), 1, "d");
        assert_eq!(
            detect(&svc, Some(&rec), &observe(&now)),
            ChangeDecision::RebuildRequired(RebuildReason::SerialChanged { from: 0, to: 1 })
        );
    }

    #[test]
    fn mtime_change_respects_ignore_mtime() {
        let rec = record(fingerprint(Some(1), 0, "d"), Outcome::Success);
        let touched = fingerprint(Some(2), 0, "d");
        assert_eq!(
            detect(&service(""), Some(&rec), &observe(&touched)),
            ChangeDecision::RebuildRequired(RebuildReason::MakejailModified)
        );
        let ignoring = service("    ignore_mtime: true\n");
        assert_eq!(
            detect(&ignoring, Some(&rec), &observe(&touched)),
            ChangeDecision::Unchanged
        );
    }

    #[test]
    fn older_mtime_also_differs() {
        let rec = record(fingerprint(Some(5), 0, "d"), Outcome::Success);
        let older = fingerprint(Some(4), 0, "d");
        assert!(detect(&service(""), Some(&rec), &observe(&older)).needs_build());
    }

    #[test]
    fn failed_and_unfinished_rebuild() {
        let fp = fingerprint(Some(1), 0, "d");
        let failed = record(
            fp.clone(),
            Outcome::Failure {
                stage: Stage::Start,
                reason: "exit status 1".to_owned(),
                script_index: None,
            },
        );
        let unfinished = record(fp.clone(), Outcome::Unfinished { stage: Stage::Build });
        assert_eq!(
            detect(&service(""), Some(&failed), &observe(&fp)),
            ChangeDecision::RebuildRequired(RebuildReason::PreviousFailure)
        );
        assert_eq!(
            detect(&service(""), Some(&unfinished), &observe(&fp)),
            ChangeDecision::RebuildRequired(RebuildReason::PreviousUnfinished)
        );
    }

    #[test]
    fn digest_overwrite_and_missing_jail() {
        let fp = fingerprint(None, 0, "d");
        let rec = record(fp.clone(), Outcome::Success);
        let changed = fingerprint(None, 0, "e");
        assert_eq!(
            detect(&service(""), Some(&rec), &observe(&changed)),
            ChangeDecision::RebuildRequired(RebuildReason::ConfigChanged)
        );
        let overwrite = Observation {
            overwrite: true,
            ..observe(&fp)
        };
        assert_eq!(
            detect(&service(""), Some(&rec), &overwrite),
            ChangeDecision::RebuildRequired(RebuildReason::Overwrite)
        );
        let missing = Observation {
            jail_exists: false,
            ..observe(&fp)
        };
        assert_eq!(
            detect(&service(""), Some(&rec), &missing),
            ChangeDecision::RebuildRequired(RebuildReason::JailMissing)
        );
    }

    #[test]
    fn mtime_of_local_and_remote_recipes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Makejail"),
            "INCLUDE gh+AppJail-makejails/nginx\n",
        )
        .unwrap();
        assert!(makejail_mtime(dir.path(), "Makejail").is_some());
        assert!(makejail_mtime(dir.path(), "gh+AppJail-makejails/nginx").is_none());
    }
}
