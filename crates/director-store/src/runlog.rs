use crate::layout::StoreLayout;
use crate::records::Stage;
use crate::StoreError;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Log directory of a single `up` or `down` run.
///
/// Process output is written to `<logs>/<project>/<timestamp>/<service>/<stage>.log`.
#[derive(Debug, Clone)]
pub struct RunLog {
    dir: PathBuf,
}

impl RunLog {
    pub fn create(layout: &StoreLayout, project: &str) -> Result<Self, StoreError> {
        let base = layout.project_logs_dir(project);
        let stamp = chrono::Utc::now().format("%Y-%m-%d_%Hh%Mm%Ss%.3f").to_string();
        let mut dir = base.join(&stamp);
        // Two runs within the same millisecond get distinct directories.
        let mut n = 1;
        while dir.exists() {
            dir = base.join(format!("{stamp}.{n}"));
            n += 1;
        }
        fs::create_dir_all(&dir)?;
        tracing::debug!("run log: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn stage_path(&self, service: &str, stage: Stage) -> PathBuf {
        self.dir.join(service).join(format!("{stage}.log"))
    }

    /// Path of a stage log whose directory is guaranteed to exist.
    pub fn prepare(&self, service: &str, stage: Stage) -> Result<PathBuf, StoreError> {
        let path = self.stage_path(service, stage);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Open (append) the log file for one stage of one service.
    pub fn open(&self, service: &str, stage: Stage) -> Result<File, StoreError> {
        let path = self.prepare(service, stage)?;
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn stage_logs_are_nested_by_service() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(
            dir.path().join("p"),
            dir.path().join("l"),
            dir.path().join("g"),
        );
        let run = RunLog::create(&layout, "demo").unwrap();
        assert!(run.dir().starts_with(dir.path().join("g/demo")));

        let mut f = run.open("web", Stage::Build).unwrap();
        writeln!(f, "building").unwrap();
        drop(f);
        let mut f = run.open("web", Stage::Build).unwrap();
        writeln!(f, "again").unwrap();
        drop(f);

        let content = fs::read_to_string(run.stage_path("web", Stage::Build)).unwrap();
        assert_eq!(content, "building\nagain\n");
        assert!(run.stage_path("web", Stage::Build).ends_with("web/build.log"));
    }

    #[test]
    fn prepare_creates_service_directory() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(
            dir.path().join("p"),
            dir.path().join("l"),
            dir.path().join("g"),
        );
        let run = RunLog::create(&layout, "demo").unwrap();
        let path = run.prepare("db", Stage::Script).unwrap();
        assert!(path.parent().unwrap().is_dir());
        assert!(!path.exists());
    }

    #[test]
    fn consecutive_runs_get_distinct_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(
            dir.path().join("p"),
            dir.path().join("l"),
            dir.path().join("g"),
        );
        let a = RunLog::create(&layout, "demo").unwrap();
        let b = RunLog::create(&layout, "demo").unwrap();
        assert_ne!(a.dir(), b.dir());
    }
}
