use crate::StoreError;
use director_schema::validate_service_name;
use std::fs;
use std::path::{Path, PathBuf};

const RECORDS_DIR: &str = "records";
const PROJECT_FILE: &str = "project.json";
const APPLIED_FILE: &str = "director.yml";
const PROJECT_LOCK: &str = "project.lock";
const SERVICE_LOCKS_DIR: &str = "services";

/// Directory layout for Director's persistent state.
///
/// Three independent roots are used: the projects directory holds execution
/// records and project metadata, the locks directory holds advisory lock
/// files, and the logs directory holds per-run process output.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    projects: PathBuf,
    locks: PathBuf,
    logs: PathBuf,
}

impl StoreLayout {
    pub fn new(
        projects: impl Into<PathBuf>,
        locks: impl Into<PathBuf>,
        logs: impl Into<PathBuf>,
    ) -> Self {
        Self {
            projects: projects.into(),
            locks: locks.into(),
            logs: logs.into(),
        }
    }

    #[inline]
    pub fn projects_dir(&self) -> &Path {
        &self.projects
    }

    #[inline]
    pub fn locks_dir(&self) -> &Path {
        &self.locks
    }

    #[inline]
    pub fn logs_dir(&self) -> &Path {
        &self.logs
    }

    #[inline]
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.projects.join(project)
    }

    #[inline]
    pub fn records_dir(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(RECORDS_DIR)
    }

    #[inline]
    pub fn record_file(&self, project: &str, service: &str) -> PathBuf {
        self.records_dir(project).join(format!("{service}.json"))
    }

    #[inline]
    pub fn project_file(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(PROJECT_FILE)
    }

    /// Copy of the Director file most recently applied to the project.
    #[inline]
    pub fn applied_file(&self, project: &str) -> PathBuf {
        self.project_dir(project).join(APPLIED_FILE)
    }

    #[inline]
    pub fn project_lock_file(&self, project: &str) -> PathBuf {
        self.locks.join(project).join(PROJECT_LOCK)
    }

    #[inline]
    pub fn service_lock_file(&self, project: &str, service: &str) -> PathBuf {
        self.locks
            .join(project)
            .join(SERVICE_LOCKS_DIR)
            .join(format!("{service}.lock"))
    }

    #[inline]
    pub fn project_logs_dir(&self, project: &str) -> PathBuf {
        self.logs.join(project)
    }

    /// Create the directories a project needs before its first run.
    pub fn initialize(&self, project: &str) -> Result<(), StoreError> {
        check_project_name(project)?;
        fs::create_dir_all(self.records_dir(project))?;
        fs::create_dir_all(self.locks.join(project).join(SERVICE_LOCKS_DIR))?;
        fs::create_dir_all(self.project_logs_dir(project))?;
        Ok(())
    }

    /// Names of every project directory under the projects root, sorted.
    pub fn project_names(&self) -> Result<Vec<String>, StoreError> {
        if !self.projects.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.projects)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_owned());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Project names share the service-name alphabet and must not traverse paths.
pub fn check_project_name(project: &str) -> Result<(), StoreError> {
    if !validate_service_name(project) || project == "." || project == ".." {
        return Err(StoreError::InvalidProjectName(project.to_owned()));
    }
    Ok(())
}
