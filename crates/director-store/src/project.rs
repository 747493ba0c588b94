use crate::layout::{check_project_name, StoreLayout};
use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Mode of the applied Director file copy kept in the project directory.
const APPLIED_FILE_MODE: u32 = 0o440;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    Done,
    Failed,
    Unfinished,
    Destroying,
}

impl ProjectState {
    /// Single-character marker used by `ls`.
    pub fn symbol(self) -> char {
        match self {
            ProjectState::Done => '+',
            ProjectState::Failed => '-',
            ProjectState::Unfinished => '!',
            ProjectState::Destroying => 'x',
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "done" => Some(ProjectState::Done),
            "failed" => Some(ProjectState::Failed),
            "unfinished" => Some(ProjectState::Unfinished),
            "destroying" => Some(ProjectState::Destroying),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectState::Done => write!(f, "done"),
            ProjectState::Failed => write!(f, "failed"),
            ProjectState::Unfinished => write!(f, "unfinished"),
            ProjectState::Destroying => write!(f, "destroying"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectMeta {
    pub name: String,
    pub state: ProjectState,
    /// Log directory of the most recent run.
    #[serde(default)]
    pub last_log: Option<String>,
    /// Services of the last applied document, in execution order.
    #[serde(default)]
    pub services: Vec<String>,
    pub updated_at: String,
}

impl ProjectMeta {
    /// Metadata of a project directory that was never fully initialized.
    fn unfinished(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: ProjectState::Unfinished,
            last_log: None,
            services: Vec::new(),
            updated_at: String::new(),
        }
    }
}

pub struct ProjectStore {
    layout: StoreLayout,
}

impl ProjectStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn exists(&self, project: &str) -> bool {
        check_project_name(project).is_ok() && self.layout.project_dir(project).is_dir()
    }

    pub fn get(&self, project: &str) -> Result<ProjectMeta, StoreError> {
        check_project_name(project)?;
        let path = self.layout.project_file(project);
        if !path.exists() {
            return Err(StoreError::ProjectNotFound(project.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn put(&self, meta: &ProjectMeta) -> Result<(), StoreError> {
        check_project_name(&meta.name)?;
        let content = serde_json::to_string_pretty(meta)?;
        write_atomic(&self.layout.project_file(&meta.name), content.as_bytes())
    }

    /// Apply `f` to the current metadata (or a fresh `unfinished` one) and persist it.
    pub fn update(
        &self,
        project: &str,
        f: impl FnOnce(&mut ProjectMeta),
    ) -> Result<ProjectMeta, StoreError> {
        let mut meta = match self.get(project) {
            Ok(meta) => meta,
            Err(StoreError::ProjectNotFound(_)) => ProjectMeta::unfinished(project),
            Err(e) => return Err(e),
        };
        f(&mut meta);
        meta.updated_at = chrono::Utc::now().to_rfc3339();
        self.put(&meta)?;
        Ok(meta)
    }

    /// Record a new state, keeping `last_log` unless a new one is given.
    pub fn set_state(
        &self,
        project: &str,
        state: ProjectState,
        last_log: Option<&Path>,
    ) -> Result<ProjectMeta, StoreError> {
        let meta = self.update(project, |meta| {
            meta.state = state;
            if let Some(log) = last_log {
                meta.last_log = Some(log.to_string_lossy().into_owned());
            }
        })?;
        tracing::debug!("project {project} is now {state}");
        Ok(meta)
    }

    pub fn set_services(&self, project: &str, services: Vec<String>) -> Result<(), StoreError> {
        self.update(project, |meta| meta.services = services)?;
        Ok(())
    }

    /// Keep a read-only copy of the applied Director file in the project directory.
    pub fn save_applied(&self, project: &str, content: &[u8]) -> Result<(), StoreError> {
        check_project_name(project)?;
        let dest = self.layout.applied_file(project);
        write_atomic(&dest, content)?;
        fs::set_permissions(&dest, fs::Permissions::from_mode(APPLIED_FILE_MODE))?;
        Ok(())
    }

    pub fn remove(&self, project: &str) -> Result<(), StoreError> {
        check_project_name(project)?;
        let dir = self.layout.project_dir(project);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Metadata of every project, sorted by name.
    ///
    /// A project directory without metadata reports `unfinished`; unreadable
    /// metadata is skipped with a warning.
    pub fn list(&self) -> Result<Vec<ProjectMeta>, StoreError> {
        let mut results = Vec::new();
        for name in self.layout.project_names()? {
            match self.get(&name) {
                Ok(meta) => results.push(meta),
                Err(StoreError::ProjectNotFound(_)) => {
                    results.push(ProjectMeta::unfinished(&name));
                }
                Err(e) => tracing::warn!("skipping project '{name}': {e}"),
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, ProjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(
            dir.path().join("projects"),
            dir.path().join("locks"),
            dir.path().join("logs"),
        );
        (dir, ProjectStore::new(layout))
    }

    #[test]
    fn set_state_creates_and_updates() {
        let (_dir, store) = test_store();
        store
            .set_state("demo", ProjectState::Unfinished, Some(Path::new("/logs/1")))
            .unwrap();
        let meta = store.set_state("demo", ProjectState::Done, None).unwrap();
        assert_eq!(meta.state, ProjectState::Done);
        assert_eq!(meta.last_log.as_deref(), Some("/logs/1"));
        assert_eq!(store.get("demo").unwrap(), meta);
    }

    #[test]
    fn get_unknown_project() {
        let (_dir, store) = test_store();
        assert!(matches!(
            store.get("ghost"),
            Err(StoreError::ProjectNotFound(_))
        ));
        assert!(!store.exists("ghost"));
    }

    #[test]
    fn save_applied_is_read_only_and_replaceable() {
        let (_dir, store) = test_store();
        store.save_applied("demo", b"services: {}\n").unwrap();
        store.save_applied("demo", b"services:\n  web: {}\n").unwrap();
        let path = store.layout().applied_file("demo");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o440);
        assert!(fs::read_to_string(&path).unwrap().contains("web"));
    }

    #[test]
    fn list_and_remove() {
        let (_dir, store) = test_store();
        store.set_state("b", ProjectState::Failed, None).unwrap();
        store.set_state("a", ProjectState::Done, None).unwrap();
        let names: Vec<_> = store.list().unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        store.remove("a").unwrap();
        assert!(!store.exists("a"));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn services_survive_state_changes() {
        let (_dir, store) = test_store();
        store
            .set_services("demo", vec!["db".to_owned(), "web".to_owned()])
            .unwrap();
        store.set_state("demo", ProjectState::Done, None).unwrap();
        assert_eq!(store.get("demo").unwrap().services, vec!["db", "web"]);
    }

    #[test]
    fn bare_project_directory_lists_as_unfinished() {
        let (_dir, store) = test_store();
        fs::create_dir_all(store.layout().project_dir("half")).unwrap();
        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].state, ProjectState::Unfinished);
    }

    #[test]
    fn symbols_and_parse() {
        assert_eq!(ProjectState::Done.symbol(), '+');
        assert_eq!(ProjectState::Failed.symbol(), '-');
        assert_eq!(ProjectState::Unfinished.symbol(), '!');
        assert_eq!(ProjectState::Destroying.symbol(), 'x');
        assert_eq!(ProjectState::parse("failed"), Some(ProjectState::Failed));
        assert_eq!(ProjectState::parse("bogus"), None);
    }
}
