use crate::CoreError;
use director_store::StoreLayout;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Written into a lock file by its holder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct LockOwner {
    pid: u32,
    acquired_at: String,
}

/// An exclusive advisory lock, released when dropped.
///
/// Exclusion comes from `flock(2)`, which the kernel drops when the holder
/// exits, so a crashed process never wedges a project. The owner record is
/// diagnostic only.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    scope: String,
}

impl LockGuard {
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // An empty file marks a clean release.
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
        tracing::debug!("released lock {}", self.scope);
    }
}

/// Hands out project and service locks with a bounded wait.
#[derive(Debug, Clone)]
pub struct LockManager {
    layout: StoreLayout,
    wait: Duration,
    cancel: &'static AtomicBool,
}

impl LockManager {
    pub fn new(layout: StoreLayout, wait: Duration) -> Self {
        Self {
            layout,
            wait,
            cancel: shutdown_flag(),
        }
    }

    #[must_use]
    pub fn with_cancel_flag(mut self, cancel: &'static AtomicBool) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn lock_project(&self, project: &str) -> Result<LockGuard, CoreError> {
        self.acquire(&self.layout.project_lock_file(project), project.to_owned())
    }

    pub fn lock_service(&self, project: &str, service: &str) -> Result<LockGuard, CoreError> {
        self.acquire(
            &self.layout.service_lock_file(project, service),
            format!("{project}/{service}"),
        )
    }

    /// Acquire without waiting; `None` when someone else holds the lock.
    pub fn try_lock_project(&self, project: &str) -> Result<Option<LockGuard>, CoreError> {
        let path = self.layout.project_lock_file(project);
        let file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(claim(file, project.to_owned())?)),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    /// Whether the project lock is held. Takes the lock only for the instant
    /// of the test and leaves the owner record alone.
    pub fn is_project_locked(&self, project: &str) -> Result<bool, CoreError> {
        let file = match File::open(self.layout.project_lock_file(project)) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(CoreError::Io(e)),
        };
        match file.try_lock_exclusive() {
            Ok(()) => {
                file.unlock()?;
                Ok(false)
            }
            Err(e) if is_contended(&e) => Ok(true),
            Err(e) => Err(CoreError::Io(e)),
        }
    }

    fn acquire(&self, path: &Path, scope: String) -> Result<LockGuard, CoreError> {
        let file = open_lock_file(path)?;
        let started = Instant::now();
        let mut announced = false;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {}
                Err(e) => return Err(CoreError::Io(e)),
            }
            if self.cancel.load(Ordering::SeqCst) {
                return Err(CoreError::Interrupted);
            }
            if started.elapsed() >= self.wait {
                return Err(CoreError::LockTimeout {
                    scope,
                    holder: describe_holder(read_owner(path)),
                    waited_secs: self.wait.as_secs(),
                });
            }
            if !announced {
                tracing::info!("waiting for lock {scope}");
                announced = true;
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }

        claim(file, scope)
    }
}

fn open_lock_file(path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?)
}

fn is_contended(e: &std::io::Error) -> bool {
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
        || e.kind() == std::io::ErrorKind::WouldBlock
}

/// Record ourselves as owner of a freshly locked file.
fn claim(mut file: File, scope: String) -> Result<LockGuard, CoreError> {
    let mut previous = String::new();
    file.read_to_string(&mut previous)?;
    if let Ok(owner) = serde_json::from_str::<LockOwner>(&previous) {
        if owner.pid != std::process::id() {
            let state = if process_is_alive(owner.pid) {
                "still running"
            } else {
                "dead"
            };
            tracing::warn!(
                "reclaimed stale lock {scope} left by pid {} ({state}) at {}",
                owner.pid,
                owner.acquired_at
            );
        }
    }

    let owner = LockOwner {
        pid: std::process::id(),
        acquired_at: chrono::Utc::now().to_rfc3339(),
    };
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serde_json::to_string(&owner)?.as_bytes())?;
    file.sync_all()?;
    tracing::debug!("acquired lock {scope}");
    Ok(LockGuard { file, scope })
}

fn read_owner(path: &Path) -> Option<LockOwner> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn describe_holder(owner: Option<LockOwner>) -> String {
    match owner {
        Some(owner) if process_is_alive(owner.pid) => {
            format!("pid {} since {}", owner.pid, owner.acquired_at)
        }
        Some(owner) => format!("pid {} (not running)", owner.pid),
        None => "an unknown process".to_owned(),
    }
}

/// `kill(pid, 0)` check; a permission error still means the process exists.
#[allow(unsafe_code)]
pub fn process_is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs existence and permission checks only.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, stopping current service...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Flag set by the signal handler, shared with running processes.
pub fn shutdown_flag() -> &'static AtomicBool {
    &SHUTDOWN_REQUESTED
}
