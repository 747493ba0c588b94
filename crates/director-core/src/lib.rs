//! Core orchestration engine for Director projects.
//!
//! This crate ties together Director file resolution, durable project state and
//! jail backends into the `Engine`, the API behind `up`, `down`, `info` and
//! `ls`. It also provides the configuration model, advisory locking with
//! bounded waits, change detection, volume preparation and the per-service
//! lifecycle state machine.

pub mod change;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod volume;

pub use change::{detect, makejail_mtime, ChangeDecision, Observation, RebuildReason};
pub use concurrency::{
    install_signal_handler, process_is_alive, shutdown_flag, shutdown_requested, LockGuard,
    LockManager,
};
pub use config::{load_env_file, DirectorConfig, DotEnv};
pub use engine::{
    random_jail_name, random_project_name, DownOptions, DownReport, Engine, JailStatus,
    ProjectInfo, ProjectSource, ServiceAction, ServiceInfo, ServiceReport, TeardownEntry,
    UpOptions, UpReport,
};
pub use lifecycle::{validate_transition, ServiceState};
pub use volume::{resolve_volume, UmaskGuard};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("specification error: {0}")]
    Spec(#[from] director_schema::SpecError),
    #[error("store error: {0}")]
    Store(#[from] director_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] director_runtime::RuntimeError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("lock timeout: '{scope}' still held by {holder} after {waited_secs}s")]
    LockTimeout {
        scope: String,
        holder: String,
        waited_secs: u64,
    },
    #[error("volume '{volume}': {message}")]
    VolumeResolution { volume: String, message: String },
    #[error("unknown owner '{0}'")]
    UnknownOwner(String),
    #[error("unknown group '{0}'")]
    UnknownGroup(String),
    #[error("build failed: {0}")]
    BuildFailed(String),
    #[error("build timed out")]
    BuildTimeout,
    #[error("start failed: {0}")]
    StartFailed(String),
    #[error("start timed out")]
    StartTimeout,
    #[error("script #{index} failed: {reason}")]
    ScriptFailed { index: usize, reason: String },
    #[error("destroy failed for jail '{jail}': {reason}")]
    DestroyFailed { jail: String, reason: String },
    #[error("interrupted")]
    Interrupted,
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
