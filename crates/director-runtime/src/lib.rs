//! Execution layer for Director.
//!
//! This crate implements the pluggable `JailBackend` trait with an `appjail`
//! backend that drives the AppJail command line and an in-memory `mock`
//! backend for tests, bounded process execution with timeout and cancellation,
//! and the closed set of script environments.

pub mod appjail;
pub mod backend;
pub mod mock;
pub mod process;
pub mod script;

pub use appjail::AppJailBackend;
pub use backend::{select_backend, BuildRequest, DestroyOptions, JailBackend, MountDescriptor};
pub use mock::{MockBackend, MockOp};
pub use process::{ExecContext, ProcessOutcome};
pub use script::split_shell;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available")]
    BackendUnavailable(String),
    #[error("invalid shell '{0}'")]
    InvalidShell(String),
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
}
