use crate::CoreError;
use serde::Serialize;
use std::fmt;

/// Progress of one service through an `up` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Pending,
    Locked,
    Unchanged,
    Building,
    Starting,
    Scripting,
    Committed,
    Failed,
}

impl ServiceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceState::Committed | ServiceState::Failed)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Pending => write!(f, "pending"),
            ServiceState::Locked => write!(f, "locked"),
            ServiceState::Unchanged => write!(f, "unchanged"),
            ServiceState::Building => write!(f, "building"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Scripting => write!(f, "scripting"),
            ServiceState::Committed => write!(f, "committed"),
            ServiceState::Failed => write!(f, "failed"),
        }
    }
}

pub fn validate_transition(from: ServiceState, to: ServiceState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (ServiceState::Pending, ServiceState::Locked)
            | (
                ServiceState::Locked,
                ServiceState::Unchanged | ServiceState::Building
            )
            | (
                ServiceState::Unchanged,
                ServiceState::Starting | ServiceState::Committed
            )
            | (ServiceState::Building, ServiceState::Starting)
            | (ServiceState::Starting, ServiceState::Scripting)
            | (ServiceState::Scripting, ServiceState::Committed)
    ) || (to == ServiceState::Failed && !from.is_terminal());

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
