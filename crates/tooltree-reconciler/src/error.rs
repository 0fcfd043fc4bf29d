//! Reconciler error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tooltree_registry::RegistryError;

use crate::scheduler::SchedulerState;

/// Which sink call a pass was making when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCall {
    Register,
    Unregister,
}

impl fmt::Display for SinkCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkCall::Register => write!(f, "register"),
            SinkCall::Unregister => write!(f, "unregister"),
        }
    }
}

/// Failure of a single reconciliation pass.
///
/// The registration record always reflects the sink calls that succeeded
/// before the failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The snapshot declares the same name twice (at any depth).
    #[error("tool '{name}' is declared more than once in the snapshot")]
    DuplicateDeclaration { name: String },

    /// A register call was about to be issued for a name that still has a
    /// live handle.  Indicates a diff bug.
    #[error("tool '{name}' already has a live registration")]
    DuplicateRegistration { name: String },

    /// The sink became unreachable mid-pass.
    #[error("transport disconnected during {call} of '{name}'")]
    TransportDisconnected { name: String, call: SinkCall },

    #[error("registry rejected {call} of '{name}': {source}")]
    Registry {
        name: String,
        call: SinkCall,
        #[source]
        source: RegistryError,
    },
}

impl ReconcileError {
    pub(crate) fn from_registry(name: &str, call: SinkCall, err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateName(name) => ReconcileError::DuplicateRegistration { name },
            RegistryError::Disconnected => ReconcileError::TransportDisconnected {
                name: name.to_string(),
                call,
            },
            source => ReconcileError::Registry {
                name: name.to_string(),
                call,
                source,
            },
        }
    }
}

/// Errors surfaced by the [`CommitScheduler`][crate::CommitScheduler].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler is closing or closed; the snapshot was rejected.
    #[error("scheduler is closed")]
    Closed,

    #[error("cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        from: SchedulerState,
        to: SchedulerState,
    },

    #[error("transport handshake timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("transport handshake failed: {0}")]
    ConnectFailed(String),

    /// The registry disconnected while the handshake was still pending.
    #[error("connection attempt abandoned")]
    ConnectAbandoned,

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}
