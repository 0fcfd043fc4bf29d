//! Registry error type.

use thiserror::Error;

/// Errors reported by a registry sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `register` was called for a name that already has a live handle.
    #[error("tool '{0}' is already registered")]
    DuplicateName(String),

    #[error("tool '{0}' is not registered")]
    UnknownTool(String),

    /// The sink has not completed its transport handshake yet.
    #[error("registry is not connected")]
    NotConnected,

    /// The sink became unreachable (transport closed).
    #[error("registry transport disconnected")]
    Disconnected,

    /// Best-effort notification could not be delivered.
    #[error("notification failed: {0}")]
    Notify(String),

    #[error("transport handshake failed: {0}")]
    Handshake(String),
}
