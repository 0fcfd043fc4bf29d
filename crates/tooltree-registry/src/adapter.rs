//! The Registry Adapter contract.
//!
//! The reconciler never talks to a wire protocol directly.  It mutates a
//! [`RegistryAdapter`], which owns the live, callable registrations and
//! forwards them to whatever transport exposes them to the outside world.
//!
//! # Overview
//!
//! - [`RegistryAdapter`] – register tools, query/flip the connection flag,
//!   broadcast list changes, tear everything down.
//! - [`RegistrationHandle`] – returned by `register`; removes exactly the
//!   registration it was created for.
//! - [`Transport`] – the external connection whose handshake moves the
//!   commit scheduler from `Connecting` to `Connected`.

use async_trait::async_trait;
use tooltree_types::ToolDefinition;

use crate::bus::RegistrySubscriber;
use crate::error::RegistryError;

/// Every registry sink must implement this trait.
///
/// # Contract
///
/// * `register` – fails with [`RegistryError::DuplicateName`] when `name`
///   already has a live handle.  Callers must unregister first.
/// * `notify_list_changed` – best effort.  Callers log failures and move on.
/// * `close_all` – clears every live handle; used on teardown.
pub trait RegistryAdapter: Send + Sync {
    /// Expose `definition` under `definition.name`.
    fn register(&self, definition: &ToolDefinition)
    -> Result<Box<dyn RegistrationHandle>, RegistryError>;

    /// `true` once the external transport handshake has completed.
    fn is_connected(&self) -> bool;

    /// Flip the connection flag.  Called by the commit scheduler.
    fn set_connected(&self, connected: bool);

    /// Tell external callers that the set of tools changed.
    fn notify_list_changed(&self) -> Result<(), RegistryError>;

    /// Remove every live registration.
    fn close_all(&self) -> Result<(), RegistryError>;

    /// Subscribe to sink lifecycle events.
    fn subscribe(&self) -> RegistrySubscriber;
}

/// Handle to one live registration.
pub trait RegistrationHandle: Send + Sync {
    /// Name the handle was registered under.
    fn name(&self) -> &str;

    /// Remove the registration.  Idempotent: the second call is a no-op.
    fn unregister(&self) -> Result<(), RegistryError>;
}

/// External connection to the world that invokes tools.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Complete the connection handshake.
    async fn handshake(&self) -> Result<(), RegistryError>;
}
