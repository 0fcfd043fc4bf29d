//! `tooltree-registry` – the capability sink.
//!
//! Holds live, callable tool registrations and tells the outside world when
//! the set changes.  The reconciler only ever sees the [`RegistryAdapter`]
//! trait; [`LocalRegistry`] is the in-process implementation used by the
//! `tooltree` binary and the tests.
//!
//! # Modules
//!
//! - [`adapter`] – [`RegistryAdapter`], [`RegistrationHandle`] and
//!   [`Transport`]: the contract consumed by the reconciler.
//! - [`bus`] – [`RegistryBus`]: broadcast channel carrying
//!   [`RegistryEvent`]s (connected, list changed, disconnected, cleared).
//! - [`local`] – [`LocalRegistry`]: name-keyed tool table and the invocation
//!   boundary that turns handler failures into structured results.
//! - [`error`] – [`RegistryError`].

pub mod adapter;
pub mod bus;
pub mod error;
pub mod local;

pub use adapter::{RegistrationHandle, RegistryAdapter, Transport};
pub use bus::{RegistryBus, RegistryEvent, RegistryEventPayload, RegistrySubscriber};
pub use error::RegistryError;
pub use local::LocalRegistry;
