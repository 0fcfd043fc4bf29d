//! `tooltree-reconciler` – keeps a live tool registry in step with a
//! declarative capability tree.
//!
//! Producers describe *what should exist* as a [`Snapshot`]; this crate works
//! out *what to change* and issues the minimal sequence of register and
//! unregister calls against a [`RegistryAdapter`].
//!
//! # Modules
//!
//! - [`flatten`] – snapshot to name-keyed [`FlatTree`], rejecting duplicate
//!   names.
//! - [`plan`] – [`Plan`]: removed / changed / added / kept sets.
//! - [`record`] – [`RegistrationRecord`]: names the sink currently holds and
//!   their handles.
//! - [`engine`] – [`ReconciliationEngine`]: runs one pass and reports the
//!   [`Operation`]s it issued.
//! - [`scheduler`] – [`CommitScheduler`]: serializes passes, coalesces
//!   snapshots and owns the connection lifecycle.
//! - [`store`] – [`Store`] and [`spawn_commit_pump`]: state that re-renders
//!   into snapshots and feeds them to the scheduler.
//! - [`error`] – [`ReconcileError`] and [`SchedulerError`].
//!
//! [`Snapshot`]: tooltree_types::Snapshot
//! [`RegistryAdapter`]: tooltree_registry::RegistryAdapter

pub mod engine;
pub mod error;
pub mod flatten;
pub mod plan;
pub mod record;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod testing;

pub use engine::{Operation, PassReport, ReconciliationEngine};
pub use error::{ReconcileError, SchedulerError, SinkCall};
pub use flatten::{FlatTree, flatten};
pub use plan::{Plan, diff, plan};
pub use record::RegistrationRecord;
pub use scheduler::{
    CommitScheduler, ConnectFailurePolicy, DisconnectPolicy, SchedulerConfig, SchedulerState,
};
pub use store::{Dispatcher, Store, spawn_commit_pump};
