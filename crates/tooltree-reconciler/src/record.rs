//! [`RegistrationRecord`] – what the sink currently believes exists.
//!
//! The record maps every registered name to the definition it was registered
//! with and the live handle the sink returned.  It is the single source of
//! truth for the reconciler.  An entry appears only after the sink accepted
//! the registration and disappears only after the sink released it.
//!
//! Sink calls run outside the write lock, so readers (the invocation path
//! asking "is this name live?") never wait on the sink.  Writes are
//! crate-private and the commit scheduler serializes passes, so there is a
//! single writer and the check-then-write sequences below cannot interleave.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tooltree_registry::{RegistrationHandle, RegistryAdapter};
use tooltree_types::{CapabilityNode, Snapshot, ToolDefinition};

use crate::error::{ReconcileError, SinkCall};

struct Registration {
    definition: ToolDefinition,
    handle: Box<dyn RegistrationHandle>,
}

#[derive(Default)]
pub struct RegistrationRecord {
    entries: RwLock<BTreeMap<String, Registration>>,
}

impl RegistrationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Registration>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Registration>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Registered names in lexical order.
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Definition a name is currently registered with.
    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.read().get(name).map(|r| r.definition.clone())
    }

    /// The record as a flat snapshot: one root per live registration.
    ///
    /// Used as the "previous" tree after a failed pass so the next diff
    /// starts from what actually got applied.
    pub fn as_snapshot(&self) -> Snapshot {
        self.read()
            .values()
            .map(|r| CapabilityNode::from(r.definition.clone()))
            .collect()
    }

    /// Register `definition` with `adapter` and record the handle.
    pub(crate) fn register(
        &self,
        adapter: &dyn RegistryAdapter,
        definition: &ToolDefinition,
    ) -> Result<(), ReconcileError> {
        if self.contains(&definition.name) {
            return Err(ReconcileError::DuplicateRegistration {
                name: definition.name.clone(),
            });
        }
        let handle = adapter
            .register(definition)
            .map_err(|e| ReconcileError::from_registry(&definition.name, SinkCall::Register, e))?;
        self.write().insert(
            definition.name.clone(),
            Registration {
                definition: definition.clone(),
                handle,
            },
        );
        Ok(())
    }

    /// Unregister `name` and drop it from the record.
    ///
    /// Returns `Ok(false)` when the name was not registered.
    pub(crate) fn unregister(&self, name: &str) -> Result<bool, ReconcileError> {
        {
            let entries = self.read();
            let Some(registration) = entries.get(name) else {
                return Ok(false);
            };
            registration
                .handle
                .unregister()
                .map_err(|e| ReconcileError::from_registry(name, SinkCall::Unregister, e))?;
        }
        self.write().remove(name);
        Ok(true)
    }

    /// Forget every registration without calling the sink.  Used once the
    /// sink itself has been cleared with `close_all`.
    pub(crate) fn clear(&self) -> usize {
        let mut entries = self.write();
        let n = entries.len();
        entries.clear();
        n
    }
}
