//! [`ReconciliationEngine`] – converge a live registry onto a snapshot.
//!
//! One call to [`ReconciliationEngine::reconcile`] is one *pass*:
//!
//! 1. **Flatten** – both snapshots collapse into name-keyed trees (children
//!    become top-level names the moment their parent is present).
//! 2. **Plan** – names split into `removed`, `changed` and `added`.
//! 3. **Apply** – every `removed` unregistration, then every `changed`
//!    unregister/register pair back to back, then every `added`
//!    registration.
//!
//! Each sink call is paired with the matching record update.  The first
//! failing call aborts the pass; the record then holds exactly the calls that
//! succeeded and the caller diffs the next snapshot against
//! [`RegistrationRecord::as_snapshot`].

use std::sync::Arc;

use tooltree_registry::RegistryAdapter;
use tooltree_types::Snapshot;
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, SinkCall};
use crate::flatten::flatten;
use crate::plan::{Plan, diff};
use crate::record::RegistrationRecord;

/// One sink call issued during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Unregister(String),
    Register(String),
}

impl Operation {
    pub fn name(&self) -> &str {
        match self {
            Operation::Unregister(name) | Operation::Register(name) => name,
        }
    }
}

/// Outcome of a successful pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub plan: Plan,
    /// Sink calls in the order they were issued.
    pub operations: Vec<Operation>,
}

impl PassReport {
    /// `true` when the pass did not touch the registry.
    pub fn is_noop(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Diff-and-apply engine bound to one registry adapter.
///
/// The engine is the only writer of its [`RegistrationRecord`]; share the
/// record through [`ReconciliationEngine::record`] for reads.  Passes must
/// not overlap; [`CommitScheduler`](crate::CommitScheduler) serializes them.
pub struct ReconciliationEngine {
    adapter: Arc<dyn RegistryAdapter>,
    record: Arc<RegistrationRecord>,
}

impl ReconciliationEngine {
    pub fn new(adapter: Arc<dyn RegistryAdapter>) -> Self {
        Self {
            adapter,
            record: Arc::new(RegistrationRecord::new()),
        }
    }

    pub fn record(&self) -> Arc<RegistrationRecord> {
        Arc::clone(&self.record)
    }

    /// Converge the registry from `previous` to `next`.
    ///
    /// # Errors
    ///
    /// * [`ReconcileError::DuplicateDeclaration`] – `next` (or `previous`)
    ///   declares a name twice; nothing was applied.
    /// * [`ReconcileError::DuplicateRegistration`] – the plan tried to
    ///   register a name that is still live.
    /// * [`ReconcileError::TransportDisconnected`] /
    ///   [`ReconcileError::Registry`] – a sink call failed mid-pass.
    pub fn reconcile(
        &self,
        previous: &Snapshot,
        next: &Snapshot,
    ) -> Result<PassReport, ReconcileError> {
        let previous = flatten(previous)?;
        let next = flatten(next)?;
        let plan = diff(&previous, &next);
        let mut operations = Vec::with_capacity(plan.call_count());

        for name in &plan.removed {
            self.unregister(name, &mut operations)?;
        }

        for name in &plan.changed {
            let Some(node) = next.get(name) else { continue };
            self.unregister(name, &mut operations)?;
            self.record.register(self.adapter.as_ref(), node.definition())?;
            operations.push(Operation::Register(name.clone()));
            debug!(tool = %name, "tool updated");
        }

        for name in &plan.added {
            let Some(node) = next.get(name) else { continue };
            self.record.register(self.adapter.as_ref(), node.definition())?;
            operations.push(Operation::Register(name.clone()));
            debug!(tool = %name, "tool registered");
        }

        if !operations.is_empty() {
            info!(
                removed = plan.removed.len(),
                changed = plan.changed.len(),
                added = plan.added.len(),
                live = self.record.len(),
                "reconciliation pass applied"
            );
        }
        Ok(PassReport { plan, operations })
    }

    /// Clear the sink and the record and mark the adapter disconnected.
    pub fn teardown(&self) -> usize {
        if let Err(e) = self.adapter.close_all() {
            warn!(error = %e, "registry close_all failed");
        }
        self.adapter.set_connected(false);
        self.record.clear()
    }

    fn unregister(
        &self,
        name: &str,
        operations: &mut Vec<Operation>,
    ) -> Result<(), ReconcileError> {
        if self.record.unregister(name)? {
            operations.push(Operation::Unregister(name.to_string()));
            debug!(tool = %name, "tool unregistered");
        } else {
            warn!(tool = %name, call = %SinkCall::Unregister, "tool not in registration record; skipped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{JournalAdapter, handler, node};
    use std::collections::BTreeSet;
    use tooltree_registry::RegistryError;
    use tooltree_types::text_of;

    fn engine() -> (Arc<JournalAdapter>, ReconciliationEngine) {
        let adapter = Arc::new(JournalAdapter::new());
        let engine = ReconciliationEngine::new(adapter.clone());
        (adapter, engine)
    }

    fn flat_names(snapshot: &Snapshot) -> BTreeSet<String> {
        snapshot.walk().iter().map(|n| n.name().to_string()).collect()
    }

    #[test]
    fn counter_scenario_registers_flattened_names() {
        let (adapter, engine) = engine();
        let h = handler("");
        let a = Snapshot::new(vec![node("increment", &h)]);
        let b = Snapshot::new(vec![node("increment", &h), node("1", &h)]);
        let c = Snapshot::new(vec![
            node("increment", &h),
            node("2", &h),
            node("bigger_than_one", &h).with_child(node("activated_when_parent_mounts", &h)),
        ]);

        engine.reconcile(&Snapshot::empty(), &a).unwrap();
        let ab = engine.reconcile(&a, &b).unwrap();
        assert_eq!(ab.plan.added, ["1"]);
        assert_eq!(ab.operations, [Operation::Register("1".into())]);

        let bc = engine.reconcile(&b, &c).unwrap();
        assert_eq!(bc.plan.removed, ["1"]);
        assert_eq!(bc.plan.added, ["2", "bigger_than_one", "activated_when_parent_mounts"]);
        assert_eq!(
            engine.record().names(),
            ["2", "activated_when_parent_mounts", "bigger_than_one", "increment"]
        );
        assert!(adapter.inner.contains("activated_when_parent_mounts"));
    }

    #[test]
    fn apply_order_is_removed_changed_added() {
        let (adapter, engine) = engine();
        let old = handler("old");
        let new = handler("new");
        let prev = Snapshot::new(vec![node("gone", &old), node("upd", &old), node("same", &old)]);
        let next = Snapshot::new(vec![node("fresh", &old), node("upd", &new), node("same", &old)]);

        engine.reconcile(&Snapshot::empty(), &prev).unwrap();
        adapter.clear_journal();

        let report = engine.reconcile(&prev, &next).unwrap();
        let expected = vec![
            Operation::Unregister("gone".into()),
            Operation::Unregister("upd".into()),
            Operation::Register("upd".into()),
            Operation::Register("fresh".into()),
        ];
        assert_eq!(report.operations, expected);
        assert_eq!(adapter.journal(), expected);
    }

    #[test]
    fn update_is_unregister_then_register_with_new_handler() {
        let (adapter, engine) = engine();
        adapter.set_connected(true);
        let prev = Snapshot::new(vec![node("x", &handler("v1"))]);
        let next = Snapshot::new(vec![node("x", &handler("v2"))]);

        engine.reconcile(&Snapshot::empty(), &prev).unwrap();
        let report = engine.reconcile(&prev, &next).unwrap();

        let for_x: Vec<&Operation> = report.operations.iter().filter(|op| op.name() == "x").collect();
        assert_eq!(
            for_x,
            [&Operation::Unregister("x".into()), &Operation::Register("x".into())]
        );
        let out = adapter.inner.call("x", serde_json::json!({})).unwrap();
        assert_eq!(text_of(&out), "v2");
    }

    #[test]
    fn reapplying_same_snapshot_is_a_noop() {
        let (adapter, engine) = engine();
        let h = handler("");
        let s = Snapshot::new(vec![node("a", &h).with_child(node("b", &h))]);
        engine.reconcile(&Snapshot::empty(), &s).unwrap();
        adapter.clear_journal();

        let report = engine.reconcile(&s, &s).unwrap();
        assert!(report.is_noop());
        assert!(adapter.journal().is_empty());
    }

    #[test]
    fn converges_over_a_sequence_of_snapshots() {
        let (adapter, engine) = engine();
        let h = handler("");
        let sequence = vec![
            Snapshot::new(vec![node("a", &h), node("b", &h)]),
            Snapshot::new(vec![node("b", &h).with_child(node("c", &h))]),
            Snapshot::new(vec![node("d", &handler("other")), node("c", &h)]),
            Snapshot::empty(),
            Snapshot::new(vec![node("a", &h).with_child(node("b", &h).with_child(node("e", &h)))]),
        ];

        let mut previous = Snapshot::empty();
        for next in sequence {
            engine.reconcile(&previous, &next).unwrap();
            let expected = flat_names(&next);
            let recorded: BTreeSet<String> = engine.record().names().into_iter().collect();
            assert_eq!(recorded, expected);
            let live: BTreeSet<String> = adapter.inner.list().into_iter().map(|t| t.name.into_owned()).collect();
            assert_eq!(live, expected);
            previous = next;
        }
    }

    #[test]
    fn duplicate_declaration_applies_nothing() {
        let (adapter, engine) = engine();
        let h = handler("");
        let bad = Snapshot::new(vec![node("a", &h), node("p", &h).with_child(node("a", &h))]);
        let err = engine.reconcile(&Snapshot::empty(), &bad).err().unwrap();
        assert_eq!(err, ReconcileError::DuplicateDeclaration { name: "a".into() });
        assert!(adapter.journal().is_empty());
        assert!(engine.record().is_empty());
    }

    #[test]
    fn failed_pass_keeps_partial_state_and_next_pass_heals() {
        let (adapter, engine) = engine();
        let h = handler("");
        let target = Snapshot::new(vec![node("a", &h), node("b", &h), node("c", &h)]);
        adapter.fail_register("b", RegistryError::Disconnected);

        let err = engine.reconcile(&Snapshot::empty(), &target).err().unwrap();
        assert!(matches!(err, ReconcileError::TransportDisconnected { ref name, .. } if name == "b"));
        assert_eq!(engine.record().names(), ["a"]);
        assert_eq!(adapter.inner.len(), 1);

        let partial = engine.record().as_snapshot();
        let report = engine.reconcile(&partial, &target).unwrap();
        assert_eq!(report.plan.added, ["b", "c"]);
        assert_eq!(engine.record().names(), ["a", "b", "c"]);
    }

    #[test]
    fn stale_previous_triggers_duplicate_registration() {
        let (_adapter, engine) = engine();
        let h = handler("");
        let s = Snapshot::new(vec![node("a", &h)]);
        engine.reconcile(&Snapshot::empty(), &s).unwrap();

        // Lying about the previous tree makes the plan re-add a live name.
        let err = engine.reconcile(&Snapshot::empty(), &s).err().unwrap();
        assert_eq!(err, ReconcileError::DuplicateRegistration { name: "a".into() });
        assert_eq!(engine.record().len(), 1);
    }

    #[test]
    fn removing_unknown_name_is_skipped() {
        let (adapter, engine) = engine();
        let h = handler("");
        let phantom = Snapshot::new(vec![node("phantom", &h)]);
        let report = engine.reconcile(&phantom, &Snapshot::empty()).unwrap();
        assert_eq!(report.plan.removed, ["phantom"]);
        assert!(report.is_noop());
        assert!(adapter.journal().is_empty());
    }

    #[test]
    fn teardown_clears_sink_and_record() {
        let (adapter, engine) = engine();
        let h = handler("");
        adapter.set_connected(true);
        engine
            .reconcile(&Snapshot::empty(), &Snapshot::new(vec![node("a", &h), node("b", &h)]))
            .unwrap();
        assert_eq!(engine.teardown(), 2);
        assert!(engine.record().is_empty());
        assert!(adapter.inner.is_empty());
        assert!(!adapter.is_connected());
    }

    #[test]
    fn teardown_disconnects_adapters_that_stay_connected_on_close() {
        let (adapter, engine) = engine();
        adapter.keep_connection_on_close();
        adapter.set_connected(true);
        engine.teardown();
        assert!(!adapter.is_connected());
    }
}
