//! Diff planning between two flattened snapshots.
//!
//! | Set       | Definition                                        |
//! |-----------|---------------------------------------------------|
//! | `added`   | names in `next` but not in `previous`             |
//! | `removed` | names in `previous` but not in `next`             |
//! | `kept`    | names in both                                     |
//! | `changed` | kept names whose schema, description or handler differ |
//!
//! `removed` follows the previous flatten order; `kept`, `changed` and
//! `added` follow the next flatten order.

use tooltree_types::Snapshot;

use crate::error::ReconcileError;
use crate::flatten::{FlatTree, flatten};

/// The operations needed to converge `previous` onto `next`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub added: Vec<String>,
    pub kept: Vec<String>,
}

impl Plan {
    /// `true` when applying the plan would not touch the registry.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.changed.is_empty() && self.added.is_empty()
    }

    /// Number of sink calls the plan issues (a change counts twice).
    pub fn call_count(&self) -> usize {
        self.removed.len() + 2 * self.changed.len() + self.added.len()
    }
}

/// Diff two flattened trees.
pub fn diff(previous: &FlatTree<'_>, next: &FlatTree<'_>) -> Plan {
    let mut plan = Plan::default();

    for name in previous.names() {
        if !next.contains(name) {
            plan.removed.push(name.to_string());
        }
    }

    for node in next.nodes() {
        match previous.get(node.name()) {
            None => plan.added.push(node.name().to_string()),
            Some(old) => {
                plan.kept.push(node.name().to_string());
                if !old.definition().same_content(node.definition()) {
                    plan.changed.push(node.name().to_string());
                }
            }
        }
    }

    plan
}

/// Flatten both snapshots and diff them.
pub fn plan(previous: &Snapshot, next: &Snapshot) -> Result<Plan, ReconcileError> {
    Ok(diff(&flatten(previous)?, &flatten(next)?))
}
