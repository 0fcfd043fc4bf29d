//! Flattening: collapse a snapshot's nesting into one name-keyed namespace.
//!
//! Nesting expresses *conditional declaration*, not namespacing: a child is a
//! top-level registry entry as soon as its parent is part of the snapshot
//! being applied, whatever its depth.

use std::collections::HashMap;

use tooltree_types::{CapabilityNode, Snapshot};

use crate::error::ReconcileError;

/// Name-keyed view of a snapshot, in depth-first parent-before-children order.
#[derive(Debug, Default)]
pub struct FlatTree<'a> {
    order: Vec<&'a CapabilityNode>,
    index: HashMap<&'a str, &'a CapabilityNode>,
}

impl<'a> FlatTree<'a> {
    pub fn get(&self, name: &str) -> Option<&'a CapabilityNode> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Nodes in flatten order.
    pub fn nodes(&self) -> impl Iterator<Item = &'a CapabilityNode> + '_ {
        self.order.iter().copied()
    }

    /// Names in flatten order.
    pub fn names(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.order.iter().map(|n| n.name())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Flatten `snapshot`.
///
/// # Errors
///
/// [`ReconcileError::DuplicateDeclaration`] when two nodes anywhere in the
/// tree share a name.
pub fn flatten(snapshot: &Snapshot) -> Result<FlatTree<'_>, ReconcileError> {
    let mut flat = FlatTree::default();
    for node in snapshot.walk() {
        if flat.index.insert(node.name(), node).is_some() {
            return Err(ReconcileError::DuplicateDeclaration {
                name: node.name().to_string(),
            });
        }
        flat.order.push(node);
    }
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tooltree_types::{Handler, ToolSchema, text_result};

    fn node(name: &str) -> CapabilityNode {
        CapabilityNode::new(name, ToolSchema::empty(), Handler::new(|_| Ok(text_result(""))))
    }

    #[test]
    fn children_become_top_level_names() {
        let snapshot = Snapshot::new(vec![
            node("increment"),
            node("bigger_than_one").with_child(node("activated_when_parent_mounts")),
        ]);
        let flat = flatten(&snapshot).unwrap();
        let names: Vec<&str> = flat.names().collect();
        assert_eq!(names, ["increment", "bigger_than_one", "activated_when_parent_mounts"]);
        assert!(flat.contains("activated_when_parent_mounts"));
    }

    #[test]
    fn deep_nesting_is_flattened() {
        let snapshot = Snapshot::new(vec![
            node("a").with_child(node("b").with_child(node("c").with_child(node("d")))),
        ]);
        let flat = flatten(&snapshot).unwrap();
        assert_eq!(flat.len(), 4);
        assert_eq!(flat.get("d").map(|n| n.name()), Some("d"));
    }

    #[test]
    fn duplicate_names_across_depths_are_rejected() {
        let snapshot = Snapshot::new(vec![node("x"), node("p").with_child(node("x"))]);
        let err = flatten(&snapshot).err().unwrap();
        assert_eq!(err, ReconcileError::DuplicateDeclaration { name: "x".into() });
    }

    #[test]
    fn empty_snapshot_flattens_to_nothing() {
        let snapshot = Snapshot::empty();
        assert!(flatten(&snapshot).unwrap().is_empty());
    }
}
