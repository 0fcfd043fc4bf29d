//! Declarative capability tree.
//!
//! An application describes the tools it wants exposed as a forest of
//! [`CapabilityNode`]s and hands the whole forest over as one immutable
//! [`Snapshot`].  Nodes are value objects: a fresh tree is built on every
//! state change and the only identity carried across snapshots is the node
//! `name`.
//!
//! | Type               | Role                                                  |
//! |--------------------|-------------------------------------------------------|
//! | [`CapabilityNode`] | One declared tool plus its conditionally nested children |
//! | [`ToolDefinition`] | A node without children: what the registry receives   |
//! | [`ToolSchema`]     | JSON Schema describing the accepted arguments         |
//! | [`Handler`]        | The callback invoked when the tool is called          |
//!
//! # Example
//!
//! ```rust
//! use tooltree_types::{CapabilityNode, Handler, Snapshot, ToolSchema, text_result};
//!
//! let noop = Handler::new(|_| Ok(text_result("ok")));
//! let tree = Snapshot::new(vec![
//!     CapabilityNode::new("parent", ToolSchema::empty(), noop.clone())
//!         .with_child(CapabilityNode::new("child", ToolSchema::empty(), noop)),
//! ]);
//!
//! assert_eq!(tree.len(), 1);
//! assert_eq!(tree.roots()[0].children().len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{CallToolResult, SchemaError, ToolError};

// ─────────────────────────────────────────────────────────────────────────────
// ToolSchema
// ─────────────────────────────────────────────────────────────────────────────

/// JSON Schema document describing a tool's arguments.  Always a JSON
/// object, as MCP requires for `inputSchema`.
///
/// The reconciler never interprets the schema; it only compares two schemas
/// for equality to detect content updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolSchema(Map<String, Value>);

impl ToolSchema {
    /// Schema of an object with no properties (a tool taking no arguments).
    pub fn empty() -> Self {
        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("properties".into(), json!({}));
        Self(schema)
    }

    /// Derive the schema of `T` with `schemars`.
    pub fn of<T: JsonSchema>() -> Result<Self, SchemaError> {
        Self::from_serialize(&schema_for!(T))
    }

    /// Serialize any schema document and wrap the result.
    pub fn from_serialize<S: Serialize + ?Sized>(schema: &S) -> Result<Self, SchemaError> {
        let value =
            serde_json::to_value(schema).map_err(|e| SchemaError::Serialize(e.to_string()))?;
        Self::from_value(value)
    }

    /// Wrap an existing JSON Schema value.
    ///
    /// # Errors
    ///
    /// [`SchemaError::NotAnObject`] unless `value` is a JSON object.
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        match value {
            Value::Object(schema) => Ok(Self(schema)),
            other => Err(SchemaError::NotAnObject(other.to_string())),
        }
    }

    pub fn as_object(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl Default for ToolSchema {
    fn default() -> Self {
        Self::empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler
// ─────────────────────────────────────────────────────────────────────────────

type HandlerFn = dyn Fn(Value) -> Result<CallToolResult, ToolError> + Send + Sync;

/// Shared tool callback.
///
/// Cloning is cheap and preserves identity: two handlers are the *same*
/// handler only when they point at the same allocation, see
/// [`Handler::same_as`].  A producer that wants a tool to survive re-renders
/// without being re-registered must reuse the same `Handler` value.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new(f: impl Fn(Value) -> Result<CallToolResult, ToolError> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Invoke the callback.
    pub fn call(&self, args: Value) -> Result<CallToolResult, ToolError> {
        (self.0)(args)
    }

    /// Pointer identity.
    pub fn same_as(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ToolDefinition
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the registry needs to expose one tool.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub schema: ToolSchema,
    pub handler: Handler,
}

impl ToolDefinition {
    /// `true` when `other` carries the same schema, description and handler.
    /// Names are not compared.
    pub fn same_content(&self, other: &ToolDefinition) -> bool {
        self.description == other.description
            && self.schema == other.schema
            && self.handler.same_as(&other.handler)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CapabilityNode
// ─────────────────────────────────────────────────────────────────────────────

/// One declared tool and its nested declarations.
///
/// Children are *conditional declarations*: they are exposed as top-level
/// tools whenever their parent is present in the snapshot being applied.
#[derive(Debug, Clone)]
pub struct CapabilityNode {
    definition: ToolDefinition,
    children: Vec<CapabilityNode>,
}

impl CapabilityNode {
    pub fn new(name: impl Into<String>, schema: ToolSchema, handler: Handler) -> Self {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: None,
                schema,
                handler,
            },
            children: Vec::new(),
        }
    }

    /// Attach a human-readable description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.definition.description = Some(description.into());
        self
    }

    pub fn with_child(mut self, child: CapabilityNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = CapabilityNode>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn description(&self) -> Option<&str> {
        self.definition.description.as_deref()
    }

    pub fn schema(&self) -> &ToolSchema {
        &self.definition.schema
    }

    pub fn handler(&self) -> &Handler {
        &self.definition.handler
    }

    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    pub fn children(&self) -> &[CapabilityNode] {
        &self.children
    }
}

impl From<ToolDefinition> for CapabilityNode {
    fn from(definition: ToolDefinition) -> Self {
        Self {
            definition,
            children: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// An immutable, ordered forest of [`CapabilityNode`]s produced at one point
/// in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    roots: Arc<[CapabilityNode]>,
}

impl Snapshot {
    pub fn new(roots: Vec<CapabilityNode>) -> Self {
        Self {
            roots: roots.into(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn roots(&self) -> &[CapabilityNode] {
        &self.roots
    }

    /// Number of root nodes (children not counted).
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Depth-first, parent-before-children walk over every node.
    pub fn walk(&self) -> Vec<&CapabilityNode> {
        fn visit<'a>(node: &'a CapabilityNode, out: &mut Vec<&'a CapabilityNode>) {
            out.push(node);
            for child in node.children() {
                visit(child, out);
            }
        }
        let mut out = Vec::new();
        for root in self.roots.iter() {
            visit(root, &mut out);
        }
        out
    }
}

impl FromIterator<CapabilityNode> for Snapshot {
    fn from_iter<I: IntoIterator<Item = CapabilityNode>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{text_of, text_result};

    fn ok_handler() -> Handler {
        Handler::new(|_| Ok(text_result("ok")))
    }

    #[test]
    fn walk_is_parent_before_children() {
        let h = ok_handler();
        let tree = Snapshot::new(vec![
            CapabilityNode::new("a", ToolSchema::empty(), h.clone()).with_children(vec![
                CapabilityNode::new("a1", ToolSchema::empty(), h.clone())
                    .with_child(CapabilityNode::new("a1x", ToolSchema::empty(), h.clone())),
                CapabilityNode::new("a2", ToolSchema::empty(), h.clone()),
            ]),
            CapabilityNode::new("b", ToolSchema::empty(), h),
        ]);
        let names: Vec<&str> = tree.walk().iter().map(|n| n.name()).collect();
        assert_eq!(names, ["a", "a1", "a1x", "a2", "b"]);
    }

    #[test]
    fn handler_identity_survives_clone_only() {
        let h = ok_handler();
        let same = h.clone();
        let other = ok_handler();
        assert!(h.same_as(&same));
        assert!(!h.same_as(&other));
    }

    #[test]
    fn same_content_compares_schema_description_and_handler() {
        let h = ok_handler();
        let base = CapabilityNode::new("x", ToolSchema::empty(), h.clone());
        let renamed = CapabilityNode::new("y", ToolSchema::empty(), h.clone());
        assert!(base.definition().same_content(renamed.definition()));

        let described = base.clone().describe("now with docs");
        assert!(!base.definition().same_content(described.definition()));

        let reschema = CapabilityNode::new(
            "x",
            ToolSchema::from_value(json!({ "type": "object", "properties": { "a": {} } })).unwrap(),
            h,
        );
        assert!(!base.definition().same_content(reschema.definition()));

        let rehandled = CapabilityNode::new("x", ToolSchema::empty(), ok_handler());
        assert!(!base.definition().same_content(rehandled.definition()));
    }

    #[test]
    fn schema_of_derives_object_properties() {
        #[derive(JsonSchema)]
        #[allow(dead_code)]
        struct Args {
            a: f64,
        }
        let schema = ToolSchema::of::<Args>().unwrap();
        assert_eq!(schema.as_object()["type"], json!("object"));
        assert!(schema.as_object()["properties"]["a"].is_object());
        assert_ne!(schema, ToolSchema::empty());
    }

    #[test]
    fn schema_serialization_failure_is_reported() {
        struct Unserializable;
        impl Serialize for Unserializable {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("no schema today"))
            }
        }
        let err = ToolSchema::from_serialize(&Unserializable).unwrap_err();
        assert_eq!(err, SchemaError::Serialize("no schema today".into()));
    }

    #[test]
    fn non_object_schema_is_rejected() {
        assert!(matches!(
            ToolSchema::from_value(json!(null)),
            Err(SchemaError::NotAnObject(_))
        ));
        assert!(matches!(
            ToolSchema::from_value(json!(["type", "object"])),
            Err(SchemaError::NotAnObject(_))
        ));
    }

    #[test]
    fn handler_call_forwards_arguments() {
        let echo = Handler::new(|args| Ok(text_result(args.to_string())));
        let out = echo.call(json!({ "k": 1 })).unwrap();
        assert_eq!(text_of(&out), r#"{"k":1}"#);
    }
}
