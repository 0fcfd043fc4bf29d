//! The counter demo: a tool set whose shape follows a single integer.
//!
//! | count | tools |
//! |---|---|
//! | any | `increment`, `get_count`, `"<count>"` (decrements) |
//! | > 1 | `bigger_than_one` with child `activated_when_parent_mounts` |

use std::sync::{Arc, OnceLock};

use schemars::JsonSchema;
use serde::Deserialize;
use tooltree_reconciler::{Dispatcher, Store};
use tooltree_types::{
    CapabilityNode, Handler, SchemaError, Snapshot, ToolSchema, parse_args, text_result,
};

#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct IncrementArgs {
    /// Any number; the counter always steps by one.
    a: f64,
}

/// Handlers and schemas are built once and shared by every render so that
/// the only registry churn comes from names appearing and disappearing.
struct Handlers {
    increment_schema: ToolSchema,
    increment: OnceLock<Handler>,
    decrement: OnceLock<Handler>,
    get_count: OnceLock<Handler>,
}

pub fn store() -> Result<Arc<Store<i64>>, SchemaError> {
    let handlers = Handlers {
        increment_schema: ToolSchema::of::<IncrementArgs>()?,
        increment: OnceLock::new(),
        decrement: OnceLock::new(),
        get_count: OnceLock::new(),
    };
    Ok(Store::new(0, move |count, dispatch| {
        render(*count, dispatch, &handlers)
    }))
}

fn render(count: i64, dispatch: &Dispatcher<i64>, handlers: &Handlers) -> Snapshot {
    let increment = handlers
        .increment
        .get_or_init(|| step_handler(dispatch.clone(), 1, true))
        .clone();
    let decrement = handlers
        .decrement
        .get_or_init(|| step_handler(dispatch.clone(), -1, false))
        .clone();
    let get_count = handlers
        .get_count
        .get_or_init(|| {
            let dispatch = dispatch.clone();
            Handler::new(move |_| {
                let count = dispatch.read(|c| *c).unwrap_or_default();
                Ok(text_result(count.to_string()))
            })
        })
        .clone();

    let mut roots = vec![
        CapabilityNode::new("increment", handlers.increment_schema.clone(), increment)
            .describe("Increment the counter"),
        CapabilityNode::new(count.to_string(), ToolSchema::empty(), decrement.clone())
            .describe("Decrement the counter"),
        CapabilityNode::new("get_count", ToolSchema::empty(), get_count)
            .describe("Read the counter"),
    ];
    if count > 1 {
        roots.push(
            CapabilityNode::new("bigger_than_one", ToolSchema::empty(), decrement.clone())
                .with_child(CapabilityNode::new(
                    "activated_when_parent_mounts",
                    ToolSchema::empty(),
                    decrement,
                )),
        );
    }
    Snapshot::new(roots)
}

fn step_handler(dispatch: Dispatcher<i64>, delta: i64, validate: bool) -> Handler {
    Handler::new(move |args| {
        if validate {
            parse_args::<IncrementArgs>(args)?;
        }
        let mut after = 0;
        dispatch.update(|c| {
            *c += delta;
            after = *c;
        });
        Ok(text_result(after.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tooltree_types::{CallToolResult, ToolError, text_of};

    fn names(snapshot: &Snapshot) -> Vec<String> {
        snapshot.walk().iter().map(|n| n.name().to_string()).collect()
    }

    fn call(snapshot: &Snapshot, name: &str, args: serde_json::Value) -> Result<CallToolResult, ToolError> {
        let walk = snapshot.walk();
        let node = walk.iter().find(|n| n.name() == name).expect("tool present");
        node.handler().call(args)
    }

    #[test]
    fn initial_tree() {
        let store = store().unwrap();
        assert_eq!(names(&store.current()), ["increment", "0", "get_count"]);
    }

    #[test]
    fn increment_renames_count_tool_and_mounts_subtree() {
        let store = store().unwrap();
        let out = call(&store.current(), "increment", json!({"a": 3})).unwrap();
        assert_eq!(text_of(&out), "1");
        assert_eq!(names(&store.current()), ["increment", "1", "get_count"]);

        call(&store.current(), "increment", json!({"a": 0})).unwrap();
        assert_eq!(
            names(&store.current()),
            ["increment", "2", "get_count", "bigger_than_one", "activated_when_parent_mounts"]
        );
    }

    #[test]
    fn count_tool_decrements() {
        let store = store().unwrap();
        store.update(|c| *c = 2);
        let out = call(&store.current(), "activated_when_parent_mounts", json!({})).unwrap();
        assert_eq!(text_of(&out), "1");
        assert_eq!(names(&store.current()), ["increment", "1", "get_count"]);
        let out = call(&store.current(), "get_count", json!({})).unwrap();
        assert_eq!(text_of(&out), "1");
    }

    #[test]
    fn increment_rejects_bad_arguments() {
        let store = store().unwrap();
        let err = call(&store.current(), "increment", json!({"a": "three"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert_eq!(store.read(|c| *c), 0);
    }

    #[test]
    fn increment_schema_requires_a() {
        let store = store().unwrap();
        let current = store.current();
        let schema = current.roots()[0].schema().as_object();
        assert_eq!(schema["required"], json!(["a"]));
        assert_eq!(schema["properties"]["a"]["type"], "number");
    }

    #[test]
    fn handlers_survive_renames() {
        let store = store().unwrap();
        let before = store.current().roots()[1].handler().clone();
        store.update(|c| *c = 5);
        assert!(store.current().roots()[1].handler().same_as(&before));
    }
}
