//! [`LocalRegistry`] – in-process tool table and invocation dispatcher.
//!
//! The registry stores every live [`ToolDefinition`] by name.  A front end
//! (the MCP stdio server, a test) resolves incoming calls through
//! [`LocalRegistry::call`], which is also the invocation boundary: handler
//! errors and panics are turned into a failed [`CallToolResult`] instead of
//! escaping to the caller.
//!
//! # Stale handles
//!
//! Each registration is tagged with a fresh [`Uuid`].  A
//! [`RegistrationHandle`] only removes the entry carrying its own tag, so an
//! old handle can never tear down a newer registration of the same name.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rmcp::model::Tool;
use serde_json::Value;
use tooltree_types::{CallToolResult, ToolDefinition, failure_result};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{RegistrationHandle, RegistryAdapter};
use crate::bus::{RegistryBus, RegistryEvent, RegistryEventPayload, RegistrySubscriber};
use crate::error::RegistryError;

const SOURCE: &str = "tooltree-registry::local";

struct LiveTool {
    id: Uuid,
    definition: ToolDefinition,
}

type ToolTable = Arc<Mutex<HashMap<String, LiveTool>>>;

fn lock(table: &ToolTable) -> MutexGuard<'_, HashMap<String, LiveTool>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory registry sink.
///
/// Construct with [`LocalRegistry::new`], hand it to the commit scheduler as
/// an `Arc<dyn RegistryAdapter>`, and route external calls through
/// [`LocalRegistry::call`].
pub struct LocalRegistry {
    tools: ToolTable,
    connected: AtomicBool,
    bus: RegistryBus,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::with_bus(RegistryBus::default())
    }

    /// Create a registry publishing on an existing bus.
    pub fn with_bus(bus: RegistryBus) -> Self {
        Self {
            tools: Arc::new(Mutex::new(HashMap::new())),
            connected: AtomicBool::new(false),
            bus,
        }
    }

    pub fn bus(&self) -> &RegistryBus {
        &self.bus
    }

    /// Invoke the tool registered under `name`.
    ///
    /// The handler is cloned out of the table before it runs, so calls never
    /// block registration changes and an in-flight call survives the tool
    /// being unregistered underneath it.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotConnected`] before the handshake completed,
    /// [`RegistryError::UnknownTool`] when `name` has no live registration.
    /// Handler failures are *not* errors; they come back as a result with
    /// `is_error` set.
    pub fn call(&self, name: &str, args: Value) -> Result<CallToolResult, RegistryError> {
        if !self.is_connected() {
            return Err(RegistryError::NotConnected);
        }
        let handler = lock(&self.tools)
            .get(name)
            .map(|tool| tool.definition.handler.clone())
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))?;

        debug!(tool = name, "invoking tool");
        match catch_unwind(AssertUnwindSafe(|| handler.call(args))) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "tool handler failed");
                Ok(failure_result(e.to_string()))
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(tool = name, panic = %message, "tool handler panicked");
                Ok(failure_result(format!("tool '{name}' panicked: {message}")))
            }
        }
    }

    /// MCP listing of every live tool, sorted by name.
    pub fn list(&self) -> Vec<Tool> {
        let mut listings: Vec<Tool> = lock(&self.tools)
            .values()
            .map(|tool| {
                let definition = &tool.definition;
                let mut listing = Tool::new(
                    definition.name.clone(),
                    String::new(),
                    Arc::new(definition.schema.as_object().clone()),
                );
                listing.description = definition.description.clone().map(Into::into);
                listing
            })
            .collect();
        listings.sort_by(|a, b| a.name.cmp(&b.name));
        listings
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.tools).contains_key(name)
    }

    pub fn len(&self) -> usize {
        lock(&self.tools).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Far-side close: the transport went away.
    ///
    /// Flips the connection flag and publishes
    /// [`RegistryEventPayload::Disconnected`] so the scheduler can react.
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("registry transport disconnected");
        }
        let _ = self
            .bus
            .publish(RegistryEvent::new(SOURCE, RegistryEventPayload::Disconnected));
    }
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryAdapter for LocalRegistry {
    fn register(
        &self,
        definition: &ToolDefinition,
    ) -> Result<Box<dyn RegistrationHandle>, RegistryError> {
        let mut tools = lock(&self.tools);
        if tools.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateName(definition.name.clone()));
        }
        let id = Uuid::new_v4();
        tools.insert(
            definition.name.clone(),
            LiveTool {
                id,
                definition: definition.clone(),
            },
        );
        debug!(tool = %definition.name, %id, "tool registered");
        Ok(Box::new(LocalHandle {
            name: definition.name.clone(),
            id,
            tools: Arc::clone(&self.tools),
            released: AtomicBool::new(false),
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if connected && !was {
            let _ = self
                .bus
                .publish(RegistryEvent::new(SOURCE, RegistryEventPayload::Connected));
        }
    }

    fn notify_list_changed(&self) -> Result<(), RegistryError> {
        if !self.is_connected() {
            debug!("list change not announced: registry not connected");
            return Ok(());
        }
        self.bus
            .publish(RegistryEvent::new(SOURCE, RegistryEventPayload::ToolListChanged))
            .map(|_| ())
    }

    fn close_all(&self) -> Result<(), RegistryError> {
        let removed = {
            let mut tools = lock(&self.tools);
            let n = tools.len();
            tools.clear();
            n
        };
        self.connected.store(false, Ordering::SeqCst);
        info!(removed, "registry cleared");
        let _ = self
            .bus
            .publish(RegistryEvent::new(SOURCE, RegistryEventPayload::Cleared));
        Ok(())
    }

    fn subscribe(&self) -> RegistrySubscriber {
        self.bus.subscribe()
    }
}

struct LocalHandle {
    name: String,
    id: Uuid,
    tools: ToolTable,
    released: AtomicBool,
}

impl RegistrationHandle for LocalHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn unregister(&self) -> Result<(), RegistryError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut tools = lock(&self.tools);
        match tools.get(&self.name) {
            Some(tool) if tool.id == self.id => {
                tools.remove(&self.name);
                debug!(tool = %self.name, id = %self.id, "tool unregistered");
            }
            Some(_) => debug!(tool = %self.name, "stale handle; newer registration kept"),
            None => debug!(tool = %self.name, "tool already gone"),
        }
        Ok(())
    }
}
