//! Test doubles shared by the engine and scheduler tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use async_trait::async_trait;
use tooltree_registry::{
    LocalRegistry, RegistrationHandle, RegistryAdapter, RegistryError, RegistrySubscriber,
    Transport,
};
use tooltree_types::{CapabilityNode, Handler, ToolDefinition, ToolSchema, text_result};

use crate::engine::Operation;

pub(crate) fn handler(reply: &'static str) -> Handler {
    Handler::new(move |_| Ok(text_result(reply)))
}

pub(crate) fn node(name: &str, handler: &Handler) -> CapabilityNode {
    CapabilityNode::new(name, ToolSchema::empty(), handler.clone())
}

/// Wraps a [`LocalRegistry`], journals every sink call and fails or parks
/// scripted registrations.
pub(crate) struct JournalAdapter {
    pub inner: LocalRegistry,
    journal: Arc<Mutex<Vec<Operation>>>,
    failures: Mutex<HashMap<String, RegistryError>>,
    held: Mutex<HashMap<String, HeldRegister>>,
    keep_connection: AtomicBool,
    notifications: AtomicUsize,
}

struct HeldRegister {
    entered: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

/// Test side of a parked `register` call.
pub(crate) struct RegisterGate {
    entered: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

impl RegisterGate {
    /// Block until the parked call is inside the sink.
    pub fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("register reached the sink");
    }

    pub fn release(self) {
        let _ = self.release.send(());
    }
}

impl JournalAdapter {
    pub fn new() -> Self {
        Self {
            inner: LocalRegistry::new(),
            journal: Arc::new(Mutex::new(Vec::new())),
            failures: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
            keep_connection: AtomicBool::new(false),
            notifications: AtomicUsize::new(0),
        }
    }

    /// Make the next `register` of `name` fail with `err`.
    pub fn fail_register(&self, name: &str, err: RegistryError) {
        self.failures.lock().unwrap().insert(name.to_string(), err);
    }

    /// Park the next `register` of `name` inside the sink until the returned
    /// gate is released.
    pub fn hold_register(&self, name: &str) -> RegisterGate {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.held.lock().unwrap().insert(
            name.to_string(),
            HeldRegister {
                entered: entered_tx,
                release: release_rx,
            },
        );
        RegisterGate {
            entered: entered_rx,
            release: release_tx,
        }
    }

    /// Make `close_all` leave the connection flag as it was.
    pub fn keep_connection_on_close(&self) {
        self.keep_connection.store(true, Ordering::SeqCst);
    }

    pub fn journal(&self) -> Vec<Operation> {
        self.journal.lock().unwrap().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().unwrap().clear();
    }

    pub fn notifications(&self) -> usize {
        self.notifications.load(Ordering::SeqCst)
    }
}

impl RegistryAdapter for JournalAdapter {
    fn register(
        &self,
        definition: &ToolDefinition,
    ) -> Result<Box<dyn RegistrationHandle>, RegistryError> {
        if let Some(err) = self.failures.lock().unwrap().remove(&definition.name) {
            return Err(err);
        }
        let held = self.held.lock().unwrap().remove(&definition.name);
        if let Some(held) = held {
            let _ = held.entered.send(());
            let _ = held.release.recv();
        }
        let inner = self.inner.register(definition)?;
        self.journal
            .lock()
            .unwrap()
            .push(Operation::Register(definition.name.clone()));
        Ok(Box::new(JournalHandle {
            inner,
            journal: Arc::clone(&self.journal),
            released: AtomicBool::new(false),
        }))
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn set_connected(&self, connected: bool) {
        self.inner.set_connected(connected)
    }

    fn notify_list_changed(&self) -> Result<(), RegistryError> {
        self.notifications.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close_all(&self) -> Result<(), RegistryError> {
        let was_connected = self.inner.is_connected();
        self.inner.close_all()?;
        if was_connected && self.keep_connection.load(Ordering::SeqCst) {
            self.inner.set_connected(true);
        }
        Ok(())
    }

    fn subscribe(&self) -> RegistrySubscriber {
        self.inner.subscribe()
    }
}

struct JournalHandle {
    inner: Box<dyn RegistrationHandle>,
    journal: Arc<Mutex<Vec<Operation>>>,
    released: AtomicBool,
}

impl RegistrationHandle for JournalHandle {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn unregister(&self) -> Result<(), RegistryError> {
        self.inner.unregister()?;
        if !self.released.swap(true, Ordering::SeqCst) {
            self.journal
                .lock()
                .unwrap()
                .push(Operation::Unregister(self.inner.name().to_string()));
        }
        Ok(())
    }
}

/// Transport whose handshake outcome is scripted.
pub(crate) enum ScriptedTransport {
    Accept,
    Reject,
    Hang,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn handshake(&self) -> Result<(), RegistryError> {
        match self {
            ScriptedTransport::Accept => Ok(()),
            ScriptedTransport::Reject => Err(RegistryError::Handshake("refused".into())),
            ScriptedTransport::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}
