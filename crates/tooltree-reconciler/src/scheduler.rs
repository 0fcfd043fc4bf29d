//! [`CommitScheduler`] – serializes reconciliation passes and drives the
//! registry's connection lifecycle.
//!
//! # State machine
//!
//! ```text
//! Building ──connect()──▶ Connecting ──handshake ok──▶ Connected
//!    ▲                        │                            │
//!    ├── handshake failed ────┤ (Retry)                    │
//!    ├── connect() dropped ───┤ (Retry)                    │
//!    └── sink disconnected ◀──┴── (AwaitReconnect) ◀───────┘
//!
//! any state ──shutdown() / fatal error──▶ Closing ──▶ Closed
//! ```
//!
//! # Passes
//!
//! [`CommitScheduler::submit`] drops the snapshot into a single-slot mailbox
//! (newer snapshots overwrite older ones that have not started) and then
//! waits for the pass lock.  Whoever holds the lock drains the mailbox, so at
//! most one pass runs at a time and intermediate snapshots coalesce.  A pass
//! that has started always runs to completion.
//!
//! Once connected, every pass that changed the registry is followed by a
//! best-effort [`RegistryAdapter::notify_list_changed`].
//!
//! # Handshake
//!
//! The transport handshake runs without the pass lock, so
//! [`CommitScheduler::shutdown`] and [`CommitScheduler::handle_disconnect`]
//! never wait for it; either one abandons a pending handshake.  Dropping a
//! [`CommitScheduler::connect`] future mid-handshake counts as a failed
//! attempt and follows [`SchedulerConfig::on_connect_failure`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tooltree_registry::{RegistryAdapter, RegistryEventPayload, Transport};
use tooltree_types::Snapshot;
use tracing::{debug, error, info, warn};

use crate::engine::{PassReport, ReconciliationEngine};
use crate::error::{ReconcileError, SchedulerError};
use crate::record::RegistrationRecord;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a [`CommitScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Accepting snapshots; the registry is not exposed yet.
    Building,
    /// Transport handshake in progress.
    Connecting,
    /// Snapshots are applied live and announced.
    Connected,
    Closing,
    /// Terminal.
    Closed,
}

impl SchedulerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SchedulerState::Closing | SchedulerState::Closed)
    }
}

/// What to do when the sink reports that its transport went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Clear the record, go back to `Building` and hold snapshots until the
    /// next successful `connect`.
    #[default]
    AwaitReconnect,
    /// Clear the record and close the scheduler.
    Terminate,
}

/// What to do when the transport handshake fails, times out or is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectFailurePolicy {
    /// Fall back to `Building`; `connect` may be called again.
    #[default]
    Retry,
    /// Close the scheduler.
    Fatal,
}

/// Configuration bundle for [`CommitScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on the transport handshake.
    pub connect_timeout: Duration,
    pub on_disconnect: DisconnectPolicy,
    pub on_connect_failure: ConnectFailurePolicy,
    /// Close the scheduler when a pass hits
    /// [`ReconcileError::DuplicateRegistration`].
    pub strict_invariants: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            on_disconnect: DisconnectPolicy::default(),
            on_connect_failure: ConnectFailurePolicy::default(),
            strict_invariants: cfg!(debug_assertions),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CommitScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// State guarded by the pass lock.
struct PassState {
    /// Tree the record was last converged onto.
    committed: Snapshot,
    /// Most recent snapshot handed to the scheduler.
    latest: Snapshot,
    /// Set after a disconnect until the next successful `connect`.
    suspended: bool,
}

/// Single-writer front door to the reconciliation engine.
///
/// Share it as `Arc<CommitScheduler>`: every method takes `&self`.
pub struct CommitScheduler {
    engine: ReconciliationEngine,
    pass: tokio::sync::Mutex<PassState>,
    mailbox: Mutex<Option<Snapshot>>,
    state: watch::Sender<SchedulerState>,
    /// Id of the most recent connect attempt.  Only changed while the state
    /// value is locked, together with the move into `Connecting`.
    attempt: AtomicU64,
    adapter: Arc<dyn RegistryAdapter>,
    record: Arc<RegistrationRecord>,
    config: SchedulerConfig,
    passes: AtomicU64,
}

impl CommitScheduler {
    pub fn new(adapter: Arc<dyn RegistryAdapter>, config: SchedulerConfig) -> Self {
        let engine = ReconciliationEngine::new(Arc::clone(&adapter));
        let record = engine.record();
        let (state, _) = watch::channel(SchedulerState::Building);
        Self {
            engine,
            pass: tokio::sync::Mutex::new(PassState {
                committed: Snapshot::empty(),
                latest: Snapshot::empty(),
                suspended: false,
            }),
            mailbox: Mutex::new(None),
            state,
            attempt: AtomicU64::new(0),
            adapter,
            record,
            config,
            passes: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Is `name` live right now?  Safe to call concurrently with a pass.
    pub fn is_registered(&self, name: &str) -> bool {
        self.record.contains(name)
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.record.names()
    }

    /// Number of passes that completed successfully.
    pub fn pass_count(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Queue `snapshot` and wait until it (or a newer snapshot) is applied.
    ///
    /// Returns the report of the pass this call ran, or `None` when another
    /// caller already applied a newer snapshot or the snapshot was buffered
    /// while the registry is disconnected.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Closed`] once shutdown started;
    /// [`SchedulerError::Reconcile`] when the pass failed.
    pub async fn submit(&self, snapshot: Snapshot) -> Result<Option<PassReport>, SchedulerError> {
        if self.state().is_terminal() {
            return Err(SchedulerError::Closed);
        }
        self.post(snapshot);
        let mut pass = self.pass.lock().await;

        let state = self.state();
        if state.is_terminal() {
            return Err(SchedulerError::Closed);
        }
        let Some(next) = self.take_mail() else {
            debug!("snapshot already applied by an earlier pass");
            return Ok(None);
        };
        pass.latest = next.clone();
        if pass.suspended || state == SchedulerState::Connecting {
            debug!("registry disconnected; snapshot buffered");
            return Ok(None);
        }
        self.run_pass(&mut pass, next).map(Some)
    }

    /// Run the transport handshake, apply the latest snapshot and flip the
    /// adapter to connected.
    ///
    /// Cancel safe: dropping the future during the handshake is handled
    /// like a failed handshake.
    ///
    /// # Errors
    ///
    /// * [`SchedulerError::InvalidTransition`] unless the scheduler is
    ///   `Building`.
    /// * [`SchedulerError::ConnectTimeout`] / [`SchedulerError::ConnectFailed`]
    ///   – the scheduler then follows [`SchedulerConfig::on_connect_failure`].
    /// * [`SchedulerError::ConnectAbandoned`] / [`SchedulerError::Closed`] –
    ///   a disconnect or shutdown arrived during the handshake.
    /// * [`SchedulerError::Reconcile`] when the initial pass failed.
    pub async fn connect(&self, transport: &dyn Transport) -> Result<PassReport, SchedulerError> {
        let attempt = {
            let _pass = self.pass.lock().await;
            self.begin_connect()?
        };
        let _pending = PendingConnect {
            scheduler: self,
            attempt,
        };
        info!(timeout = ?self.config.connect_timeout, "starting transport handshake");

        let mut states = self.state.subscribe();
        let handshake = tokio::select! {
            result = tokio::time::timeout(self.config.connect_timeout, transport.handshake()) => Some(result),
            _ = states.wait_for(|state| {
                *state != SchedulerState::Connecting || self.attempt.load(Ordering::SeqCst) != attempt
            }) => None,
        };
        let outcome = match handshake {
            None => return Err(self.abandoned()),
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => Err(SchedulerError::ConnectFailed(e.to_string())),
            Some(Err(_)) => Err(SchedulerError::ConnectTimeout(self.config.connect_timeout)),
        };

        let mut pass = self.pass.lock().await;
        if !self.owns_attempt(attempt) {
            return Err(self.abandoned());
        }
        if let Err(e) = outcome {
            warn!(error = %e, "transport handshake failed");
            self.connect_failed();
            return Err(e);
        }

        if let Some(next) = self.take_mail() {
            pass.latest = next;
        }
        pass.suspended = false;
        let target = pass.latest.clone();
        match self.run_pass(&mut pass, target) {
            Ok(report) => {
                self.adapter.set_connected(true);
                self.set_state(SchedulerState::Connected);
                info!(tools = self.record.len(), "registry connected");
                Ok(report)
            }
            Err(e) => {
                if self.state() == SchedulerState::Connecting {
                    self.connect_failed();
                }
                Err(e)
            }
        }
    }

    /// React to the sink reporting that its transport closed.  A pending
    /// handshake is abandoned.
    pub async fn handle_disconnect(&self) {
        let mut pass = self.pass.lock().await;
        if self.state().is_terminal() {
            return;
        }
        self.on_disconnect(&mut pass);
    }

    /// Clear every registration and close.  Idempotent.  A pending handshake
    /// is abandoned.
    pub async fn shutdown(&self) {
        let _pass = self.pass.lock().await;
        if self.state() == SchedulerState::Closed {
            return;
        }
        self.close();
    }

    /// Spawn a task that forwards the adapter's `Disconnected` events to
    /// [`CommitScheduler::handle_disconnect`].  The task ends once the
    /// scheduler is closed.
    pub fn watch_registry(self: Arc<Self>) -> JoinHandle<()> {
        let mut events = self.adapter.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.payload == RegistryEventPayload::Disconnected {
                    self.handle_disconnect().await;
                }
                if self.state() == SchedulerState::Closed {
                    break;
                }
            }
            debug!("registry watcher stopped");
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internal helpers
    // ─────────────────────────────────────────────────────────────────────

    fn post(&self, snapshot: Snapshot) {
        let mut slot = self.mailbox.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.replace(snapshot).is_some() {
            debug!("queued snapshot superseded");
        }
    }

    fn take_mail(&self) -> Option<Snapshot> {
        self.mailbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_state(&self, next: SchedulerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = ?previous, to = ?next, "scheduler state changed");
        }
    }

    /// `Building` → `Connecting` under a fresh attempt id.
    fn begin_connect(&self) -> Result<u64, SchedulerError> {
        let mut outcome = Err(SchedulerError::Closed);
        self.state.send_if_modified(|state| {
            if *state != SchedulerState::Building {
                outcome = Err(SchedulerError::InvalidTransition {
                    from: *state,
                    to: SchedulerState::Connecting,
                });
                return false;
            }
            *state = SchedulerState::Connecting;
            outcome = Ok(self.attempt.fetch_add(1, Ordering::SeqCst) + 1);
            true
        });
        if outcome.is_ok() {
            info!(
                from = ?SchedulerState::Building,
                to = ?SchedulerState::Connecting,
                "scheduler state changed"
            );
        }
        outcome
    }

    fn owns_attempt(&self, attempt: u64) -> bool {
        self.state() == SchedulerState::Connecting
            && self.attempt.load(Ordering::SeqCst) == attempt
    }

    fn abandoned(&self) -> SchedulerError {
        if self.state().is_terminal() {
            SchedulerError::Closed
        } else {
            SchedulerError::ConnectAbandoned
        }
    }

    /// Called when a `connect` future goes away.  No-op unless `attempt` is
    /// still the pending handshake.
    fn abandon_connect(&self, attempt: u64) {
        let policy = self.config.on_connect_failure;
        let next = match policy {
            ConnectFailurePolicy::Retry => SchedulerState::Building,
            ConnectFailurePolicy::Fatal => SchedulerState::Closing,
        };
        let abandoned = self.state.send_if_modified(|state| {
            if *state != SchedulerState::Connecting
                || self.attempt.load(Ordering::SeqCst) != attempt
            {
                return false;
            }
            *state = next;
            true
        });
        if !abandoned {
            return;
        }
        warn!(?policy, "connect dropped during handshake");
        info!(from = ?SchedulerState::Connecting, to = ?next, "scheduler state changed");
        if next == SchedulerState::Closing {
            self.finish_close();
        }
    }

    fn run_pass(&self, pass: &mut PassState, next: Snapshot) -> Result<PassReport, SchedulerError> {
        let previous = pass.committed.clone();
        match self.engine.reconcile(&previous, &next) {
            Ok(report) => {
                pass.committed = next;
                self.passes.fetch_add(1, Ordering::SeqCst);
                if !report.is_noop()
                    && self.state() == SchedulerState::Connected
                    && let Err(e) = self.adapter.notify_list_changed()
                {
                    warn!(error = %e, "tool list change notification failed");
                }
                Ok(report)
            }
            Err(err) => {
                pass.committed = self.record.as_snapshot();
                match &err {
                    ReconcileError::TransportDisconnected { .. } => {
                        warn!(error = %err, "pass aborted: transport disconnected");
                        self.on_disconnect(pass);
                    }
                    ReconcileError::DuplicateRegistration { .. } if self.config.strict_invariants => {
                        error!(error = %err, "registration invariant violated; closing");
                        self.close();
                    }
                    _ => warn!(error = %err, "reconciliation pass failed"),
                }
                Err(err.into())
            }
        }
    }

    fn on_disconnect(&self, pass: &mut PassState) {
        let dropped = self.engine.teardown();
        pass.committed = Snapshot::empty();
        info!(dropped, policy = ?self.config.on_disconnect, "registry disconnected");
        match self.config.on_disconnect {
            DisconnectPolicy::AwaitReconnect => {
                pass.suspended = true;
                self.set_state(SchedulerState::Building);
            }
            DisconnectPolicy::Terminate => self.close(),
        }
    }

    fn connect_failed(&self) {
        match self.config.on_connect_failure {
            ConnectFailurePolicy::Retry => self.set_state(SchedulerState::Building),
            ConnectFailurePolicy::Fatal => self.close(),
        }
    }

    fn close(&self) {
        self.set_state(SchedulerState::Closing);
        self.finish_close();
    }

    /// Teardown once `Closing` is set.  Nothing reads the pass state after
    /// this, so it does not need the pass lock.
    fn finish_close(&self) {
        let dropped = self.engine.teardown();
        self.take_mail();
        self.set_state(SchedulerState::Closed);
        info!(dropped, "scheduler closed");
    }
}

/// Lives for the duration of one `connect` call; reverts a handshake that
/// was still pending when the future was dropped.
struct PendingConnect<'a> {
    scheduler: &'a CommitScheduler,
    attempt: u64,
}

impl Drop for PendingConnect<'_> {
    fn drop(&mut self) {
        self.scheduler.abandon_connect(self.attempt);
    }
}
