//! Application state that renders to a capability tree.
//!
//! A [`Store`] owns some state `S` and a render function `S -> Snapshot`.
//! Every [`Store::update`] re-renders and publishes the new snapshot on a
//! `watch` channel; [`spawn_commit_pump`] forwards that channel into a
//! [`CommitScheduler`].  The channel keeps only the newest value, so bursts of
//! updates collapse into one pass.
//!
//! Handlers reach back into the store through a [`Dispatcher`], which holds a
//! weak reference so registered tools never keep the store alive.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tooltree_types::Snapshot;
use tracing::{debug, warn};

use crate::error::SchedulerError;
use crate::scheduler::CommitScheduler;

type RenderFn<S> = Box<dyn Fn(&S, &Dispatcher<S>) -> Snapshot + Send + Sync>;

pub struct Store<S> {
    state: Mutex<S>,
    render: RenderFn<S>,
    snapshots: watch::Sender<Snapshot>,
    this: Weak<Store<S>>,
}

impl<S: Send + 'static> Store<S> {
    /// Build a store and render `initial` once.
    ///
    /// `render` runs with the state lock held; it must not call
    /// [`Store::update`] or [`Dispatcher::update`] itself.
    pub fn new<F>(initial: S, render: F) -> Arc<Self>
    where
        F: Fn(&S, &Dispatcher<S>) -> Snapshot + Send + Sync + 'static,
    {
        Arc::new_cyclic(|this| {
            let first = render(&initial, &Dispatcher(this.clone()));
            let (snapshots, _) = watch::channel(first);
            Self {
                state: Mutex::new(initial),
                render: Box::new(render),
                snapshots,
                this: this.clone(),
            }
        })
    }

    /// Mutate the state, re-render and publish.  Returns the new snapshot.
    pub fn update(&self, f: impl FnOnce(&mut S)) -> Snapshot {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
        let snapshot = (self.render)(&state, &self.dispatcher());
        self.snapshots.send_replace(snapshot.clone());
        debug!(roots = snapshot.len(), "store re-rendered");
        snapshot
    }

    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// The most recently rendered snapshot.
    pub fn current(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    pub fn dispatcher(&self) -> Dispatcher<S> {
        Dispatcher(self.this.clone())
    }
}

/// Weak handle to a [`Store`] for use inside tool handlers.
pub struct Dispatcher<S>(Weak<Store<S>>);

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Dispatcher(self.0.clone())
    }
}

impl<S: Send + 'static> Dispatcher<S> {
    /// Apply `f` to the store.  Returns `false` once the store is gone.
    pub fn update(&self, f: impl FnOnce(&mut S)) -> bool {
        match self.0.upgrade() {
            Some(store) => {
                store.update(f);
                true
            }
            None => false,
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> Option<R> {
        self.0.upgrade().map(|store| store.read(f))
    }
}

/// Feed every snapshot published on `snapshots` into `scheduler`.
///
/// The current value is submitted immediately.  The task ends when the
/// scheduler closes or every sender is dropped.
pub fn spawn_commit_pump(
    scheduler: Arc<CommitScheduler>,
    mut snapshots: watch::Receiver<Snapshot>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            match scheduler.submit(snapshot).await {
                Ok(_) => {}
                Err(SchedulerError::Closed) => break,
                Err(e) => warn!(error = %e, "snapshot not applied"),
            }
            if snapshots.changed().await.is_err() {
                break;
            }
        }
        debug!("commit pump stopped");
    })
}
