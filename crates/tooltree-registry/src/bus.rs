//! Registry event bus.
//!
//! Uses [`tokio::sync::broadcast`] under the hood so that every subscriber
//! (the commit scheduler, the stdio front end, tests) sees every lifecycle
//! event without any single subscriber blocking the others.
//!
//! | Payload | Published when |
//! |---|---|
//! | [`RegistryEventPayload::Connected`] | the adapter is flipped to connected |
//! | [`RegistryEventPayload::ToolListChanged`] | a pass changed the exposed tool set |
//! | [`RegistryEventPayload::Disconnected`] | the transport closed from the far side |
//! | [`RegistryEventPayload::Cleared`] | `close_all` removed every registration |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::error::RegistryError;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 64;

/// Lifecycle event emitted by a registry sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "tooltree-registry::local"
    pub source: String,
    pub payload: RegistryEventPayload,
}

impl RegistryEvent {
    pub fn new(source: impl Into<String>, payload: RegistryEventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEventPayload {
    Connected,
    ToolListChanged,
    Disconnected,
    Cleared,
}

/// Shared event bus.  Clones share the same underlying broadcast channel.
#[derive(Clone, Debug)]
pub struct RegistryBus {
    sender: broadcast::Sender<RegistryEvent>,
}

impl RegistryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event.
    ///
    /// Returns the number of receivers handed the event, or
    /// [`RegistryError::Notify`] when nobody is listening.
    pub fn publish(&self, event: RegistryEvent) -> Result<usize, RegistryError> {
        self.sender
            .send(event)
            .map_err(|e| RegistryError::Notify(format!("no subscribers for {:?}", e.0.payload)))
    }

    pub fn subscribe(&self) -> RegistrySubscriber {
        RegistrySubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for RegistryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiver side of a [`RegistryBus`].
pub struct RegistrySubscriber {
    receiver: broadcast::Receiver<RegistryEvent>,
}

impl RegistrySubscriber {
    /// Wait for the next event.
    ///
    /// Lagging is logged and skipped.  Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<RegistryEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "RegistrySubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
