//! In-process fan-out of committed queue events.
//!
//! Each clinic and each queue gets its own broadcast channel, created when the
//! first subscriber arrives and dropped once nobody listens. Publishing never
//! waits on subscribers; a receiver that falls more than `capacity` events
//! behind sees `Lagged` and is expected to disconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_utils::time::now_micros;

use crate::models::{QueueChange, QueueEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Clinic(Uuid),
    Queue(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("subscriber fell {0} events behind")]
    Lagged(u64),
    #[error("event stream closed")]
    Closed,
}

pub struct Subscription {
    scope: Scope,
    receiver: broadcast::Receiver<Arc<QueueEvent>>,
}

impl Subscription {
    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub async fn next(&mut self) -> Result<Arc<QueueEvent>, SubscriptionError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(skipped) => SubscriptionError::Lagged(skipped),
            broadcast::error::RecvError::Closed => SubscriptionError::Closed,
        })
    }
}

pub struct RealtimeHub {
    channels: Mutex<HashMap<Scope, broadcast::Sender<Arc<QueueEvent>>>>,
    capacity: usize,
    sequence: AtomicU64,
    relay: RwLock<Option<mpsc::UnboundedSender<QueueEvent>>>,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            sequence: AtomicU64::new(0),
            relay: RwLock::new(None),
        }
    }

    pub fn subscribe(&self, scope: Scope) -> Subscription {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        let receiver = channels
            .entry(scope)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        debug!("New subscriber for {:?}", scope);
        Subscription { scope, receiver }
    }

    pub fn subscriber_count(&self, scope: Scope) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&scope)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Stamps a sequence number on `change` and hands it to the relay if one is
    /// attached, otherwise delivers it locally. Call with the queue lock held.
    pub fn publish(&self, clinic_id: Uuid, queue_id: Uuid, change: QueueChange) -> QueueEvent {
        let event = QueueEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            clinic_id,
            queue_id,
            committed_at: now_micros(),
            change,
        };

        let relayed = {
            let relay = self.relay.read().unwrap_or_else(|p| p.into_inner());
            match relay.as_ref() {
                Some(tx) => tx.send(event.clone()).is_ok(),
                None => false,
            }
        };
        if !relayed {
            self.deliver_local(event.clone());
        }

        event
    }

    pub fn deliver_local(&self, event: QueueEvent) {
        let event = Arc::new(event);
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());

        for scope in [Scope::Queue(event.queue_id), Scope::Clinic(event.clinic_id)] {
            let Some(sender) = channels.get(&scope) else {
                continue;
            };
            if sender.send(event.clone()).is_err() {
                // Last receiver went away
                channels.remove(&scope);
            }
        }
    }

    /// Routes future publishes through `relay` until detached.
    pub fn attach_relay(&self, relay: mpsc::UnboundedSender<QueueEvent>) {
        *self.relay.write().unwrap_or_else(|p| p.into_inner()) = Some(relay);
    }

    pub fn detach_relay(&self) {
        let previous = self.relay.write().unwrap_or_else(|p| p.into_inner()).take();
        if previous.is_some() {
            warn!("Realtime relay detached, delivering events locally");
        }
    }

    pub fn is_relayed(&self) -> bool {
        self.relay.read().unwrap_or_else(|p| p.into_inner()).is_some()
    }
}
