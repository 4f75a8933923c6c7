use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use shared_utils::RetryPolicy;

use crate::error::QueueError;
use crate::models::{QueueEvent, QueueSnapshot};
use crate::services::fanout::{Scope, Subscription};
use crate::services::lifecycle::QueueLifecycle;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("Gave up on queue {queue_id} after {attempts} failed connection attempts")]
    RetriesExhausted { queue_id: Uuid, attempts: u32 },
}

/// Where a viewer gets its stream and snapshot from.
#[async_trait]
pub trait ViewerSource: Send + Sync {
    /// Must subscribe before reading the snapshot.
    async fn connect(&self, queue_id: Uuid) -> Result<(Subscription, QueueSnapshot), QueueError>;
}

#[async_trait]
impl ViewerSource for QueueLifecycle {
    async fn connect(&self, queue_id: Uuid) -> Result<(Subscription, QueueSnapshot), QueueError> {
        let subscription = self.hub().subscribe(Scope::Queue(queue_id));
        let snapshot = self.snapshot(queue_id).await?;
        Ok((subscription, snapshot))
    }
}

#[derive(Debug, Clone)]
pub enum ViewerUpdate {
    Event(Arc<QueueEvent>),
    /// The stream was lost and the snapshot was reloaded.
    Resynced,
}

/// A live, locally materialised view of one queue.
pub struct QueueViewer {
    source: Arc<dyn ViewerSource>,
    queue_id: Uuid,
    retry: RetryPolicy,
    subscription: Subscription,
    snapshot: QueueSnapshot,
    reconnects: u32,
}

impl std::fmt::Debug for QueueViewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueViewer")
            .field("queue_id", &self.queue_id)
            .field("retry", &self.retry)
            .field("snapshot", &self.snapshot)
            .field("reconnects", &self.reconnects)
            .finish_non_exhaustive()
    }
}

impl QueueViewer {
    pub async fn connect(
        source: Arc<dyn ViewerSource>,
        queue_id: Uuid,
        retry: RetryPolicy,
    ) -> Result<Self, ViewerError> {
        let (subscription, snapshot) = establish(source.as_ref(), queue_id, &retry).await?;
        Ok(Self {
            source,
            queue_id,
            retry,
            subscription,
            snapshot,
            reconnects: 0,
        })
    }

    pub fn snapshot(&self) -> &QueueSnapshot {
        &self.snapshot
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    /// Waits for the next change that moves the view forward. Stale and
    /// duplicate events are skipped; a lost stream triggers a resync.
    pub async fn next_update(&mut self) -> Result<ViewerUpdate, ViewerError> {
        loop {
            match self.subscription.next().await {
                Ok(event) => {
                    if self.snapshot.apply(&event) {
                        return Ok(ViewerUpdate::Event(event));
                    }
                }
                Err(e) => {
                    warn!("Stream for queue {} lost ({}), resyncing", self.queue_id, e);
                    let (subscription, snapshot) =
                        establish(self.source.as_ref(), self.queue_id, &self.retry).await?;
                    self.subscription = subscription;
                    self.snapshot = snapshot;
                    self.reconnects += 1;
                    return Ok(ViewerUpdate::Resynced);
                }
            }
        }
    }
}

async fn establish(
    source: &dyn ViewerSource,
    queue_id: Uuid,
    retry: &RetryPolicy,
) -> Result<(Subscription, QueueSnapshot), ViewerError> {
    let mut attempt = 0;
    loop {
        match source.connect(queue_id).await {
            Ok(connected) => {
                if attempt > 0 {
                    info!("Reconnected to queue {} after {} failures", queue_id, attempt);
                }
                return Ok(connected);
            }
            Err(e) => {
                attempt += 1;
                warn!("Connecting to queue {} failed (attempt {}): {}", queue_id, attempt, e);
                if !retry.wait_for(attempt).await {
                    return Err(ViewerError::RetriesExhausted {
                        queue_id,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}
