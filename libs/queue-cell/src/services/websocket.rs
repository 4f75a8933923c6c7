use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::models::{ListQueuesOptions, QueueChange, QueueEvent, QueueSnapshot};
use crate::services::fanout::{Scope, SubscriptionError};
use crate::services::lifecycle::QueueLifecycle;
use crate::services::projection::ViewProjector;

/// Disconnect after this many heartbeats go unanswered.
pub const MAX_MISSED_HEARTBEATS: u32 = 3;

#[derive(Debug, PartialEq)]
pub(crate) enum HeartbeatAction {
    SendHeartbeat,
    HeartbeatTimeout,
}

/// Heartbeat bookkeeping for one connection.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    missed_heartbeats: u32,
}

impl SessionState {
    pub(crate) fn on_pong(&mut self) {
        self.missed_heartbeats = 0;
    }

    pub(crate) fn on_heartbeat_tick(&mut self) -> HeartbeatAction {
        if self.missed_heartbeats >= MAX_MISSED_HEARTBEATS {
            return HeartbeatAction::HeartbeatTimeout;
        }
        self.missed_heartbeats += 1;
        HeartbeatAction::SendHeartbeat
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Pong,
}

/// Entity versions a snapshot already reflects. Live events at or below these
/// versions are dropped.
#[derive(Debug, Default)]
pub(crate) struct SnapshotVersions {
    versions: HashMap<Uuid, DateTime<Utc>>,
}

impl SnapshotVersions {
    pub(crate) fn from_snapshots(snapshots: &[QueueSnapshot]) -> Self {
        let mut versions = HashMap::new();
        for snapshot in snapshots {
            versions.insert(snapshot.queue.id, snapshot.queue.updated_at);
            for ticket in &snapshot.tickets {
                versions.insert(ticket.id, ticket.updated_at);
            }
        }
        Self { versions }
    }

    pub(crate) fn is_newer(&self, event: &QueueEvent) -> bool {
        let entity_id = match &event.change {
            QueueChange::QueueOpened { queue } | QueueChange::QueueUpdated { queue } => queue.id,
            QueueChange::TicketAdmitted { ticket } | QueueChange::TicketUpdated { ticket } => {
                ticket.id
            }
        };
        self.versions
            .get(&entity_id)
            .map_or(true, |seen| event.change.version() > *seen)
    }
}

async fn load_snapshots(
    lifecycle: &QueueLifecycle,
    scope: Scope,
) -> Result<Vec<QueueSnapshot>, QueueError> {
    match scope {
        Scope::Queue(queue_id) => Ok(vec![lifecycle.snapshot(queue_id).await?]),
        Scope::Clinic(clinic_id) => {
            let page = lifecycle
                .list_queues(&ListQueuesOptions::open_for_clinic(clinic_id))
                .await?;
            let mut snapshots = Vec::with_capacity(page.items.len());
            for queue in page.items {
                snapshots.push(lifecycle.snapshot(queue.id).await?);
            }
            Ok(snapshots)
        }
    }
}

fn text(value: &Value) -> Message {
    Message::Text(value.to_string().into())
}

/// Runs one realtime session: subscribe, send the snapshot, then stream live
/// events until the client leaves, stops answering heartbeats or falls behind.
pub async fn serve_socket(
    socket: WebSocket,
    lifecycle: Arc<QueueLifecycle>,
    scope: Scope,
    mut projector: ViewProjector,
    heartbeat_interval: Duration,
) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(64);

    let sender_handle = tokio::spawn(async move {
        let mut sink = ws_sink;
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Subscribe before reading the snapshot so nothing committed in between
    // is missed
    let mut subscription = lifecycle.hub().subscribe(scope);
    let snapshots = match load_snapshots(&lifecycle, scope).await {
        Ok(snapshots) => snapshots,
        Err(e) => {
            warn!("Could not load snapshot for {:?}: {}", scope, e);
            let _ = tx
                .send(text(&json!({ "type": "error", "error": e.to_string() })))
                .await;
            drop(tx);
            let _ = sender_handle.await;
            return;
        }
    };
    let versions = SnapshotVersions::from_snapshots(&snapshots);
    let frame = projector.snapshot_frame(&snapshots).await;
    let _ = tx.send(text(&frame)).await;

    info!("Realtime session opened for {:?} ({:?} view)", scope, projector.view());

    let mut session = SessionState::default();
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = subscription.next() => {
                match event {
                    Ok(event) => {
                        if !versions.is_newer(&event) {
                            continue;
                        }
                        let frame = projector.event_frame(&event).await;
                        if tx.send(text(&frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(SubscriptionError::Lagged(skipped)) => {
                        warn!("Subscriber for {:?} fell {} events behind, disconnecting", scope, skipped);
                        let _ = tx.send(text(&json!({ "type": "error", "error": "lagged" }))).await;
                        break;
                    }
                    Err(SubscriptionError::Closed) => break,
                }
            }
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => session.on_pong(),
                    Some(Ok(Message::Text(ref body))) => {
                        if let Ok(ClientFrame::Pong) = serde_json::from_str::<ClientFrame>(body.as_str()) {
                            session.on_pong();
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            _ = heartbeat.tick() => {
                match session.on_heartbeat_tick() {
                    HeartbeatAction::HeartbeatTimeout => {
                        info!("{} missed heartbeats on {:?}, disconnecting", MAX_MISSED_HEARTBEATS, scope);
                        break;
                    }
                    HeartbeatAction::SendHeartbeat => {
                        let beat = json!({ "type": "heartbeat", "serverTime": Utc::now() });
                        if tx.send(text(&beat)).await.is_err() {
                            break;
                        }
                        let _ = tx.send(Message::Ping(Bytes::new())).await;
                    }
                }
            }
        }
    }

    drop(subscription);
    drop(tx);
    let _ = sender_handle.await;
    debug!("Realtime session for {:?} closed", scope);
}
