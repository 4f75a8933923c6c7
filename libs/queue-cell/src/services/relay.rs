//! Redis pub/sub relay so several API instances share one event stream.
//!
//! Once attached, the hub hands every event to a single publisher task which
//! pushes it to Redis. A single subscriber task reads the channel back
//! (including this instance's own events) and delivers locally, so local
//! delivery order is the Redis order. If a publish fails the event is
//! delivered locally only.

use std::sync::Arc;

use deadpool_redis::{Config, Pool, Runtime};
use futures::StreamExt;
use redis::aio::PubSub;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use shared_utils::RetryPolicy;

use crate::error::QueueError;
use crate::models::QueueEvent;
use crate::services::fanout::RealtimeHub;

pub const EVENTS_CHANNEL: &str = "clinic:queue-events";

pub struct RedisRelay {
    publisher: JoinHandle<()>,
    subscriber: JoinHandle<()>,
}

impl RedisRelay {
    pub async fn start(
        hub: Arc<RealtimeHub>,
        redis_url: &str,
        retry: RetryPolicy,
    ) -> Result<Self, QueueError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::PoolError(e.to_string()))?;

        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        drop(conn);

        let client = redis::Client::open(redis_url)?;
        let pubsub = subscribe(&client).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        hub.attach_relay(tx);
        info!("Realtime relay attached to Redis channel {}", EVENTS_CHANNEL);

        let publisher = tokio::spawn(publish_loop(pool, hub.clone(), rx));
        let subscriber = tokio::spawn(subscribe_loop(client, pubsub, hub, retry));

        Ok(Self {
            publisher,
            subscriber,
        })
    }

    pub fn shutdown(self) {
        self.publisher.abort();
        self.subscriber.abort();
    }
}

async fn subscribe(client: &redis::Client) -> Result<PubSub, QueueError> {
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    pubsub.subscribe(EVENTS_CHANNEL).await?;
    Ok(pubsub)
}

async fn publish_one(pool: &Pool, event: &QueueEvent) -> Result<(), QueueError> {
    let payload = serde_json::to_string(event)?;
    let mut conn = pool.get().await?;
    let receivers: i64 = conn.publish(EVENTS_CHANNEL, payload).await?;
    debug!("Event {} relayed to {} instances", event.sequence, receivers);
    Ok(())
}

async fn publish_loop(
    pool: Pool,
    hub: Arc<RealtimeHub>,
    mut events: mpsc::UnboundedReceiver<QueueEvent>,
) {
    while let Some(event) = events.recv().await {
        match publish_one(&pool, &event).await {
            Ok(()) if hub.is_relayed() => {}
            // Subscriber gave up; nobody will read this back
            Ok(()) => hub.deliver_local(event),
            Err(e) => {
                warn!("Relay publish failed for event {}: {}", event.sequence, e);
                hub.deliver_local(event);
            }
        }
    }
}

async fn subscribe_loop(
    client: redis::Client,
    mut pubsub: PubSub,
    hub: Arc<RealtimeHub>,
    retry: RetryPolicy,
) {
    loop {
        {
            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Unreadable relay payload: {}", e);
                        continue;
                    }
                };
                match serde_json::from_str::<QueueEvent>(&payload) {
                    Ok(event) => hub.deliver_local(event),
                    Err(e) => warn!("Dropping malformed relay event: {}", e),
                }
            }
        }

        warn!("Redis subscription ended, reconnecting");
        let mut attempt = 0;
        pubsub = loop {
            match subscribe(&client).await {
                Ok(pubsub) => break pubsub,
                Err(e) => {
                    attempt += 1;
                    warn!("Relay resubscribe attempt {} failed: {}", attempt, e);
                    if !retry.wait_for(attempt).await {
                        error!("Relay could not reconnect to Redis, falling back to local delivery");
                        hub.detach_relay();
                        return;
                    }
                }
            }
        };
    }
}
