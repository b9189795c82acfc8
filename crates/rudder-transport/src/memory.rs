//! In-memory implementation of the event transport.
//!
//! Each subscription gets its own bounded queue bound to `(organization,
//! topic)` and a consumer task driving the handler, the way broker-backed
//! transports bind one queue per subscription. Suitable for development and
//! testing.

use async_trait::async_trait;
use rudder_types::CloudEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::transport::{
    ActiveSubscription, EventHandler, EventTransport, Result, TransportError,
};

const DEFAULT_QUEUE_SIZE: usize = 20;

type TopicKey = (String, String);

struct SubEntry {
    id: u64,
    tx: mpsc::Sender<CloudEvent>,
}

type SubMap = Arc<Mutex<HashMap<TopicKey, Vec<SubEntry>>>>;

/// Event transport implemented completely in memory.
pub struct InMemoryTransport {
    subscriptions: SubMap,
    next_id: AtomicU64,
    queue_size: usize,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }

    /// Number of live subscriptions on a topic, for tests and diagnostics.
    pub fn subscriber_count(&self, topic: &str, organization_id: &str) -> usize {
        let key = (organization_id.to_string(), topic.to_string());
        self.subscriptions
            .lock()
            .expect("subscription map poisoned")
            .get(&key)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_entry(map: &SubMap, key: &TopicKey, id: u64) {
    let mut map = map.lock().expect("subscription map poisoned");
    if let Some(entries) = map.get_mut(key) {
        entries.retain(|e| e.id != id);
        if entries.is_empty() {
            map.remove(key);
        }
    }
}

#[async_trait]
impl EventTransport for InMemoryTransport {
    async fn publish(
        &self,
        event: &CloudEvent,
        topic: &str,
        organization_id: &str,
    ) -> Result<()> {
        let key = (organization_id.to_string(), topic.to_string());
        let senders: Vec<mpsc::Sender<CloudEvent>> = {
            let map = self.subscriptions.lock().expect("subscription map poisoned");
            match map.get(&key) {
                Some(entries) => entries.iter().map(|e| e.tx.clone()).collect(),
                // No subscriber: the event is dropped, matching broker
                // semantics for an unbound topic.
                None => return Ok(()),
            }
        };

        for tx in senders {
            tx.send(event.clone()).await.map_err(|_| TransportError::Publish {
                topic: topic.to_string(),
                message: "subscriber queue closed".to_string(),
            })?;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        organization_id: &str,
        handler: EventHandler,
    ) -> Result<Box<dyn ActiveSubscription>> {
        let key = (organization_id.to_string(), topic.to_string());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, mut rx) = mpsc::channel::<CloudEvent>(self.queue_size);
        let (done_tx, mut done_rx) = watch::channel(false);

        self.subscriptions
            .lock()
            .expect("subscription map poisoned")
            .entry(key.clone())
            .or_default()
            .push(SubEntry { id, tx });

        let map = self.subscriptions.clone();
        let task_key = key.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => handler(event).await,
                        None => break,
                    },
                    _ = done_rx.changed() => {
                        remove_entry(&map, &task_key, id);
                        break;
                    }
                }
            }
            debug!(topic = %task_key.1, organization = %task_key.0, "subscription consumer stopped");
        });

        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            organization_id: organization_id.to_string(),
            done: done_tx,
        }))
    }

    async fn close(&self) {
        // Dropping the senders ends every consumer task.
        self.subscriptions
            .lock()
            .expect("subscription map poisoned")
            .clear();
    }
}

struct MemorySubscription {
    topic: String,
    organization_id: String,
    done: watch::Sender<bool>,
}

impl ActiveSubscription for MemorySubscription {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn organization_id(&self) -> &str {
        &self.organization_id
    }

    fn unsubscribe(&self) {
        let _ = self.done.send(true);
    }
}
