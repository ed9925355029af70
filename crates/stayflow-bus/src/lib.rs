//! Per-guest event bus.
//!
//! Subscriptions are keyed by guest id: a subscriber sees every event for its
//! guest (replies, staging, confirmation, cancellation) and nothing for any
//! other guest. Delivery is at-most-once per subscriber: events are pushed
//! with `try_send` and dropped with a warning when a subscriber's channel is
//! full, so one stalled consumer never blocks the conversation. Entries for
//! guests whose receivers have all been dropped are pruned on the next
//! publish, so a disconnecting listener releases its resources without any
//! explicit unsubscribe call.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use stayflow_schema::BusMessage;
use tokio::sync::{mpsc, RwLock};

type SubscriberMap = Arc<RwLock<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>>;

pub struct EventBus {
    subscribers: SubscriberMap,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Register a subscriber for one guest. Events published after this call
    /// returns are guaranteed to reach the receiver (until its buffer fills).
    pub async fn subscribe(&self, guest_id: &str) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        subs.entry(guest_id.to_string()).or_default().push(tx);
        rx
    }

    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        publish_inner(&self.subscribers, msg).await
    }

    /// Cheap cloneable handle for components that only ever publish.
    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            subscribers: self.subscribers.clone(),
        }
    }

    /// Live subscriber count for one guest (dropped receivers excluded).
    pub async fn subscriber_count(&self, guest_id: &str) -> usize {
        let subs = self.subscribers.read().await;
        subs.get(guest_id)
            .map(|txs| txs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct BusPublisher {
    subscribers: SubscriberMap,
}

impl BusPublisher {
    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        publish_inner(&self.subscribers, msg).await
    }
}

async fn publish_inner(subscribers: &SubscriberMap, msg: BusMessage) -> Result<()> {
    let guest_id = msg.guest_id().to_string();
    let mut subs = subscribers.write().await;
    let Some(txs) = subs.get_mut(&guest_id) else {
        return Ok(());
    };
    txs.retain(|tx| !tx.is_closed());
    for tx in txs.iter() {
        if tx.try_send(msg.clone()).is_err() {
            tracing::warn!(
                guest_id = %guest_id,
                event = msg.event_name(),
                "subscriber buffer full, dropping event"
            );
        }
    }
    if txs.is_empty() {
        subs.remove(&guest_id);
    }
    Ok(())
}
