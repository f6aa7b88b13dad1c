//! Per-topic signal dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use livequery_core::DependencySet;
use livequery_proto::{ChangeRecord, Topic};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::Signal;

/// Listener senders of one topic, keyed by listener id.
pub(super) type ListenerMap = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<Signal>>>>;

/// A registered topic with at least one listener.
pub(super) struct TopicEntry {
    pub topic: Topic,
    pub dependencies: DependencySet,
    pub sequences: mpsc::UnboundedSender<u64>,
    pub listeners: ListenerMap,
}

impl TopicEntry {
    /// Create the entry and spawn its dispatcher task.
    pub fn spawn(key: Arc<str>, topic: Topic, dependencies: DependencySet) -> Self {
        let (sequences, rx) = mpsc::unbounded_channel();
        let listeners = ListenerMap::default();
        tokio::spawn(run_dispatcher(key, rx, listeners.clone()));

        Self {
            topic,
            dependencies,
            sequences,
            listeners,
        }
    }

    /// Whether a change should invalidate this topic.
    ///
    /// `where` predicates are never evaluated: any change to a dependency
    /// matches. Locale-scoped changes skip topics pinned to another locale.
    pub fn matches(&self, change: &ChangeRecord) -> bool {
        if !self
            .dependencies
            .contains(change.resource_type, &change.resource)
        {
            return false;
        }
        match (change.locale.as_deref(), self.topic.locale()) {
            (Some(changed), Some(wanted)) => changed == wanted,
            _ => true,
        }
    }
}

/// Fan signals out to the topic's listeners in sequence order.
///
/// Concurrent appends may enqueue sequences out of order. A sequence not
/// above the last one delivered is dropped: the newer signal already told
/// every listener to re-fetch.
async fn run_dispatcher(key: Arc<str>, mut rx: mpsc::UnboundedReceiver<u64>, listeners: ListenerMap) {
    tracing::debug!(topic = %key, "topic dispatcher started");

    let mut last_delivered = 0u64;
    while let Some(sequence) = rx.recv().await {
        if sequence <= last_delivered {
            tracing::trace!(topic = %key, sequence, last_delivered, "stale signal dropped");
            continue;
        }
        last_delivered = sequence;

        let targets: Vec<_> = listeners
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        for (listener_id, tx) in targets {
            let signal = Signal {
                topic_key: key.clone(),
                sequence,
            };
            if tx.send(signal).is_err() {
                tracing::warn!(topic = %key, listener_id, sequence, "listener closed, signal not delivered");
            }
        }
    }

    tracing::debug!(topic = %key, "topic dispatcher stopped");
}
