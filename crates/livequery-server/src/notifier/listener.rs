//! Listener handles returned by topic registration.

use std::sync::Arc;

use livequery_core::DependencySet;
use livequery_proto::Topic;
use tokio::sync::mpsc;

use super::Notifier;

/// Lightweight change signal pushed to topic listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// Key of the topic the signal belongs to.
    pub topic_key: Arc<str>,
    /// Sequence of the change that triggered it.
    pub sequence: u64,
}

/// One stream connection's view of a topic.
///
/// Dropping the listener unregisters it; the last listener of a topic takes
/// the topic's dispatcher down with it.
pub struct Listener {
    pub(super) id: u64,
    pub(super) topic: Topic,
    pub(super) key: Arc<str>,
    pub(super) dependencies: DependencySet,
    pub(super) rx: mpsc::UnboundedReceiver<Signal>,
    pub(super) notifier: Arc<Notifier>,
}

impl Listener {
    /// Listener id, unique within the notifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Topic this listener watches.
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Canonical topic key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Resolved dependency set of the topic.
    pub fn dependencies(&self) -> &DependencySet {
        &self.dependencies
    }

    /// Wait for the next signal. Returns `None` once the topic is gone.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }

    /// Wait for the next signal, then skip to the newest one already queued.
    ///
    /// Used where only the latest state matters, such as snapshot recomputation.
    pub async fn recv_latest(&mut self) -> Option<Signal> {
        let mut signal = self.rx.recv().await?;
        while let Ok(next) = self.rx.try_recv() {
            signal = next;
        }
        Some(signal)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.notifier.unregister(&self.key, self.id);
    }
}
