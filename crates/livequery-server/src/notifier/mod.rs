//! Change notifier.
//!
//! The CRUD engine calls [`Notifier::append_change`] after each committed
//! mutation and [`Notifier::notify`] separately. Appending is the source of
//! truth and its failures reach the caller; notifying is advisory and never
//! fails the mutation path.
//!
//! Each registered topic owns a dispatcher task fed through a channel, so
//! fan-out to many listeners never runs on the caller's thread and delivery
//! within a topic is serialized by sequence.

mod dispatch;
mod listener;

pub use listener::{Listener, Signal};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use livequery_core::{ChangeLog, DependencyResolver};
use livequery_proto::{ChangeRecord, NewChange, Topic};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::Error;
use dispatch::TopicEntry;

/// Server-side topic registry and change notifier.
pub struct Notifier {
    changelog: Arc<ChangeLog>,
    resolver: DependencyResolver,
    /// Registered topics keyed by canonical topic key.
    topics: RwLock<HashMap<Arc<str>, TopicEntry>>,
    next_listener_id: AtomicU64,
}

impl Notifier {
    /// Create a notifier over a change log and resolver.
    pub fn new(changelog: Arc<ChangeLog>, resolver: DependencyResolver) -> Self {
        Self {
            changelog,
            resolver,
            topics: RwLock::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// The underlying change log.
    pub fn changelog(&self) -> &ChangeLog {
        &self.changelog
    }

    /// Highest sequence in the change log.
    pub fn current_sequence(&self) -> u64 {
        self.changelog.current_sequence()
    }

    /// Persist a committed change and return the stored record.
    pub fn append_change(&self, change: NewChange) -> Result<ChangeRecord, Error> {
        Ok(self.changelog.append(change)?)
    }

    /// Signal every topic whose dependencies include the changed resource.
    ///
    /// Returns the number of topics signalled.
    pub fn notify(&self, change: &ChangeRecord) -> usize {
        let topics = self.topics.read();
        let mut signalled = 0;

        for (key, entry) in topics.iter().filter(|(_, entry)| entry.matches(change)) {
            if entry.sequences.send(change.sequence).is_err() {
                tracing::warn!(topic = %key, sequence = change.sequence, "topic dispatcher gone");
                continue;
            }
            signalled += 1;
        }

        tracing::trace!(
            sequence = change.sequence,
            resource = %change.resource,
            signalled,
            "change notified"
        );

        signalled
    }

    /// Append a change and notify listeners in one step.
    pub fn publish(&self, change: NewChange) -> Result<ChangeRecord, Error> {
        let record = self.append_change(change)?;
        self.notify(&record);
        Ok(record)
    }

    /// Register a listener for a topic.
    ///
    /// The topic's dependency set is resolved on the first registration of its
    /// key; unknown relations fail here, before any connection is served.
    pub fn register(self: &Arc<Self>, topic: Topic) -> Result<Listener, Error> {
        let key: Arc<str> = Arc::from(topic.key());
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);

        let dependencies = {
            let existing = self
                .topics
                .read()
                .get(&key)
                .map(|entry| entry.dependencies.clone());
            match existing {
                Some(dependencies) => dependencies,
                None => self.resolver.resolve_topic(&topic)?,
            }
        };

        {
            let mut topics = self.topics.write();
            let entry = topics.entry(key.clone()).or_insert_with(|| {
                tracing::debug!(
                    topic = %key,
                    dependencies = ?dependencies.resources(),
                    "topic registered"
                );
                TopicEntry::spawn(key.clone(), topic.clone(), dependencies.clone())
            });
            entry.listeners.lock().insert(id, tx);
        }

        tracing::debug!(topic = %key, listener_id = id, "listener registered");

        Ok(Listener {
            id,
            topic,
            key,
            dependencies,
            rx,
            notifier: self.clone(),
        })
    }

    /// Remove a listener. The topic is dropped with its last listener.
    pub(crate) fn unregister(&self, key: &str, listener_id: u64) {
        let mut topics = self.topics.write();
        let now_empty = match topics.get(key) {
            Some(entry) => {
                let mut listeners = entry.listeners.lock();
                listeners.remove(&listener_id);
                listeners.is_empty()
            }
            None => return,
        };

        if now_empty {
            topics.remove(key);
            tracing::debug!(topic = %key, "topic removed");
        }
        tracing::debug!(topic = %key, listener_id, "listener unregistered");
    }

    /// Number of topics with at least one listener.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    /// Number of registered listeners across all topics.
    pub fn listener_count(&self) -> usize {
        self.topics
            .read()
            .values()
            .map(|entry| entry.listeners.lock().len())
            .sum()
    }

    /// Number of listeners of one topic.
    pub fn listeners_for(&self, key: &str) -> usize {
        self.topics
            .read()
            .get(key)
            .map(|entry| entry.listeners.lock().len())
            .unwrap_or(0)
    }
}
