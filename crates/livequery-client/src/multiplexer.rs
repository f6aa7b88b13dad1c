//! Client-side subscription multiplexer.
//!
//! Every distinct topic key holds exactly one transport connection, shared by
//! any number of local subscribers. The first subscribe opens it, the last
//! unsubscribe closes it. A pump task per connection reads events and fans
//! them out to the subscribers registered at the time the event arrived.
//!
//! The topic map is the only shared mutable state. It is guarded by one
//! mutex and every mutation keeps the invariant that a tracked topic has at
//! least one subscriber and a live connection.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use livequery_proto::{StreamEvent, Topic};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::debounce;
use crate::error::Error;
use crate::stream::SnapshotStream;
use crate::transport::{EventStream, SseTransport, Transport};

/// Subscriber callback, invoked once per delivered (or coalesced) event.
pub type Callback = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Receives the error that ended a subscription: a lost connection or a
/// rejected topic.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Per-subscription options.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Debounce window; the multiplexer default applies when unset.
    pub debounce: Option<Duration>,
    /// Cancelling this token unsubscribes.
    pub cancel: Option<CancellationToken>,
    /// Sharing key used instead of the topic key.
    pub custom_id: Option<String>,
    pub on_error: Option<ErrorCallback>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = Some(window);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_custom_id(mut self, id: impl Into<String>) -> Self {
        self.custom_id = Some(id.into());
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

/// Where a subscriber's events go.
#[derive(Clone)]
enum Sink {
    Immediate(Callback),
    Debounced(mpsc::UnboundedSender<StreamEvent>),
}

struct Subscriber {
    sink: Sink,
    on_error: Option<ErrorCallback>,
    done: CancellationToken,
}

struct TopicEntry {
    generation: u64,
    connection: CancellationToken,
    subscribers: HashMap<u64, Subscriber>,
}

pub(crate) struct Inner {
    transport: Arc<dyn Transport>,
    default_debounce: Duration,
    topics: Mutex<HashMap<String, TopicEntry>>,
    next_id: AtomicU64,
}

/// Shares one transport connection per topic across local subscribers.
///
/// Dropping the multiplexer closes every connection.
pub struct Multiplexer {
    inner: Arc<Inner>,
}

impl Multiplexer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_default_debounce(transport, Duration::ZERO)
    }

    pub fn with_default_debounce(transport: Arc<dyn Transport>, window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                default_debounce: window,
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Multiplexer over server-sent events to the configured server.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::with_default_debounce(Arc::new(SseTransport::new(config)), config.default_debounce)
    }

    /// Subscribe to a topic.
    ///
    /// Must be called within a tokio runtime. The first subscriber of a
    /// sharing key opens the connection; later ones join it.
    pub fn subscribe(
        &self,
        topic: &Topic,
        options: SubscribeOptions,
        callback: impl Fn(&StreamEvent) + Send + Sync + 'static,
    ) -> Result<Subscription, Error> {
        self.inner.subscribe(topic, options, Arc::new(callback))
    }

    /// Pull-based sequence of the topic's events, ended by `cancel`.
    pub fn stream(&self, topic: &Topic, cancel: CancellationToken) -> SnapshotStream {
        SnapshotStream::new(Arc::downgrade(&self.inner), topic.clone(), cancel)
    }

    /// Close every connection and drop every subscriber.
    pub fn destroy_all(&self) {
        self.inner.destroy_all();
    }

    /// Number of open topic connections.
    pub fn topic_count(&self) -> usize {
        self.inner.topics.lock().len()
    }

    /// Number of active subscribers across all topics.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .topics
            .lock()
            .values()
            .map(|entry| entry.subscribers.len())
            .sum()
    }

    /// Number of active subscribers sharing one key.
    pub fn subscriber_count_for(&self, key: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(key)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.inner.destroy_all();
    }
}

impl Inner {
    pub(crate) fn subscribe(
        self: &Arc<Self>,
        topic: &Topic,
        options: SubscribeOptions,
        callback: Callback,
    ) -> Result<Subscription, Error> {
        let topic_key = topic.key();
        let key = options.custom_id.clone().unwrap_or_else(|| topic_key.clone());
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let done = CancellationToken::new();

        // Generation 0 is never assigned to a live entry
        if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            done.cancel();
            tracing::debug!(topic = %key, subscriber_id = id, "already cancelled, not subscribed");
            return Ok(Subscription {
                inner: Arc::downgrade(self),
                key,
                generation: 0,
                id,
                done,
            });
        }

        let window = options.debounce.unwrap_or(self.default_debounce);

        let sink = if window.is_zero() {
            Sink::Immediate(callback)
        } else {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(debounce::run(window, rx, callback, done.clone(), key.clone(), id));
            Sink::Debounced(tx)
        };
        let subscriber = Subscriber {
            sink,
            on_error: options.on_error,
            done: done.clone(),
        };

        let generation = {
            let mut topics = self.topics.lock();
            match topics.get_mut(&key) {
                Some(entry) => {
                    entry.subscribers.insert(id, subscriber);
                    tracing::debug!(topic = %key, subscriber_id = id, subscribers = entry.subscribers.len(), "joined topic connection");
                    entry.generation
                }
                None => {
                    let events = match self.transport.open(&topic_key) {
                        Ok(events) => events,
                        Err(e) => {
                            done.cancel();
                            return Err(e);
                        }
                    };
                    let generation = self.next_id.fetch_add(1, Ordering::SeqCst);
                    let connection = CancellationToken::new();
                    tokio::spawn(pump(
                        Arc::downgrade(self),
                        key.clone(),
                        generation,
                        events,
                        connection.clone(),
                    ));

                    let mut subscribers = HashMap::new();
                    subscribers.insert(id, subscriber);
                    topics.insert(
                        key.clone(),
                        TopicEntry {
                            generation,
                            connection,
                            subscribers,
                        },
                    );
                    tracing::debug!(topic = %key, subscriber_id = id, "opened topic connection");
                    generation
                }
            }
        };

        if let Some(cancel) = options.cancel {
            let inner = Arc::downgrade(self);
            let (key, done) = (key.clone(), done.clone());
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Some(inner) = inner.upgrade() {
                            inner.remove_subscriber(&key, generation, id);
                        }
                    }
                    _ = done.cancelled() => {}
                }
            });
        }

        Ok(Subscription {
            inner: Arc::downgrade(self),
            key,
            generation,
            id,
            done,
        })
    }

    /// Remove one subscriber; the last one closes the connection.
    fn remove_subscriber(&self, key: &str, generation: u64, id: u64) {
        let (subscriber, closed) = {
            let mut topics = self.topics.lock();
            let entry = match topics.get_mut(key) {
                Some(entry) if entry.generation == generation => entry,
                _ => return,
            };
            let subscriber = entry.subscribers.remove(&id);
            let closed = if entry.subscribers.is_empty() {
                topics.remove(key)
            } else {
                None
            };
            (subscriber, closed)
        };

        if let Some(subscriber) = subscriber {
            subscriber.done.cancel();
            tracing::debug!(topic = %key, subscriber_id = id, "unsubscribed");
        }
        if let Some(entry) = closed {
            entry.connection.cancel();
            tracing::debug!(topic = %key, "closed topic connection");
        }
    }

    /// Deliver one event to the subscribers registered right now.
    fn broadcast(&self, key: &str, generation: u64, event: &StreamEvent) {
        let sinks: Vec<(u64, Sink)> = {
            let topics = self.topics.lock();
            match topics.get(key) {
                Some(entry) if entry.generation == generation => entry
                    .subscribers
                    .iter()
                    .map(|(id, subscriber)| (*id, subscriber.sink.clone()))
                    .collect(),
                _ => return,
            }
        };

        for (id, sink) in sinks {
            match sink {
                Sink::Immediate(callback) => invoke(&callback, event, key, id),
                Sink::Debounced(tx) => {
                    // Closed when the subscriber left mid-broadcast
                    let _ = tx.send(event.clone());
                }
            }
        }
    }

    /// Tear a topic down after its connection failed and tell its subscribers.
    fn fail_topic(&self, key: &str, generation: u64, error: Error) {
        let entry = {
            let mut topics = self.topics.lock();
            match topics.get(key) {
                Some(entry) if entry.generation == generation => topics.remove(key),
                _ => None,
            }
        };
        let Some(entry) = entry else { return };

        tracing::warn!(
            topic = %key,
            subscribers = entry.subscribers.len(),
            error = %error,
            "topic connection failed"
        );

        for (id, subscriber) in entry.subscribers {
            if let Some(on_error) = &subscriber.on_error {
                let result = catch_unwind(AssertUnwindSafe(|| on_error(&error)));
                if result.is_err() {
                    tracing::warn!(topic = %key, subscriber_id = id, "error callback panicked");
                }
            }
            subscriber.done.cancel();
        }
    }

    fn destroy_all(&self) {
        let topics = std::mem::take(&mut *self.topics.lock());
        for (key, entry) in topics {
            entry.connection.cancel();
            for subscriber in entry.subscribers.values() {
                subscriber.done.cancel();
            }
            tracing::debug!(topic = %key, "destroyed topic connection");
        }
    }
}

/// Read one connection's events until it fails or is closed.
async fn pump(
    inner: Weak<Inner>,
    key: String,
    generation: u64,
    mut events: EventStream,
    connection: CancellationToken,
) {
    let error = loop {
        let item = tokio::select! {
            biased;
            _ = connection.cancelled() => return,
            item = events.next() => item,
        };
        let Some(inner) = inner.upgrade() else { return };
        match item {
            Some(Ok(event)) => inner.broadcast(&key, generation, &event),
            Some(Err(e)) => break e,
            None => break Error::Transport("stream ended".to_string()),
        }
    };

    if let Some(inner) = inner.upgrade() {
        inner.fail_topic(&key, generation, error);
    }
}

/// Invoke a subscriber callback, containing panics to that subscriber.
pub(crate) fn invoke(callback: &Callback, event: &StreamEvent, key: &str, subscriber_id: u64) {
    if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
        tracing::warn!(
            topic = %key,
            subscriber_id,
            sequence = event.sequence,
            "subscriber callback panicked"
        );
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    inner: Weak<Inner>,
    key: String,
    generation: u64,
    id: u64,
    done: CancellationToken,
}

impl Subscription {
    /// Sharing key of the underlying connection.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// False once unsubscribed, cancelled, or ended by a transport error.
    pub fn is_active(&self) -> bool {
        !self.done.is_cancelled()
    }

    /// Unsubscribe. Calling it again, or after the subscription ended, is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove_subscriber(&self.key, self.generation, self.id);
        }
        self.done.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
