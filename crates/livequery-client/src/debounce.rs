//! Trailing, keep-latest debouncing of subscriber callbacks.
//!
//! [`Debouncer`] is a clock-free state machine: callers pass the current
//! instant in, so coalescing can be tested without a runtime. The driver task
//! feeds it from a channel and sleeps until its deadline.

use std::time::Duration;

use livequery_proto::StreamEvent;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::multiplexer::{invoke, Callback};

#[derive(Debug)]
enum State<T> {
    Idle,
    Pending { deadline: Instant, latest: T },
}

/// Coalesces bursts into one trailing payload per quiet window.
#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    state: State<T>,
}

impl<T> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: State::Idle,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an arrival. Replaces any pending payload and restarts the window.
    pub fn push(&mut self, now: Instant, payload: T) {
        self.state = State::Pending {
            deadline: now + self.window,
            latest: payload,
        };
    }

    /// When the pending payload becomes due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match &self.state {
            State::Idle => None,
            State::Pending { deadline, .. } => Some(*deadline),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, State::Pending { .. })
    }

    /// Take the pending payload if its window has elapsed.
    pub fn poll_expired(&mut self, now: Instant) -> Option<T> {
        match self.deadline() {
            Some(deadline) if deadline <= now => {
                match std::mem::replace(&mut self.state, State::Idle) {
                    State::Pending { latest, .. } => Some(latest),
                    State::Idle => None,
                }
            }
            _ => None,
        }
    }

    /// Drop the pending payload without dispatching it.
    pub fn clear(&mut self) {
        self.state = State::Idle;
    }
}

/// Drive one subscriber's debouncer until the subscription ends.
///
/// A payload still pending when `done` fires is discarded.
pub(crate) async fn run(
    window: Duration,
    mut events: mpsc::UnboundedReceiver<StreamEvent>,
    callback: Callback,
    done: CancellationToken,
    topic_key: String,
    subscriber_id: u64,
) {
    let mut debouncer = Debouncer::new(window);

    loop {
        let deadline = debouncer.deadline();
        tokio::select! {
            biased;
            _ = done.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => debouncer.push(Instant::now(), event),
                None => break,
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(event) = debouncer.poll_expired(Instant::now()) {
                    invoke(&callback, &event, &topic_key, subscriber_id);
                }
            }
        }
    }

    if debouncer.is_pending() {
        tracing::trace!(topic = %topic_key, subscriber_id, "pending event discarded");
    }
}
