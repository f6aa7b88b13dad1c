//! Pull-based adapter over multiplexer subscriptions.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use async_stream::stream;
use futures::stream::{BoxStream, Stream, StreamExt};
use livequery_proto::{StreamEvent, Topic};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::multiplexer::{Inner, SubscribeOptions};

/// Events held for a consumer that has not pulled yet. When full, the oldest
/// are dropped.
pub const QUEUE_CAPACITY: usize = 16;

/// Lazy, cancellable sequence of a topic's events.
///
/// The subscription is made on the first poll and released when the stream
/// ends or is dropped. Cancelling the token resolves a pending poll with
/// `None`; a transport failure resolves it with the error. Once finished the
/// stream yields nothing further. A consumer that falls more than
/// [`QUEUE_CAPACITY`] events behind skips the oldest ones.
pub struct SnapshotStream {
    events: BoxStream<'static, Result<StreamEvent, Error>>,
}

impl SnapshotStream {
    pub(crate) fn new(inner: Weak<Inner>, topic: Topic, cancel: CancellationToken) -> Self {
        let events = stream! {
            let (tx, mut rx) = broadcast::channel::<Result<StreamEvent, Error>>(QUEUE_CAPACITY);

            let subscription = match inner.upgrade() {
                _ if cancel.is_cancelled() => None,
                Some(inner) => {
                    let errors = tx.clone();
                    let options = SubscribeOptions::new()
                        .with_cancel(cancel.clone())
                        .on_error(move |e| {
                            let _ = errors.send(Err(e.clone()));
                        });
                    let callback = Arc::new(move |event: &StreamEvent| {
                        let _ = tx.send(Ok(event.clone()));
                    });
                    match inner.subscribe(&topic, options, callback) {
                        Ok(subscription) => Some(subscription),
                        Err(e) => {
                            yield Err(e);
                            None
                        }
                    }
                }
                None => {
                    yield Err(Error::Closed);
                    None
                }
            };

            if let Some(subscription) = subscription {
                loop {
                    let item = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        item = rx.recv() => item,
                    };
                    match item {
                        Ok(Ok(event)) => yield Ok(event),
                        Ok(Err(e)) => {
                            yield Err(e);
                            break;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(topic = %subscription.key(), skipped, "consumer behind, oldest events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                subscription.unsubscribe();
            }
        };

        Self {
            events: events.boxed(),
        }
    }
}

impl Stream for SnapshotStream {
    type Item = Result<StreamEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multiplexer::Multiplexer;
    use crate::transport::testing::ChannelTransport;
    use serde_json::json;
    use std::time::Duration;

    fn setup() -> (Arc<ChannelTransport>, Multiplexer) {
        let transport = Arc::new(ChannelTransport::default());
        let mux = Multiplexer::new(transport.clone());
        (transport, mux)
    }

    async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), future)
            .await
            .expect("pull did not resolve")
    }

    #[tokio::test]
    async fn test_yields_snapshots_in_order() {
        let (transport, mux) = setup();
        let topic = Topic::collection("posts");
        let mut stream = mux.stream(&topic, CancellationToken::new());

        let first = tokio::spawn(async move {
            let item = stream.next().await;
            (item, stream)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(transport.opened(), 1);

        transport.push(&topic.key(), Ok(StreamEvent::snapshot(1, json!([{"id": 1}]))));
        transport.push(&topic.key(), Ok(StreamEvent::snapshot(2, json!([{"id": 1}, {"id": 2}]))));

        let (item, mut stream) = within(first).await.unwrap();
        assert_eq!(item.unwrap().unwrap().sequence, 1);
        let second = within(stream.next()).await.unwrap().unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(second.data, Some(json!([{"id": 1}, {"id": 2}])));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_pending_pull() {
        let (_transport, mux) = setup();
        let cancel = CancellationToken::new();
        let mut stream = mux.stream(&Topic::collection("posts"), cancel.clone());

        let pending = tokio::spawn(async move {
            let item = stream.next().await;
            (item, stream)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mux.subscriber_count(), 1);

        cancel.cancel();
        let (item, mut stream) = within(pending).await.unwrap();
        assert!(item.is_none());
        assert!(within(stream.next()).await.is_none());
        assert_eq!(mux.subscriber_count(), 0);
        assert_eq!(mux.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_fails_pending_pull() {
        let (transport, mux) = setup();
        let topic = Topic::collection("posts");
        let mut stream = mux.stream(&topic, CancellationToken::new());

        let pending = tokio::spawn(async move {
            let item = stream.next().await;
            (item, stream)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        transport.push(&topic.key(), Err(Error::Transport("server went away".to_string())));

        let (item, mut stream) = within(pending).await.unwrap();
        assert_eq!(item, Some(Err(Error::Transport("server went away".to_string()))));
        assert!(within(stream.next()).await.is_none());
        assert_eq!(mux.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_pull() {
        let (transport, mux) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut stream = mux.stream(&Topic::collection("posts"), cancel);
        assert!(within(stream.next()).await.is_none());
        assert_eq!(transport.opened(), 0);
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_subscription() {
        let (transport, mux) = setup();
        let topic = Topic::collection("posts");
        let mut stream = mux.stream(&topic, CancellationToken::new());

        transport.signal(&topic.key(), 1);
        let pull = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(pull.is_err());
        assert_eq!(mux.subscriber_count(), 1);

        drop(stream);
        assert_eq!(mux.subscriber_count(), 0);
        assert_eq!(mux.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_consumer_keeps_latest() {
        let (transport, mux) = setup();
        let topic = Topic::collection("posts");
        let mut stream = mux.stream(&topic, CancellationToken::new());

        let first = tokio::spawn(async move {
            let item = stream.next().await;
            (item, stream)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.signal(&topic.key(), 1);
        let (item, mut stream) = within(first).await.unwrap();
        assert_eq!(item.unwrap().unwrap().sequence, 1);

        for sequence in 2..=41 {
            transport.signal(&topic.key(), sequence);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut pulled = Vec::new();
        while pulled.last() != Some(&41) {
            pulled.push(within(stream.next()).await.unwrap().unwrap().sequence);
        }
        assert_eq!(pulled.len(), QUEUE_CAPACITY);
        assert_eq!(pulled[0], 41 - QUEUE_CAPACITY as u64 + 1);
        assert!(pulled.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_multiplexer_gone() {
        let (_transport, mux) = setup();
        let mut stream = mux.stream(&Topic::collection("posts"), CancellationToken::new());
        drop(mux);
        assert_eq!(within(stream.next()).await, Some(Err(Error::Closed)));
        assert!(within(stream.next()).await.is_none());
    }
}
