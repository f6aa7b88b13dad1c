//! End-to-end tests against a real livequery server over server-sent events.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use livequery_client::proto::{DeliveryMode, NewChange, Topic};
use livequery_client::{CancellationToken, ClientConfig, Error, Multiplexer, SubscribeOptions};
use livequery_core::{ChangeLog, DependencyResolver, ResourceSchema, SchemaRegistry};
use livequery_server::{
    create_router, AppState, Credentials, Notifier, ServerConfig, SnapshotSource,
};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

struct TestServer {
    addr: SocketAddr,
    notifier: Arc<Notifier>,
    _db: sled::Db,
}

/// Read endpoint whose result is always `null`, like an unset global.
struct NullSource;

#[async_trait]
impl SnapshotSource for NullSource {
    async fn fetch(
        &self,
        _topic: &Topic,
        _credentials: &Credentials,
    ) -> Result<Value, livequery_server::Error> {
        Ok(Value::Null)
    }
}

async fn start_server() -> TestServer {
    start_server_with(None).await
}

async fn start_server_with(snapshots: Option<Arc<dyn SnapshotSource>>) -> TestServer {
    let db = sled::Config::new().temporary(true).open().unwrap();
    let changelog = Arc::new(ChangeLog::open(&db).unwrap());
    let registry = SchemaRegistry::new()
        .with_collection(ResourceSchema::new("posts").belongs_to("author", "users"))
        .with_collection(ResourceSchema::new("users"))
        .with_global(ResourceSchema::new("settings"));
    let notifier = Arc::new(Notifier::new(
        changelog,
        DependencyResolver::new(Arc::new(registry)),
    ));
    let mut state = AppState::new(notifier.clone(), ServerConfig::default());
    if let Some(source) = snapshots {
        state = state.with_snapshot_source(source);
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_router(state)).await.unwrap();
    });

    TestServer {
        addr,
        notifier,
        _db: db,
    }
}

fn multiplexer(server: &TestServer) -> Multiplexer {
    Multiplexer::from_config(&ClientConfig::new(format!("http://{}", server.addr)))
}

async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_signal_reaches_shared_subscribers() {
    let server = start_server().await;
    let mux = multiplexer(&server);
    let topic = Topic::collection("posts").include("author");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subs: Vec<_> = (0..2)
        .map(|n| {
            let tx = tx.clone();
            mux.subscribe(&topic, SubscribeOptions::new(), move |event| {
                let _ = tx.send((n, event.sequence));
            })
            .unwrap()
        })
        .collect();
    assert_eq!(mux.topic_count(), 1);
    assert_eq!(mux.subscriber_count(), 2);

    eventually(|| server.notifier.listener_count() == 1).await;

    server
        .notifier
        .publish(NewChange::update("users", "u1"))
        .unwrap();

    let mut received = Vec::new();
    for _ in 0..2 {
        let item = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        received.push(item);
    }
    received.sort();
    assert_eq!(received, vec![(0, 1), (1, 1)]);
    assert_eq!(server.notifier.listener_count(), 1);

    drop(subs);
    assert_eq!(mux.topic_count(), 0);
    assert_eq!(mux.subscriber_count(), 0);
}

#[tokio::test]
async fn test_stream_pulls_signals_in_order() {
    let server = start_server().await;
    let mux = multiplexer(&server);
    let topic = Topic::collection("posts");
    let cancel = CancellationToken::new();
    let mut stream = mux.stream(&topic, cancel.clone());

    let pending = tokio::spawn(async move {
        let first = stream.next().await;
        (first, stream)
    });
    eventually(|| server.notifier.listener_count() == 1).await;

    for record_id in ["p1", "p2", "p3"] {
        server
            .notifier
            .publish(NewChange::update("posts", record_id))
            .unwrap();
    }

    let (first, mut stream) = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    let mut sequences = vec![first.unwrap().unwrap().sequence];
    while sequences.len() < 3 {
        let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        sequences.push(event.sequence);
    }
    assert_eq!(sequences, vec![1, 2, 3]);

    cancel.cancel();
    assert!(stream.next().await.is_none());
    assert_eq!(mux.topic_count(), 0);
}

#[tokio::test]
async fn test_rejected_topic_surfaces_rejection() {
    let server = start_server().await;
    let mux = multiplexer(&server);
    let topic = Topic::collection("posts").include("likes");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let options = SubscribeOptions::new().on_error(move |e| {
        let _ = tx.send(e.clone());
    });
    let subscription = mux.subscribe(&topic, options, |_| {}).unwrap();

    let error = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    match &error {
        Error::Rejected { status, message } => {
            assert_eq!(*status, 400);
            assert!(message.contains("likes"), "{message}");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert!(error.is_rejection());
    assert!(!subscription.is_active());
    assert_eq!(mux.topic_count(), 0);
    assert_eq!(server.notifier.topic_count(), 0);
}

#[tokio::test]
async fn test_null_snapshots_are_delivered() {
    let server = start_server_with(Some(Arc::new(NullSource))).await;
    let mux = multiplexer(&server);
    let topic = Topic::global("settings").with_mode(DeliveryMode::Snapshot);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let errors = tx.clone();
    let options = SubscribeOptions::new().on_error(move |e| {
        let _ = errors.send(Err(e.clone()));
    });
    let subscription = mux
        .subscribe(&topic, options, move |event| {
            let _ = tx.send(Ok(event.clone()));
        })
        .unwrap();

    let initial = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(initial.sequence, 0);
    assert_eq!(initial.data, Some(Value::Null));

    server
        .notifier
        .publish(NewChange::global_update("settings"))
        .unwrap();
    let refreshed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.sequence, 1);
    assert_eq!(refreshed.data, Some(Value::Null));

    assert!(subscription.is_active());
    assert_eq!(mux.topic_count(), 1);
}
