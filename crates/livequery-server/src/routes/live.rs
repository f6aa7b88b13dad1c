//! Live topic streams over server-sent events.
//!
//! `GET /live/{resource_type}/{resource}?{canonical query}` registers a
//! listener for the topic and streams `signal` or `snapshot` events until the
//! client disconnects. Each event id is the change-log sequence it was
//! produced for.

use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::{
    extract::{Path, RawQuery, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::Stream;
use livequery_proto::{DeliveryMode, ResourceType, StreamEvent, Topic};

use crate::error::AppError;
use crate::notifier::Listener;
use crate::snapshot::{Credentials, SnapshotSource};
use crate::AppState;

/// Live stream routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/live/:resource_type/:resource", get(handle_live))
}

/// Open a live stream for a topic.
///
/// Malformed topics, unknown relations and snapshot mode without an upstream
/// are rejected before the stream starts.
async fn handle_live(
    State(state): State<AppState>,
    Path((resource_type, resource)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let resource_type: ResourceType = resource_type.parse()?;
    let topic = Topic::from_query(resource_type, resource, query.as_deref().unwrap_or(""))?;

    let snapshots = match topic.mode() {
        DeliveryMode::Signal => None,
        DeliveryMode::Snapshot => Some(state.snapshots.clone().ok_or_else(|| {
            AppError::BadRequest("snapshot mode requires a snapshot upstream".to_string())
        })?),
    };

    let listener = state.notifier.register(topic)?;
    tracing::debug!(
        topic = %listener.key(),
        listener_id = listener.id(),
        mode = ?listener.topic().mode(),
        "live stream opened"
    );

    let initial_sequence = state.notifier.current_sequence();
    let credentials = Credentials::from_headers(&headers);
    let keep_alive = KeepAlive::new().interval(state.config.keep_alive);

    let shutdown = state.shutdown.clone();

    let events = stream! {
        let mut listener = listener;
        match snapshots {
            None => loop {
                let signal = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    signal = listener.recv() => signal,
                };
                let Some(signal) = signal else { break };
                if let Some(event) = encode(&listener, StreamEvent::signal(signal.sequence)) {
                    yield Ok::<_, Infallible>(event);
                }
            },
            Some(source) => {
                if let Some(event) = snapshot(&listener, &source, &credentials, initial_sequence).await {
                    yield Ok(event);
                }
                loop {
                    let signal = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        signal = listener.recv_latest() => signal,
                    };
                    let Some(signal) = signal else { break };
                    if let Some(event) = snapshot(&listener, &source, &credentials, signal.sequence).await {
                        yield Ok(event);
                    }
                }
            }
        }
        tracing::debug!(topic = %listener.key(), listener_id = listener.id(), "live stream closed");
    };

    Ok(Sse::new(events).keep_alive(keep_alive))
}

/// Recompute the topic's result and wrap it as a snapshot event.
///
/// A failed fetch is logged and skipped; the stream stays open.
async fn snapshot(
    listener: &Listener,
    source: &Arc<dyn SnapshotSource>,
    credentials: &Credentials,
    sequence: u64,
) -> Option<Event> {
    match source.fetch(listener.topic(), credentials).await {
        Ok(data) => encode(listener, StreamEvent::snapshot(sequence, data)),
        Err(e) => {
            tracing::warn!(
                topic = %listener.key(),
                sequence,
                error = %e,
                "snapshot fetch failed, event skipped"
            );
            None
        }
    }
}

fn encode(listener: &Listener, payload: StreamEvent) -> Option<Event> {
    match payload.to_json() {
        Ok(data) => Some(
            Event::default()
                .event(payload.kind().as_str())
                .id(payload.sequence.to_string())
                .data(data),
        ),
        Err(e) => {
            tracing::warn!(topic = %listener.key(), error = %e, "failed to encode stream event");
            None
        }
    }
}
