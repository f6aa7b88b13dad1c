//! Push transports carrying topic events from the server.

use std::time::Duration;

use async_stream::stream;
use eventsource_client::{self as es, Client as _};
use futures::stream::{BoxStream, StreamExt};
use livequery_proto::{EventKind, StreamEvent, LIVE_PATH};

use crate::config::ClientConfig;
use crate::error::Error;

/// Events of one topic connection. The stream yields an error and ends when
/// the connection is lost or the server rejects the topic. Events that cannot
/// be decoded are skipped.
pub type EventStream = BoxStream<'static, Result<StreamEvent, Error>>;

/// Opens one push connection per topic key.
///
/// Opening must not block: implementations connect lazily when the returned
/// stream is first polled. Dropping the stream closes the connection.
pub trait Transport: Send + Sync {
    fn open(&self, topic_key: &str) -> Result<EventStream, Error>;
}

/// Server-sent events transport against a livequery server.
pub struct SseTransport {
    base_url: String,
    connect_timeout: Duration,
    client_id: String,
}

impl SseTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            connect_timeout: config.connect_timeout,
            client_id: config.client_id.clone(),
        }
    }

    /// Stream URL of a topic key.
    pub fn url_for(&self, topic_key: &str) -> String {
        format!("{}{}/{}", self.base_url, LIVE_PATH, topic_key)
    }
}

impl Transport for SseTransport {
    fn open(&self, topic_key: &str) -> Result<EventStream, Error> {
        let url = self.url_for(topic_key);
        let invalid = |e: es::Error| Error::InvalidUrl(format!("{url}: {e:?}"));

        // Reconnecting would hide failures from subscribers
        let client = es::ClientBuilder::for_url(&url)
            .map_err(invalid)?
            .header("X-Client-Id", &self.client_id)
            .map_err(invalid)?
            .connect_timeout(self.connect_timeout)
            .reconnect(es::ReconnectOptions::reconnect(false).build())
            .build();

        let key = topic_key.to_string();
        let events = stream! {
            let mut sse = client.stream();
            while let Some(item) = sse.next().await {
                match item {
                    Ok(es::SSE::Event(event)) => {
                        if let Some(event) = decode(&key, &event.event_type, &event.data) {
                            yield Ok(event);
                        }
                    }
                    Ok(_) => {}
                    Err(es::Error::UnexpectedResponse(response, body)) => {
                        let body = body.body_bytes().await.unwrap_or_default();
                        yield Err(rejection(u16::from(response.status()), &body));
                        break;
                    }
                    Err(e) => {
                        yield Err(Error::Transport(format!("{e:?}")));
                        break;
                    }
                }
            }
        };

        Ok(events.boxed())
    }
}

/// Decode one named event. Unknown names and undecodable payloads are skipped.
fn decode(topic_key: &str, name: &str, data: &str) -> Option<StreamEvent> {
    if EventKind::from_name(name).is_err() {
        tracing::trace!(topic = %topic_key, event = %name, "ignoring event");
        return None;
    }
    match StreamEvent::from_wire(name, data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(topic = %topic_key, event = %name, error = %e, "undecodable event skipped");
            None
        }
    }
}

/// Error for a non-success response, carrying the server's message.
fn rejection(status: u16, body: &[u8]) -> Error {
    let message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    Error::Rejected { status, message }
}
