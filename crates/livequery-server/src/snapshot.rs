//! Snapshot recomputation for snapshot-mode topics.
//!
//! The server does not execute queries itself. A [`SnapshotSource`] re-runs
//! the topic's query through the CRUD engine's read path, using the
//! credentials of the stream connection so access control matches a manual
//! refetch.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use livequery_proto::{DeliveryMode, Topic};
use serde_json::Value;

use crate::error::Error;

/// Credentials forwarded from a stream connection to the read path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub authorization: Option<String>,
    pub cookie: Option<String>,
}

impl Credentials {
    /// Pick forwardable credentials out of request headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        Self {
            authorization: get(header::AUTHORIZATION),
            cookie: get(header::COOKIE),
        }
    }
}

/// Recomputes the current result of a topic's query.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, topic: &Topic, credentials: &Credentials) -> Result<Value, Error>;
}

/// Snapshot source backed by the CRUD engine's HTTP read endpoint.
///
/// Requests `{base_url}/{resource_type}/{resource}?{query}` where `query` is
/// the topic's canonical query without the delivery mode.
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("snapshot client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Read endpoint URL for a topic.
    pub fn url_for(&self, topic: &Topic) -> String {
        let query = topic
            .clone()
            .with_mode(DeliveryMode::Signal)
            .query_string();
        let resource = urlencoding::encode(&topic.resource);
        if query.is_empty() {
            format!("{}/{}/{}", self.base_url, topic.resource_type, resource)
        } else {
            format!("{}/{}/{}?{}", self.base_url, topic.resource_type, resource, query)
        }
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, topic: &Topic, credentials: &Credentials) -> Result<Value, Error> {
        let url = self.url_for(topic);
        let mut request = self.client.get(&url);
        if let Some(authorization) = &credentials.authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }
        if let Some(cookie) = &credentials.cookie {
            request = request.header(header::COOKIE, cookie);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Snapshot(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Snapshot(format!(
                "GET {url}: status {}: {message}",
                status.as_u16()
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Snapshot(format!("GET {url}: invalid body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_credentials_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("sid=1"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));

        let credentials = Credentials::from_headers(&headers);
        assert_eq!(credentials.authorization.as_deref(), Some("Bearer abc"));
        assert_eq!(credentials.cookie.as_deref(), Some("sid=1"));

        assert_eq!(Credentials::from_headers(&HeaderMap::new()), Credentials::default());
    }

    #[test]
    fn test_url_drops_mode() {
        let source = HttpSnapshotSource::new("http://cms.local/api/", Duration::from_secs(1)).unwrap();

        let topic = Topic::collection("posts")
            .include("author")
            .with_limit(5)
            .with_mode(DeliveryMode::Snapshot);
        assert_eq!(
            source.url_for(&topic),
            "http://cms.local/api/collection/posts?limit=5&with[author]=true"
        );

        let global = Topic::global("settings").with_mode(DeliveryMode::Snapshot);
        assert_eq!(source.url_for(&global), "http://cms.local/api/global/settings");
    }
}
