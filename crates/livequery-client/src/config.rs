//! Client configuration.

use std::time::Duration;

/// Default livequery server URL.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8090";

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL (e.g., "http://127.0.0.1:8090").
    pub base_url: String,

    /// Debounce window used when a subscription does not set one.
    /// Zero dispatches every event immediately.
    pub default_debounce: Duration,

    /// Timeout for establishing a stream connection.
    pub connect_timeout: Duration,

    /// Client identifier sent with every stream connection.
    pub client_id: String,
}

impl ClientConfig {
    /// Create a new client configuration for the given server.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_debounce: Duration::ZERO,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            client_id: generate_client_id(),
        }
    }

    /// Create a configuration for a server on localhost.
    pub fn localhost() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }

    /// Set the default debounce window.
    pub fn with_default_debounce(mut self, window: Duration) -> Self {
        self.default_debounce = window;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the client identifier.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::localhost()
    }
}

/// Generate a unique client identifier.
fn generate_client_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    format!("client-{:x}", timestamp)
}
