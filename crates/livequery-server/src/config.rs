//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use livequery_core::DEFAULT_MAX_DEPTH;

/// Default HTTP listen address.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8090";

/// Default snapshot upstream timeout in milliseconds.
pub const DEFAULT_SNAPSHOT_TIMEOUT_MS: u64 = 10_000;

/// Default interval between stream keep-alive comments in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 15;

/// livequery server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP address to listen on.
    pub listen_addr: String,

    /// Path to the change log storage directory.
    pub data_path: PathBuf,

    /// JSON schema file describing collections, globals and their relations.
    pub schema_path: Option<PathBuf>,

    /// Base URL of the CRUD engine's read endpoint. Snapshot mode is
    /// unavailable without it.
    pub snapshot_upstream: Option<String>,

    /// Timeout for one snapshot fetch.
    pub snapshot_timeout: Duration,

    /// Maximum nesting depth of a topic's `with` tree.
    pub max_depth: usize,

    /// Interval between keep-alive comments on idle streams.
    pub keep_alive: Duration,
}

impl ServerConfig {
    /// Create a configuration storing the change log under `data_path`.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDRESS.to_string(),
            data_path: data_path.into(),
            schema_path: None,
            snapshot_upstream: None,
            snapshot_timeout: Duration::from_millis(DEFAULT_SNAPSHOT_TIMEOUT_MS),
            max_depth: DEFAULT_MAX_DEPTH,
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
        }
    }

    pub fn with_listen_addr(mut self, address: impl Into<String>) -> Self {
        self.listen_addr = address.into();
        self
    }

    pub fn with_schema_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.schema_path = Some(path.into());
        self
    }

    /// Enable snapshot mode against a CRUD read endpoint.
    pub fn with_snapshot_upstream(mut self, url: impl Into<String>) -> Self {
        self.snapshot_upstream = Some(url.into());
        self
    }

    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Check if snapshot mode can be served.
    pub fn has_snapshots(&self) -> bool {
        self.snapshot_upstream.is_some()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("./data")
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "livequery-server")]
#[command(version, about = "livequery change notification server", long_about = None)]
pub struct Args {
    /// HTTP address to listen on.
    #[arg(short, long, default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen: String,

    /// Path to the change log storage directory.
    #[arg(short, long, default_value = "./data")]
    pub data_path: PathBuf,

    /// JSON schema file with collections, globals and relations.
    #[arg(short, long)]
    pub schema: Option<PathBuf>,

    /// Base URL of the CRUD read endpoint used for snapshot mode.
    #[arg(long)]
    pub snapshot_upstream: Option<String>,

    /// Snapshot fetch timeout in milliseconds.
    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_TIMEOUT_MS)]
    pub snapshot_timeout_ms: u64,

    /// Maximum nesting depth of a topic's relation tree.
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    pub max_depth: usize,

    /// Keep-alive interval for idle streams in seconds.
    #[arg(long, default_value_t = DEFAULT_KEEP_ALIVE_SECS)]
    pub keep_alive_secs: u64,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            listen_addr: self.listen,
            data_path: self.data_path,
            schema_path: self.schema,
            snapshot_upstream: self.snapshot_upstream,
            snapshot_timeout: Duration::from_millis(self.snapshot_timeout_ms),
            max_depth: self.max_depth.max(1),
            keep_alive: Duration::from_secs(self.keep_alive_secs.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDRESS);
        assert_eq!(config.data_path, PathBuf::from("./data"));
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert!(config.schema_path.is_none());
        assert!(!config.has_snapshots());
    }

    #[test]
    fn test_config_builder() {
        let config = ServerConfig::new("/var/lib/livequery")
            .with_listen_addr("127.0.0.1:9999")
            .with_schema_path("/etc/livequery/schema.json")
            .with_snapshot_upstream("http://cms.local/api")
            .with_snapshot_timeout(Duration::from_secs(2))
            .with_max_depth(0)
            .with_keep_alive(Duration::from_secs(5));

        assert_eq!(config.listen_addr, "127.0.0.1:9999");
        assert_eq!(config.schema_path, Some(PathBuf::from("/etc/livequery/schema.json")));
        assert!(config.has_snapshots());
        assert_eq!(config.snapshot_timeout, Duration::from_secs(2));
        assert_eq!(config.max_depth, 1);
        assert_eq!(config.keep_alive, Duration::from_secs(5));
    }

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from([
            "livequery-server",
            "--listen",
            "127.0.0.1:7000",
            "--schema",
            "schema.json",
            "--snapshot-upstream",
            "http://localhost:3000/api",
            "--snapshot-timeout-ms",
            "250",
            "--max-depth",
            "4",
        ]);
        let config = args.into_config();

        assert_eq!(config.listen_addr, "127.0.0.1:7000");
        assert_eq!(config.schema_path, Some(PathBuf::from("schema.json")));
        assert_eq!(config.snapshot_upstream.as_deref(), Some("http://localhost:3000/api"));
        assert_eq!(config.snapshot_timeout, Duration::from_millis(250));
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.keep_alive, Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS));
    }
}
