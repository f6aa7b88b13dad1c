//! Protocol error types.

use thiserror::Error;

/// Protocol errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A topic query string could not be parsed back into a topic.
    #[error("malformed topic: {0}")]
    MalformedTopic(String),

    /// Unknown resource type in a path or record.
    #[error("invalid resource type: {0}")]
    InvalidResourceType(String),

    /// Unknown event name on a stream.
    #[error("unknown event kind: {0}")]
    UnknownEvent(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
