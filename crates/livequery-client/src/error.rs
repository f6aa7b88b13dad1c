//! Client error types.

use thiserror::Error;

/// Client errors.
///
/// Errors are `Clone` so one transport failure can be handed to every
/// subscriber of the affected topic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The push connection failed or closed unexpectedly.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server refused the topic, e.g. an unknown relation or a
    /// malformed query. Resubscribing with the same topic fails again.
    #[error("topic rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The server sent an event that could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The stream URL could not be built.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The multiplexer was shut down.
    #[error("multiplexer closed")]
    Closed,
}

impl From<livequery_proto::Error> for Error {
    fn from(err: livequery_proto::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

impl Error {
    /// True for errors caused by the topic itself rather than the connection.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Rejected { .. })
    }
}
