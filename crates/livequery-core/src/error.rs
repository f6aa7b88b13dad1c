//! Core error types.

use livequery_proto::ResourceType;
use thiserror::Error;

/// Core errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] livequery_proto::Error),

    /// Persisting a change record failed. The mutation caller must see this.
    #[error("failed to append change: {0}")]
    Append(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A `with` tree named a relation the resource does not define.
    #[error("unknown relation `{relation}` on resource `{resource}`")]
    UnknownRelation { resource: String, relation: String },

    /// A resource is not present in the schema registry.
    #[error("unknown {kind} `{resource}`")]
    UnknownResource {
        kind: ResourceType,
        resource: String,
    },

    /// A `with` tree nested deeper than the resolver allows.
    #[error("relation inclusion deeper than {max_depth} levels")]
    DepthExceeded { max_depth: usize },

    /// Schema definition is inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// IO error while loading configuration files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error comes from the caller's topic rather than the server.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownRelation { .. }
                | Error::UnknownResource { .. }
                | Error::DepthExceeded { .. }
                | Error::Protocol(_)
        )
    }
}
