//! Server error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Change log, catalog or resolver error.
    #[error(transparent)]
    Core(#[from] livequery_core::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] livequery_proto::Error),

    /// Recomputing a snapshot failed.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::Core(livequery_core::Error::Storage(err))
    }
}

/// HTTP-facing error.
#[derive(Debug)]
pub enum AppError {
    /// Internal server error.
    Internal(String),
    /// The request or topic is malformed.
    BadRequest(String),
}

/// Error response body.
#[derive(Serialize)]
pub struct ErrorResponse {
    /// Error flag.
    pub error: bool,
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
        };

        let body = ErrorResponse {
            error: true,
            code: code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match &err {
            Error::Core(core) if core.is_setup_error() => AppError::BadRequest(err.to_string()),
            Error::Protocol(_) => AppError::BadRequest(err.to_string()),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<livequery_core::Error> for AppError {
    fn from(err: livequery_core::Error) -> Self {
        Error::Core(err).into()
    }
}

impl From<livequery_proto::Error> for AppError {
    fn from(err: livequery_proto::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
