//! Server error types.

use http::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the request dispatch pipeline.
///
/// Each variant maps to an HTTP status via [`ServerError::status_code`];
/// the dispatcher turns unhandled errors into plain-text responses.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("app not found: {0}")]
    AppNotFound(String),

    #[error("entrypoint not found")]
    EntrypointNotFound,

    #[error("session not found")]
    SessionNotFound,

    #[error("evaluator invocation failed")]
    Evaluator {
        /// Combined stdout/stderr of the child, returned as the error body
        output: Vec<u8>,
    },

    #[error("evaluator executable not found: {0}")]
    EvaluatorMissing(String),

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("failed to decode evaluator response: {0}")]
    ResponseDecode(#[source] serde_json::Error),

    #[error("invalid response status: {0}")]
    InvalidStatus(u16),

    #[error("failed to parse env file {path}: {reason}")]
    EnvParse { path: PathBuf, reason: String },

    #[error("serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] http::Error),
}

impl ServerError {
    /// The HTTP status this error maps to at the dispatch boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AppNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
