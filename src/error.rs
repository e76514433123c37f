use std::io;
use thiserror::Error;

/// Fatal errors raised while bringing up or tearing down the runtime.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Setup(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Errors a request handler may surface to the dispatch boundary.
///
/// The dispatch boundary is the only place these are translated into HTTP
/// responses; inside a handler they propagate with `?`.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Input rejected by handler-level checks beyond the registered rules.
    #[error("{0}")]
    Validation(String),
    /// Malformed JSON encountered while reading the request payload.
    #[error("invalid JSON in request: {0}")]
    JsonParse(#[from] serde_json::Error),
    /// A response payload that could not be serialized.
    #[error("failed to build JSON response: {0}")]
    JsonOutput(String),
    /// Database collaborator failure.
    #[error("database error: {0}")]
    Sql(String),
    /// Outbound REST collaborator failure.
    #[error("upstream error: {0}")]
    Upstream(String),
    /// Anything else; rendered as a generic 500.
    #[error("{0}")]
    Other(String),
}

pub type HandlerResult = Result<(), HandlerError>;
