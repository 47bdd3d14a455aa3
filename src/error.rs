//! Error types for chat sessions, storage and configuration.

use thiserror::Error;

/// Failure of a single request/response cycle with the webhook.
///
/// Every variant surfaces to the user as the same apology message; the
/// distinction is kept for logs and observers only.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Transport failure (connection refused, timeout, TLS, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The webhook answered with a non-success status.
    #[error("webhook error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, if it could be read.
        body: String,
    },

    /// The response body was not valid JSON.
    #[error("malformed webhook response: {0}")]
    MalformedResponse(String),

    /// The response body parsed but carried no `response` string.
    #[error("webhook response has no reply field")]
    MissingReply,

    /// The session was closed while the request was in flight.
    #[error("chat session closed")]
    Cancelled,
}

/// Failure reading or writing session storage.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("invalid URL for {field}: {source}")]
    Url {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
