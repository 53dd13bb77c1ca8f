//! Error types for hubble.

use thiserror::Error;

/// Result type alias using hubble's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for hubble operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entry not found by internal id
    #[error("Entry not found: {0}")]
    EntryNotFound(i32),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A plugin returned an error or could not be loaded
    #[error("Plugin {plugin_id} failed: {message}")]
    Plugin { plugin_id: String, message: String },

    /// A plugin invocation ran past its deadline
    #[error("Plugin {0} exceeded its execution deadline")]
    PluginTimeout(String),

    /// The component was shut down while the operation was in flight
    #[error("{0} is closed")]
    Closed(String),

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// A job variant the queue does not know how to dispatch
    #[error("Unsupported job type: {0}")]
    UnsupportedJobType(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Key-value store failure
    #[error("KV error: {0}")]
    Kv(String),

    /// Key absent from the key-value store
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Rate limit lookup or bookkeeping failed
    #[error("Rate limit error: {0}")]
    RateLimit(String),

    /// Rotation requested for a scope that has no rotator
    #[error("Unknown scope: {0}")]
    UnknownScope(String),

    /// Encryption or decryption failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a plugin failure.
    pub fn plugin(plugin_id: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Plugin {
            plugin_id: plugin_id.into(),
            message: message.into(),
        }
    }

    /// Whether the failure is transient and worth another attempt.
    ///
    /// Database, network and embedding failures are retried by the job queue;
    /// missing records, bad input and programming errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(e) => !matches!(e, sqlx::Error::RowNotFound),
            Error::Embedding(_)
            | Error::Request(_)
            | Error::Kv(_)
            | Error::PluginTimeout(_)
            | Error::Closed(_)
            | Error::Io(_) => true,
            Error::NotFound(_)
            | Error::EntryNotFound(_)
            | Error::Plugin { .. }
            | Error::Job(_)
            | Error::UnsupportedJobType(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::InvalidInput(_)
            | Error::KeyNotFound(_)
            | Error::RateLimit(_)
            | Error::UnknownScope(_)
            | Error::Crypto(_)
            | Error::Internal(_) => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
