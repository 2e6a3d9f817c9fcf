//! Error types for client construction.

use thiserror::Error;

/// Errors raised while building a [`Client`](crate::Client).
#[derive(Debug, Error)]
pub enum ApiError {
    /// The base URL could not be parsed.
    #[error("invalid base url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The base URL uses a scheme the branch service does not speak.
    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),
}

/// Result type for client construction.
pub type Result<T> = std::result::Result<T, ApiError>;
