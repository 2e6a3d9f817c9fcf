//! Error types for the runtime crate.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors a backend promise can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// A poll loop or deadline expired before the promise settled.
    #[error("timeout after {}s", .timeout.as_secs_f64())]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The remote service answered with a non-2xx status.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl RuntimeError {
    /// Returns true if this is a timeout marker.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RuntimeError::Timeout { .. })
    }
}

impl From<reqwest::Error> for RuntimeError {
    fn from(err: reqwest::Error) -> Self {
        RuntimeError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        RuntimeError::Decode(err.to_string())
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

const DEFAULT_CODE: u16 = 500;
const DEFAULT_MESSAGE: &str = "INTERNAL SERVER ERROR";
const NOT_FOUND_MESSAGE: &str = "NOT FOUND";

/// Error returned by the branch service for an erroneous HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    /// HTTP status code.
    pub code: u16,
    /// Short description of the error.
    pub error: String,
    /// Server-side traceback, if any.
    pub traceback: String,
}

#[derive(Deserialize)]
struct NokBody {
    nok: (String, String),
}

impl ClientError {
    /// Creates a new client error.
    pub fn new(code: u16, error: Option<String>, traceback: impl Into<String>) -> Self {
        Self {
            code,
            error: error.unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
            traceback: traceback.into(),
        }
    }

    /// Builds an error from a response status and body.
    ///
    /// A 404 always maps to `NOT FOUND`. Bodies carrying a `nok` pair are
    /// split into message and traceback; anything else is kept verbatim as
    /// the traceback.
    pub fn from_response(code: u16, body: &str) -> Self {
        if code == 404 {
            return Self::new(code, Some(NOT_FOUND_MESSAGE.to_string()), body);
        }
        if body.contains("nok") {
            if let Ok(parsed) = serde_json::from_str::<NokBody>(body) {
                let (error, traceback) = parsed.nok;
                return Self::new(code, Some(error), traceback);
            }
        }
        Self::new(code, None, body)
    }
}

impl Default for ClientError {
    fn default() -> Self {
        Self::new(DEFAULT_CODE, None, "")
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NOK {}: {}\n{}", self.code, self.error, self.traceback)
    }
}

impl std::error::Error for ClientError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_special_cased() {
        let err = ClientError::from_response(404, "<html>missing</html>");
        assert_eq!(err.code, 404);
        assert_eq!(err.error, "NOT FOUND");
        assert_eq!(err.traceback, "<html>missing</html>");
    }

    #[test]
    fn test_nok_body_is_split() {
        let body = r#"{"nok": ["KeyError", "Traceback (most recent call last): ..."]}"#;
        let err = ClientError::from_response(500, body);
        assert_eq!(err.error, "KeyError");
        assert!(err.traceback.starts_with("Traceback"));
    }

    #[test]
    fn test_unparseable_body_kept_as_traceback() {
        let err = ClientError::from_response(502, "bad gateway");
        assert_eq!(err.error, "INTERNAL SERVER ERROR");
        assert_eq!(err.traceback, "bad gateway");
    }

    #[test]
    fn test_display_format() {
        let err = ClientError::new(409, Some("CONFLICT".into()), "tb");
        assert_eq!(err.to_string(), "NOK 409: CONFLICT\ntb");
        assert_eq!(ClientError::default().code, 500);
    }

    #[test]
    fn test_timeout_display() {
        let err = RuntimeError::Timeout {
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "timeout after 1.5s");
        assert!(err.is_timeout());
    }
}
