//! Error types for branch supervision.

use std::sync::Arc;
use std::time::Duration;

use cyme_runtime::RuntimeError;
use thiserror::Error;

/// Errors that can occur while supervising a branch.
///
/// Cloneable so that it can travel through linked promises.
#[derive(Debug, Clone, Error)]
pub enum BranchError {
    /// The branch did not become alive before the start timeout.
    #[error("timeout after {}s (ppid={pid})", .timeout.as_secs_f64())]
    Timeout {
        /// The start timeout that elapsed.
        timeout: Duration,
        /// Process id of the spawned child.
        pid: i32,
        /// Output the child produced before it was killed.
        output: String,
    },

    /// The branch did not exit before the stop timeout.
    #[error("stop timed out after {}s (pid={pid})", .timeout.as_secs_f64())]
    StopTimeout {
        /// The stop timeout that elapsed.
        timeout: Duration,
        /// Process id read from the pidfile.
        pid: i32,
    },

    /// The branch executable is not on PATH.
    #[error("executable '{0}' not found in PATH")]
    ExecutableNotFound(String),

    /// The child process could not be spawned.
    #[error("failed to spawn branch: {0}")]
    Spawn(String),

    /// The service URL is not usable.
    #[error("invalid service url: {0}")]
    InvalidUrl(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    /// Backend failure.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl From<std::io::Error> for BranchError {
    fn from(err: std::io::Error) -> Self {
        BranchError::Io(Arc::new(err))
    }
}

impl BranchError {
    /// Output captured from the child before a start timeout, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            BranchError::Timeout { output, .. } if !output.is_empty() => Some(output),
            _ => None,
        }
    }
}

/// Result type for branch operations.
pub type Result<T> = std::result::Result<T, BranchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = BranchError::Timeout {
            timeout: Duration::from_secs(1),
            pid: 4242,
            output: String::new(),
        };
        assert_eq!(err.to_string(), "timeout after 1s (ppid=4242)");
        assert!(err.diagnostics().is_none());
    }

    #[test]
    fn test_diagnostics_exposes_output() {
        let err = BranchError::Timeout {
            timeout: Duration::from_millis(500),
            pid: 1,
            output: "ImportError: no module named cyme\n".into(),
        };
        assert_eq!(err.to_string(), "timeout after 0.5s (ppid=1)");
        assert!(err.diagnostics().unwrap().contains("ImportError"));
    }

    #[test]
    fn test_io_error_conversion() {
        let err: BranchError = std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();
        assert!(err.to_string().contains("disk full"));
        let _cloned = err.clone();
    }
}
