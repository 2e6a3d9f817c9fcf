//! Error type for the `cyme` binary.

use std::sync::Arc;

use cyme_branch::BranchError;
use cyme_runtime::RuntimeError;
use thiserror::Error;

/// Anything that can make a command fail.
#[derive(Debug, Clone, Error)]
pub enum CliError {
    #[error(transparent)]
    Branch(#[from] BranchError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("{0}")]
    Client(String),

    #[error("branch at {0} is not responding")]
    NotResponding(String),

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("command did not complete")]
    Unsettled,
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(Arc::new(err))
    }
}

impl From<cyme_client::ApiError> for CliError {
    fn from(err: cyme_client::ApiError) -> Self {
        CliError::Client(err.to_string())
    }
}

/// Result type for command operations.
pub type Result<T> = std::result::Result<T, CliError>;
