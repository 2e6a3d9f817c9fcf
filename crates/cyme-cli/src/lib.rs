//! Cyme command-line interface.
//!
//! Parses arguments into a [`cyme_branch::BranchConfig`] and drives branch
//! lifecycle and service queries on the selected backend.

pub mod cli;
pub mod commands;
pub mod error;

pub use error::{CliError, Result};
