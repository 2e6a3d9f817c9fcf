//! Supervision of cyme branch processes.
//!
//! A branch is a long-running server process that exposes an HTTP service.
//! [`Branch`] starts it, waits until it is alive, stops it with signal
//! escalation and restarts it, on top of any [`cyme_runtime::Backend`].
//!
//! # Example
//!
//! ```no_run
//! use cyme_branch::{Branch, BranchConfig, LifecycleOptions};
//! use cyme_runtime::EagerBackend;
//!
//! let branch = Branch::new(BranchConfig::new("~/.cyme"), EagerBackend::new());
//! let outcome = branch.start(&LifecycleOptions::default());
//! println!("{:?}", outcome.result());
//! ```

pub mod branch;
pub mod config;
pub mod error;
pub mod host;
pub mod reader;
pub mod status;

pub use branch::{Branch, STOP_RETRIES};
pub use config::{BranchConfig, LifecycleOptions, LogLevel};
pub use error::{BranchError, Result};
pub use host::{Host, Signal, SignalError, Spawned, SystemHost};
pub use reader::AsyncReader;
pub use status::{Outcome, Output, Status};
