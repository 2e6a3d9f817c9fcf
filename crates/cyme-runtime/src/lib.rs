//! Promise and execution backends for Cyme.
//!
//! This crate provides the completion-notification layer the branch
//! supervisor runs on:
//! - [`Promise`] - single-assignment outcome with success/failure reactions
//! - [`Backend`] - the contract for issuing requests and polling predicates
//! - [`EagerBackend`] - synchronous, blocking implementation
//! - [`AsyncBackend`] - cooperative implementation on a tokio `LocalSet`
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use cyme_runtime::{Backend, EagerBackend, PromiseState};
//!
//! let backend = EagerBackend::new();
//! let mut ticks = 0;
//! let promise = backend.poll_until(Duration::from_secs(2), Duration::from_millis(500), move |_| {
//!     ticks += 1;
//!     ticks == 2
//! });
//! assert_eq!(promise.state(), PromiseState::Success);
//! ```
//!
//! # Choosing a backend
//!
//! Both backends honour the same contract. The eager one settles every
//! promise before returning it and blocks between poll attempts. The async
//! one must be driven from inside a `tokio::task::LocalSet` on a
//! current-thread runtime; its promises settle from timer and I/O
//! callbacks.

pub mod backend;
pub mod backends;
pub mod error;
pub mod promise;

pub use backend::{poll_attempts, Backend, BackendKind, Method, Request};
pub use backends::{AsyncBackend, EagerBackend};
pub use error::{ClientError, Result, RuntimeError};
pub use promise::{Promise, PromiseState};
