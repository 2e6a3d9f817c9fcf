//! HTTP client for the Cyme branch service.
//!
//! The client is generic over a [`cyme_runtime::Backend`], so the same calls
//! work synchronously or on an event loop:
//!
//! ```no_run
//! use cyme_client::Client;
//! use cyme_runtime::EagerBackend;
//!
//! let client = Client::new("http://localhost:1968", EagerBackend::new()).unwrap();
//! let alive = client.ping();
//! println!("alive: {:?}", alive.result());
//!
//! let app = client.apps().add("foo", None);
//! let instance = client.instances("foo").add();
//! client.consumers("foo", "38bbc04e").add("myqueue");
//! # let _ = (app, instance);
//! ```

pub mod api;
pub mod client;
pub mod error;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{App, Consumers, Instance, Queue, QueueOptions, Section, DEFAULT_BROKER};
pub use client::Client;
pub use error::{ApiError, Result};
