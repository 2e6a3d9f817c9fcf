//! Synchronous backend.
//!
//! Every call blocks the calling thread until its promise has settled, so
//! promises returned from here are never pending. Polling sleeps between
//! attempts, which makes this backend unsuitable for supervising several
//! targets concurrently; use one [`AsyncBackend`](super::AsyncBackend) task
//! per target for that.

use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, trace};

use crate::backend::{poll_attempts, response_outcome, Backend, BackendKind, Method, Request};
use crate::error::{Result, RuntimeError};
use crate::promise::Promise;

/// Blocking backend built on `reqwest::blocking`.
#[derive(Debug, Clone)]
pub struct EagerBackend {
    http: Client,
}

impl EagerBackend {
    /// Creates a backend with a default HTTP client.
    ///
    /// Must not be called from inside an async runtime.
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Creates a backend around an existing HTTP client.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    fn send(&self, request: &Request) -> Result<Value> {
        let mut builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
            Method::Put => self.http.put(&request.url),
            Method::Delete => self.http.delete(&request.url),
        };
        if let Some(params) = request.params() {
            builder = match request.method {
                Method::Get => builder.query(params),
                _ => builder.form(params),
            };
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        trace!(status, len = body.len(), "response received");
        response_outcome(status, &body)
    }
}

impl Default for EagerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for EagerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Eager
    }

    fn perform(&self, request: Request) -> Promise<Value> {
        debug!(method = %request.method, url = %request.url, "performing request");
        match self.send(&request) {
            Ok(value) => Promise::succeeded(value),
            Err(err) => Promise::failed(err),
        }
    }

    fn poll_until<P>(&self, timeout: Duration, interval: Duration, mut predicate: P) -> Promise<()>
    where
        P: FnMut(&Promise<()>) -> bool + 'static,
    {
        let promise = Promise::new();
        let attempts = poll_attempts(timeout, interval);

        for attempt in 1..=attempts {
            trace!(attempt, attempts, "evaluating poll predicate");
            if predicate(&promise) {
                promise.succeed(());
            }
            if !promise.is_pending() || attempt == attempts {
                break;
            }
            std::thread::sleep(interval);
        }

        if promise.is_pending() {
            debug!(timeout_ms = timeout.as_millis(), "poll exhausted");
            promise.fail(RuntimeError::Timeout { timeout });
        }
        promise
    }
}
