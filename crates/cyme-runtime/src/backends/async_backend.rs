//! Cooperative backend on a single-threaded tokio `LocalSet`.
//!
//! Work is spawned with `tokio::task::spawn_local`: no thread is created,
//! and control returns to the event loop between poll ticks and while
//! requests are in flight. Ordering between concurrently pending promises is
//! whatever order the loop delivers their completions in.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, trace};

use crate::backend::{response_outcome, Backend, BackendKind, Method, Request};
use crate::error::{Result, RuntimeError};
use crate::promise::Promise;

/// Non-blocking backend built on async `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct AsyncBackend {
    http: Client,
}

impl AsyncBackend {
    /// Creates a backend with a default HTTP client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend around an existing HTTP client.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

async fn send(http: Client, request: Request) -> Result<(u16, String)> {
    let mut builder = match request.method {
        Method::Get => http.get(&request.url),
        Method::Post => http.post(&request.url),
        Method::Put => http.put(&request.url),
        Method::Delete => http.delete(&request.url),
    };
    if let Some(params) = request.params() {
        builder = match request.method {
            Method::Get => builder.query(params),
            _ => builder.form(params),
        };
    }

    let response = builder.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    Ok((status, body))
}

impl Backend for AsyncBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Async
    }

    fn perform(&self, request: Request) -> Promise<Value> {
        debug!(method = %request.method, url = %request.url, "issuing request");

        // Transport failures reach the caller through the failure link.
        let transport: Promise<(u16, String)> = Promise::new();
        let promise: Promise<Value> = Promise::linked(&transport);

        let target = promise.clone();
        transport.on_success(move |(status, body)| {
            trace!(status = *status, len = body.len(), "response received");
            match response_outcome(*status, body) {
                Ok(value) => {
                    target.succeed(value);
                }
                Err(err) => {
                    target.fail(err);
                }
            }
        });

        let http = self.http.clone();
        let inflight = transport.clone();
        tokio::task::spawn_local(async move {
            match send(http, request).await {
                Ok(response) => inflight.succeed(response),
                Err(err) => inflight.fail(err),
            };
        });

        promise
    }

    fn poll_until<P>(&self, timeout: Duration, interval: Duration, mut predicate: P) -> Promise<()>
    where
        P: FnMut(&Promise<()>) -> bool + 'static,
    {
        let promise = Promise::new();
        promise.with_deadline(timeout, RuntimeError::Timeout { timeout });

        let ticking = promise.clone();
        tokio::task::spawn_local(async move {
            let mut tick = 0u64;
            loop {
                tokio::time::sleep(interval).await;
                if !ticking.is_pending() {
                    break;
                }
                tick += 1;
                trace!(tick, "evaluating poll predicate");
                if predicate(&ticking) {
                    ticking.succeed(());
                }
                // A zero interval allows one attempt; the deadline settles the rest.
                if interval.is_zero() {
                    break;
                }
            }
            trace!(ticks = tick, state = ?ticking.state(), "poll finished");
        });

        promise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::PromiseState;
    use std::cell::Cell;
    use std::rc::Rc;
    use tokio::task::LocalSet;

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_pending_and_succeeds_later() {
        LocalSet::new()
            .run_until(async {
                let backend = AsyncBackend::new();
                let calls = Rc::new(Cell::new(0u32));
                let counter = Rc::clone(&calls);

                let promise = backend.poll_until(
                    Duration::from_secs(5),
                    Duration::from_secs(1),
                    move |_| {
                        counter.set(counter.get() + 1);
                        counter.get() >= 3
                    },
                );
                assert!(promise.is_pending());

                assert_eq!(promise.wait().await, PromiseState::Success);
                assert_eq!(calls.get(), 3);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_deadline_forces_failure() {
        LocalSet::new()
            .run_until(async {
                let backend = AsyncBackend::new();
                let promise = backend.poll_until(
                    Duration::from_secs(1),
                    Duration::from_millis(300),
                    |_| false,
                );

                assert_eq!(promise.wait().await, PromiseState::Failure);
                assert!(matches!(
                    promise.result(),
                    Some(Err(RuntimeError::Timeout { timeout })) if timeout == Duration::from_secs(1)
                ));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_a_single_attempt() {
        LocalSet::new()
            .run_until(async {
                let backend = AsyncBackend::new();
                let calls = Rc::new(Cell::new(0u32));
                let counter = Rc::clone(&calls);

                let promise = backend.poll_until(Duration::from_secs(1), Duration::ZERO, move |_| {
                    counter.set(counter.get() + 1);
                    false
                });

                assert_eq!(promise.wait().await, PromiseState::Failure);
                assert_eq!(calls.get(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_settlement() {
        LocalSet::new()
            .run_until(async {
                let backend = AsyncBackend::new();
                let calls = Rc::new(Cell::new(0u32));
                let counter = Rc::clone(&calls);

                let promise = backend.poll_until(
                    Duration::from_secs(10),
                    Duration::from_secs(1),
                    move |p| {
                        counter.set(counter.get() + 1);
                        p.succeed(());
                        false
                    },
                );
                promise.wait().await;
                tokio::time::sleep(Duration::from_secs(5)).await;

                assert_eq!(calls.get(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_transport_failure_propagates_through_link() {
        LocalSet::new()
            .run_until(async {
                let backend = AsyncBackend::new();
                let promise = backend.perform(Request::get("http://127.0.0.1:9/ping/"));
                assert!(promise.has_upstream());

                assert_eq!(promise.wait().await, PromiseState::Failure);
                assert!(matches!(
                    promise.result(),
                    Some(Err(RuntimeError::Transport(_)))
                ));
            })
            .await;
    }
}
