//! Scripted backend for unit tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use cyme_runtime::{
    poll_attempts, Backend, BackendKind, ClientError, Promise, Request, RuntimeError,
};
use serde_json::Value;

#[derive(Default)]
struct StubState {
    responses: HashMap<String, Result<Value, RuntimeError>>,
    requests: Vec<Request>,
}

/// Backend answering from a URL → response table. Unknown URLs get a 404.
#[derive(Clone, Default)]
pub struct StubBackend {
    state: Rc<RefCell<StubState>>,
}

impl std::fmt::Debug for StubBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubBackend").finish()
    }
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: Result<Value, RuntimeError>) {
        self.state
            .borrow_mut()
            .responses
            .insert(url.to_string(), response);
    }

    pub fn last_request(&self) -> Option<Request> {
        self.state.borrow().requests.last().cloned()
    }
}

impl Backend for StubBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Eager
    }

    fn perform(&self, request: Request) -> Promise<Value> {
        let response = self
            .state
            .borrow()
            .responses
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| Err(RuntimeError::Client(ClientError::from_response(404, ""))));
        self.state.borrow_mut().requests.push(request);
        match response {
            Ok(value) => Promise::succeeded(value),
            Err(err) => Promise::failed(err),
        }
    }

    fn poll_until<P>(&self, timeout: Duration, interval: Duration, mut predicate: P) -> Promise<()>
    where
        P: FnMut(&Promise<()>) -> bool + 'static,
    {
        let promise = Promise::new();
        for _ in 0..poll_attempts(timeout, interval) {
            if predicate(&promise) {
                promise.succeed(());
            }
            if !promise.is_pending() {
                return promise;
            }
        }
        promise.fail(RuntimeError::Timeout { timeout });
        promise
    }
}
