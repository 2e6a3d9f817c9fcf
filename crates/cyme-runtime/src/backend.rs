//! The contract shared by every execution backend.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;

use crate::error::{ClientError, Result, RuntimeError};
use crate::promise::Promise;

/// HTTP method of a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request against the branch HTTP service.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub url: String,
    /// Query parameters for GET, form fields otherwise.
    pub data: Value,
}

impl Request {
    /// Creates a request with no parameters.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            data: Value::Null,
        }
    }

    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Sets the request parameters.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Parameters to encode, if there are any.
    pub(crate) fn params(&self) -> Option<&serde_json::Map<String, Value>> {
        match &self.data {
            Value::Object(map) if !map.is_empty() => Some(map),
            _ => None,
        }
    }
}

/// Which backend a component should run on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendKind {
    /// Synchronous, blocking backend.
    #[default]
    Eager,
    /// Cooperative backend on a tokio `LocalSet`.
    Async,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" | "eager" => Ok(BackendKind::Eager),
            "async" => Ok(BackendKind::Async),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Eager => f.write_str("eager"),
            BackendKind::Async => f.write_str("async"),
        }
    }
}

/// Execution strategy producing [`Promise`]s.
///
/// The eager backend settles every promise before returning it. The async
/// backend returns pending promises that settle from tasks spawned on the
/// current tokio `LocalSet`; calling it outside one panics.
pub trait Backend: Clone + 'static {
    /// Which strategy this is.
    fn kind(&self) -> BackendKind;

    /// Issues `request`. 2xx responses succeed with the decoded JSON body;
    /// anything else fails with [`RuntimeError::Client`].
    fn perform(&self, request: Request) -> Promise<Value>;

    /// Re-evaluates `predicate` every `interval` until it returns true or
    /// resolves the promise itself. Fails with [`RuntimeError::Timeout`]
    /// once `timeout` is exhausted.
    fn poll_until<P>(&self, timeout: Duration, interval: Duration, predicate: P) -> Promise<()>
    where
        P: FnMut(&Promise<()>) -> bool + 'static;

    /// A promise already resolved to `Success`.
    fn immediate(&self) -> Promise<()> {
        Promise::succeeded(())
    }

    /// Maps the success of `upstream`, propagating its failure.
    fn after<T, U, M>(&self, upstream: &Promise<T>, map: M) -> Promise<U>
    where
        T: 'static,
        U: 'static,
        M: FnOnce(&T) -> U + 'static,
    {
        upstream.then(map)
    }
}

/// Number of predicate evaluations that fit in `timeout`.
///
/// Computed as `ceil(timeout / interval)` on whole nanoseconds. A zero
/// interval allows a single attempt.
pub fn poll_attempts(timeout: Duration, interval: Duration) -> u64 {
    if interval.is_zero() {
        return 1;
    }
    let attempts = timeout.as_nanos().div_ceil(interval.as_nanos());
    u64::try_from(attempts).unwrap_or(u64::MAX).max(1)
}

/// Turns a raw response into the outcome of a request promise.
pub(crate) fn response_outcome(status: u16, body: &str) -> Result<Value> {
    if !(200..300).contains(&status) {
        return Err(RuntimeError::Client(ClientError::from_response(status, body)));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_poll_attempts() {
        assert_eq!(
            poll_attempts(Duration::from_secs(2), Duration::from_millis(500)),
            4
        );
        assert_eq!(
            poll_attempts(Duration::from_secs(1), Duration::from_millis(300)),
            4
        );
        assert_eq!(poll_attempts(Duration::ZERO, Duration::from_secs(1)), 1);
        assert_eq!(poll_attempts(Duration::from_millis(5), Duration::ZERO), 1);
        assert_eq!(poll_attempts(Duration::from_secs(30), Duration::ZERO), 1);
        assert_eq!(
            poll_attempts(Duration::from_secs(30), Duration::from_millis(100)),
            300
        );
    }

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("default".parse::<BackendKind>(), Ok(BackendKind::Eager));
        assert_eq!("Async".parse::<BackendKind>(), Ok(BackendKind::Async));
        assert!("threaded".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::default().to_string(), "eager");
    }

    #[test]
    fn test_response_outcome_success() {
        let value = response_outcome(200, r#"{"ok": "pong"}"#).unwrap();
        assert_eq!(value, json!({"ok": "pong"}));
        assert_eq!(response_outcome(204, "").unwrap(), Value::Null);
    }

    #[test]
    fn test_response_outcome_error() {
        match response_outcome(404, "nothing here") {
            Err(RuntimeError::Client(err)) => {
                assert_eq!(err.code, 404);
                assert_eq!(err.error, "NOT FOUND");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(
            response_outcome(200, "not json"),
            Err(RuntimeError::Decode(_))
        ));
    }

    #[test]
    fn test_request_params() {
        let empty = Request::get("http://localhost/");
        assert!(empty.params().is_none());

        let req = Request::new(Method::Post, "http://localhost/foo/")
            .with_data(json!({"broker": "amqp://"}));
        assert_eq!(req.params().map(|m| m.len()), Some(1));
        assert_eq!(req.method.to_string(), "POST");
    }
}
