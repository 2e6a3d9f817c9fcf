//! Branch service client.

use cyme_runtime::{Backend, Method, Promise, Request};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::api::{App, Consumers, Instance, Queue, Section};
use crate::error::{ApiError, Result};

/// HTTP client for a running branch, generic over the execution backend.
///
/// Every call returns a [`Promise`]; with the eager backend it is already
/// settled, with the async backend it settles once the response arrives.
#[derive(Debug, Clone)]
pub struct Client<B: Backend> {
    base: String,
    backend: B,
}

impl<B: Backend> Client<B> {
    /// Creates a client for the service at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not an absolute http(s) URL.
    pub fn new(url: &str, backend: B) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|source| ApiError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        Ok(Self {
            base: url.trim_end_matches('/').to_string(),
            backend,
        })
    }

    /// Base URL without a trailing slash.
    pub fn url(&self) -> &str {
        &self.base
    }

    /// The backend requests are issued on.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Full URL for `path`, always ending in exactly one slash.
    pub fn path_url<S: AsRef<str>>(&self, path: &[S]) -> String {
        let mut url = self.base.clone();
        for segment in path {
            let segment = segment.as_ref().trim_matches('/');
            if !segment.is_empty() {
                url.push('/');
                url.push_str(segment);
            }
        }
        url.push('/');
        url
    }

    /// Issues a request for `path` relative to the base URL.
    pub fn request<S: AsRef<str>>(&self, method: Method, path: &[S], data: Value) -> Promise<Value> {
        let url = self.path_url(path);
        debug!(method = %method, url = %url, data = %data, "->");
        self.backend.perform(Request::new(method, url).with_data(data))
    }

    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Promise<Value> {
        self.request(Method::Get, path, Value::Null)
    }

    pub fn post<S: AsRef<str>>(&self, path: &[S], data: Value) -> Promise<Value> {
        self.request(Method::Post, path, data)
    }

    pub fn put<S: AsRef<str>>(&self, path: &[S], data: Value) -> Promise<Value> {
        self.request(Method::Put, path, data)
    }

    pub fn delete<S: AsRef<str>>(&self, path: &[S]) -> Promise<Value> {
        self.request(Method::Delete, path, Value::Null)
    }

    /// Resolves to true if the branch answers its ping with `pong`.
    ///
    /// Never fails: error responses and connection failures resolve to false.
    pub fn ping(&self) -> Promise<bool> {
        let response = self.get(&["ping"]);
        let alive = Promise::new();

        let on_reply = alive.clone();
        response.on_success(move |body| {
            on_reply.succeed(body.get("ok").and_then(Value::as_str) == Some("pong"));
        });
        let on_error = alive.clone();
        response.on_failure(move |err| {
            debug!(error = %err, "ping failed");
            on_error.succeed(false);
        });

        alive
    }

    /// Lists the branches known to this branch's cluster.
    pub fn branches(&self) -> Promise<Value> {
        self.get(&["branches"])
    }

    /// Details of one branch.
    pub fn branch_info(&self, id: &str) -> Promise<Value> {
        self.get(&["branches", id])
    }

    /// The applications section.
    pub fn apps(&self) -> Section<B, App> {
        Section::new(self.clone(), Vec::new())
    }

    /// Instances of application `app`.
    pub fn instances(&self, app: &str) -> Section<B, Instance> {
        Section::new(self.clone(), vec![app.to_string(), "instances".to_string()])
    }

    /// Queues declared for application `app`.
    pub fn queues(&self, app: &str) -> Section<B, Queue> {
        Section::new(self.clone(), vec![app.to_string(), "queues".to_string()])
    }

    /// Queues instance `instance` of `app` consumes from.
    pub fn consumers(&self, app: &str, instance: &str) -> Consumers<B> {
        Consumers::new(
            self.clone(),
            vec![
                app.to_string(),
                "instances".to_string(),
                instance.to_string(),
                "queues".to_string(),
            ],
        )
    }

    /// Runtime statistics of an instance.
    pub fn stats(&self, app: &str, instance: &str) -> Promise<Value> {
        self.get(&[app, "instances", instance, "stats"])
    }

    /// Changes the concurrency bounds of an instance.
    pub fn autoscale(
        &self,
        app: &str,
        instance: &str,
        max: Option<u32>,
        min: Option<u32>,
    ) -> Promise<Value> {
        let mut data = serde_json::Map::new();
        if let Some(max) = max {
            data.insert("max".to_string(), json!(max));
        }
        if let Some(min) = min {
            data.insert("min".to_string(), json!(min));
        }
        self.post(&[app, "instances", instance, "autoscale"], Value::Object(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubBackend;
    use cyme_runtime::{ClientError, RuntimeError};

    fn client(stub: &StubBackend) -> Client<StubBackend> {
        Client::new("http://localhost:1968/", stub.clone()).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_urls() {
        let stub = StubBackend::new();
        assert!(matches!(
            Client::new("not a url", stub.clone()),
            Err(ApiError::InvalidUrl { .. })
        ));
        assert!(matches!(
            Client::new("amqp://localhost", stub),
            Err(ApiError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_path_url_has_single_trailing_slash() {
        let stub = StubBackend::new();
        let client = client(&stub);
        assert_eq!(client.url(), "http://localhost:1968");
        assert_eq!(client.path_url::<&str>(&[]), "http://localhost:1968/");
        assert_eq!(
            client.path_url(&["foo", "instances/"]),
            "http://localhost:1968/foo/instances/"
        );
    }

    #[test]
    fn test_ping_pong() {
        let stub = StubBackend::new();
        stub.respond("http://localhost:1968/ping/", Ok(json!({"ok": "pong"})));
        assert_eq!(client(&stub).ping().result(), Some(Ok(true)));
    }

    #[test]
    fn test_ping_wrong_answer_is_not_alive() {
        let stub = StubBackend::new();
        stub.respond("http://localhost:1968/ping/", Ok(json!({"ok": "ok"})));
        assert_eq!(client(&stub).ping().result(), Some(Ok(false)));
    }

    #[test]
    fn test_ping_error_is_not_alive() {
        let stub = StubBackend::new();
        stub.respond(
            "http://localhost:1968/ping/",
            Err(RuntimeError::Client(ClientError::from_response(503, "down"))),
        );
        assert_eq!(client(&stub).ping().result(), Some(Ok(false)));

        stub.respond(
            "http://localhost:1968/ping/",
            Err(RuntimeError::Transport("refused".into())),
        );
        assert_eq!(client(&stub).ping().result(), Some(Ok(false)));
    }

    #[test]
    fn test_autoscale_omits_missing_bounds() {
        let stub = StubBackend::new();
        stub.respond("http://localhost:1968/foo/instances/w1/autoscale/", Ok(json!({})));
        client(&stub).autoscale("foo", "w1", Some(10), None);

        let request = stub.last_request().unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.data, json!({"max": 10}));
    }

    #[test]
    fn test_branch_info_path() {
        let stub = StubBackend::new();
        stub.respond("http://localhost:1968/branches/b1/", Ok(json!({"id": "b1"})));
        let info = client(&stub).branch_info("b1");
        assert_eq!(info.result().unwrap().unwrap()["id"], "b1");
    }
}
