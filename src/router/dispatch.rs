// src/router/dispatch.rs
use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, Uri};

use crate::registry::Backend;

/// Headers that describe the inbound hop and are not forwarded.
const HOP_HEADERS: &[&str] = &[
    "connection",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A request to be routed, detached from the inbound connection.
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RouteRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, method: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.method = method.into();
        self.body = body.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl DispatchResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend answered {0}")]
    Status(u16),
}

/// Delivers a routed request to the chosen backend.
///
/// Any `Err` counts as a failed dispatch against that backend.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    async fn dispatch(
        &self,
        backend: &Backend,
        request: &RouteRequest,
    ) -> Result<DispatchResponse, DispatchError>;
}

/// Forwards requests over plain HTTP/1.1.
///
/// 5xx answers are reported as failures so the passive health tracking
/// sees them. Everything else is passed through untouched.
#[derive(Clone)]
pub struct HttpDispatcher {
    client: Client<HttpConnector, Body>,
}

impl HttpDispatcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn target_uri(backend: &Backend, path: &str) -> Result<Uri, DispatchError> {
        let base = backend.url.as_str().trim_end_matches('/');
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        format!("{base}{path}")
            .parse::<Uri>()
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        backend: &Backend,
        request: &RouteRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        let uri = Self::target_uri(backend, &request.path)?;
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;

        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in &request.headers {
            if HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        let outbound = builder
            .body(Body::from(request.body.clone()))
            .map_err(|e| DispatchError::InvalidRequest(e.to_string()))?;

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if response.status().is_server_error() {
            return Err(DispatchError::Status(status));
        }

        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !HOP_HEADERS.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        Ok(DispatchResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendSpec;
    use url::Url;

    fn backend(url: &str) -> Backend {
        Backend::new(BackendSpec::new("a", Url::parse(url).unwrap()), 0)
    }

    #[test]
    fn test_target_uri_joins_base_and_path() {
        let b = backend("http://127.0.0.1:5001");
        let uri = HttpDispatcher::target_uri(&b, "/api/users?page=2").unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:5001/api/users?page=2");

        let prefixed = backend("http://127.0.0.1:5001/v1/");
        let uri = HttpDispatcher::target_uri(&prefixed, "health").unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:5001/v1/health");
    }

    #[tokio::test]
    async fn test_dispatch_forwards_to_backend() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/items")
            .match_body("payload")
            .with_status(201)
            .with_body("created")
            .create_async()
            .await;

        let b = backend(&server.url());
        let request = RouteRequest::get("/api/items").with_body("POST", "payload");
        let response = HttpDispatcher::new().dispatch(&b, &request).await.unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.body, Bytes::from("created"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_a_failed_dispatch() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/boom")
            .with_status(503)
            .create_async()
            .await;

        let b = backend(&server.url());
        let err = HttpDispatcher::new()
            .dispatch(&b, &RouteRequest::get("/boom"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Status(503)));
    }
}
