// src/server/handler.rs
use futures::stream;
use hyper::header::{HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tower::Service;

use crate::config::BackendSpec;
use crate::error::RoutingError;
use crate::events::ChannelSink;
use crate::health::HealthStatus;
use crate::router::{RouteRequest, RoutingEngine, RoutingOutcome};

#[derive(Debug, Deserialize)]
struct AlgorithmChange {
    algorithm: String,
}

#[derive(Debug, Deserialize)]
struct HealthChange {
    status: HealthStatus,
}

/// Admin endpoints under `/lb/`; every other request is routed to a backend.
#[derive(Clone)]
pub struct RequestHandler {
    engine: RoutingEngine,
    subscriber_buffer: usize,
}

impl RequestHandler {
    pub fn new(engine: RoutingEngine, subscriber_buffer: usize) -> Self {
        Self {
            engine,
            subscriber_buffer,
        }
    }

    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let path = req.uri().path().to_string();

        if !path.starts_with("/lb/") {
            return self.proxy(req).await;
        }

        match (req.method(), path.as_str()) {
            (&Method::GET, "/lb/stats") => json_response(StatusCode::OK, &self.engine.snapshot()),
            (&Method::GET, "/lb/backends") => json_response(StatusCode::OK, &self.engine.backends()),
            (&Method::POST, "/lb/algorithm") => self.change_algorithm(req).await,
            (&Method::POST, "/lb/stats/reset") => {
                self.engine.reset_stats();
                json_response(StatusCode::OK, &json!({ "status": "reset" }))
            }
            (&Method::POST, "/lb/backends") => self.register_backend(req).await,
            (&Method::GET, "/lb/events") => self.event_stream(),
            (&Method::PUT, _) => match health_target(&path) {
                Some(id) => {
                    let id = id.to_string();
                    self.change_health(&id, req).await
                }
                None => not_found(),
            },
            _ => not_found(),
        }
    }

    async fn change_algorithm(&self, req: Request<Body>) -> Response<Body> {
        let change: AlgorithmChange = match read_json(req).await {
            Ok(change) => change,
            Err(response) => return response,
        };

        match self.engine.set_strategy(&change.algorithm) {
            Ok(kind) => json_response(StatusCode::OK, &json!({ "algorithm": kind })),
            Err(err) => error_response(&err),
        }
    }

    async fn register_backend(&self, req: Request<Body>) -> Response<Body> {
        let spec: BackendSpec = match read_json(req).await {
            Ok(spec) => spec,
            Err(response) => return response,
        };

        match self.engine.register_backend(spec) {
            Ok(backend) => json_response(StatusCode::CREATED, &backend.get_metrics()),
            Err(err) => error_response(&err),
        }
    }

    async fn change_health(&self, id: &str, req: Request<Body>) -> Response<Body> {
        let change: HealthChange = match read_json(req).await {
            Ok(change) => change,
            Err(response) => return response,
        };

        match self.engine.set_health(id, change.status) {
            Ok(transition) => json_response(
                StatusCode::OK,
                &json!({ "backend": id, "status": change.status, "changed": transition.is_some() }),
            ),
            Err(err) => error_response(&err),
        }
    }

    /// Streams published events as server-sent events until the client leaves.
    fn event_stream(&self) -> Response<Body> {
        let (sink, rx) = ChannelSink::new("sse", self.subscriber_buffer);
        self.engine.subscribe(Arc::new(sink));

        let events = stream::unfold(rx, |mut rx| async move {
            let event = rx.recv().await?;
            let frame = match serde_json::to_string(event.as_ref()) {
                Ok(data) => format!("event: {}\ndata: {}\n\n", event.kind.as_str(), data),
                Err(e) => format!(": encode error {e}\n\n"),
            };
            Some((Ok::<_, Infallible>(frame), rx))
        });

        let mut response = Response::new(Body::wrap_stream(events));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    }

    async fn proxy(&self, req: Request<Body>) -> Response<Body> {
        let (parts, body) = req.into_parts();
        let body = match hyper::body::to_bytes(body).await {
            Ok(body) => body,
            Err(e) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    &json!({ "error": format!("unreadable request body: {e}") }),
                )
            }
        };

        let path = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let headers = parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let outcome = self
            .engine
            .route(RouteRequest {
                method: parts.method.as_str().to_string(),
                path,
                headers,
                body,
            })
            .await;

        outcome_response(outcome)
    }
}

fn outcome_response(outcome: RoutingOutcome) -> Response<Body> {
    let backend = outcome.backend_id.clone();
    let mut response = match outcome.result {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            let mut response = Response::new(Body::from(upstream.body));
            *response.status_mut() = status;
            for (name, value) in &upstream.headers {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    response.headers_mut().append(name, value);
                }
            }
            response
        }
        Err(err) => error_response(&err),
    };

    if let Some(value) = backend.and_then(|id| HeaderValue::from_str(&id).ok()) {
        response.headers_mut().insert("x-routed-to", value);
    }
    response
}

/// Extracts `{id}` from `/lb/backends/{id}/health`.
fn health_target(path: &str) -> Option<&str> {
    path.strip_prefix("/lb/backends/")?
        .strip_suffix("/health")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

async fn read_json<T: for<'de> Deserialize<'de>>(req: Request<Body>) -> Result<T, Response<Body>> {
    let bytes = hyper::body::to_bytes(req.into_body()).await.map_err(|e| {
        json_response(
            StatusCode::BAD_REQUEST,
            &json!({ "error": format!("unreadable request body: {e}") }),
        )
    })?;

    serde_json::from_slice(&bytes).map_err(|e| {
        json_response(
            StatusCode::BAD_REQUEST,
            &json!({ "error": format!("invalid JSON: {e}") }),
        )
    })
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response<Body> {
    let (status, body) = match serde_json::to_vec(value) {
        Ok(body) => (status, body),
        Err(e) => {
            tracing::error!(%e, "failed to encode response");
            (StatusCode::INTERNAL_SERVER_ERROR, b"{\"error\":\"encoding failed\"}".to_vec())
        }
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(err: &RoutingError) -> Response<Body> {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_response(status, &json!({ "error": err.to_string() }))
}

fn not_found() -> Response<Body> {
    json_response(StatusCode::NOT_FOUND, &json!({ "error": "not found" }))
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.handle(req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RetryConfig, StrategyKind};
    use crate::router::{DispatchError, DispatchResponse, Dispatcher};
    use crate::registry::Backend;
    use async_trait::async_trait;
    use tower::ServiceExt;
    use url::Url;

    struct Named;

    #[async_trait]
    impl Dispatcher for Named {
        async fn dispatch(
            &self,
            backend: &Backend,
            request: &RouteRequest,
        ) -> Result<DispatchResponse, DispatchError> {
            Ok(DispatchResponse::new(200, format!("{} {}", backend.id, request.path)))
        }
    }

    fn handler() -> RequestHandler {
        let mut config = Config::default();
        config.retry = RetryConfig::disabled();
        config.backends = vec![BackendSpec::new("A", Url::parse("http://127.0.0.1:5001").unwrap())];
        let engine = RoutingEngine::builder(config)
            .with_dispatcher(Arc::new(Named))
            .build()
            .unwrap();
        RequestHandler::new(engine, 16)
    }

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn request(method: Method, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_paths_are_proxied() {
        let response = handler()
            .oneshot(request(Method::GET, "/api/users?id=3", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-routed-to"], "A");
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"A /api/users?id=3");
    }

    #[tokio::test]
    async fn test_algorithm_switch() {
        let handler = handler();
        let response = handler
            .clone()
            .oneshot(request(Method::POST, "/lb/algorithm", r#"{"algorithm":"least-connections"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(handler.engine.active_strategy(), StrategyKind::LeastConnections);

        let response = handler
            .oneshot(request(Method::POST, "/lb/algorithm", r#"{"algorithm":"random"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_backend_registration_and_health() {
        let handler = handler();
        let spec = r#"{"name":"B","url":"http://127.0.0.1:5002","weight":2}"#;

        let created = handler
            .clone()
            .oneshot(request(Method::POST, "/lb/backends", spec))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        let duplicate = handler
            .clone()
            .oneshot(request(Method::POST, "/lb/backends", spec))
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let marked = handler
            .clone()
            .oneshot(request(Method::PUT, "/lb/backends/B/health", r#"{"status":"unreachable"}"#))
            .await
            .unwrap();
        assert_eq!(marked.status(), StatusCode::OK);
        assert_eq!(body_json(marked).await["changed"], true);

        let unknown = handler
            .oneshot(request(Method::PUT, "/lb/backends/Z/health", r#"{"status":"healthy"}"#))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_reports_active_strategy() {
        let handler = handler();
        handler
            .clone()
            .oneshot(request(Method::GET, "/work/1", ""))
            .await
            .unwrap();

        let stats = body_json(
            handler
                .oneshot(request(Method::GET, "/lb/stats", ""))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(stats["strategy"], "round-robin");
        assert_eq!(stats["backends"][0]["id"], "A");
    }

    #[test]
    fn test_health_target() {
        assert_eq!(health_target("/lb/backends/A/health"), Some("A"));
        assert_eq!(health_target("/lb/backends//health"), None);
        assert_eq!(health_target("/lb/backends/A/B/health"), None);
        assert_eq!(health_target("/lb/stats"), None);
    }
}
