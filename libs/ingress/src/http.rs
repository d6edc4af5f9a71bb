use crate::ErrorBody;
use crate::proxy::{self, WakeTarget};

use eventrigger_operator::error::{Error, Result};
use eventrigger_operator::event::Event;
use eventrigger_operator::labels;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::HOST;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use kube::client::Client;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

const HTTP_TRIGGER_TYPE: &str = "http";
const BODY_LIMIT: usize = 8 * 1024 * 1024;

/// Route registered by an inbound-HTTP trigger. A wake target turns the
/// route into the wake-and-proxy path.
#[derive(Clone)]
pub struct Route {
    pub events: mpsc::Sender<Event>,
    pub wake: Option<WakeTarget>,
}

/// Process-wide HTTP listener dispatching by `Host` header first, then by
/// `header=joined-values` pairs. One route per fingerprint at a time.
pub struct HttpRouter {
    client: Client,
    http_client: reqwest::Client,
    hosts: RwLock<HashMap<String, Route>>,
    headers: RwLock<HashMap<String, Route>>,
}

impl HttpRouter {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            http_client: reqwest::Client::new(),
            hosts: RwLock::new(HashMap::new()),
            headers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_host(&self, host: &str, route: Route) -> Result<()> {
        let mut hosts = self.hosts.write().await;
        if hosts.contains_key(host) {
            return Err(Error::CollisionError(format!("host {host}")));
        }
        info!(msg = "registered http host", host);
        hosts.insert(host.to_string(), route);
        Ok(())
    }

    pub async fn register_header(&self, header: &str, route: Route) -> Result<()> {
        let mut headers = self.headers.write().await;
        if headers.contains_key(header) {
            return Err(Error::CollisionError(format!("header {header}")));
        }
        info!(msg = "registered http header", header);
        headers.insert(header.to_string(), route);
        Ok(())
    }

    pub async fn unregister_host(&self, host: &str) {
        self.hosts.write().await.remove(host);
    }

    pub async fn unregister_header(&self, header: &str) {
        self.headers.write().await.remove(header);
    }

    async fn resolve(&self, request: &Request) -> Option<Route> {
        if let Some(host) = request.headers().get(HOST).and_then(|v| v.to_str().ok()) {
            if let Some(route) = self.hosts.read().await.get(host) {
                debug!(msg = "matched host", host);
                return Some(route.clone());
            }
        }
        let headers = self.headers.read().await;
        for key in request.headers().keys() {
            let joined = request
                .headers()
                .get_all(key)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(",");
            let fingerprint = format!("{key}={joined}");
            if let Some(route) = headers.get(&fingerprint) {
                debug!(msg = "matched header", fingerprint);
                return Some(route.clone());
            }
        }
        None
    }

    /// Serve the router on the given address. Runs until the process stops.
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let app: axum::Router = axum::Router::<Arc<HttpRouter>>::new()
            .fallback(any(dispatch))
            .with_state(self.clone());
        info!(msg = "http router listening", %addr);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::TriggerError(format!("failed to bind {addr}"), Box::new(e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| Error::TriggerError("http router server failed".to_string(), Box::new(e)))
    }
}

async fn dispatch(State(router): State<Arc<HttpRouter>>, request: Request) -> Response {
    let Some(route) = router.resolve(&request).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                code: 404,
                msg: "no sensor registered for host or headers".to_string(),
            }),
        )
            .into_response();
    };

    let uuid = request
        .headers()
        .get(labels::UUID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let (parts, body) = request.into_parts();
    let bytes: Bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    code: 400,
                    msg: format!("failed to read request body: {e}"),
                }),
            )
                .into_response();
        }
    };

    let data = String::from_utf8_lossy(&bytes).into_owned();
    let event = Event::new("", HTTP_TRIGGER_TYPE, "", "", data, uuid);

    // blocks when the runner channel is full: backpressure onto the caller
    if route.events.send(event.clone()).await.is_err() {
        warn!(msg = "runner event channel closed, dropping route dispatch");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody {
                code: 503,
                msg: "sensor is shutting down".to_string(),
            }),
        )
            .into_response();
    }

    match route.wake {
        Some(ref target) => {
            proxy::wake_and_proxy(
                router.client.clone(),
                router.http_client.clone(),
                target,
                parts,
                bytes,
                &event,
            )
            .await
        }
        None => Json(event).into_response(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn route() -> (Route, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(2);
        (
            Route {
                events: tx,
                wake: None,
            },
            rx,
        )
    }

    async fn test_router() -> HttpRouter {
        // Client construction does not touch the network until a request is made.
        let config = kube::Config::new("http://localhost:8080".parse().unwrap());
        HttpRouter::new(Client::try_from(config).unwrap())
    }

    #[tokio::test]
    async fn test_register_host_collision() {
        let router = test_router().await;
        let (first, _rx1) = route();
        let (second, _rx2) = route();
        router.register_host("a.example", first).await.unwrap();
        let err = router.register_host("a.example", second).await.unwrap_err();
        assert!(matches!(
            err,
            eventrigger_operator::error::Error::CollisionError(_)
        ));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent_and_frees_fingerprint() {
        let router = test_router().await;
        let (first, _rx1) = route();
        router.register_host("a.example", first).await.unwrap();
        router.unregister_host("a.example").await;
        router.unregister_host("a.example").await;
        let (again, _rx2) = route();
        router.register_host("a.example", again).await.unwrap();
    }

    #[tokio::test]
    async fn test_resolve_host_then_header() {
        let router = test_router().await;
        let (host_route, _rx1) = route();
        let (header_route, _rx2) = route();
        router.register_host("svc.example", host_route).await.unwrap();
        router
            .register_header("x-tenant=blue", header_route)
            .await
            .unwrap();

        let by_host = Request::builder()
            .uri("/ping")
            .header(HOST, "svc.example")
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(router.resolve(&by_host).await.is_some());

        let by_header = Request::builder()
            .uri("/ping")
            .header(HOST, "other.example")
            .header("x-tenant", "blue")
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(router.resolve(&by_header).await.is_some());

        let miss = Request::builder()
            .uri("/ping")
            .header(HOST, "other.example")
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(router.resolve(&miss).await.is_none());
    }

    #[tokio::test]
    async fn test_resolve_joins_repeated_header_values() {
        let router = test_router().await;
        let (r, _rx) = route();
        router.register_header("x-tag=a,b", r).await.unwrap();
        let request = Request::builder()
            .uri("/")
            .header("x-tag", "a")
            .header("x-tag", "b")
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(router.resolve(&request).await.is_some());
    }
}
