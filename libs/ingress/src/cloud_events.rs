use eventrigger_operator::error::{Error, Result};
use eventrigger_operator::event::Event;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use cloudevents::event::Data;
use cloudevents::{AttributesReader, Event as CloudEvent, EventBuilder, EventBuilderV10};
use tokio::net::TcpListener;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";

pub fn fingerprint(source: &str, type_: &str, specversion: &str) -> String {
    format!("{source}|{type_}|{specversion}")
}

/// Process-wide CloudEvents 1.0 receiver keyed by `source|type|specversion`.
pub struct CloudEventsServer {
    registry: RwLock<HashMap<String, mpsc::Sender<Event>>>,
}

impl Default for CloudEventsServer {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudEventsServer {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, fingerprint: &str, sender: mpsc::Sender<Event>) -> Result<()> {
        let mut registry = self.registry.write().await;
        if registry.contains_key(fingerprint) {
            return Err(Error::CollisionError(format!(
                "cloud events fingerprint {fingerprint}"
            )));
        }
        info!(msg = "registered cloud events fingerprint", fingerprint);
        registry.insert(fingerprint.to_string(), sender);
        Ok(())
    }

    pub async fn unregister(&self, fingerprint: &str) {
        self.registry.write().await.remove(fingerprint);
    }

    async fn deliver(&self, cloud_event: CloudEvent) {
        let key = fingerprint(
            cloud_event.source().as_str(),
            cloud_event.ty(),
            &cloud_event.specversion().to_string(),
        );
        let sender = { self.registry.read().await.get(&key).cloned() };
        match sender {
            Some(tx) => {
                debug!(msg = "cloud event matched", key);
                let event = map_event(&cloud_event);
                // blocks when the runner channel is full: backpressure onto
                // the listener, never a drop
                if tx.send(event).await.is_err() {
                    warn!(msg = "runner event channel closed", key);
                }
            }
            None => {
                warn!(msg = format!("cloud event received but no sensor registered for {key}"));
            }
        }
    }

    /// Serve the receiver on the given address. Runs until the process stops.
    pub async fn run(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let app = axum::Router::new()
            .route("/", post(receive))
            .with_state(self.clone());
        info!(msg = "cloud events receiver listening", %addr);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::TriggerError(format!("failed to bind {addr}"), Box::new(e)))?;
        axum::serve(listener, app).await.map_err(|e| {
            Error::TriggerError("cloud events server failed".to_string(), Box::new(e))
        })
    }
}

fn map_event(cloud_event: &CloudEvent) -> Event {
    let data = match cloud_event.data() {
        Some(Data::Json(value)) => value.to_string(),
        Some(Data::String(s)) => s.clone(),
        Some(Data::Binary(b)) => String::from_utf8_lossy(b).into_owned(),
        None => String::new(),
    };
    Event::new(
        "",
        cloud_event.ty(),
        cloud_event.source().as_str(),
        cloud_event.specversion().to_string(),
        data,
        cloud_event.id(),
    )
}

/// Decode a CloudEvents 1.0 frame: structured JSON when the content type
/// says so, binary `ce-*` headers otherwise.
fn decode_frame(headers: &HeaderMap, body: &Bytes) -> Result<CloudEvent> {
    let content_type = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type.starts_with(STRUCTURED_CONTENT_TYPE) {
        return serde_json::from_slice(body).map_err(|e| {
            Error::SerializationError("invalid structured cloud event".to_string(), e)
        });
    }

    let attr = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let source = attr("ce-source")
        .ok_or_else(|| Error::MissingData("binary cloud event without ce-source".to_string()))?;
    let type_ = attr("ce-type")
        .ok_or_else(|| Error::MissingData("binary cloud event without ce-type".to_string()))?;
    let id = attr("ce-id").unwrap_or_default();

    let builder = EventBuilderV10::new().id(id).source(source).ty(type_);
    let builder = if body.is_empty() {
        builder
    } else {
        builder.data(
            content_type.to_string(),
            Data::Binary(body.to_vec()),
        )
    };
    builder
        .build()
        .map_err(|e| Error::TriggerError("invalid binary cloud event".to_string(), Box::new(e)))
}

async fn receive(
    State(server): State<Arc<CloudEventsServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    match decode_frame(&headers, &body) {
        Ok(cloud_event) => {
            server.deliver(cloud_event).await;
            StatusCode::OK
        }
        Err(e) => {
            warn!(msg = "rejected cloud event frame", %e);
            StatusCode::BAD_REQUEST
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const STRUCTURED: &str = r#"{
        "specversion": "1.0",
        "id": "evt-1",
        "source": "A",
        "type": "T",
        "datacontenttype": "application/json",
        "data": {"k": "v"}
    }"#;

    fn json_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            STRUCTURED_CONTENT_TYPE.parse().unwrap(),
        );
        headers
    }

    #[test]
    fn test_decode_structured_frame() {
        let frame = decode_frame(&json_headers(), &Bytes::from(STRUCTURED)).unwrap();
        assert_eq!(frame.source().as_str(), "A");
        assert_eq!(frame.ty(), "T");
        assert_eq!(frame.specversion().to_string(), "1.0");
        let event = map_event(&frame);
        assert_eq!(event.type_, "T");
        assert_eq!(event.version, "1.0");
        assert_eq!(event.uuid, "evt-1");
        assert!(event.data.contains("\"k\""));
    }

    #[test]
    fn test_decode_binary_frame() {
        let mut headers = HeaderMap::new();
        headers.insert("ce-specversion", "1.0".parse().unwrap());
        headers.insert("ce-source", "B".parse().unwrap());
        headers.insert("ce-type", "T".parse().unwrap());
        headers.insert("ce-id", "evt-2".parse().unwrap());
        let frame = decode_frame(&headers, &Bytes::from_static(b"payload")).unwrap();
        assert_eq!(frame.source().as_str(), "B");
        assert_eq!(map_event(&frame).data, "payload");
    }

    #[test]
    fn test_decode_binary_frame_requires_source() {
        let headers = HeaderMap::new();
        assert!(decode_frame(&headers, &Bytes::new()).is_err());
    }

    #[tokio::test]
    async fn test_deliver_routes_only_matching_fingerprint() {
        let server = CloudEventsServer::new();
        let (tx_a, mut rx_a) = mpsc::channel(2);
        let (tx_b, mut rx_b) = mpsc::channel(2);
        server.register(&fingerprint("A", "T", "1.0"), tx_a).await.unwrap();
        server.register(&fingerprint("B", "T", "1.0"), tx_b).await.unwrap();

        let frame = decode_frame(&json_headers(), &Bytes::from(STRUCTURED)).unwrap();
        server.deliver(frame).await;

        let delivered = rx_a.try_recv().unwrap();
        assert_eq!(delivered.source, "A");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_register_collision_and_unregister() {
        let server = CloudEventsServer::new();
        let (tx, _rx) = mpsc::channel(2);
        let key = fingerprint("A", "T", "1.0");
        server.register(&key, tx.clone()).await.unwrap();
        assert!(server.register(&key, tx.clone()).await.is_err());
        server.unregister(&key).await;
        server.unregister(&key).await;
        server.register(&key, tx).await.unwrap();
    }
}
