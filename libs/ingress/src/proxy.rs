use crate::ErrorBody;

use eventrigger_operator::error::{Error, Result};
use eventrigger_operator::event::Event;
use eventrigger_operator::labels;

use std::collections::BTreeMap;
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DynamicObject};
use kube::client::Client;
use kube::runtime::{WatchStreamExt, watcher};
use tracing::{debug, info, warn};

/// How long a blocked caller waits for the woken workload to become ready.
const WAKE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const HTTP_PORT_NAME: &str = "http";

/// Workload a k8s-http trigger wakes up and proxies to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WakeTarget {
    pub namespace: String,
    pub selector: BTreeMap<String, String>,
    pub kind: String,
}

impl WakeTarget {
    /// Derive the pod selector from the bound workload: `matchLabels` for
    /// Deployment/StatefulSet, object labels for a bare Pod.
    pub fn from_resource(obj: &DynamicObject, kind: &str, namespace: &str) -> Result<Self> {
        let selector = match kind {
            "Pod" => obj.metadata.labels.clone().unwrap_or_default(),
            "Deployment" | "StatefulSet" => {
                let match_labels = obj
                    .data
                    .pointer("/spec/selector/matchLabels")
                    .and_then(|v| v.as_object())
                    .ok_or_else(|| {
                        Error::MissingData(format!("{kind} has no spec.selector.matchLabels"))
                    })?;
                match_labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            }
            other => {
                return Err(Error::UnsupportedKind(
                    other.to_string(),
                    "wake-and-proxy".to_string(),
                ));
            }
        };
        if selector.is_empty() {
            return Err(Error::MissingData(format!(
                "{kind} selector resolves to no labels"
            )));
        }
        Ok(WakeTarget {
            namespace: namespace.to_string(),
            selector,
            kind: kind.to_string(),
        })
    }

    fn label_selector(&self) -> String {
        self.selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// True when every container status reports ready and the pod has an IP.
fn is_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    if status.pod_ip.as_deref().unwrap_or_default().is_empty() {
        return false;
    }
    match status.container_statuses.as_deref() {
        Some([]) | None => false,
        Some(statuses) => statuses.iter().all(|s| s.ready),
    }
}

/// Container port named `http`, else the first declared port.
fn pick_port(pod: &Pod) -> Option<i32> {
    let containers = pod.spec.as_ref().map(|s| s.containers.as_slice())?;
    let ports = containers
        .iter()
        .flat_map(|c| c.ports.iter().flatten())
        .collect::<Vec<_>>();
    ports
        .iter()
        .find(|p| p.name.as_deref() == Some(HTTP_PORT_NAME))
        .or_else(|| ports.first())
        .map(|p| p.container_port)
}

fn ready_endpoint(pod: &Pod) -> Option<String> {
    if !is_ready(pod) {
        return None;
    }
    let ip = pod.status.as_ref()?.pod_ip.clone()?;
    let port = pick_port(pod)?;
    Some(format!("{ip}:{port}"))
}

/// Block until a pod matching the wake target reports ready, returning its
/// `ip:port` endpoint. Hard 5-minute timeout.
pub async fn await_ready_endpoint(client: Client, target: &WakeTarget) -> Result<String> {
    let pods: Api<Pod> = Api::namespaced(client, &target.namespace);
    let config = watcher::Config::default().labels(&target.label_selector());
    let mut stream = Box::pin(watcher(pods, config).default_backoff().applied_objects());

    let endpoint = tokio::time::timeout(WAKE_TIMEOUT, async {
        loop {
            match stream.try_next().await {
                Ok(Some(pod)) => {
                    if let Some(endpoint) = ready_endpoint(&pod) {
                        return Ok(endpoint);
                    }
                }
                Ok(None) => {
                    return Err(Error::ReceiveOutput(
                        "pod watch stream ended unexpectedly".to_string(),
                    ));
                }
                Err(e) => {
                    return Err(Error::TriggerError(
                        format!(
                            "pod watch failed for selector {}",
                            target.label_selector()
                        ),
                        Box::new(e),
                    ));
                }
            }
        }
    })
    .await
    .map_err(|_| {
        Error::WakeTimeout(format!(
            "no ready {} pod with labels {} in {}",
            target.kind,
            target.label_selector(),
            target.namespace
        ))
    })??;
    Ok(endpoint)
}

/// Forward the buffered request to a Ready pod of the wake target and stream
/// the response back, injecting the base64-encoded event.
pub async fn wake_and_proxy(
    client: Client,
    http_client: reqwest::Client,
    target: &WakeTarget,
    parts: http::request::Parts,
    body: axum::body::Bytes,
    event: &Event,
) -> Response {
    let endpoint = match await_ready_endpoint(client, target).await {
        Ok(endpoint) => endpoint,
        Err(e @ Error::WakeTimeout(_)) => {
            warn!(msg = "wake timed out", %e);
            return (
                StatusCode::GATEWAY_TIMEOUT,
                Json(ErrorBody {
                    code: 500,
                    msg: e.to_string(),
                }),
            )
                .into_response();
        }
        Err(e) => {
            warn!(msg = "failed to resolve endpoint", %e);
            return (
                StatusCode::BAD_GATEWAY,
                Json(ErrorBody {
                    code: 500,
                    msg: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("http://{endpoint}{path_and_query}");

    // safe unwrap: the event is a plain serializable struct
    let b64_event = BASE64.encode(serde_json::to_vec(event).unwrap());
    let mut headers = parts.headers.clone();
    headers.insert(
        labels::EVENT_B64_HEADER,
        // safe unwrap: base64 output is always a valid header value
        b64_event.parse().unwrap(),
    );

    info!(msg = "proxying request to woken pod", %url);
    let upstream = http_client
        .request(parts.method.clone(), &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    match upstream {
        Ok(resp) => {
            let mut builder = Response::builder().status(resp.status());
            for (key, value) in resp.headers() {
                builder = builder.header(key, value);
            }
            debug!(msg = "streaming upstream response", status = %resp.status());
            builder
                .body(Body::from_stream(resp.bytes_stream()))
                .unwrap_or_else(|e| {
                    (
                        StatusCode::BAD_GATEWAY,
                        Json(ErrorBody {
                            code: 500,
                            msg: e.to_string(),
                        }),
                    )
                        .into_response()
                })
        }
        Err(e) => {
            info!(msg = format!("proxy error: {e}"));
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorBody {
                    code: 500,
                    msg: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}
