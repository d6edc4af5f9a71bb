use eventrigger_operator::error::{Error, Result};
use eventrigger_operator::event::Event;

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Event as K8sEvent;
use kube::ResourceExt;
use kube::api::Api;
use kube::client::Client;
use kube::runtime::{WatchStreamExt, watcher};
use tokio::sync::{RwLock, mpsc};
use tracing::{error, info, trace, warn};

pub fn fingerprint(kind: &str, type_: &str, api_version: &str, namespace: &str) -> String {
    format!("{kind}|{type_}|{api_version}|{namespace}")
}

/// Process-wide informer on the cluster `Event` resource. Applied events are
/// keyed by the involved object's kind/apiVersion plus the event type and
/// namespace and fanned in to the registered runner.
pub struct ClusterEventsInformer {
    registry: RwLock<HashMap<String, mpsc::Sender<Event>>>,
}

impl Default for ClusterEventsInformer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterEventsInformer {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, fingerprint: &str, sender: mpsc::Sender<Event>) -> Result<()> {
        let mut registry = self.registry.write().await;
        if registry.contains_key(fingerprint) {
            return Err(Error::CollisionError(format!(
                "cluster events fingerprint {fingerprint}"
            )));
        }
        info!(msg = "registered cluster events fingerprint", fingerprint);
        registry.insert(fingerprint.to_string(), sender);
        Ok(())
    }

    pub async fn unregister(&self, fingerprint: &str) {
        self.registry.write().await.remove(fingerprint);
    }

    async fn dispatch(&self, k8s_event: K8sEvent) {
        let involved = &k8s_event.involved_object;
        let key = fingerprint(
            involved.kind.as_deref().unwrap_or_default(),
            k8s_event.type_.as_deref().unwrap_or_default(),
            involved.api_version.as_deref().unwrap_or_default(),
            k8s_event.namespace().unwrap_or_default().as_str(),
        );
        let sender = { self.registry.read().await.get(&key).cloned() };
        let Some(tx) = sender else {
            trace!(msg = "cluster event without registered sensor", key);
            return;
        };

        let event = Event::new(
            k8s_event.namespace().unwrap_or_default(),
            k8s_event.type_.clone().unwrap_or_default(),
            k8s_event
                .source
                .as_ref()
                .and_then(|s| s.component.clone())
                .unwrap_or_default(),
            involved.api_version.clone().unwrap_or_default(),
            k8s_event.message.clone().unwrap_or_default(),
            "",
        );
        // blocks when the runner channel is full: backpressure onto the
        // informer, never a drop
        if tx.send(event).await.is_err() {
            warn!(msg = "runner event channel closed", key);
        }
    }

    /// Watch cluster events until the process stops. Transient watch errors
    /// are retried with the default backoff; they never tear the informer
    /// down.
    pub async fn run(self: Arc<Self>, client: Client) -> Result<()> {
        let events: Api<K8sEvent> = Api::all(client);
        info!(msg = "starting cluster events informer");
        watcher(events, watcher::Config::default().any_semantic())
            .default_backoff()
            .applied_objects()
            .for_each(|res| {
                let informer = self.clone();
                async move {
                    match res {
                        Ok(k8s_event) => informer.dispatch(k8s_event).await,
                        Err(e) => {
                            error!(msg = "unexpected error when watching cluster events", %e);
                        }
                    }
                }
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use k8s_openapi::api::core::v1::EventSource;
    use k8s_openapi::api::core::v1::ObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn k8s_event(kind: &str, type_: &str, namespace: &str) -> K8sEvent {
        K8sEvent {
            metadata: ObjectMeta {
                name: Some("e".to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            involved_object: ObjectReference {
                kind: Some(kind.to_string()),
                api_version: Some("v1".to_string()),
                ..ObjectReference::default()
            },
            type_: Some(type_.to_string()),
            message: Some("pulled image".to_string()),
            source: Some(EventSource {
                component: Some("kubelet".to_string()),
                ..EventSource::default()
            }),
            ..K8sEvent::default()
        }
    }

    #[test]
    fn test_fingerprint_format() {
        assert_eq!(fingerprint("Pod", "Normal", "v1", "default"), "Pod|Normal|v1|default");
    }

    #[tokio::test]
    async fn test_dispatch_matches_registered_fingerprint() {
        let informer = ClusterEventsInformer::new();
        let (tx, mut rx) = mpsc::channel(2);
        informer
            .register(&fingerprint("Pod", "Normal", "v1", "default"), tx)
            .await
            .unwrap();

        informer.dispatch(k8s_event("Pod", "Normal", "default")).await;
        let event = rx.try_recv().unwrap();
        assert_eq!(event.namespace, "default");
        assert_eq!(event.type_, "Normal");
        assert_eq!(event.source, "kubelet");
        assert_eq!(event.data, "pulled image");

        informer.dispatch(k8s_event("Pod", "Warning", "default")).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let informer = ClusterEventsInformer::new();
        let (tx, mut rx) = mpsc::channel(2);
        let key = fingerprint("Pod", "Normal", "v1", "default");
        informer.register(&key, tx).await.unwrap();
        informer.unregister(&key).await;
        informer.dispatch(k8s_event("Pod", "Normal", "default")).await;
        assert!(rx.try_recv().is_err());
    }
}
