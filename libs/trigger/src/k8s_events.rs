use crate::required_meta;

use eventrigger_ingress::k8s_events::{ClusterEventsInformer, fingerprint};
use eventrigger_operator::driver::Trigger;
use eventrigger_operator::error::Result;
use eventrigger_operator::event::Event;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Trigger fed by the global cluster-events informer, keyed by
/// `kind|type|apiVersion|namespace`.
pub struct K8sEventsTrigger {
    informer: Arc<ClusterEventsInformer>,
    key: String,
}

impl K8sEventsTrigger {
    pub fn new(informer: Arc<ClusterEventsInformer>, meta: &BTreeMap<String, String>) -> Result<Self> {
        let kind = required_meta(meta, "kind")?;
        let type_ = required_meta(meta, "type")?;
        let api_version = meta
            .get("api_version")
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .unwrap_or("v1");
        let namespace = meta
            .get("namespace")
            .map(String::as_str)
            .unwrap_or_default();
        Ok(K8sEventsTrigger {
            informer,
            key: fingerprint(kind, type_, api_version, namespace),
        })
    }
}

#[async_trait]
impl Trigger for K8sEventsTrigger {
    async fn start(&mut self, out: mpsc::Sender<Event>) -> Result<()> {
        self.informer.register(&self.key, out).await
    }

    async fn stop(&mut self) -> Result<()> {
        debug!(msg = "unregistering k8s events trigger", key = %self.key);
        self.informer.unregister(&self.key).await;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_fingerprint_from_meta() {
        let informer = Arc::new(ClusterEventsInformer::new());
        let meta = BTreeMap::from([
            ("kind".to_string(), "Pod".to_string()),
            ("type".to_string(), "Warning".to_string()),
            ("namespace".to_string(), "default".to_string()),
        ]);
        let mut trigger = K8sEventsTrigger::new(informer, &meta).unwrap();
        assert_eq!(trigger.key, "Pod|Warning|v1|default");

        let (tx, _rx) = mpsc::channel(2);
        trigger.start(tx).await.unwrap();
        trigger.stop().await.unwrap();
    }

    #[test]
    fn test_new_requires_kind_and_type() {
        let informer = Arc::new(ClusterEventsInformer::new());
        assert!(K8sEventsTrigger::new(informer, &BTreeMap::new()).is_err());
    }
}
