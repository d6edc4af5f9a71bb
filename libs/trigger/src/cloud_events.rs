use crate::required_meta;

use eventrigger_ingress::cloud_events::{CloudEventsServer, fingerprint};
use eventrigger_operator::driver::Trigger;
use eventrigger_operator::error::Result;
use eventrigger_operator::event::Event;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Trigger fed by the global cloud-events receiver, keyed by
/// `source|type|specversion`.
pub struct CloudEventsTrigger {
    server: Arc<CloudEventsServer>,
    key: String,
}

impl CloudEventsTrigger {
    pub fn new(server: Arc<CloudEventsServer>, meta: &BTreeMap<String, String>) -> Result<Self> {
        let source = required_meta(meta, "source")?;
        let type_ = required_meta(meta, "type")?;
        let version = meta
            .get("version")
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .unwrap_or("1.0");
        Ok(CloudEventsTrigger {
            server,
            key: fingerprint(source, type_, version),
        })
    }
}

#[async_trait]
impl Trigger for CloudEventsTrigger {
    async fn start(&mut self, out: mpsc::Sender<Event>) -> Result<()> {
        self.server.register(&self.key, out).await
    }

    async fn stop(&mut self) -> Result<()> {
        debug!(msg = "unregistering cloud events trigger", key = %self.key);
        self.server.unregister(&self.key).await;
        Ok(())
    }
}
