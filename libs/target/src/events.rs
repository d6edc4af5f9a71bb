use eventrigger_k8s_util::error::{Error, Result};
use eventrigger_operator::driver::Target;
use eventrigger_operator::event::Event;

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::api::events::v1::Event as K8sEvent;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use k8s_openapi::jiff::Timestamp;
use kube::api::{Api, PostParams};
use kube::client::Client;
use tracing::debug;

const REPORTING_CONTROLLER: &str = "eventrigger";
const DEFAULT_REASON: &str = "EventTriggered";
const DEFAULT_ACTION: &str = "Dispatch";

/// Target emitting a cluster event after a successful actor execution.
pub struct K8sEventsTarget {
    client: Client,
    namespace: String,
    kind: Option<String>,
    api_version: Option<String>,
    type_: String,
    reason: String,
    message: Option<String>,
}

impl K8sEventsTarget {
    pub fn new(client: Client, meta: &BTreeMap<String, String>) -> Result<Self> {
        let namespace = meta
            .get("namespace")
            .cloned()
            .ok_or_else(|| Error::MissingData("events target requires namespace".to_string()))?;
        Ok(K8sEventsTarget {
            client,
            namespace,
            kind: meta.get("kind").cloned(),
            api_version: meta.get("api_version").cloned(),
            type_: meta.get("type").cloned().unwrap_or_else(|| "Normal".to_string()),
            reason: meta
                .get("reason")
                .cloned()
                .unwrap_or_else(|| DEFAULT_REASON.to_string()),
            message: meta.get("message").cloned(),
        })
    }

    fn generate_event(&self, event: &Event) -> K8sEvent {
        let now = Timestamp::now();
        K8sEvent {
            metadata: ObjectMeta {
                namespace: Some(self.namespace.clone()),
                name: Some(format!(
                    "{}.{}",
                    self.reason.to_lowercase(),
                    now.as_nanosecond()
                )),
                ..ObjectMeta::default()
            },
            action: Some(DEFAULT_ACTION.to_string()),
            reason: Some(self.reason.clone()),
            note: Some(
                self.message
                    .clone()
                    .unwrap_or_else(|| format!("{}/{} event dispatched", event.type_, event.source)),
            ),
            type_: Some(self.type_.clone()),
            event_time: Some(MicroTime(now)),
            regarding: Some(ObjectReference {
                kind: self.kind.clone(),
                api_version: self.api_version.clone(),
                namespace: Some(self.namespace.clone()),
                ..ObjectReference::default()
            }),
            reporting_controller: Some(REPORTING_CONTROLLER.to_string()),
            reporting_instance: Some(REPORTING_CONTROLLER.to_string()),
            ..K8sEvent::default()
        }
    }
}

#[async_trait]
impl Target for K8sEventsTarget {
    async fn exec(&self, event: &Event) -> Result<()> {
        let k8s_event = self.generate_event(event);
        debug!(
            msg = "emitting cluster event",
            namespace = %self.namespace,
            reason = %self.reason
        );
        let api: Api<K8sEvent> = Api::namespaced(self.client.clone(), &self.namespace);
        api.create(&PostParams::default(), &k8s_event)
            .await
            .map_err(|e| {
                Error::KubeError(
                    format!("failed to create event in {}", self.namespace),
                    Box::new(e),
                )
            })?;
        Ok(())
    }
}
