use crate::Operation;

use eventrigger_k8s_util::error::{Error, Result};
use eventrigger_k8s_util::resources::{decode_resource, dynamic_api, effective_namespace};
use eventrigger_k8s_util::scale::{get_replicas, patch_replicas};
use eventrigger_operator::driver::Actor;
use eventrigger_operator::event::Event;
use eventrigger_operator::labels;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod};
use kube::api::{Api, DynamicObject, PostParams};
use kube::core::ApiResource;
use kube::client::Client;
use tracing::{debug, info};

const POD_KIND: &str = "Pod";
const JOB_KIND: &str = "Job";
const DEPLOYMENT_KIND: &str = "Deployment";
const STATEFULSET_KIND: &str = "StatefulSet";

/// Actor operating one inline Kubernetes resource, decoded once at
/// construction.
pub struct K8sActor {
    client: Client,
    operation: Operation,
    obj: DynamicObject,
    resource: ApiResource,
    scale_to_zero: bool,
}

impl K8sActor {
    pub fn new(
        client: Client,
        operation: Operation,
        resource_value: &str,
        scale_to_zero: bool,
    ) -> Result<Self> {
        let (obj, resource) = decode_resource(resource_value)?;
        if obj.metadata.name.is_none() {
            return Err(Error::MissingData(
                "inline resource has no metadata.name".to_string(),
            ));
        }
        Ok(K8sActor {
            client,
            operation,
            obj,
            resource,
            scale_to_zero,
        })
    }

    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    /// The decoded inline object; the wake path derives its pod selector
    /// from it.
    pub fn object(&self) -> &DynamicObject {
        &self.obj
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    fn name(&self) -> &str {
        // safe unwrap: presence checked at construction
        self.obj.metadata.name.as_deref().unwrap()
    }

    fn namespace(&self, event: &Event) -> Option<String> {
        effective_namespace(
            &self.resource,
            self.obj.metadata.namespace.as_deref(),
            &event.namespace,
        )
    }

    async fn create(&self, event: &Event) -> Result<()> {
        let namespace = self.namespace(event);
        let dict = event_dict(event);
        let mut obj = self.obj.clone();
        obj.metadata.namespace = namespace.clone();
        stamp_labels(&mut obj, &dict);

        match self.resource.kind.as_str() {
            POD_KIND => {
                let mut pod: Pod = convert(&obj)?;
                if let Some(spec) = pod.spec.as_mut() {
                    inject_env(&mut spec.containers, &dict);
                }
                let api: Api<Pod> =
                    Api::namespaced(self.client.clone(), namespace.as_deref().unwrap_or("default"));
                api.create(&PostParams::default(), &pod).await.map_err(|e| {
                    Error::KubeError(format!("failed to create pod {}", self.name()), Box::new(e))
                })?;
            }
            JOB_KIND => {
                let mut job: Job = convert(&obj)?;
                if let Some(containers) = job
                    .spec
                    .as_mut()
                    .and_then(|s| s.template.spec.as_mut())
                    .map(|s| &mut s.containers)
                {
                    inject_env(containers, &dict);
                }
                let api: Api<Job> =
                    Api::namespaced(self.client.clone(), namespace.as_deref().unwrap_or("default"));
                api.create(&PostParams::default(), &job).await.map_err(|e| {
                    Error::KubeError(format!("failed to create job {}", self.name()), Box::new(e))
                })?;
            }
            _ => {
                let api = dynamic_api(self.client.clone(), &self.resource, namespace.as_deref());
                api.create(&PostParams::default(), &obj).await.map_err(|e| {
                    Error::KubeError(
                        format!("failed to create {} {}", self.resource.kind, self.name()),
                        Box::new(e),
                    )
                })?;
            }
        }
        Ok(())
    }

    async fn delete(&self, event: &Event) -> Result<()> {
        let namespace = self.namespace(event);
        let api = dynamic_api(self.client.clone(), &self.resource, namespace.as_deref());
        match api.get(self.name()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                info!(msg = "object not found, nothing to delete", name = self.name());
                return Ok(());
            }
            Err(e) => {
                return Err(Error::KubeError(
                    format!("failed to get {} {}", self.resource.kind, self.name()),
                    Box::new(e),
                ));
            }
        }
        api.delete(self.name(), &Default::default())
            .await
            .map_err(|e| {
                Error::KubeError(
                    format!("failed to delete {} {}", self.resource.kind, self.name()),
                    Box::new(e),
                )
            })?;
        Ok(())
    }

    /// Ensure the workload exists and runs with at least one replica. Never
    /// reduces replicas.
    async fn scale_up(&self, event: &Event) -> Result<()> {
        let namespace = self
            .namespace(event)
            .unwrap_or_else(|| "default".to_string());
        if !matches!(
            self.resource.kind.as_str(),
            DEPLOYMENT_KIND | STATEFULSET_KIND
        ) {
            return Err(Error::UnsupportedKind(
                self.resource.kind.clone(),
                "scale".to_string(),
            ));
        }

        let api = dynamic_api(self.client.clone(), &self.resource, Some(&namespace));
        match api.get(self.name()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                info!(
                    msg = "workload missing, creating before scale",
                    kind = %self.resource.kind,
                    name = self.name()
                );
                let mut obj = self.obj.clone();
                obj.metadata.namespace = Some(namespace.clone());
                // the monotone-up pass below decides the replica count
                if let Some(spec) = obj.data.get_mut("spec").and_then(|s| s.as_object_mut()) {
                    spec.insert("replicas".to_string(), serde_json::json!(0));
                }
                api.create(&PostParams::default(), &obj).await.map_err(|e| {
                    Error::KubeError(
                        format!("failed to create {} {}", self.resource.kind, self.name()),
                        Box::new(e),
                    )
                })?;
            }
            Err(e) => {
                return Err(Error::KubeError(
                    format!("failed to get {} {}", self.resource.kind, self.name()),
                    Box::new(e),
                ));
            }
        }

        match self.resource.kind.as_str() {
            DEPLOYMENT_KIND => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
                let current = get_replicas(&api, self.name()).await?;
                if scale_up_target(current).is_some() {
                    patch_replicas(&api, self.name(), 1).await?;
                }
            }
            STATEFULSET_KIND => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &namespace);
                let current = get_replicas(&api, self.name()).await?;
                if scale_up_target(current).is_some() {
                    patch_replicas(&api, self.name(), 1).await?;
                }
            }
            // safe unreachable: kind checked above
            _ => unreachable!(),
        }
        Ok(())
    }

    async fn scale_to_zero(&self) -> Result<()> {
        let namespace = self
            .obj
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        info!(
            msg = "idle window elapsed, scaling to zero",
            kind = %self.resource.kind,
            name = self.name(),
            namespace
        );
        match self.resource.kind.as_str() {
            DEPLOYMENT_KIND => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
                match patch_replicas(&api, self.name(), 0).await {
                    Ok(()) => Ok(()),
                    // already gone counts as scaled down
                    Err(Error::KubeError(_, e)) if is_not_found(&e) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            STATEFULSET_KIND => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &namespace);
                patch_replicas(&api, self.name(), 0).await
            }
            other => Err(Error::UnsupportedKind(
                other.to_string(),
                "scale".to_string(),
            )),
        }
    }
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

/// Replica count the monotone-up pass should patch to, if any.
fn scale_up_target(current: i32) -> Option<i32> {
    (current < 1).then_some(1)
}

fn convert<K: serde::de::DeserializeOwned>(obj: &DynamicObject) -> Result<K> {
    // safe unwrap: DynamicObject is always serializable
    let value = serde_json::to_value(obj).unwrap();
    serde_json::from_value(value).map_err(|e| {
        Error::SerializationError("failed to convert inline resource".to_string(), e)
    })
}

/// Event metadata stamped as labels on every created object and injected as
/// env vars into Pod and Job containers.
fn event_dict(event: &Event) -> BTreeMap<String, String> {
    let mut dict = BTreeMap::from([
        (
            labels::ACTION_TIMESTAMP.to_string(),
            Utc::now().timestamp_millis().to_string(),
        ),
        (labels::EVENT_NAMESPACE.to_string(), event.namespace.clone()),
        (labels::EVENT_SOURCE.to_string(), event.source.clone()),
        (labels::EVENT_TYPE.to_string(), event.type_.clone()),
        (labels::EVENT_VERSION.to_string(), event.version.clone()),
        (labels::EVENT_DATA.to_string(), event.data.clone()),
    ]);
    if !event.uuid.is_empty() {
        dict.insert(labels::POD_UUID.to_string(), event.uuid.clone());
    }
    dict
}

fn stamp_labels(obj: &mut DynamicObject, dict: &BTreeMap<String, String>) {
    let labels = obj.metadata.labels.get_or_insert_with(BTreeMap::new);
    for (k, v) in dict {
        labels.insert(k.clone(), v.clone());
    }
}

fn inject_env(containers: &mut [Container], dict: &BTreeMap<String, String>) {
    for container in containers {
        let env = container.env.get_or_insert_with(Vec::new);
        env.extend(dict.iter().map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            value_from: None,
        }));
    }
}

#[async_trait]
impl Actor for K8sActor {
    async fn exec(&self, event: &Event) -> Result<()> {
        debug!(
            msg = "executing kubernetes actor",
            operation = %self.operation,
            kind = %self.resource.kind,
            name = self.name()
        );
        match self.operation {
            Operation::Create => self.create(event).await,
            Operation::Delete => self.delete(event).await,
            Operation::Scale => self.scale_up(event).await,
        }
    }

    async fn check(&self, idle: Duration, last_event_at: DateTime<Utc>) -> Result<()> {
        if !self.scale_to_zero {
            return Ok(());
        }
        let idle_for = Utc::now().signed_duration_since(last_event_at);
        if idle_for.to_std().unwrap_or_default() < idle {
            return Ok(());
        }
        self.scale_to_zero().await
    }
}
