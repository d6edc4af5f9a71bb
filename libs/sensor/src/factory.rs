use crate::crd::{Sensor, TargetType, TriggerType};

use eventrigger_actor::Operation;
use eventrigger_actor::http::HttpActor;
use eventrigger_actor::k8s::K8sActor;
use eventrigger_ingress::cloud_events::CloudEventsServer;
use eventrigger_ingress::http::HttpRouter;
use eventrigger_ingress::k8s_events::ClusterEventsInformer;
use eventrigger_ingress::proxy::WakeTarget;
use eventrigger_k8s_util::resources::decode_resource;
use eventrigger_operator::driver::{Actor, Target, Trigger};
use eventrigger_operator::error::{Error, Result};
use eventrigger_trigger::cloud_events::CloudEventsTrigger;
use eventrigger_trigger::cron::CronTrigger;
use eventrigger_trigger::http::HttpTrigger;
use eventrigger_trigger::k8s_events::K8sEventsTrigger;
use eventrigger_trigger::k8s_http::K8sHttpTrigger;
use eventrigger_trigger::kafka::KafkaTrigger;
use eventrigger_trigger::mqtt::MqttTrigger;
use eventrigger_trigger::redis::RedisTrigger;

use std::sync::Arc;

use kube::ResourceExt;
use kube::client::Client;

/// The three process-global listeners, injected into drivers at
/// construction.
#[derive(Clone)]
pub struct Muxes {
    pub http_router: Arc<HttpRouter>,
    pub cloud_events: Arc<CloudEventsServer>,
    pub cluster_events: Arc<ClusterEventsInformer>,
}

pub fn build_trigger(
    sensor: &Sensor,
    muxes: &Muxes,
) -> Result<Box<dyn Trigger>> {
    let trigger = &sensor.spec.trigger;
    let meta = &trigger.meta;
    let built: Box<dyn Trigger> = match trigger.type_ {
        TriggerType::Mqtt => Box::new(MqttTrigger::new(meta)?),
        TriggerType::Kafka => Box::new(KafkaTrigger::new(meta)?),
        TriggerType::Redis => Box::new(RedisTrigger::new(meta)?),
        TriggerType::Cron => Box::new(CronTrigger::new(meta)?),
        TriggerType::Http => Box::new(HttpTrigger::new(muxes.http_router.clone(), meta)?),
        TriggerType::K8sHttp => {
            let wake = wake_target(sensor)?;
            Box::new(K8sHttpTrigger::new(muxes.http_router.clone(), meta, wake)?)
        }
        TriggerType::CloudEvents => {
            Box::new(CloudEventsTrigger::new(muxes.cloud_events.clone(), meta)?)
        }
        TriggerType::K8sEvents => {
            Box::new(K8sEventsTrigger::new(muxes.cluster_events.clone(), meta)?)
        }
    };
    Ok(built)
}

/// The k8s-http trigger demands a bound Kubernetes actor; resolve its
/// workload into the pod selector the wake path watches.
fn wake_target(sensor: &Sensor) -> Result<WakeTarget> {
    let template = sensor.spec.actor.template.k8s.as_ref().ok_or_else(|| {
        Error::MissingData("k8s_http trigger requires a kubernetes actor".to_string())
    })?;
    if !matches!(template.operation, Operation::Scale | Operation::Create) {
        return Err(Error::UnsupportedKind(
            template.operation.to_string(),
            "k8s_http trigger".to_string(),
        ));
    }
    let value = inline_resource(sensor)?;
    let (obj, resource) = decode_resource(value)?;
    let namespace = obj
        .metadata
        .namespace
        .clone()
        .or_else(|| sensor.namespace())
        .unwrap_or_else(|| "default".to_string());
    WakeTarget::from_resource(&obj, &resource.kind, &namespace)
}

fn inline_resource(sensor: &Sensor) -> Result<&str> {
    sensor
        .spec
        .actor
        .template
        .k8s
        .as_ref()
        .and_then(|t| t.source.resource.as_ref())
        .map(|r| r.value.as_str())
        .ok_or_else(|| Error::MissingData("kubernetes actor has no inline resource".to_string()))
}

pub fn build_actor(sensor: &Sensor, client: Client) -> Result<Arc<dyn Actor>> {
    let template = &sensor.spec.actor.template;
    match (&template.k8s, &template.http) {
        (Some(k8s), None) => {
            let value = inline_resource(sensor)?;
            Ok(Arc::new(K8sActor::new(
                client,
                k8s.operation,
                value,
                sensor.scale_to_zero_enabled(),
            )?))
        }
        (None, Some(http)) => Ok(Arc::new(HttpActor::new(
            &http.url,
            http.method.as_deref(),
            http.timeout,
            http.headers.as_ref(),
        )?)),
        (Some(_), Some(_)) => Err(Error::MissingData(
            "actor template must populate exactly one of k8s and http".to_string(),
        )),
        (None, None) => Err(Error::MissingData("no valid actor template".to_string())),
    }
}

pub fn build_target(sensor: &Sensor, client: Client) -> Result<Option<Arc<dyn Target>>> {
    let Some(target) = sensor.spec.target.as_ref() else {
        return Ok(None);
    };
    let built: Arc<dyn Target> = match target.type_ {
        TargetType::Http => Arc::new(eventrigger_target::http::HttpTarget::new(&target.meta)?),
        TargetType::Events => Arc::new(eventrigger_target::events::K8sEventsTarget::new(
            client,
            &target.meta,
        )?),
    };
    Ok(Some(built))
}
