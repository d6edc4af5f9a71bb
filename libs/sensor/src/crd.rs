use eventrigger_actor::Operation;
use eventrigger_operator::labels;

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
#[cfg(feature = "schemars")]
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Idle window when scale-to-zero is enabled without an explicit value.
pub const DEFAULT_IDLE_TIME: Duration = Duration::from_secs(60);
/// Idle window when scale-to-zero is disabled: the timer never fires in
/// practice.
pub const EFFECTIVELY_INFINITE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// A Sensor binds one external event trigger to an actor and an optional
/// post-actor target. The operator keeps one live runner per Sensor.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[kube(
    category = "eventrigger",
    group = "eventrigger.com",
    version = "v1",
    kind = "Sensor",
    plural = "sensors",
    singular = "sensor",
    shortname = "sn",
    namespaced,
    status = "SensorStatus",
    printcolumn = r#"{"name":"Trigger","type":"string","jsonPath":".spec.trigger.type"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct SensorSpec {
    pub trigger: TriggerSpec,
    pub actor: ActorSpec,

    /// Optional side-effect executed after a successful actor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct TriggerSpec {
    #[serde(rename = "type")]
    pub type_: TriggerType,

    /// Protocol-specific key/value configuration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Mqtt,
    Kafka,
    Redis,
    Cron,
    Http,
    K8sHttp,
    CloudEvents,
    K8sEvents,
}

serde_plain::derive_display_from_serialize!(TriggerType);

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct ActorSpec {
    pub template: ActorTemplate,
}

/// Exactly one of the sub-kinds must be populated.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct ActorTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k8s: Option<K8sActorTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpActorTemplate>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct K8sActorTemplate {
    pub source: ArtifactLocation,

    #[serde(default)]
    pub operation: Operation,
}

/// Source location of the operated resource. The inline resource document is
/// the only variant the runner consumes.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct ArtifactLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceArtifact>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct ResourceArtifact {
    /// Inline YAML document of the operated resource.
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct HttpActorTemplate {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
pub struct TargetSpec {
    #[serde(rename = "type")]
    pub type_: TargetType,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    #[default]
    Http,
    Events,
}

serde_plain::derive_display_from_serialize!(TargetType);

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct SensorStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judgment: Option<Judgment>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "schemars", derive(JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct Judgment {
    /// Identifier generated when the sensor is first observed.
    #[serde(default)]
    pub event_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Sensor {
    fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    pub fn scale_to_zero_enabled(&self) -> bool {
        self.label(labels::SCALE_TO_ZERO_ENABLE) == Some("true")
    }

    /// Idle window driving the runner's timer. Effectively infinite when
    /// scale-to-zero is disabled; defaults to 60s when enabled with a zero
    /// or unparseable value.
    pub fn idle_duration(&self) -> Duration {
        if !self.scale_to_zero_enabled() {
            return EFFECTIVELY_INFINITE;
        }
        let seconds = self
            .label(labels::SCALE_TO_ZERO_IDLE_TIME)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        if seconds == 0 {
            DEFAULT_IDLE_TIME
        } else {
            Duration::from_secs(seconds)
        }
    }
}
