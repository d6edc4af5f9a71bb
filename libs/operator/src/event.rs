use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain event flowing from a trigger to an actor.
///
/// Events are small and immutable once constructed. `uuid` is generated when
/// the source did not carry one; `version` defaults to the arrival timestamp
/// in nanoseconds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub source: String,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub uuid: String,
}

impl Event {
    pub fn new(
        namespace: impl Into<String>,
        type_: impl Into<String>,
        source: impl Into<String>,
        version: impl Into<String>,
        data: impl Into<String>,
        uuid: impl Into<String>,
    ) -> Self {
        let uuid = uuid.into();
        let version = version.into();
        Event {
            namespace: namespace.into(),
            source: source.into(),
            type_: type_.into(),
            version: if version.is_empty() {
                // nanosecond timestamps stay representable until 2262
                Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string()
            } else {
                version
            },
            data: data.into(),
            uuid: if uuid.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                uuid
            },
        }
    }

    /// Event with only a type, source and payload, as emitted by most
    /// protocol triggers.
    pub fn simple(
        type_: impl Into<String>,
        source: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Event::new("", type_, source, "", data, "")
    }
}

#[cfg(test)]
mod test {
    use super::Event;

    #[test]
    fn test_new_event_generates_uuid_and_version() {
        let event = Event::new("ns", "mqtt", "topic", "", "hi", "");
        assert!(!event.uuid.is_empty());
        assert!(event.version.parse::<i64>().is_ok());
        assert_eq!(event.namespace, "ns");
        assert_eq!(event.type_, "mqtt");
    }

    #[test]
    fn test_new_event_keeps_provided_identity() {
        let event = Event::new("", "http", "", "v1", "", "abc");
        assert_eq!(event.uuid, "abc");
        assert_eq!(event.version, "v1");
    }

    #[test]
    fn test_event_serde_uses_type_key() {
        let event = Event::simple("cron", "", "1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cron");
        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
