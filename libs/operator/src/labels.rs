//! Well-known label keys and wire headers.

pub const ACTION_TIMESTAMP: &str = "eventrigger.com/action-timestamp";
pub const EVENT_NAMESPACE: &str = "eventrigger.com/event-namespace";
pub const EVENT_SOURCE: &str = "eventrigger.com/event-source";
pub const EVENT_TYPE: &str = "eventrigger.com/event-type";
pub const EVENT_VERSION: &str = "eventrigger.com/event-version";
pub const EVENT_DATA: &str = "eventrigger.com/event-data";
pub const POD_UUID: &str = "eventrigger.com/pod-uuid";

pub const SCALE_TO_ZERO_ENABLE: &str = "eventrigger.com/scale-to-zero-enable";
pub const SCALE_TO_ZERO_IDLE_TIME: &str = "eventrigger.com/scale-to-zero-idle-time";

/// Inbound header carrying a caller-provided event uuid.
pub const UUID_HEADER: &str = "X-Event-Uuid";
/// Header injected on requests proxied to woken pods.
pub const EVENT_B64_HEADER: &str = "X-Event-Base64";
