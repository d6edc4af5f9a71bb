use crate::required_meta;

use eventrigger_operator::driver::Trigger;
use eventrigger_operator::error::{Error, Result};
use eventrigger_operator::event::Event;

use std::collections::BTreeMap;

use async_trait::async_trait;
use rdkafka::Message;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const TRIGGER_TYPE: &str = "kafka";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum OffsetResetPolicy {
    #[default]
    Latest,
    Earliest,
}

impl OffsetResetPolicy {
    fn parse(value: Option<&String>) -> Result<Self> {
        match value.map(String::as_str) {
            None | Some("latest") => Ok(OffsetResetPolicy::Latest),
            Some("earliest") => Ok(OffsetResetPolicy::Earliest),
            Some(other) => Err(Error::ParseError(format!(
                "not supported offset_reset_policy {other}"
            ))),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            OffsetResetPolicy::Latest => "latest",
            OffsetResetPolicy::Earliest => "earliest",
        }
    }
}

pub struct KafkaTrigger {
    servers: String,
    topic: String,
    group: String,
    policy: OffsetResetPolicy,
    handle: Option<JoinHandle<()>>,
}

impl KafkaTrigger {
    pub fn new(meta: &BTreeMap<String, String>) -> Result<Self> {
        let servers = required_meta(meta, "servers")?;
        let topic = required_meta(meta, "topic")?;
        let policy = OffsetResetPolicy::parse(meta.get("offset_reset_policy"))?;
        // a generated group id ignores committed offsets: no replay
        let group = meta
            .get("consumer_group")
            .cloned()
            .unwrap_or_else(|| format!("eventrigger-{}", Uuid::new_v4()));
        Ok(KafkaTrigger {
            servers: servers.to_string(),
            topic: topic.to_string(),
            group,
            policy,
            handle: None,
        })
    }
}

#[async_trait]
impl Trigger for KafkaTrigger {
    async fn start(&mut self, out: mpsc::Sender<Event>) -> Result<()> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.servers)
            .set("group.id", &self.group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", self.policy.as_str())
            .create()
            .map_err(|e| {
                Error::TriggerError(
                    format!("failed to create kafka consumer for {}", self.servers),
                    Box::new(e),
                )
            })?;
        consumer.subscribe(&[&self.topic]).map_err(|e| {
            Error::TriggerError(
                format!("failed to subscribe to the topic {}", self.topic),
                Box::new(e),
            )
        })?;
        info!(msg = "kafka trigger subscribed", topic = %self.topic, group = %self.group);

        let topic = self.topic.clone();
        self.handle = Some(tokio::spawn(async move {
            loop {
                match consumer.recv().await {
                    Ok(message) => {
                        debug!(
                            msg = "kafka message",
                            topic = message.topic(),
                            partition = message.partition(),
                            offset = message.offset()
                        );
                        let event = Event::simple(TRIGGER_TYPE, message.topic(), "");
                        if out.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(msg = format!("kafka consume error on {topic}: {e}"));
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        // dropping the aborted task closes every partition stream
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new_defaults_to_latest_and_generated_group() {
        let meta = BTreeMap::from([
            ("servers".to_string(), "broker:9092".to_string()),
            ("topic".to_string(), "t".to_string()),
        ]);
        let trigger = KafkaTrigger::new(&meta).unwrap();
        assert_eq!(trigger.policy, OffsetResetPolicy::Latest);
        assert!(trigger.group.starts_with("eventrigger-"));
    }

    #[test]
    fn test_new_rejects_unknown_policy() {
        let meta = BTreeMap::from([
            ("servers".to_string(), "broker:9092".to_string()),
            ("topic".to_string(), "t".to_string()),
            ("offset_reset_policy".to_string(), "newest".to_string()),
        ]);
        assert!(KafkaTrigger::new(&meta).is_err());
    }

    #[test]
    fn test_new_accepts_earliest_and_explicit_group() {
        let meta = BTreeMap::from([
            ("servers".to_string(), "broker:9092".to_string()),
            ("topic".to_string(), "t".to_string()),
            ("offset_reset_policy".to_string(), "earliest".to_string()),
            ("consumer_group".to_string(), "cg".to_string()),
        ]);
        let trigger = KafkaTrigger::new(&meta).unwrap();
        assert_eq!(trigger.policy, OffsetResetPolicy::Earliest);
        assert_eq!(trigger.group, "cg");
    }
}
