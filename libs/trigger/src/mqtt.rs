use crate::required_meta;

use eventrigger_operator::driver::Trigger;
use eventrigger_operator::error::{Error, Result};
use eventrigger_operator::event::Event;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

const TRIGGER_TYPE: &str = "mqtt";
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(1);
const DEFAULT_PORT: u16 = 1883;

pub struct MqttTrigger {
    host: String,
    port: u16,
    topic: String,
    username: Option<String>,
    password: Option<String>,
    keep_alive: Duration,
    handle: Option<JoinHandle<()>>,
}

impl MqttTrigger {
    pub fn new(meta: &BTreeMap<String, String>) -> Result<Self> {
        let uri = required_meta(meta, "uri")?;
        let topic = required_meta(meta, "topic")?;
        let url = Url::parse(uri)
            .map_err(|e| Error::TriggerError(format!("invalid mqtt uri {uri}"), Box::new(e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| Error::ParseError(format!("mqtt uri {uri} has no host")))?
            .to_string();
        let keep_alive = meta
            .get("ping_timeout")
            .map(|v| {
                v.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| Error::ParseError(format!("invalid ping_timeout {v}")))
            })
            .transpose()?
            .unwrap_or(DEFAULT_KEEP_ALIVE);
        Ok(MqttTrigger {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            topic: topic.to_string(),
            username: meta.get("username").cloned(),
            password: meta.get("password").cloned(),
            keep_alive,
            handle: None,
        })
    }
}

#[async_trait]
impl Trigger for MqttTrigger {
    async fn start(&mut self, out: mpsc::Sender<Event>) -> Result<()> {
        let client_id = format!("eventrigger-{}", Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        let (client, mut eventloop) = AsyncClient::new(options, 16);

        // surface connect errors before spawning: any connect error is fatal
        loop {
            match eventloop.poll().await {
                Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => continue,
                Err(e) => {
                    return Err(Error::TriggerError(
                        format!("failed to connect to mqtt://{}:{}", self.host, self.port),
                        Box::new(e),
                    ));
                }
            }
        }
        client
            .subscribe(&self.topic, QoS::AtMostOnce)
            .await
            .map_err(|e| {
                Error::TriggerError(
                    format!("failed to subscribe to the topic {}", self.topic),
                    Box::new(e),
                )
            })?;
        info!(msg = "mqtt trigger subscribed", topic = %self.topic);

        let topic = self.topic.clone();
        self.handle = Some(tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                        let event = Event::simple(
                            TRIGGER_TYPE,
                            publish.topic.clone(),
                            String::from_utf8_lossy(&publish.payload).into_owned(),
                        );
                        debug!(msg = "mqtt message", topic = %publish.topic);
                        if out.send(event).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(msg = format!("mqtt connection error on {topic}: {e}"));
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        Ok(())
    }
}
