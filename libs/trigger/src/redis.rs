use crate::required_meta;

use eventrigger_operator::driver::Trigger;
use eventrigger_operator::error::{Error, Result};
use eventrigger_operator::event::Event;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct RedisTrigger {
    url: String,
    channel: String,
    handle: Option<JoinHandle<()>>,
}

impl RedisTrigger {
    pub fn new(meta: &BTreeMap<String, String>) -> Result<Self> {
        let addr = required_meta(meta, "addr")?;
        let channel = required_meta(meta, "channel")?;
        let db = meta
            .get("db")
            .map(|v| {
                v.parse::<u32>()
                    .map_err(|_| Error::ParseError(format!("invalid redis db {v}")))
            })
            .transpose()?
            .unwrap_or(0);
        let auth = match (meta.get("username"), meta.get("password")) {
            (Some(user), Some(pass)) => format!("{user}:{pass}@"),
            (None, Some(pass)) => format!(":{pass}@"),
            _ => String::new(),
        };
        Ok(RedisTrigger {
            url: format!("redis://{auth}{addr}/{db}"),
            channel: channel.to_string(),
            handle: None,
        })
    }
}

#[async_trait]
impl Trigger for RedisTrigger {
    async fn start(&mut self, out: mpsc::Sender<Event>) -> Result<()> {
        let client = redis::Client::open(self.url.as_str()).map_err(|e| {
            Error::TriggerError("invalid redis connection info".to_string(), Box::new(e))
        })?;
        let mut pubsub = client.get_async_pubsub().await.map_err(|e| {
            Error::TriggerError("failed to connect to redis".to_string(), Box::new(e))
        })?;
        pubsub.subscribe(&self.channel).await.map_err(|e| {
            Error::TriggerError(
                format!("failed to subscribe to the channel {}", self.channel),
                Box::new(e),
            )
        })?;
        info!(msg = "redis trigger subscribed", channel = %self.channel);

        self.handle = Some(tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                let channel = message.get_channel_name().to_string();
                let payload: String = message.get_payload().unwrap_or_default();
                debug!(msg = "redis message", channel = %channel);
                let event = Event::simple("redis", channel, payload);
                if out.send(event).await.is_err() {
                    return;
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
