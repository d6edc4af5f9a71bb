use crate::required_meta;

use eventrigger_operator::driver::Trigger;
use eventrigger_operator::error::{Error, Result};
use eventrigger_operator::event::Event;

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const TRIGGER_TYPE: &str = "cron";

/// Second-precision 6-field cron trigger.
pub struct CronTrigger {
    spec: String,
    schedule: Schedule,
    handle: Option<JoinHandle<()>>,
}

impl CronTrigger {
    pub fn new(meta: &BTreeMap<String, String>) -> Result<Self> {
        let spec = required_meta(meta, "cron")?;
        if spec.split_whitespace().count() != 6 {
            return Err(Error::ParseError(format!(
                "cron spec {spec} must have 6 fields"
            )));
        }
        let schedule = Schedule::from_str(spec)
            .map_err(|e| Error::TriggerError(format!("invalid cron spec {spec}"), Box::new(e)))?;
        Ok(CronTrigger {
            spec: spec.to_string(),
            schedule,
            handle: None,
        })
    }
}

#[async_trait]
impl Trigger for CronTrigger {
    async fn start(&mut self, out: mpsc::Sender<Event>) -> Result<()> {
        let schedule = self.schedule.clone();
        info!(msg = "cron trigger scheduled", spec = %self.spec);
        self.handle = Some(tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    debug!(msg = "cron schedule exhausted");
                    return;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                let event = Event::simple(
                    TRIGGER_TYPE,
                    "",
                    // nanosecond timestamps stay representable until 2262
                    Utc::now().timestamp_nanos_opt().unwrap_or_default().to_string(),
                );
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
