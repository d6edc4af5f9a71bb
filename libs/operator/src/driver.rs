use crate::error::Result;
use crate::event::Event;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

/// An event producer bound to one Sensor.
///
/// `start` spawns the producer task(s) and returns; emitted events go to
/// `out` and block when the runner's channel is full. Drivers are not
/// restartable after `stop`, which must be idempotent.
#[async_trait]
pub trait Trigger: Send {
    async fn start(&mut self, out: mpsc::Sender<Event>) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
}

/// The action executed for every event of a Sensor.
#[async_trait]
pub trait Actor: Send + Sync {
    async fn exec(&self, event: &Event) -> Result<()>;

    /// Periodic idle probe driven by the runner's timer. Implementations
    /// without scale-to-zero semantics do nothing.
    async fn check(&self, idle: Duration, last_event_at: DateTime<Utc>) -> Result<()>;
}

/// Optional post-actor side-effect. Best-effort: failures are logged by the
/// runner and never fail the event.
#[async_trait]
pub trait Target: Send + Sync {
    async fn exec(&self, event: &Event) -> Result<()>;
}
