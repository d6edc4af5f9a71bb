use crate::crd::Sensor;

use eventrigger_operator::driver::{Actor, Target, Trigger};
use eventrigger_operator::error::Result;
use eventrigger_operator::event::Event;
use eventrigger_operator::metrics::ControllerMetrics;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Short burst absorption on the event path; producers block beyond it.
const EVENT_CHANNEL_CAPACITY: usize = 2;
/// Tolerates a duplicate stop call from the controller.
const STOP_CHANNEL_CAPACITY: usize = 2;
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub type RunnerTable = Arc<RwLock<HashMap<String, Arc<RunnerHandle>>>>;

struct RunnerState {
    last_event_at: DateTime<Utc>,
    event_count: u64,
}

/// Per-Sensor task coupling one trigger to one actor and driving the idle
/// timer. The loop is single-threaded; actor execution is serial per Sensor.
pub struct Runner {
    key: String,
    trigger: Box<dyn Trigger>,
    actor: Arc<dyn Actor>,
    target: Option<Arc<dyn Target>>,
    idle: Duration,
    metrics: Arc<ControllerMetrics>,
    events_tx: Option<mpsc::Sender<Event>>,
    events_rx: mpsc::Receiver<Event>,
    stop_rx: mpsc::Receiver<()>,
    stop_tx: mpsc::Sender<()>,
    state: Mutex<RunnerState>,
}

/// Table entry for a live runner. Holds the Sensor it was built from so the
/// controller can diff updates against it.
pub struct RunnerHandle {
    id: Uuid,
    pub sensor: Sensor,
    stop_tx: mpsc::Sender<()>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl RunnerHandle {
    /// Signal the loop to exit and wait for the trigger to be released.
    /// Best-effort and idempotent; the capacity-2 stop channel absorbs a
    /// duplicate call.
    pub async fn stop(&self) {
        let _ = self.stop_tx.try_send(());
        if let Some(join) = self.join.lock().await.take() {
            let abort = join.abort_handle();
            if tokio::time::timeout(STOP_TIMEOUT, join).await.is_err() {
                warn!(msg = "runner did not stop in time, aborting");
                abort.abort();
            }
        }
    }
}

impl Runner {
    pub fn new(
        key: String,
        trigger: Box<dyn Trigger>,
        actor: Arc<dyn Actor>,
        target: Option<Arc<dyn Target>>,
        idle: Duration,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = mpsc::channel(STOP_CHANNEL_CAPACITY);
        Runner {
            key,
            trigger,
            actor,
            target,
            idle,
            metrics,
            events_tx: Some(events_tx),
            events_rx,
            stop_rx,
            stop_tx,
            state: Mutex::new(RunnerState {
                last_event_at: Utc::now(),
                event_count: 0,
            }),
        }
    }

    /// Start the trigger and launch the event loop. Trigger start failures
    /// (bad config, mux collisions) surface here and leave no running task.
    pub async fn start(
        mut self,
        sensor: Sensor,
        table: RunnerTable,
    ) -> Result<Arc<RunnerHandle>> {
        // the trigger holds the only sender once the loop owns the receiver
        let events_tx = self
            .events_tx
            .take()
            .expect("runner can only be started once");
        self.trigger.start(events_tx).await?;

        let handle_id = Uuid::new_v4();
        let key = self.key.clone();
        let stop_tx = self.stop_tx.clone();
        let loop_table = table.clone();
        let join = tokio::spawn(async move {
            let mut runner = self;
            runner.run().await;
            // self-removal on terminal exit; the id guard keeps a respawned
            // runner's entry intact
            let mut runners = loop_table.write().await;
            if runners.get(&key).map(|h| h.id) == Some(handle_id) {
                runners.remove(&key);
            }
        });
        Ok(Arc::new(RunnerHandle {
            id: handle_id,
            sensor,
            stop_tx,
            join: Mutex::new(Some(join)),
        }))
    }

    async fn run(&mut self) {
        info!(msg = "runner started", key = %self.key, idle = ?self.idle);
        let mut ticker = tokio::time::interval(self.idle);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first interval tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                maybe_event = self.events_rx.recv() => match maybe_event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        error!(msg = "runner event channel closed", key = %self.key);
                        break;
                    }
                },
                _ = ticker.tick() => self.handle_tick().await,
                _ = self.stop_rx.recv() => {
                    info!(msg = "runner received stop", key = %self.key);
                    break;
                }
            }
        }

        if let Err(e) = self.trigger.stop().await {
            // driver stop errors are logged and ignored
            warn!(msg = "trigger stop failed", key = %self.key, %e);
        }
        info!(msg = "runner stopped", key = %self.key);
    }

    async fn handle_event(&mut self, event: Event) {
        {
            let mut state = self.state.lock().await;
            state.event_count += 1;
            state.last_event_at = Utc::now();
            debug!(
                msg = "event received",
                key = %self.key,
                count = state.event_count,
                event_type = %event.type_
            );
        }
        self.metrics.events_received_inc(&event.type_);

        if let Err(e) = self.actor.exec(&event).await {
            error!(msg = "actor execution failed", key = %self.key, %e);
            self.metrics.actor_failure_inc();
            return;
        }
        info!(
            msg = format!("successfully exec event {}-{} with actor", event.type_, event.source),
            key = %self.key
        );

        if let Some(target) = &self.target {
            // best-effort side-effect: never fails the event
            if let Err(e) = target.exec(&event).await {
                warn!(msg = "target execution failed", key = %self.key, %e);
                self.metrics.target_failure_inc();
            }
        }
    }

    async fn handle_tick(&self) {
        let last_event_at = { self.state.lock().await.last_event_at };
        if let Err(e) = self.actor.check(self.idle, last_event_at).await {
            error!(msg = "idle check failed", key = %self.key, %e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use async_trait::async_trait;
    use eventrigger_operator::metrics::Metrics;
    use opentelemetry::metrics::MeterProvider;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn metrics() -> Arc<ControllerMetrics> {
        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().build();
        let meter = provider.meter("test");
        Metrics::new(&meter, &["sensor"]).controllers["sensor"].clone()
    }

    struct NullTrigger {
        fail_start: bool,
        stopped: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Trigger for NullTrigger {
        async fn start(&mut self, _out: mpsc::Sender<Event>) -> Result<()> {
            if self.fail_start {
                return Err(eventrigger_operator::error::Error::CollisionError(
                    "host a.example".to_string(),
                ));
            }
            Ok(())
        }

        async fn stop(&mut self) -> Result<()> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingActor {
        execs: AtomicU64,
        checks: AtomicU64,
    }

    #[async_trait]
    impl Actor for CountingActor {
        async fn exec(&self, _event: &Event) -> Result<()> {
            self.execs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn check(&self, _idle: Duration, _last: DateTime<Utc>) -> Result<()> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingTarget {
        execs: AtomicU64,
    }

    #[async_trait]
    impl Target for CountingTarget {
        async fn exec(&self, _event: &Event) -> Result<()> {
            self.execs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn table() -> RunnerTable {
        Arc::new(RwLock::new(HashMap::new()))
    }

    fn runner(
        idle: Duration,
        actor: Arc<CountingActor>,
        target: Option<Arc<CountingTarget>>,
        stopped: Arc<AtomicU64>,
    ) -> (Runner, mpsc::Sender<Event>) {
        let runner = Runner::new(
            "default/s".to_string(),
            Box::new(NullTrigger {
                fail_start: false,
                stopped,
            }),
            actor,
            target.map(|t| t as Arc<dyn Target>),
            idle,
            metrics(),
        );
        // safe unwrap: the runner has not been started yet
        let events_tx = runner.events_tx.clone().unwrap();
        (runner, events_tx)
    }

    #[tokio::test]
    async fn test_event_drives_actor_and_target() {
        let actor = Arc::new(CountingActor::default());
        let target = Arc::new(CountingTarget::default());
        let stopped = Arc::new(AtomicU64::new(0));
        let (r, events_tx) = runner(
            Duration::from_secs(3600),
            actor.clone(),
            Some(target.clone()),
            stopped.clone(),
        );
        let table = table();
        let handle = r.start(Sensor::default(), table.clone()).await.unwrap();
        table
            .write()
            .await
            .insert("default/s".to_string(), handle.clone());

        events_tx.send(Event::simple("mqtt", "t", "hi")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(actor.execs.load(Ordering::SeqCst), 1);
        assert_eq!(target.execs.load(Ordering::SeqCst), 1);

        handle.stop().await;
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_tick_drives_actor_check() {
        let actor = Arc::new(CountingActor::default());
        let stopped = Arc::new(AtomicU64::new(0));
        let (r, _events_tx) = runner(
            Duration::from_millis(20),
            actor.clone(),
            None,
            stopped.clone(),
        );
        let handle = r.start(Sensor::default(), table()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(actor.checks.load(Ordering::SeqCst) >= 2);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let actor = Arc::new(CountingActor::default());
        let stopped = Arc::new(AtomicU64::new(0));
        let (r, _events_tx) = runner(Duration::from_secs(3600), actor, None, stopped.clone());
        let handle = r.start(Sensor::default(), table()).await.unwrap();
        handle.stop().await;
        handle.stop().await;
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_trigger_start_failure_leaves_no_task() {
        let r = Runner::new(
            "default/s".to_string(),
            Box::new(NullTrigger {
                fail_start: true,
                stopped: Arc::new(AtomicU64::new(0)),
            }),
            Arc::new(CountingActor::default()),
            None,
            Duration::from_secs(3600),
            metrics(),
        );
        let table = table();
        assert!(r.start(Sensor::default(), table.clone()).await.is_err());
        assert!(table.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_self_removal_on_terminal_exit() {
        let actor = Arc::new(CountingActor::default());
        let stopped = Arc::new(AtomicU64::new(0));
        let (r, events_tx) = runner(Duration::from_secs(3600), actor, None, stopped);
        let table = table();
        let handle = r.start(Sensor::default(), table.clone()).await.unwrap();
        table
            .write()
            .await
            .insert("default/s".to_string(), handle.clone());

        // closing every sender terminates the loop
        drop(events_tx);
        handle.stop().await;
        assert!(!table.read().await.contains_key("default/s"));
    }

    #[tokio::test]
    async fn test_event_channel_applies_backpressure() {
        let (events_tx, _events_rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
        events_tx.try_send(Event::simple("a", "", "")).unwrap();
        events_tx.try_send(Event::simple("b", "", "")).unwrap();
        // a full channel rejects immediate sends instead of dropping silently
        assert!(events_tx.try_send(Event::simple("c", "", "")).is_err());
    }
}
