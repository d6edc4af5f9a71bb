use crate::crd::{Judgment, Sensor, SensorStatus};
use crate::factory::{Muxes, build_actor, build_target, build_trigger};
use crate::runner::{Runner, RunnerHandle, RunnerTable};

use eventrigger_operator::backoff_reconciler;
use eventrigger_operator::controller::{
    BackoffContext, ControllerId, DEFAULT_RECONCILE_INTERVAL, ErrorBackoffCache,
    check_api_queryable, error_policy,
};
use eventrigger_operator::error::{Error, Result};
use eventrigger_operator::metrics::{ControllerMetrics, Metrics};
use eventrigger_operator::telemetry;

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::jiff::Timestamp;
use kube::api::{Api, Patch, PatchParams};
use kube::client::Client;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::events::{Event as K8sEvent, EventType, Recorder};
use kube::runtime::finalizer::{Event as Finalizer, finalizer};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{Span, debug, error, field, info, instrument, warn};
use uuid::Uuid;

pub const CONTROLLER_ID: ControllerId = "sensor";
pub static SENSOR_OPERATOR_NAME: &str = "sensors.eventrigger.com";
pub static SENSOR_FINALIZER: &str = "sensors.eventrigger.com/finalizer";

const RUNNER_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// State shared between the controller and the web server
#[derive(Clone)]
pub struct State {
    metrics: Arc<Metrics>,
    runners: RunnerTable,
}

impl State {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            metrics: Arc::new(metrics),
            runners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a Controller Context that can update State
    pub fn to_context(&self, client: Client, muxes: Muxes) -> Context {
        Context {
            client: client.clone(),
            metrics: self
                .metrics
                .controllers
                .get(CONTROLLER_ID)
                .expect("all CONTROLLER_IDs have to be registered")
                .clone(),
            recorder: Recorder::new(client, CONTROLLER_ID.into()),
            muxes,
            runners: self.runners.clone(),
            error_backoff_cache: Arc::default(),
        }
    }
}

// Context for the sensor reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Controller metrics
    pub metrics: Arc<ControllerMetrics>,
    /// Event recorder
    pub recorder: Recorder,
    /// Shared ingress listeners injected into trigger drivers
    pub muxes: Muxes,
    /// Live runners keyed by `namespace/name`
    pub runners: RunnerTable,
    /// State of the error backoff policy per object
    error_backoff_cache: Arc<ErrorBackoffCache<Sensor>>,
}

impl BackoffContext<Sensor> for Context {
    fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.metrics
    }

    async fn get_backoff(&self, obj_ref: ObjectRef<Sensor>) -> Duration {
        self.error_backoff_cache.get_backoff(obj_ref).await
    }

    async fn reset_backoff(&self, obj_ref: ObjectRef<Sensor>) {
        self.error_backoff_cache.reset_backoff(obj_ref).await
    }
}

#[instrument(skip(ctx, sensor), fields(trace_id))]
pub async fn reconcile_sensor(sensor: Arc<Sensor>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", field::display(&trace_id));
    let _timer = ctx.metrics.reconcile_count_and_measure(&trace_id);

    // safe unwrap: sensor is namespace scoped
    let namespace = sensor.namespace().unwrap();
    let api: Api<Sensor> = Api::namespaced(ctx.client.clone(), &namespace);
    finalizer(&api, SENSOR_FINALIZER, sensor, |event| async {
        match event {
            Finalizer::Apply(s) => s.reconcile(ctx).await,
            Finalizer::Cleanup(s) => s.cleanup(ctx).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError("failed on sensor finalizer".to_string(), Box::new(e)))
}

impl Sensor {
    fn runner_key(&self) -> String {
        // safe unwrap: sensor is namespace scoped
        format!("{}/{}", self.namespace().unwrap(), self.name_any())
    }

    /// Observed-state diff against the live runner: informer resyncs
    /// compare equal and are ignored.
    fn same_as(&self, other: &Sensor) -> bool {
        self.spec == other.spec && self.metadata.labels == other.metadata.labels
    }

    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        self.ensure_event_id(&ctx).await?;

        let key = self.runner_key();
        {
            let runners = ctx.runners.read().await;
            if let Some(handle) = runners.get(&key) {
                if self.same_as(&handle.sensor) {
                    debug!(msg = "sensor unchanged, keeping runner", key);
                    return Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL));
                }
            }
        }

        // update semantics: delete-then-recreate
        let previous = { ctx.runners.write().await.remove(&key) };
        if let Some(handle) = previous {
            info!(msg = "sensor changed, recreating runner", key);
            handle.stop().await;
        }

        match self.spawn_runner(&ctx, &key).await {
            Ok(handle) => {
                let count = {
                    let mut runners = ctx.runners.write().await;
                    runners.insert(key.clone(), handle);
                    runners.len()
                };
                ctx.metrics.runners_set(count as i64);
                info!(msg = "runner started", key);
                Ok(Action::requeue(DEFAULT_RECONCILE_INTERVAL))
            }
            Err(e) => {
                // no automatic retry: the sensor stays errored until edited
                error!(msg = "failed to construct runner", key, %e);
                ctx.recorder
                    .publish(
                        &K8sEvent {
                            type_: EventType::Warning,
                            reason: "RunnerConstructionFailed".to_string(),
                            note: Some(e.to_string()),
                            action: "RunnerStart".to_string(),
                            secondary: None,
                        },
                        &self.object_ref(&()),
                    )
                    .await
                    .map_err(|e| {
                        warn!(msg = "failed to publish RunnerConstructionFailed event", %e);
                        Error::KubeError("failed to publish event".to_string(), Box::new(e))
                    })?;
                Ok(Action::await_change())
            }
        }
    }

    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        let key = self.runner_key();
        let handle = { ctx.runners.write().await.remove(&key) };
        match handle {
            Some(handle) => {
                info!(msg = "stopping runner for deleted sensor", key);
                handle.stop().await;
            }
            None => debug!(msg = "no runner for deleted sensor", key),
        }
        let count = ctx.runners.read().await.len();
        ctx.metrics.runners_set(count as i64);
        Ok(Action::await_change())
    }

    async fn spawn_runner(&self, ctx: &Arc<Context>, key: &str) -> Result<Arc<RunnerHandle>> {
        let trigger = build_trigger(self, &ctx.muxes)?;
        let actor = build_actor(self, ctx.client.clone())?;
        let target = build_target(self, ctx.client.clone())?;
        let runner = Runner::new(
            key.to_string(),
            trigger,
            actor,
            target,
            self.idle_duration(),
            ctx.metrics.clone(),
        );
        runner.start(self.clone(), ctx.runners.clone()).await
    }

    /// Initialise `status.judgment.eventId` once per sensor.
    async fn ensure_event_id(&self, ctx: &Arc<Context>) -> Result<()> {
        let initialised = self
            .status
            .as_ref()
            .and_then(|s| s.judgment.as_ref())
            .map(|j| !j.event_id.is_empty())
            .unwrap_or(false);
        if initialised {
            return Ok(());
        }

        // safe unwrap: sensor is namespace scoped
        let namespace = self.namespace().unwrap();
        let name = self.name_any();
        let status = SensorStatus {
            judgment: Some(Judgment {
                event_id: Uuid::new_v4().to_string(),
                last_transition_time: Some(Time(Timestamp::now())),
                reason: Some("SensorObserved".to_string()),
                message: None,
            }),
        };
        debug!(msg = "initialising status judgment", name);
        let status_patch = Patch::Apply(Sensor {
            status: Some(status),
            ..Sensor::default()
        });
        let patch = PatchParams::apply(SENSOR_OPERATOR_NAME).force();
        let api = Api::<Sensor>::namespaced(ctx.client.clone(), &namespace);
        api.patch_status(&name, &patch, &status_patch)
            .await
            .map_err(|e| {
                Error::KubeError(
                    format!("failed to patch Sensor/status {namespace}/{name}"),
                    Box::new(e),
                )
            })?;
        Ok(())
    }
}

/// Initialize sensor controller and shared state
pub async fn run(state: State, client: Client, muxes: Muxes) {
    let sensors = check_api_queryable::<Sensor>(client.clone()).await;

    let ctx = Arc::new(state.to_context(client, muxes));

    let runners = ctx.runners.clone();
    let visibility = async move {
        let mut ticker = tokio::time::interval(RUNNER_LOG_INTERVAL);
        loop {
            ticker.tick().await;
            let keys = runners.read().await.keys().cloned().collect::<Vec<_>>();
            debug!(msg = format!("live runners: [{}]", keys.join(",")));
        }
    };

    info!(msg = format!("starting {CONTROLLER_ID} controller"));
    // TODO: watcher::Config::default().streaming_lists() when stabilized in K8s
    // https://kubernetes.io/docs/reference/using-api/api-concepts/#streaming-lists
    let sensor_controller = Controller::new(sensors, watcher::Config::default().any_semantic())
        // debounce to filter out reconcile calls that happen quick succession (only taking the latest)
        .with_config(controller::Config::default().debounce(Duration::from_millis(500)))
        .shutdown_on_signal()
        .run(
            backoff_reconciler!(reconcile_sensor),
            error_policy,
            ctx.clone(),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()));

    ctx.metrics.ready_set(1);
    tokio::select! {
        _ = sensor_controller => {},
        _ = visibility => {},
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crd::{SensorSpec, TriggerSpec, TriggerType};

    fn sensor(name: &str) -> Sensor {
        let mut sensor = Sensor {
            spec: SensorSpec {
                trigger: TriggerSpec {
                    type_: TriggerType::Cron,
                    meta: [("cron".to_string(), "*/1 * * * * *".to_string())].into(),
                },
                ..SensorSpec::default()
            },
            ..Sensor::default()
        };
        sensor.metadata.name = Some(name.to_string());
        sensor.metadata.namespace = Some("default".to_string());
        sensor
    }

    #[test]
    fn test_runner_key_is_namespace_name() {
        assert_eq!(sensor("s").runner_key(), "default/s");
    }

    #[test]
    fn test_same_as_ignores_status_and_resource_version() {
        let a = sensor("s");
        let mut b = sensor("s");
        b.metadata.resource_version = Some("42".to_string());
        b.status = Some(SensorStatus::default());
        assert!(a.same_as(&b));
    }

    #[test]
    fn test_same_as_detects_spec_and_label_changes() {
        let a = sensor("s");
        let mut spec_changed = sensor("s");
        spec_changed
            .spec
            .trigger
            .meta
            .insert("cron".to_string(), "*/2 * * * * *".to_string());
        assert!(!a.same_as(&spec_changed));

        let mut label_changed = sensor("s");
        label_changed.metadata.labels = Some(
            [(
                eventrigger_operator::labels::SCALE_TO_ZERO_ENABLE.to_string(),
                "true".to_string(),
            )]
            .into(),
        );
        assert!(!a.same_as(&label_changed));
    }
}
