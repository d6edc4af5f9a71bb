use crate::controller::ControllerId;

use std::collections::HashMap;
use std::sync::Arc;

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::{KeyValue, trace::TraceId};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub controllers: HashMap<ControllerId, Arc<ControllerMetrics>>,
}

impl Metrics {
    pub fn new(meter: &Meter, controller_names: &[&'static str]) -> Self {
        let controllers = controller_names
            .iter()
            .map(|&id| (id, Arc::new(ControllerMetrics::new(id, meter))))
            .collect::<HashMap<ControllerId, Arc<ControllerMetrics>>>();

        Self { controllers }
    }
}

#[derive(Clone)]
pub struct ControllerMetrics {
    controller: String,
    pub reconcile: ReconcileMetrics,
    runners: Gauge<i64>,
    events_received: Counter<u64>,
    actor_failures: Counter<u64>,
    target_failures: Counter<u64>,
    ready: Gauge<i64>,
}

impl ControllerMetrics {
    pub fn new(controller: &str, meter: &Meter) -> Self {
        let reconcile = ReconcileMetrics::new(meter);

        let runners = meter
            .i64_gauge("runners")
            .with_description("Number of live runners keyed by sensor")
            .build();

        let events_received = meter
            .u64_counter("events_received")
            .with_description("Number of events delivered to runners")
            .build();

        let actor_failures = meter
            .u64_counter("actor_failures")
            .with_description("Number of actor executions that returned an error")
            .build();

        let target_failures = meter
            .u64_counter("target_failures")
            .with_description("Number of target executions that returned an error")
            .build();

        let ready = meter
            .i64_gauge("ready")
            .with_description("1 when the controller is ready to reconcile resources, 0 otherwise")
            .build();

        Self {
            controller: controller.to_string(),
            reconcile,
            runners,
            events_received,
            actor_failures,
            target_failures,
            ready,
        }
    }

    pub fn reconcile_failure_inc(&self) {
        self.reconcile
            .failures
            .add(1, &[KeyValue::new("controller", self.controller.clone())]);
    }

    pub fn reconcile_count_and_measure(&self, _trace_id: &TraceId) -> ReconcileMeasurer {
        self.reconcile
            .operations
            .add(1, &[KeyValue::new("controller", self.controller.clone())]);
        ReconcileMeasurer {
            start: Instant::now(),
            controller: self.controller.clone(),
            metric: self.reconcile.duration.clone(),
        }
    }

    pub fn runners_set(&self, count: i64) {
        self.runners.record(
            count,
            &[KeyValue::new("controller", self.controller.clone())],
        );
    }

    pub fn events_received_inc(&self, trigger_type: &str) {
        self.events_received.add(
            1,
            &[
                KeyValue::new("controller", self.controller.clone()),
                KeyValue::new("trigger", trigger_type.to_string()),
            ],
        );
    }

    pub fn actor_failure_inc(&self) {
        self.actor_failures
            .add(1, &[KeyValue::new("controller", self.controller.clone())]);
    }

    pub fn target_failure_inc(&self) {
        self.target_failures
            .add(1, &[KeyValue::new("controller", self.controller.clone())]);
    }

    pub fn ready_set(&self, status: i64) {
        self.ready.record(
            status,
            &[KeyValue::new("controller", self.controller.clone())],
        );
    }
}

#[derive(Clone)]
pub struct ReconcileMetrics {
    pub operations: Counter<u64>,
    pub failures: Counter<u64>,
    pub duration: Histogram<f64>,
}

impl ReconcileMetrics {
    pub fn new(meter: &Meter) -> Self {
        let operations = meter
            .u64_counter("reconcile_operations")
            .with_description("Total number of reconcile operations")
            .build();

        let failures = meter
            .u64_counter("reconcile_failures")
            .with_description("Number of errors that occurred during reconcile operations")
            .build();

        let duration = meter
            .f64_histogram("reconcile_duration_seconds")
            .with_description("Histogram of reconcile operations")
            .build();

        Self {
            operations,
            failures,
            duration,
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    controller: String,
    metric: Histogram<f64>,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metric.record(
            duration,
            &[KeyValue::new("controller", self.controller.clone())],
        );
    }
}
