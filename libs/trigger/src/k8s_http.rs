use crate::http::HttpBindings;

use eventrigger_ingress::http::{HttpRouter, Route};
use eventrigger_ingress::proxy::WakeTarget;
use eventrigger_operator::driver::Trigger;
use eventrigger_operator::error::Result;
use eventrigger_operator::event::Event;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Inbound HTTP trigger bound to a Kubernetes workload: matching requests
/// emit an event (driving the actor's scale-up) and then block on the
/// wake-and-proxy path until the workload has a Ready pod.
pub struct K8sHttpTrigger {
    router: Arc<HttpRouter>,
    bindings: HttpBindings,
    wake: WakeTarget,
}

impl K8sHttpTrigger {
    pub fn new(
        router: Arc<HttpRouter>,
        meta: &BTreeMap<String, String>,
        wake: WakeTarget,
    ) -> Result<Self> {
        Ok(K8sHttpTrigger {
            router,
            bindings: HttpBindings::parse(meta)?,
            wake,
        })
    }
}

#[async_trait]
impl Trigger for K8sHttpTrigger {
    async fn start(&mut self, out: mpsc::Sender<Event>) -> Result<()> {
        info!(
            msg = "k8s http trigger registering",
            kind = %self.wake.kind,
            namespace = %self.wake.namespace
        );
        self.bindings
            .register(
                &self.router,
                Route {
                    events: out,
                    wake: Some(self.wake.clone()),
                },
            )
            .await
    }

    async fn stop(&mut self) -> Result<()> {
        debug!(msg = "unregistering k8s http trigger");
        self.bindings.unregister(&self.router).await;
        Ok(())
    }
}
