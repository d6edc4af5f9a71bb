use crate::{required_meta, split_header_pairs, split_list};

use eventrigger_ingress::http::{HttpRouter, Route};
use eventrigger_operator::driver::Trigger;
use eventrigger_operator::error::Result;
use eventrigger_operator::event::Event;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Registrations parsed from trigger meta: `hosts` is a comma-separated
/// list, `headers` a comma-separated list of `Key=value` pairs.
pub(crate) struct HttpBindings {
    pub hosts: Vec<String>,
    pub headers: Vec<String>,
}

impl HttpBindings {
    pub fn parse(meta: &BTreeMap<String, String>) -> Result<Self> {
        let hosts = meta.get("hosts").map(|v| split_list(v)).unwrap_or_default();
        let headers = meta
            .get("headers")
            .map(|v| split_header_pairs(v))
            .transpose()?
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>();
        if hosts.is_empty() && headers.is_empty() {
            required_meta(meta, "hosts")?;
        }
        Ok(HttpBindings { hosts, headers })
    }

    pub async fn register(&self, router: &HttpRouter, route: Route) -> Result<()> {
        let mut registered = Vec::new();
        for host in &self.hosts {
            if let Err(e) = router.register_host(host, route.clone()).await {
                // roll back partial registrations so the collision leaves no residue
                for done in registered {
                    router.unregister_host(done).await;
                }
                return Err(e);
            }
            registered.push(host);
        }
        let mut registered_headers = Vec::new();
        for header in &self.headers {
            if let Err(e) = router.register_header(header, route.clone()).await {
                for done in &self.hosts {
                    router.unregister_host(done).await;
                }
                for done in registered_headers {
                    router.unregister_header(done).await;
                }
                return Err(e);
            }
            registered_headers.push(header);
        }
        Ok(())
    }

    pub async fn unregister(&self, router: &HttpRouter) {
        for host in &self.hosts {
            router.unregister_host(host).await;
        }
        for header in &self.headers {
            router.unregister_header(header).await;
        }
    }
}

/// Plain inbound HTTP trigger: matching requests synthesise an event and get
/// the event JSON back.
pub struct HttpTrigger {
    router: Arc<HttpRouter>,
    bindings: HttpBindings,
}

impl HttpTrigger {
    pub fn new(router: Arc<HttpRouter>, meta: &BTreeMap<String, String>) -> Result<Self> {
        Ok(HttpTrigger {
            router,
            bindings: HttpBindings::parse(meta)?,
        })
    }
}

#[async_trait]
impl Trigger for HttpTrigger {
    async fn start(&mut self, out: mpsc::Sender<Event>) -> Result<()> {
        self.bindings
            .register(
                &self.router,
                Route {
                    events: out,
                    wake: None,
                },
            )
            .await
    }

    async fn stop(&mut self) -> Result<()> {
        debug!(msg = "unregistering http trigger");
        self.bindings.unregister(&self.router).await;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_hosts_and_headers() {
        let meta = BTreeMap::from([
            ("hosts".to_string(), "a.example, b.example".to_string()),
            ("headers".to_string(), "X-Tenant=blue".to_string()),
        ]);
        let bindings = HttpBindings::parse(&meta).unwrap();
        assert_eq!(bindings.hosts, vec!["a.example", "b.example"]);
        assert_eq!(bindings.headers, vec!["X-Tenant=blue"]);
    }

    #[test]
    fn test_parse_requires_some_binding() {
        assert!(HttpBindings::parse(&BTreeMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_register_rolls_back_on_collision() {
        let config = kube::Config::new("http://localhost:8080".parse().unwrap());
        let client = kube::Client::try_from(config).unwrap();
        let router = HttpRouter::new(client);
        let (tx, _rx) = mpsc::channel(2);
        let route = Route {
            events: tx.clone(),
            wake: None,
        };
        router.register_host("b.example", route.clone()).await.unwrap();

        let meta = BTreeMap::from([("hosts".to_string(), "a.example,b.example".to_string())]);
        let bindings = HttpBindings::parse(&meta).unwrap();
        assert!(bindings.register(&router, route.clone()).await.is_err());
        // a.example rolled back and is free again
        router.register_host("a.example", route).await.unwrap();
    }
}
