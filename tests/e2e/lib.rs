//! End-to-end tests against a cluster running the operator.
//!
//! Requires the Sensor CRD installed and the `eventrigger` binary running
//! with its HTTP and cloud-events ports reachable (override with
//! `ENGINE_HTTP_URL` / `ENGINE_CLOUD_EVENTS_URL`). Enable with
//! `--features e2e-test`.

#[cfg(all(test, feature = "e2e-test"))]
mod test {
    use eventrigger_actor::Operation;
    use eventrigger_operator::labels;
    use eventrigger_sensor::controller::SENSOR_FINALIZER;
    use eventrigger_sensor::crd::{
        ActorSpec, ActorTemplate, ArtifactLocation, K8sActorTemplate, ResourceArtifact, Sensor,
        SensorSpec, TriggerSpec, TriggerType,
    };

    use std::collections::BTreeMap;
    use std::future::Future;
    use std::time::Duration;

    use k8s_openapi::api::apps::v1::Deployment;
    use kube::api::{Api, DeleteParams, PostParams};
    use kube::client::Client;
    use kube::ResourceExt;
    use tokio::time::sleep;

    const NAMESPACE: &str = "default";
    const WAIT: Duration = Duration::from_secs(60);
    const POLL: Duration = Duration::from_millis(500);

    fn cloud_events_url() -> String {
        std::env::var("ENGINE_CLOUD_EVENTS_URL")
            .unwrap_or_else(|_| "http://localhost:7787".to_string())
    }

    async fn client() -> Client {
        Client::try_default()
            .await
            .expect("failed to create client")
    }

    fn deployment_manifest(name: &str, app: &str) -> String {
        format!(
            r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {name}
  namespace: {NAMESPACE}
spec:
  replicas: 0
  selector:
    matchLabels:
      app: {app}
  template:
    metadata:
      labels:
        app: {app}
    spec:
      containers:
        - name: main
          image: registry.k8s.io/e2e-test-images/agnhost:2.45
          args: ["netexec", "--http-port=8080"]
          ports:
            - name: http
              containerPort: 8080
"#
        )
    }

    fn scale_sensor(name: &str, trigger: TriggerSpec, manifest: &str) -> Sensor {
        let mut sensor = Sensor {
            spec: SensorSpec {
                trigger,
                actor: ActorSpec {
                    template: ActorTemplate {
                        k8s: Some(K8sActorTemplate {
                            operation: Operation::Scale,
                            source: ArtifactLocation {
                                resource: Some(ResourceArtifact {
                                    value: manifest.to_string(),
                                }),
                            },
                        }),
                        http: None,
                    },
                },
                target: None,
            },
            ..Sensor::default()
        };
        sensor.metadata.name = Some(name.to_string());
        sensor.metadata.namespace = Some(NAMESPACE.to_string());
        sensor
    }

    async fn wait_for<F, Fut>(what: &str, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if check().await {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {what}"
            );
            sleep(POLL).await;
        }
    }

    async fn replicas(api: &Api<Deployment>, name: &str) -> Option<i32> {
        api.get(name).await.ok().and_then(|d| d.spec?.replicas)
    }

    #[tokio::test]
    #[ignore = "needs cluster with the operator running"]
    async fn test_cron_scale_up_then_idle_scale_down() {
        let client = client().await;
        let sensors: Api<Sensor> = Api::namespaced(client.clone(), NAMESPACE);
        let deployments: Api<Deployment> = Api::namespaced(client.clone(), NAMESPACE);

        let name = "e2e-cron-scale";
        let _ = deployments.delete(name, &DeleteParams::default()).await;

        let mut sensor = scale_sensor(
            name,
            TriggerSpec {
                type_: TriggerType::Cron,
                meta: BTreeMap::from([("cron".to_string(), "*/1 * * * * *".to_string())]),
            },
            &deployment_manifest(name, name),
        );
        sensor.metadata.labels = Some(BTreeMap::from([
            (labels::SCALE_TO_ZERO_ENABLE.to_string(), "true".to_string()),
            (labels::SCALE_TO_ZERO_IDLE_TIME.to_string(), "5".to_string()),
        ]));
        sensors.create(&PostParams::default(), &sensor).await.unwrap();

        // one tick creates the workload and drives it monotone-up to one
        wait_for("deployment scaled to one", || {
            let api = deployments.clone();
            async move { replicas(&api, name).await == Some(1) }
        })
        .await;

        // deleting the sensor stops the cron; the idle window then drains it
        sensors.delete(name, &DeleteParams::default()).await.unwrap();
        wait_for("deployment scaled to zero", || {
            let api = deployments.clone();
            async move { replicas(&api, name).await == Some(0) }
        })
        .await;

        deployments.delete(name, &DeleteParams::default()).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs cluster with the operator running"]
    async fn test_cloud_events_demux() {
        let client = client().await;
        let sensors: Api<Sensor> = Api::namespaced(client.clone(), NAMESPACE);
        let deployments: Api<Deployment> = Api::namespaced(client.clone(), NAMESPACE);

        let matched = "e2e-ce-matched";
        let untouched = "e2e-ce-untouched";
        for (name, source) in [(matched, "A"), (untouched, "B")] {
            let _ = deployments.delete(name, &DeleteParams::default()).await;
            let sensor = scale_sensor(
                name,
                TriggerSpec {
                    type_: TriggerType::CloudEvents,
                    meta: BTreeMap::from([
                        ("source".to_string(), source.to_string()),
                        ("type".to_string(), "T".to_string()),
                        ("version".to_string(), "1.0".to_string()),
                    ]),
                },
                &deployment_manifest(name, name),
            );
            sensors.create(&PostParams::default(), &sensor).await.unwrap();
        }
        // give the runners time to register their fingerprints
        sleep(Duration::from_secs(2)).await;

        let frame = serde_json::json!({
            "specversion": "1.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "source": "A",
            "type": "T",
        });
        let response = reqwest::Client::new()
            .post(cloud_events_url())
            .header("content-type", "application/cloudevents+json")
            .json(&frame)
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());

        wait_for("matched deployment scaled", || {
            let api = deployments.clone();
            async move { replicas(&api, matched).await == Some(1) }
        })
        .await;
        // the other fingerprint never fires
        sleep(Duration::from_secs(3)).await;
        assert_eq!(replicas(&deployments, untouched).await, None);

        for name in [matched, untouched] {
            sensors.delete(name, &DeleteParams::default()).await.unwrap();
            let _ = deployments.delete(name, &DeleteParams::default()).await;
        }
    }

    #[tokio::test]
    #[ignore = "needs cluster with the operator running"]
    async fn test_sensor_delete_removes_finalizer() {
        let client = client().await;
        let sensors: Api<Sensor> = Api::namespaced(client.clone(), NAMESPACE);

        let name = "e2e-delete-cleanup";
        let sensor = scale_sensor(
            name,
            TriggerSpec {
                type_: TriggerType::Cron,
                meta: BTreeMap::from([("cron".to_string(), "0 0 0 1 1 *".to_string())]),
            },
            &deployment_manifest(name, name),
        );
        sensors.create(&PostParams::default(), &sensor).await.unwrap();

        wait_for("finalizer added", || {
            let api = sensors.clone();
            async move {
                api.get(name)
                    .await
                    .map(|s| s.finalizers().contains(&SENSOR_FINALIZER.to_string()))
                    .unwrap_or(false)
            }
        })
        .await;

        sensors.delete(name, &DeleteParams::default()).await.unwrap();
        // the finalizer blocks deletion only until the runner stops
        wait_for("sensor gone", || {
            let api = sensors.clone();
            async move { api.get(name).await.is_err() }
        })
        .await;
    }

    #[tokio::test]
    #[ignore = "needs cluster with the operator running"]
    async fn test_duplicate_host_rejected() {
        let client = client().await;
        let sensors: Api<Sensor> = Api::namespaced(client.clone(), NAMESPACE);
        let deployments: Api<Deployment> = Api::namespaced(client.clone(), NAMESPACE);

        let first = "e2e-host-first";
        let second = "e2e-host-second";
        for name in [first, second] {
            let _ = deployments.delete(name, &DeleteParams::default()).await;
            let sensor = scale_sensor(
                name,
                TriggerSpec {
                    type_: TriggerType::K8sHttp,
                    meta: BTreeMap::from([("hosts".to_string(), "a.example".to_string())]),
                },
                &deployment_manifest(name, name),
            );
            sensors.create(&PostParams::default(), &sensor).await.unwrap();
            sleep(Duration::from_secs(2)).await;
        }

        // the collision surfaces as a warning event on the second sensor
        let events: Api<k8s_openapi::api::events::v1::Event> =
            Api::namespaced(client.clone(), NAMESPACE);
        wait_for("collision event published", || {
            let api = events.clone();
            async move {
                api.list(&Default::default())
                    .await
                    .map(|list| {
                        list.items.iter().any(|e| {
                            e.reason.as_deref() == Some("RunnerConstructionFailed")
                                && e.regarding.as_ref().and_then(|r| r.name.as_deref())
                                    == Some(second)
                        })
                    })
                    .unwrap_or(false)
            }
        })
        .await;

        for name in [first, second] {
            sensors.delete(name, &DeleteParams::default()).await.unwrap();
        }
    }
}
