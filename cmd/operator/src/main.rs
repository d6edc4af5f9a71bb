use eventrigger_ingress::cloud_events::CloudEventsServer;
use eventrigger_ingress::http::HttpRouter;
use eventrigger_ingress::k8s_events::ClusterEventsInformer;
use eventrigger_k8s_util::client::new_client;
use eventrigger_operator::metrics::Metrics;
use eventrigger_operator::telemetry;
use eventrigger_sensor::controller::{self, CONTROLLER_ID, State};
use eventrigger_sensor::factory::Muxes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::response::{IntoResponse, Json};
use axum::routing::{Router, get};
use clap::{Parser, crate_authors, crate_description, crate_version};
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

async fn metrics() -> impl IntoResponse {
    // OpenTelemetry 0.31 has no pull-based Prometheus exporter; metrics are
    // pushed over OTLP when an endpoint is configured.
    (
        [(
            "content-type",
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        "# OpenTelemetry metrics configured\n# Use OTLP endpoint for metrics collection\n",
    )
}

async fn healthz() -> impl IntoResponse {
    Json("healthy")
}

async fn readyz() -> impl IntoResponse {
    Json("ready")
}

#[derive(Parser, Debug)]
#[command(
    name="eventrigger",
    about = crate_description!(),
    version = crate_version!(),
    author = crate_authors!("\n"),
)]
struct Args {
    /// Inbound HTTP router port
    #[arg(short, long, default_value_t = 8081, env)]
    port: u16,

    /// Cloud events receiver port
    #[arg(long, default_value_t = 7787, env)]
    cloud_events_port: u16,

    /// Metrics port
    #[arg(long, default_value_t = 7788, env)]
    metrics_port: u16,

    /// Health probes port
    #[arg(long, default_value_t = 7789, env)]
    health_port: u16,

    /// Set logging filter directive for `tracing_subscriber::filter::EnvFilter`. Example: "info,kube=debug,eventrigger=debug"
    #[arg(long, default_value = "info", env)]
    log_filter: String,

    /// Set log format
    #[arg(long, value_enum, default_value_t = telemetry::LogFormat::Text, env)]
    log_format: telemetry::LogFormat,

    /// URL for the OpenTelemetry tracing endpoint.
    ///
    /// This optional argument specifies the URL to which traces will be sent using
    /// OpenTelemetry. If not provided, tracing will be disabled.
    #[arg(short, long, env = "OPENTELEMETRY_ENDPOINT_URL")]
    tracing_url: Option<String>,

    /// Sampling ratio for tracing.
    ///
    /// Specifies the ratio of traces to sample. A value of `1.0` will sample all traces,
    /// while a lower value will sample fewer traces. The default is `0.1`, meaning 10%
    /// of traces are sampled.
    #[arg(short, long, default_value_t = 0.1, env)]
    sample_ratio: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Args = Args::parse();

    telemetry::init(
        &args.log_filter,
        args.log_format,
        args.tracing_url.as_deref(),
        args.sample_ratio,
    )
    .await?;

    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().build();
    opentelemetry::global::set_meter_provider(provider.clone());
    let meter = opentelemetry::global::meter("eventrigger");

    let client = new_client().await?;

    let controller_metrics = Metrics::new(&meter, &[CONTROLLER_ID]);
    let state = State::new(controller_metrics);

    /* global ingress resources
    http router: every http/k8s_http request is dispatched, k8s_http proxied
    cloud events server: receives cloud events and filters by fingerprint
    cluster events informer: watches cluster events and filters by fingerprint
    */
    let muxes = Muxes {
        http_router: Arc::new(HttpRouter::new(client.clone())),
        cloud_events: Arc::new(CloudEventsServer::new()),
        cluster_events: Arc::new(ClusterEventsInformer::new()),
    };

    let router_server = muxes
        .http_router
        .clone()
        .run(SocketAddr::from(([0, 0, 0, 0], args.port)));
    let cloud_events_server = muxes
        .cloud_events
        .clone()
        .run(SocketAddr::from(([0, 0, 0, 0], args.cloud_events_port)));
    let cluster_events_informer = muxes.cluster_events.clone().run(client.clone());

    let sensor_controller = controller::run(state, client, muxes.clone());

    let metrics_app = Router::new().route("/metrics", get(metrics));
    let metrics_listener =
        TcpListener::bind(format!("0.0.0.0:{}", args.metrics_port)).await?;
    let metrics_server =
        axum::serve(metrics_listener, metrics_app).with_graceful_shutdown(shutdown_signal());

    let health_app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz));
    let health_listener = TcpListener::bind(format!("0.0.0.0:{}", args.health_port)).await?;
    let health_server =
        axum::serve(health_listener, health_app).with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        _ = sensor_controller => info!(msg = "sensor controller stopped"),
        res = router_server => res?,
        res = cloud_events_server => res?,
        res = cluster_events_informer => res?,
        res = metrics_server => res?,
        res = health_server => res?,
    }
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM signal handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
