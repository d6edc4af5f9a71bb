use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1:?}")]
    KubeError(String, #[source] Box<kube::Error>),

    #[error("{0}: {1}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(
        String,
        #[source] Box<kube::runtime::finalizer::Error<Error>>,
    ),

    #[error("{0}: {1}")]
    SerializationError(String, #[source] serde_json::Error),

    #[error("{0}: {1}")]
    YamlError(String, #[source] serde_yaml::Error),

    #[error("{0}: {1}")]
    HttpError(String, #[source] reqwest::Error),

    #[error("http request to {0} returned {1}")]
    HttpStatus(String, u16),

    #[error("{0}: {1}")]
    TriggerError(String, #[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("{0}: {1}")]
    ConfigError(String, #[source] Box<kube::config::InferConfigError>),

    #[error("ingress registration collision: {0}")]
    CollisionError(String),

    #[error("kind {0} is not supported for {1}")]
    UnsupportedKind(String, String),

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("{0}")]
    MissingData(String),

    #[error("waiting for ready endpoint timed out: {0}")]
    WakeTimeout(String),

    #[error("receive output error: {0}")]
    ReceiveOutput(String),

    #[error("telemetry error: {0}")]
    TelemetryError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
