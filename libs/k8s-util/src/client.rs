use crate::error::{Error, Result};

use kube::{Client, Config};
use tracing::debug;

/// Build a client from the environment-pointed kubeconfig, falling back to
/// in-cluster service account credentials.
pub async fn new_client() -> Result<Client> {
    let config = Config::infer().await.map_err(|e| {
        Error::ConfigError(
            "failed to infer kubernetes configuration".to_string(),
            Box::new(e),
        )
    })?;
    debug!(
        msg = "resolved kubernetes configuration",
        cluster_url = %config.cluster_url,
        default_namespace = %config.default_namespace
    );
    Client::try_from(config)
        .map_err(|e| Error::KubeError("failed to build client".to_string(), Box::new(e)))
}
