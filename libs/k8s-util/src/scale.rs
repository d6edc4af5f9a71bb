use crate::error::{Error, Result};
use crate::types::short_type_name;

use k8s_openapi::api::autoscaling::v1::Scale;
use kube::api::{Api, Patch, PatchParams};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::trace;

/// Read the current replica count from the scale subresource.
pub async fn get_replicas<K>(api: &Api<K>, name: &str) -> Result<i32>
where
    K: Clone + DeserializeOwned + Debug,
{
    let scale: Scale = api.get_scale(name).await.map_err(|e| {
        Error::KubeError(
            format!(
                "failed to get scale for {} {name}",
                short_type_name::<K>().unwrap_or("Unknown")
            ),
            Box::new(e),
        )
    })?;
    Ok(scale.spec.and_then(|s| s.replicas).unwrap_or(0))
}

/// Patch the scale subresource to the given replica count.
pub async fn patch_replicas<K>(api: &Api<K>, name: &str, replicas: i32) -> Result<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    trace!(msg = "patching scale subresource", name, replicas);
    let patch = serde_json::json!({"spec": {"replicas": replicas}});
    api.patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| {
            Error::KubeError(
                format!(
                    "failed to scale {} {name} to {replicas}",
                    short_type_name::<K>().unwrap_or("Unknown")
                ),
                Box::new(e),
            )
        })?;
    Ok(())
}
