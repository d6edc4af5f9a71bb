use crate::error::{Error, Result};

use kube::api::{Api, DynamicObject};
use kube::core::{ApiResource, GroupVersionKind, TypeMeta};
use kube::client::Client;

/// Cluster-scoped resources bypass namespace defaulting.
const CLUSTER_RESOURCES: &[&str] = &["namespaces", "nodes"];

/// Decode an inline YAML manifest into a dynamic object plus the api
/// resource derived from its group/version/kind.
pub fn decode_resource(value: &str) -> Result<(DynamicObject, ApiResource)> {
    let json: serde_json::Value = serde_yaml::from_str(value)
        .map_err(|e| Error::YamlError("failed to decode inline resource".to_string(), e))?;
    let obj: DynamicObject = serde_json::from_value(json).map_err(|e| {
        Error::SerializationError("inline resource is not a kubernetes object".to_string(), e)
    })?;
    let types = obj
        .types
        .clone()
        .ok_or_else(|| Error::MissingData("inline resource has no apiVersion/kind".to_string()))?;
    let gvk = gvk_from_type_meta(&types)?;
    Ok((obj, ApiResource::from_gvk(&gvk)))
}

fn gvk_from_type_meta(types: &TypeMeta) -> Result<GroupVersionKind> {
    if types.kind.is_empty() {
        return Err(Error::MissingData("inline resource has no kind".to_string()));
    }
    let (group, version) = match types.api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), types.api_version.clone()),
    };
    if version.is_empty() {
        return Err(Error::MissingData(
            "inline resource has no apiVersion".to_string(),
        ));
    }
    Ok(GroupVersionKind {
        group,
        version,
        kind: types.kind.clone(),
    })
}

pub fn is_cluster_scoped(resource: &ApiResource) -> bool {
    CLUSTER_RESOURCES.contains(&resource.plural.as_str())
}

/// Namespace defaulting for operated objects: object namespace, then event
/// namespace, then `default`. Empty for cluster-scoped resources.
pub fn effective_namespace(
    resource: &ApiResource,
    object_namespace: Option<&str>,
    event_namespace: &str,
) -> Option<String> {
    if is_cluster_scoped(resource) {
        return None;
    }
    let namespace = object_namespace
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| {
            if event_namespace.is_empty() {
                "default"
            } else {
                event_namespace
            }
        });
    Some(namespace.to_string())
}

/// Dynamic api handle scoped to the effective namespace of the object.
pub fn dynamic_api(
    client: Client,
    resource: &ApiResource,
    namespace: Option<&str>,
) -> Api<DynamicObject> {
    match namespace {
        Some(ns) => Api::namespaced_with(client, ns, resource),
        None => Api::all_with(client, resource),
    }
}
