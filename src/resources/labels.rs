//! Label keys and values shared by the manifests, the endpoint discoverer
//! and the Service watch.

use std::collections::BTreeMap;

/// Standard label for the application name (e.g. "thanos-query")
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for the instance (the custom resource name)
pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";

/// Standard label for the component within the architecture
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool managing the object
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the higher-level application
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

/// Value of `app.kubernetes.io/part-of` on every Thanos object
pub const PART_OF_THANOS: &str = "thanos";

/// Value of `app.kubernetes.io/managed-by`
pub const MANAGED_BY_OPERATOR: &str = "thanos-operator";

/// Marks a Service as exposing the Thanos StoreAPI
pub const STORE_API_LABEL: &str = "operator.thanos.io/store-api";

/// Value of [`STORE_API_LABEL`]
pub const STORE_API_VALUE: &str = "true";

/// Marks the shard index of a store Service/StatefulSet
pub const STORE_SHARD_LABEL: &str = "operator.thanos.io/shard";

/// Endpoint marker: always used, even when health checks fail
pub const ENDPOINT_STRICT_LABEL: &str = "operator.thanos.io/endpoint-strict";

/// Endpoint marker: endpoint group that is always used
pub const ENDPOINT_GROUP_STRICT_LABEL: &str = "operator.thanos.io/endpoint-group-strict";

/// Endpoint marker: endpoint group (e.g. a load balanced set of stores)
pub const ENDPOINT_GROUP_LABEL: &str = "operator.thanos.io/endpoint-group";

/// Implicit marker of an unmarked endpoint
pub const ENDPOINT_REGULAR_LABEL: &str = "operator.thanos.io/endpoint";

/// Name a Service port must carry to be used as a StoreAPI endpoint
pub const GRPC_PORT_NAME: &str = "grpc";

/// Labels every StoreAPI Service must carry to be discovered by a querier.
pub fn required_store_service_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (STORE_API_LABEL.to_string(), STORE_API_VALUE.to_string()),
        (K8S_PART_OF.to_string(), PART_OF_THANOS.to_string()),
    ])
}

/// Whether `labels` carries every required StoreAPI label with the expected value.
pub fn has_required_store_labels(labels: Option<&BTreeMap<String, String>>) -> bool {
    let Some(labels) = labels else {
        return false;
    };
    required_store_service_labels()
        .iter()
        .all(|(k, v)| labels.get(k) == Some(v))
}

/// `base` with every entry of `overlay` layered on top.
pub fn merge_labels(
    base: &BTreeMap<String, String>,
    overlay: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
