//! Fields shared by the ThanosQuery and ThanosStore specs.

use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, Container, ContainerPort, EnvVar, ResourceRequirements, ServicePort,
    Volume, VolumeMount,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Fields every Thanos component accepts.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommonFields {
    /// Container image. Defaults to the operator's pinned Thanos image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Log level passed to `--log.level` (debug, info, warn, error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Log format passed to `--log.format` (logfmt, json).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,

    /// Compute resources for the Thanos container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_requirements: Option<ResourceRequirements>,
}

/// Extra configuration passed through to the generated workload untouched.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Additional {
    /// Extra arguments appended to the Thanos container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Extra containers (sidecars) added to the pod.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,

    /// Extra volumes added to the pod.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Extra volume mounts added to the Thanos container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,

    /// Extra container ports on the Thanos container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,

    /// Extra environment variables on the Thanos container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Extra ports on the generated Service.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_ports: Vec<ServicePort>,
}

/// Cache configuration, either in-memory (rendered by the operator) or
/// supplied by the user in a ConfigMap.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// In-memory cache settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_memory_cache_config: Option<InMemoryCacheConfig>,

    /// Reference to a ConfigMap key holding a full cache configuration.
    /// Takes precedence over `inMemoryCacheConfig`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_config_map: Option<ConfigMapKeySelector>,
}

/// In-memory cache limits.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InMemoryCacheConfig {
    /// Maximum overall cache size, e.g. `512MB`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<String>,

    /// Maximum size of a single item, e.g. `5MB`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_item_size: Option<String>,
}
