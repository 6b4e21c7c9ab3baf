//! ThanosStore Custom Resource Definition.
//!
//! A ThanosStore deploys one or more Thanos Store Gateway shards serving
//! historical blocks from object storage.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::SecretKeySelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Additional, CacheConfig, CommonFields};

/// ThanosStore is the historical-data store tier.
///
/// Example:
/// ```yaml
/// apiVersion: monitoring.thanos.io/v1alpha1
/// kind: ThanosStore
/// metadata:
///   name: long-term
/// spec:
///   objectStorageConfig:
///     name: thanos-objstore
///     key: objstore.yaml
///   storageSize: 10Gi
///   shardingStrategy:
///     shards: 3
///     shardReplicas: 2
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "monitoring.thanos.io",
    version = "v1alpha1",
    kind = "ThanosStore",
    plural = "thanosstores",
    shortname = "ts",
    namespaced,
    printcolumn = r#"{"name":"Shards", "type":"integer", "jsonPath":".spec.shardingStrategy.shards"}"#,
    printcolumn = r#"{"name":"Paused", "type":"boolean", "jsonPath":".spec.paused"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ThanosStoreSpec {
    /// Labels added to every generated object.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(flatten)]
    pub common: CommonFields,

    /// Secret key holding the object storage configuration.
    pub object_storage_config: ObjectStorageConfig,

    /// Index cache configuration. In-memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_cache_config: Option<CacheConfig>,

    /// Caching bucket configuration. Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caching_bucket_config: Option<CacheConfig>,

    /// Oldest data served, as RFC 3339 or a duration relative to now (e.g. `-2w`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_time: Option<String>,

    /// Newest data served, as RFC 3339 or a duration relative to now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time: Option<String>,

    /// Delay before blocks marked for deletion are ignored.
    #[serde(default = "default_ignore_deletion_marks_delay")]
    pub ignore_deletion_marks_delay: String,

    /// How blocks are split across store shards.
    #[serde(default)]
    pub sharding_strategy: ShardingStrategy,

    /// Size of the persistent volume for each store pod.
    pub storage_size: String,

    /// Stop reconciling this resource while true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,

    #[serde(flatten)]
    pub additional: Additional,
}

/// Reference to the object storage configuration Secret.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStorageConfig {
    /// Secret name.
    pub name: String,

    /// Key within the Secret.
    #[serde(default = "default_objstore_key")]
    pub key: String,

    /// Whether the Secret must exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl ObjectStorageConfig {
    /// Convert into the core/v1 selector used in env var sources.
    pub fn to_secret_key_selector(&self) -> SecretKeySelector {
        SecretKeySelector {
            name: self.name.clone(),
            key: self.key.clone(),
            optional: self.optional,
        }
    }
}

fn default_objstore_key() -> String {
    "thanos.yaml".to_string()
}

/// Sharding strategy type.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ShardingStrategyType {
    /// Shard by hashing the block ID.
    #[default]
    Block,
}

/// Splits the store tier into independently scaled shards.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShardingStrategy {
    #[serde(default, rename = "type")]
    pub type_: ShardingStrategyType,

    /// Number of shards.
    #[serde(default = "default_shards")]
    #[schemars(range(min = 1, max = 64))]
    pub shards: i32,

    /// Replicas per shard.
    #[serde(default = "default_shard_replicas")]
    pub shard_replicas: i32,
}

impl Default for ShardingStrategy {
    fn default() -> Self {
        Self {
            type_: ShardingStrategyType::Block,
            shards: default_shards(),
            shard_replicas: default_shard_replicas(),
        }
    }
}

fn default_shards() -> i32 {
    1
}

fn default_shard_replicas() -> i32 {
    1
}

fn default_ignore_deletion_marks_delay() -> String {
    "24h".to_string()
}
