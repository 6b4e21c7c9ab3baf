//! ThanosQuery Custom Resource Definition.
//!
//! A ThanosQuery deploys a Thanos Querier that fans out to every StoreAPI
//! Service matching its store label selector, plus an optional Query
//! Frontend in front of it.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Additional, CacheConfig, CommonFields};

/// ThanosQuery is the query-serving tier.
///
/// Example:
/// ```yaml
/// apiVersion: monitoring.thanos.io/v1alpha1
/// kind: ThanosQuery
/// metadata:
///   name: global
/// spec:
///   replicas: 2
///   querierReplicaLabels: ["replica"]
///   storeLabelSelector:
///     matchLabels:
///       tenant: team-a
///   queryFrontend:
///     replicas: 1
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "monitoring.thanos.io",
    version = "v1alpha1",
    kind = "ThanosQuery",
    plural = "thanosqueries",
    shortname = "tq",
    namespaced,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Paused", "type":"boolean", "jsonPath":".spec.paused"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ThanosQuerySpec {
    /// Number of querier replicas.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Labels added to every generated object.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(flatten)]
    pub common: CommonFields,

    /// Labels treated as replica labels for deduplication.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub querier_replica_labels: Vec<String>,

    /// Narrows the set of StoreAPI Services the querier connects to.
    /// The operator always adds its own StoreAPI labels to this selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_label_selector: Option<LabelSelector>,

    /// Optional Query Frontend deployed in front of the querier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_frontend: Option<QueryFrontendSpec>,

    /// Stop reconciling this resource while true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,

    #[serde(flatten)]
    pub additional: Additional,
}

/// Query Frontend configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryFrontendSpec {
    /// Number of frontend replicas.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    #[serde(flatten)]
    pub common: CommonFields,

    /// Compress HTTP responses.
    #[serde(default = "default_compress_responses")]
    pub compress_responses: bool,

    /// Response cache for range queries. In-memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_range_response_cache_config: Option<CacheConfig>,

    /// Log queries running longer than this duration. Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_queries_longer_than: Option<String>,

    /// Split range queries by this interval.
    #[serde(default = "default_split_interval")]
    pub query_range_split_interval: Option<String>,

    /// Split label queries by this interval.
    #[serde(default = "default_split_interval")]
    pub labels_split_interval: Option<String>,

    /// Retries per range query request.
    #[serde(default = "default_max_retries")]
    pub query_range_max_retries: i32,

    /// Retries per label query request.
    #[serde(default = "default_max_retries")]
    pub labels_max_retries: i32,

    /// Default time range for label queries without explicit bounds.
    #[serde(default = "default_labels_time_range")]
    pub labels_default_time_range: Option<String>,

    #[serde(flatten)]
    pub additional: Additional,
}

impl Default for QueryFrontendSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            common: CommonFields::default(),
            compress_responses: default_compress_responses(),
            query_range_response_cache_config: None,
            log_queries_longer_than: None,
            query_range_split_interval: default_split_interval(),
            labels_split_interval: default_split_interval(),
            query_range_max_retries: default_max_retries(),
            labels_max_retries: default_max_retries(),
            labels_default_time_range: default_labels_time_range(),
            additional: Additional::default(),
        }
    }
}

fn default_replicas() -> i32 {
    1
}

fn default_compress_responses() -> bool {
    true
}

fn default_split_interval() -> Option<String> {
    Some("1h".to_string())
}

fn default_max_retries() -> i32 {
    5
}

fn default_labels_time_range() -> Option<String> {
    Some("24h".to_string())
}
