//! Test fixtures and builder patterns for ThanosQuery, ThanosStore and
//! StoreAPI Services.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use thanos_operator::crd::{
    CacheConfig, ObjectStorageConfig, QueryFrontendSpec, ShardingStrategy, ThanosQuery, ThanosQuerySpec,
    ThanosStore, ThanosStoreSpec,
};
use thanos_operator::resources::labels::required_store_service_labels;

/// Builder for creating ThanosQuery test fixtures.
///
/// # Example
/// ```
/// let query = ThanosQueryBuilder::new("q1")
///     .namespace("ns-a")
///     .match_label("tenant", "team-a")
///     .build();
/// ```
#[derive(Clone, Debug)]
pub struct ThanosQueryBuilder {
    name: String,
    namespace: String,
    uid: Option<String>,
    replicas: i32,
    metadata_labels: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    match_labels: BTreeMap<String, String>,
    paused: Option<bool>,
    frontend: Option<QueryFrontendSpec>,
}

impl ThanosQueryBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            uid: Some(format!("{name}-uid")),
            name,
            namespace: "default".to_string(),
            replicas: 1,
            metadata_labels: BTreeMap::new(),
            labels: BTreeMap::new(),
            match_labels: BTreeMap::new(),
            paused: None,
            frontend: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Drop the uid, as for an object that was never persisted.
    pub fn without_uid(mut self) -> Self {
        self.uid = None;
        self
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Add a label to every generated object.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add a label to the ThanosQuery's own metadata.
    pub fn metadata_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata_labels.insert(key.into(), value.into());
        self
    }

    /// Add a `matchLabels` entry to the store selector.
    pub fn match_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    pub fn frontend(mut self, frontend: QueryFrontendSpec) -> Self {
        self.frontend = Some(frontend);
        self
    }

    pub fn build(self) -> ThanosQuery {
        ThanosQuery {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                uid: self.uid,
                generation: Some(1),
                labels: (!self.metadata_labels.is_empty()).then_some(self.metadata_labels),
                ..Default::default()
            },
            spec: ThanosQuerySpec {
                replicas: self.replicas,
                labels: self.labels,
                store_label_selector: (!self.match_labels.is_empty()).then(|| LabelSelector {
                    match_labels: Some(self.match_labels),
                    ..Default::default()
                }),
                query_frontend: self.frontend,
                paused: self.paused,
                ..Default::default()
            },
        }
    }
}

/// Builder for creating ThanosStore test fixtures.
#[derive(Clone, Debug)]
pub struct ThanosStoreBuilder {
    name: String,
    namespace: String,
    shards: i32,
    shard_replicas: i32,
    storage_size: String,
    caching_bucket: Option<CacheConfig>,
    paused: Option<bool>,
    metadata_labels: BTreeMap<String, String>,
}

impl ThanosStoreBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            shards: 1,
            shard_replicas: 1,
            storage_size: "10Gi".to_string(),
            caching_bucket: None,
            paused: None,
            metadata_labels: BTreeMap::new(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn shards(mut self, shards: i32, replicas: i32) -> Self {
        self.shards = shards;
        self.shard_replicas = replicas;
        self
    }

    pub fn storage_size(mut self, size: impl Into<String>) -> Self {
        self.storage_size = size.into();
        self
    }

    /// Enable the in-memory caching bucket.
    pub fn caching_bucket(mut self) -> Self {
        self.caching_bucket = Some(CacheConfig::default());
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    /// Add a label to the ThanosStore's own metadata.
    pub fn metadata_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata_labels.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> ThanosStore {
        ThanosStore {
            metadata: ObjectMeta {
                uid: Some(format!("{}-uid", self.name)),
                name: Some(self.name),
                namespace: Some(self.namespace),
                generation: Some(1),
                labels: (!self.metadata_labels.is_empty()).then_some(self.metadata_labels),
                ..Default::default()
            },
            spec: ThanosStoreSpec {
                object_storage_config: ObjectStorageConfig {
                    name: "thanos-objstore".to_string(),
                    key: "thanos.yaml".to_string(),
                    optional: None,
                },
                ignore_deletion_marks_delay: "24h".to_string(),
                storage_size: self.storage_size,
                sharding_strategy: ShardingStrategy {
                    shards: self.shards,
                    shard_replicas: self.shard_replicas,
                    ..Default::default()
                },
                caching_bucket_config: self.caching_bucket,
                paused: self.paused,
                ..Default::default()
            },
        }
    }
}

/// Builder for Services exposing (or failing to expose) the StoreAPI.
#[derive(Clone, Debug)]
pub struct StoreServiceBuilder {
    name: String,
    namespace: String,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    port_name: String,
    port: i32,
    generation: Option<i64>,
}

impl StoreServiceBuilder {
    /// A Service carrying the required StoreAPI labels and a `grpc` port.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            labels: required_store_service_labels(),
            annotations: BTreeMap::new(),
            port_name: "grpc".to_string(),
            port: 10901,
            generation: None,
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn without_label(mut self, key: &str) -> Self {
        self.labels.remove(key);
        self
    }

    /// Add an endpoint marker label.
    pub fn marker(self, label: &str) -> Self {
        self.label(label, "true")
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Expose the port under another name.
    pub fn port_name(mut self, name: impl Into<String>) -> Self {
        self.port_name = name.into();
        self
    }

    pub fn port(mut self, port: i32) -> Self {
        self.port = port;
        self
    }

    pub fn generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn build(self) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                labels: Some(self.labels),
                annotations: (!self.annotations.is_empty()).then_some(self.annotations),
                generation: self.generation,
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some(self.port_name),
                    port: self.port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// A ThanosQuery in `default` with no selector narrowing.
pub fn minimal_query() -> ThanosQuery {
    ThanosQueryBuilder::new("test-query").build()
}

/// A single-shard ThanosStore in `default`.
pub fn minimal_store() -> ThanosStore {
    ThanosStoreBuilder::new("test-store").build()
}
