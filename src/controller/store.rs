//! Desired state of a ThanosStore: the sharded store gateways.

use async_trait::async_trait;
use kube::ResourceExt;

use crate::client::{ClusterApi, ObjectKey};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::reconciler::Reconcilable;
use crate::crd::ThanosStore;
use crate::resources::labels::merge_labels;
use crate::resources::object::ManagedObject;
use crate::resources::options::{Duration, Options, TimeBound, parse_quantity};
use crate::resources::store::{StoreOptions, build_stores};

/// Component name of the store tier
pub const STORE_COMPONENT: &str = "thanos-store";

/// Largest accepted `shardingStrategy.shards`
pub const MAX_STORE_SHARDS: i32 = 64;

#[async_trait]
impl Reconcilable for ThanosStore {
    const COMPONENT: &'static str = STORE_COMPONENT;

    async fn fetch(api: &dyn ClusterApi, key: &ObjectKey) -> Result<Self> {
        api.get_store(key).await
    }

    fn is_paused(&self) -> bool {
        self.spec.paused.unwrap_or(false)
    }

    async fn desired_objects(&self, _ctx: &Context) -> Result<Vec<ManagedObject>> {
        build_stores(&store_options(self)?)
    }
}

/// Store options from the spec. Malformed durations, time bounds, the
/// storage size or an out-of-range shard count fail the pass.
pub fn store_options(store: &ThanosStore) -> Result<StoreOptions> {
    let spec = &store.spec;
    let shards = spec.sharding_strategy.shards;
    if !(1..=MAX_STORE_SHARDS).contains(&shards) {
        return Err(Error::invalid_option(
            "shardingStrategy.shards",
            format!("{shards} is outside 1..={MAX_STORE_SHARDS}"),
        ));
    }
    Ok(StoreOptions {
        options: Options {
            name: store.name_any(),
            namespace: store.namespace().unwrap_or_default(),
            replicas: spec.sharding_strategy.shard_replicas,
            labels: merge_labels(store.labels(), &spec.labels),
            image: spec.common.image.clone(),
            log_level: spec.common.log_level.clone(),
            log_format: spec.common.log_format.clone(),
            resource_requirements: spec.common.resource_requirements.clone(),
            additional: spec.additional.clone(),
        }
        .apply_defaults(),
        object_storage: spec.object_storage_config.to_secret_key_selector(),
        index_cache: spec.index_cache_config.clone(),
        caching_bucket: spec.caching_bucket_config.clone(),
        min_time: TimeBound::parse_optional("minTime", spec.min_time.as_deref())?,
        max_time: TimeBound::parse_optional("maxTime", spec.max_time.as_deref())?,
        ignore_deletion_marks_delay: Duration::parse(
            "ignoreDeletionMarksDelay",
            &spec.ignore_deletion_marks_delay,
        )?,
        shards,
        storage_size: parse_quantity("storageSize", &spec.storage_size)?,
    })
}
