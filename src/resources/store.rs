//! Store Gateway manifests.
//!
//! One ServiceAccount shared by all shards, the operator-rendered cache
//! ConfigMaps, then a StoreAPI Service and a StatefulSet per shard.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, PersistentVolumeClaim, PersistentVolumeClaimSpec, SecretKeySelector,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde_json::json;

use crate::controller::error::Result;
use crate::crd::CacheConfig;
use crate::resources::common::{
    cache_config_source, cluster_service, container_port, env_from_config_map, object_meta,
    pod_template, selector_labels, service_account, service_port, standard_labels,
    thanos_container,
};
use crate::resources::labels::{GRPC_PORT_NAME, STORE_SHARD_LABEL, required_store_service_labels};
use crate::resources::object::ManagedObject;
use crate::resources::options::{Duration, Options, TimeBound};
use crate::resources::query::{GRPC_PORT, HTTP_PORT, HTTP_PORT_NAME};

/// Value of `app.kubernetes.io/name` on store objects
pub const NAME: &str = "thanos-store";

pub const COMPONENT: &str = "object-storage-gateway";

const DATA_VOLUME_NAME: &str = "data";
const DATA_DIR: &str = "/var/thanos/store";

const OBJSTORE_ENV: &str = "OBJSTORE_CONFIG";
const INDEX_CACHE_ENV: &str = "INDEX_CACHE_CONFIG";
const CACHING_BUCKET_ENV: &str = "CACHING_BUCKET_CONFIG";

/// Input of [`build_stores`].
#[derive(Clone, Debug, PartialEq)]
pub struct StoreOptions {
    /// `replicas` is the replica count of each shard
    pub options: Options,
    pub object_storage: SecretKeySelector,
    pub index_cache: Option<CacheConfig>,
    pub caching_bucket: Option<CacheConfig>,
    pub min_time: Option<TimeBound>,
    pub max_time: Option<TimeBound>,
    pub ignore_deletion_marks_delay: Duration,
    pub shards: i32,
    pub storage_size: Quantity,
}

/// Name of the Service and StatefulSet of shard `index`
pub fn shard_name(name: &str, shards: i32, index: i32) -> String {
    if shards <= 1 {
        name.to_string()
    } else {
        format!("{name}-shard-{index}")
    }
}

/// Build the store objects in apply order.
pub fn build_stores(opts: &StoreOptions) -> Result<Vec<ManagedObject>> {
    let base = &opts.options;
    let name = base.name.as_str();
    let labels = standard_labels(NAME, COMPONENT, base);

    let mut objects = vec![ManagedObject::ServiceAccount(service_account(
        name,
        base,
        labels.clone(),
    ))];

    let (index_cache, index_cache_cm) = cache_config_source(
        opts.index_cache.as_ref(),
        &format!("{name}-index-cache"),
        base,
        labels.clone(),
    );
    objects.extend(index_cache_cm.map(ManagedObject::ConfigMap));

    let mut env = vec![
        EnvVar {
            name: OBJSTORE_ENV.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(opts.object_storage.clone()),
                ..Default::default()
            }),
            ..Default::default()
        },
        env_from_config_map(INDEX_CACHE_ENV, index_cache),
    ];

    // The caching bucket is opt-in, unlike the index cache
    if let Some(config) = &opts.caching_bucket {
        let (selector, cm) = cache_config_source(
            Some(config),
            &format!("{name}-caching-bucket"),
            base,
            labels.clone(),
        );
        objects.extend(cm.map(ManagedObject::ConfigMap));
        env.push(env_from_config_map(CACHING_BUCKET_ENV, selector));
    }

    let shards = opts.shards.max(1);
    for index in 0..shards {
        let shard = shard_name(name, shards, index);
        let mut shard_labels = labels.clone();
        shard_labels.extend(selector_labels(NAME, &shard));
        shard_labels.insert(STORE_SHARD_LABEL.to_string(), index.to_string());

        objects.push(ManagedObject::Service(shard_service(
            opts,
            &shard,
            shard_labels.clone(),
        )));
        objects.push(ManagedObject::StatefulSet(shard_stateful_set(
            opts,
            &shard,
            index,
            shard_labels,
            env.clone(),
        )?));
    }
    Ok(objects)
}

fn shard_service(
    opts: &StoreOptions,
    shard: &str,
    shard_labels: BTreeMap<String, String>,
) -> k8s_openapi::api::core::v1::Service {
    let mut labels = shard_labels;
    labels.extend(required_store_service_labels());

    let mut service = cluster_service(
        shard,
        &opts.options,
        labels,
        selector_labels(NAME, shard),
        vec![
            service_port(GRPC_PORT_NAME, GRPC_PORT),
            service_port(HTTP_PORT_NAME, HTTP_PORT),
        ],
    );
    if let Some(spec) = service.spec.as_mut() {
        spec.cluster_ip = Some("None".to_string());
    }
    service
}

fn store_args(opts: &StoreOptions, index: i32) -> Result<Vec<String>> {
    let mut args = vec![
        format!("--grpc-address=0.0.0.0:{GRPC_PORT}"),
        format!("--http-address=0.0.0.0:{HTTP_PORT}"),
        format!("--data-dir={DATA_DIR}"),
        format!("--objstore.config=$({OBJSTORE_ENV})"),
        format!("--index-cache.config=$({INDEX_CACHE_ENV})"),
        format!(
            "--ignore-deletion-marks-delay={}",
            opts.ignore_deletion_marks_delay
        ),
    ];
    if opts.caching_bucket.is_some() {
        args.push(format!("--store.caching-bucket.config=$({CACHING_BUCKET_ENV})"));
    }
    if let Some(t) = &opts.min_time {
        args.push(format!("--min-time={}", t.as_str()));
    }
    if let Some(t) = &opts.max_time {
        args.push(format!("--max-time={}", t.as_str()));
    }
    if opts.shards > 1 {
        let relabel = json!([
            {
                "action": "hashmod",
                "source_labels": ["__block_id"],
                "target_label": "shard",
                "modulus": opts.shards,
            },
            {
                "action": "keep",
                "source_labels": ["shard"],
                "regex": index.to_string(),
            },
        ]);
        args.push(format!(
            "--selector.relabel-config={}",
            serde_json::to_string(&relabel)?
        ));
    }
    Ok(args)
}

fn shard_stateful_set(
    opts: &StoreOptions,
    shard: &str,
    index: i32,
    labels: BTreeMap<String, String>,
    env: Vec<EnvVar>,
) -> Result<StatefulSet> {
    let base = &opts.options;
    let container = thanos_container(
        base,
        "store",
        store_args(opts, index)?,
        vec![
            container_port(GRPC_PORT_NAME, GRPC_PORT),
            container_port(HTTP_PORT_NAME, HTTP_PORT),
        ],
        env,
        vec![VolumeMount {
            name: DATA_VOLUME_NAME.to_string(),
            mount_path: DATA_DIR.to_string(),
            ..Default::default()
        }],
    );

    let claim = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME_NAME.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    opts.storage_size.clone(),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(StatefulSet {
        metadata: object_meta(shard, &base.namespace, labels.clone()),
        spec: Some(StatefulSetSpec {
            replicas: Some(base.replicas),
            service_name: shard.to_string(),
            pod_management_policy: Some("Parallel".to_string()),
            selector: LabelSelector {
                match_labels: Some(selector_labels(NAME, shard)),
                ..Default::default()
            },
            template: pod_template(base, &base.name, labels, container, vec![]),
            volume_claim_templates: Some(vec![claim]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::resources::labels::has_required_store_labels;
    use crate::resources::object::ObjectKind;

    fn opts(shards: i32) -> StoreOptions {
        StoreOptions {
            options: Options {
                name: "s1".to_string(),
                namespace: "ns-a".to_string(),
                replicas: 2,
                ..Default::default()
            }
            .apply_defaults(),
            object_storage: SecretKeySelector {
                name: "objstore".to_string(),
                key: "thanos.yaml".to_string(),
                optional: None,
            },
            index_cache: None,
            caching_bucket: None,
            min_time: Some(TimeBound::parse("minTime", "-2w").unwrap()),
            max_time: None,
            ignore_deletion_marks_delay: Duration::parse("d", "24h").unwrap(),
            shards,
            storage_size: Quantity("10Gi".to_string()),
        }
    }

    fn stateful_sets(objects: &[ManagedObject]) -> Vec<&StatefulSet> {
        objects
            .iter()
            .filter_map(|o| match o {
                ManagedObject::StatefulSet(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn args(sts: &StatefulSet) -> Vec<String> {
        sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .args
            .clone()
            .unwrap()
    }

    #[test]
    fn test_single_shard() {
        let objects = build_stores(&opts(1)).unwrap();
        let kinds: Vec<_> = objects.iter().map(ManagedObject::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ObjectKind::ServiceAccount,
                ObjectKind::ConfigMap,
                ObjectKind::Service,
                ObjectKind::StatefulSet
            ]
        );
        let sts = stateful_sets(&objects);
        assert_eq!(sts[0].metadata.name.as_deref(), Some("s1"));
        assert!(!args(sts[0]).iter().any(|a| a.starts_with("--selector.relabel-config")));
        assert!(args(sts[0]).contains(&"--min-time=-2w".to_string()));
    }

    #[test]
    fn test_sharded_stores() {
        let objects = build_stores(&opts(3)).unwrap();
        let sts = stateful_sets(&objects);
        assert_eq!(sts.len(), 3);
        assert_eq!(sts[2].metadata.name.as_deref(), Some("s1-shard-2"));
        assert_eq!(sts[2].spec.as_ref().unwrap().replicas, Some(2));

        let relabel = args(sts[2])
            .into_iter()
            .find_map(|a| a.strip_prefix("--selector.relabel-config=").map(str::to_string))
            .unwrap();
        let relabel: serde_json::Value = serde_json::from_str(&relabel).unwrap();
        assert_eq!(relabel[0]["modulus"], 3);
        assert_eq!(relabel[1]["regex"], "2");
    }

    #[test]
    fn test_shard_services_are_store_api() {
        let objects = build_stores(&opts(2)).unwrap();
        let services: Vec<_> = objects
            .iter()
            .filter(|o| o.kind() == ObjectKind::Service)
            .collect();
        assert_eq!(services.len(), 2);
        for service in services {
            assert!(has_required_store_labels(service.meta().labels.as_ref()));
        }
    }

    #[test]
    fn test_storage_size_in_claim() {
        let objects = build_stores(&opts(1)).unwrap();
        let sts = stateful_sets(&objects);
        let claim = &sts[0].spec.as_ref().unwrap().volume_claim_templates.as_ref().unwrap()[0];
        let requests = claim
            .spec
            .as_ref()
            .unwrap()
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert_eq!(requests["storage"], Quantity("10Gi".to_string()));
    }

    #[test]
    fn test_caching_bucket_opt_in() {
        let mut o = opts(1);
        o.caching_bucket = Some(CacheConfig::default());
        let objects = build_stores(&o).unwrap();
        assert!(objects.iter().any(|o| o.name() == "s1-caching-bucket"));
        assert!(
            args(stateful_sets(&objects)[0])
                .contains(&"--store.caching-bucket.config=$(CACHING_BUCKET_CONFIG)".to_string())
        );
    }
}
