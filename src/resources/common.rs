//! Common resource generation utilities.
//!
//! Provides functions for creating standard Kubernetes resources with proper
//! labels, owner references, and configurations.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMap, ConfigMapKeySelector, Container, ContainerPort, EnvVar,
    EnvVarSource, PodSecurityContext, PodSpec, PodTemplateSpec, SecurityContext, Service,
    ServiceAccount, ServicePort, ServiceSpec, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::controller::error::{Error, Result};
use crate::crd::{CacheConfig, InMemoryCacheConfig};
use crate::resources::labels::{
    K8S_COMPONENT, K8S_INSTANCE, K8S_MANAGED_BY, K8S_NAME, K8S_PART_OF, MANAGED_BY_OPERATOR,
    PART_OF_THANOS,
};
use crate::resources::object::ManagedObject;
use crate::resources::options::Options;

/// Default in-memory cache size when the resource doesn't set one
const DEFAULT_CACHE_MAX_SIZE: &str = "512MB";

/// Labels selecting the pods of one component instance
pub fn selector_labels(app_name: &str, instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_NAME.to_string(), app_name.to_string()),
        (K8S_INSTANCE.to_string(), instance.to_string()),
    ])
}

/// Standard labels applied to all managed resources, with user labels merged in.
///
/// Selector labels are applied last so user labels can't break pod selection.
pub fn standard_labels(
    app_name: &str,
    component: &str,
    opts: &Options,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (K8S_COMPONENT.to_string(), component.to_string()),
        (K8S_MANAGED_BY.to_string(), MANAGED_BY_OPERATOR.to_string()),
        (K8S_PART_OF.to_string(), PART_OF_THANOS.to_string()),
    ]);
    labels.extend(opts.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels.extend(selector_labels(app_name, &opts.name));
    labels
}

pub fn object_meta(name: &str, namespace: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

/// Establish `owner` as the controller of `object`.
///
/// Fails when the owner has no uid, when the owner lives in another
/// namespace, or when a different controller already owns the object.
pub fn set_controller_reference<K>(owner: &K, object: &mut ManagedObject) -> Result<()>
where
    K: Resource<DynamicType = ()>,
{
    let owner_ref = owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::OwnerReference(format!(
            "{} {} has no uid",
            K::kind(&()),
            owner.name_any()
        ))
    })?;

    if owner.namespace().as_deref() != object.namespace() {
        return Err(Error::OwnerReference(format!(
            "cross-namespace owner references are not allowed: {} {} in {:?} cannot own {} {} in {:?}",
            K::kind(&()),
            owner.name_any(),
            owner.namespace(),
            object.kind(),
            object.name(),
            object.namespace(),
        )));
    }

    let kind = object.kind();
    let name = object.name().to_string();
    let refs = object
        .meta_mut()
        .owner_references
        .get_or_insert_with(Vec::new);
    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner_ref.uid)
    {
        return Err(Error::OwnerReference(format!(
            "{} {} is already controlled by {} {}",
            kind, name, other.kind, other.name
        )));
    }
    refs.retain(|r| r.uid != owner_ref.uid);
    refs.push(owner_ref);
    Ok(())
}

/// ServiceAccount for a component
pub fn service_account(name: &str, opts: &Options, labels: BTreeMap<String, String>) -> ServiceAccount {
    ServiceAccount {
        metadata: object_meta(name, &opts.namespace, labels),
        ..Default::default()
    }
}

/// ClusterIP Service exposing `ports` on the pods selected by `selector`.
pub fn cluster_service(
    name: &str,
    opts: &Options,
    labels: BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
    mut ports: Vec<ServicePort>,
) -> Service {
    ports.extend(opts.additional.service_ports.iter().cloned());
    Service {
        metadata: object_meta(name, &opts.namespace, labels),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::String(name.to_string())),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

pub fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Environment variable read from a ConfigMap key
pub fn env_from_config_map(name: &str, selector: ConfigMapKeySelector) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            config_map_key_ref: Some(selector),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The Thanos container of a component.
///
/// `args` are the component-specific flags; log flags come first and the
/// pass-through extras from the resource are appended last.
pub fn thanos_container(
    opts: &Options,
    subcommand: &str,
    args: Vec<String>,
    ports: Vec<ContainerPort>,
    env: Vec<EnvVar>,
    volume_mounts: Vec<VolumeMount>,
) -> Container {
    let mut all_args = vec![
        subcommand.to_string(),
        format!("--log.level={}", opts.log_level()),
        format!("--log.format={}", opts.log_format()),
    ];
    all_args.extend(args);
    all_args.extend(opts.additional.args.iter().cloned());

    let mut ports = ports;
    ports.extend(opts.additional.ports.iter().cloned());
    let mut env = env;
    env.extend(opts.additional.env.iter().cloned());
    let mut volume_mounts = volume_mounts;
    volume_mounts.extend(opts.additional.volume_mounts.iter().cloned());

    Container {
        name: "thanos".to_string(),
        image: Some(opts.image().to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(all_args),
        ports: Some(ports),
        env: if env.is_empty() { None } else { Some(env) },
        volume_mounts: if volume_mounts.is_empty() {
            None
        } else {
            Some(volume_mounts)
        },
        resources: opts.resource_requirements.clone(),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            run_as_non_root: Some(true),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Pod template running `container` plus the resource's extra containers and volumes.
pub fn pod_template(
    opts: &Options,
    service_account: &str,
    labels: BTreeMap<String, String>,
    container: Container,
    mut volumes: Vec<k8s_openapi::api::core::v1::Volume>,
) -> PodTemplateSpec {
    let mut containers = vec![container];
    containers.extend(opts.additional.containers.iter().cloned());
    volumes.extend(opts.additional.volumes.iter().cloned());

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(service_account.to_string()),
            containers,
            volumes: if volumes.is_empty() {
                None
            } else {
                Some(volumes)
            },
            security_context: Some(PodSecurityContext {
                run_as_non_root: Some(true),
                run_as_user: Some(65534),
                fs_group: Some(65534),
                ..Default::default()
            }),
            termination_grace_period_seconds: Some(120),
            ..Default::default()
        }),
    }
}

/// Render an in-memory cache configuration in the Thanos cache config format.
pub fn in_memory_cache_yaml(config: Option<&InMemoryCacheConfig>) -> String {
    let max_size = config
        .and_then(|c| c.max_size.as_deref())
        .unwrap_or(DEFAULT_CACHE_MAX_SIZE);
    let mut yaml = format!("type: IN-MEMORY\nconfig:\n  max_size: {max_size}\n");
    if let Some(item) = config.and_then(|c| c.max_item_size.as_deref()) {
        yaml.push_str(&format!("  max_item_size: {item}\n"));
    }
    yaml
}

/// Where a component reads a cache configuration from.
///
/// A user-supplied ConfigMap key is referenced as is. Otherwise the operator
/// renders an in-memory config into its own ConfigMap named `config_map_name`,
/// which is returned alongside the selector.
pub fn cache_config_source(
    config: Option<&CacheConfig>,
    config_map_name: &str,
    opts: &Options,
    labels: BTreeMap<String, String>,
) -> (ConfigMapKeySelector, Option<ConfigMap>) {
    if let Some(external) = config.and_then(|c| c.from_config_map.clone()) {
        return (external, None);
    }

    let yaml = in_memory_cache_yaml(config.and_then(|c| c.in_memory_cache_config.as_ref()));
    let config_map = ConfigMap {
        metadata: object_meta(config_map_name, &opts.namespace, labels),
        data: Some(BTreeMap::from([(CACHE_CONFIG_KEY.to_string(), yaml)])),
        ..Default::default()
    };
    let selector = ConfigMapKeySelector {
        name: config_map_name.to_string(),
        key: CACHE_CONFIG_KEY.to_string(),
        optional: None,
    };
    (selector, Some(config_map))
}

/// Key of the rendered cache config in operator-owned ConfigMaps
pub const CACHE_CONFIG_KEY: &str = "config.yaml";

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::crd::{ThanosQuery, ThanosQuerySpec};
    use k8s_openapi::api::core::v1::ConfigMap as CoreConfigMap;

    fn opts() -> Options {
        Options {
            name: "q1".to_string(),
            namespace: "ns-a".to_string(),
            replicas: 1,
            labels: BTreeMap::from([("team".to_string(), "obs".to_string())]),
            ..Default::default()
        }
        .apply_defaults()
    }

    fn owner(uid: Option<&str>, namespace: &str) -> ThanosQuery {
        ThanosQuery {
            metadata: ObjectMeta {
                name: Some("q1".to_string()),
                namespace: Some(namespace.to_string()),
                uid: uid.map(str::to_string),
                ..Default::default()
            },
            spec: ThanosQuerySpec::default(),
        }
    }

    fn child() -> ManagedObject {
        ManagedObject::ConfigMap(CoreConfigMap {
            metadata: object_meta("q1", "ns-a", BTreeMap::new()),
            ..Default::default()
        })
    }

    #[test]
    fn test_standard_labels_selector_wins() {
        let mut o = opts();
        o.labels
            .insert(K8S_INSTANCE.to_string(), "hijack".to_string());
        let labels = standard_labels("thanos-query", "query-layer", &o);
        assert_eq!(labels[K8S_INSTANCE], "q1");
        assert_eq!(labels[K8S_NAME], "thanos-query");
        assert_eq!(labels["team"], "obs");
        assert_eq!(labels[K8S_PART_OF], PART_OF_THANOS);
    }

    #[test]
    fn test_set_controller_reference() {
        let mut object = child();
        set_controller_reference(&owner(Some("uid-1"), "ns-a"), &mut object).unwrap();
        // Setting twice keeps a single reference
        set_controller_reference(&owner(Some("uid-1"), "ns-a"), &mut object).unwrap();

        let refs = object.meta().owner_references.as_ref().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uid, "uid-1");
        assert_eq!(refs[0].kind, "ThanosQuery");
        assert_eq!(refs[0].controller, Some(true));
    }

    #[test]
    fn test_set_controller_reference_without_uid_fails() {
        let mut object = child();
        let err = set_controller_reference(&owner(None, "ns-a"), &mut object).unwrap_err();
        assert!(matches!(err, Error::OwnerReference(_)));
    }

    #[test]
    fn test_set_controller_reference_cross_namespace_fails() {
        let mut object = child();
        assert!(set_controller_reference(&owner(Some("uid-1"), "other"), &mut object).is_err());
    }

    #[test]
    fn test_set_controller_reference_other_controller_fails() {
        let mut object = child();
        set_controller_reference(&owner(Some("uid-1"), "ns-a"), &mut object).unwrap();
        assert!(set_controller_reference(&owner(Some("uid-2"), "ns-a"), &mut object).is_err());
    }

    #[test]
    fn test_container_appends_additional_args_last() {
        let mut o = opts();
        o.additional.args = vec!["--extra".to_string()];
        let container = thanos_container(&o, "query", vec!["--a".to_string()], vec![], vec![], vec![]);
        let args = container.args.unwrap();
        assert_eq!(args[0], "query");
        assert_eq!(args[1], "--log.level=info");
        assert_eq!(args.last().unwrap(), "--extra");
    }

    #[test]
    fn test_cache_config_defaults_to_in_memory() {
        let (selector, config_map) = cache_config_source(None, "q1-cache", &opts(), BTreeMap::new());
        assert_eq!(selector.name, "q1-cache");
        let data = config_map.unwrap().data.unwrap();
        assert!(data[CACHE_CONFIG_KEY].contains("type: IN-MEMORY"));
        assert!(data[CACHE_CONFIG_KEY].contains("max_size: 512MB"));
    }

    #[test]
    fn test_cache_config_external_reference() {
        let external = ConfigMapKeySelector {
            name: "user-cache".to_string(),
            key: "memcached.yaml".to_string(),
            optional: None,
        };
        let config = CacheConfig {
            from_config_map: Some(external.clone()),
            ..Default::default()
        };
        let (selector, config_map) =
            cache_config_source(Some(&config), "q1-cache", &opts(), BTreeMap::new());
        assert_eq!(selector, external);
        assert!(config_map.is_none());
    }
}
