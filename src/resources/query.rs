//! Querier manifests.
//!
//! A querier is a ServiceAccount, a ConfigMap holding the file-SD target
//! list, a Deployment and a Service exposing gRPC and HTTP.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, HTTPGetAction, Probe, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::json;

use crate::controller::error::Result;
use crate::resources::common::{
    cluster_service, container_port, object_meta, pod_template, selector_labels, service_account,
    service_port, standard_labels, thanos_container,
};
use crate::resources::labels::{
    ENDPOINT_GROUP_LABEL, ENDPOINT_GROUP_STRICT_LABEL, ENDPOINT_REGULAR_LABEL,
    ENDPOINT_STRICT_LABEL, GRPC_PORT_NAME,
};
use crate::resources::object::ManagedObject;
use crate::resources::options::{Duration, Options};

/// Value of `app.kubernetes.io/name` on querier objects
pub const NAME: &str = "thanos-query";

/// Value of `app.kubernetes.io/component` on querier objects
pub const COMPONENT: &str = "query-layer";

pub const GRPC_PORT: i32 = 10901;
pub const HTTP_PORT: i32 = 10902;
pub const HTTP_PORT_NAME: &str = "http";

/// Key of the file-SD target list in the endpoints ConfigMap
pub const SD_FILE_KEY: &str = "endpoints.json";

const SD_MOUNT_PATH: &str = "/etc/thanos/sd";
const SD_VOLUME_NAME: &str = "endpoints";

/// How a querier treats a StoreAPI backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EndpointType {
    /// Discovered through the file-SD list
    Regular,
    /// Endpoint group, e.g. a load-balanced set of stores
    Group,
    /// Endpoint group that stays in use when health checks fail
    GroupStrict,
    /// Endpoint that stays in use when health checks fail
    Strict,
}

impl EndpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointType::Regular => "regular",
            EndpointType::Group => "group",
            EndpointType::GroupStrict => "group_strict",
            EndpointType::Strict => "strict",
        }
    }

    /// Label key that marks a Service as this type
    pub fn marker_label(&self) -> &'static str {
        match self {
            EndpointType::Regular => ENDPOINT_REGULAR_LABEL,
            EndpointType::Group => ENDPOINT_GROUP_LABEL,
            EndpointType::GroupStrict => ENDPOINT_GROUP_STRICT_LABEL,
            EndpointType::Strict => ENDPOINT_STRICT_LABEL,
        }
    }

    /// Querier flag for endpoints of this type, `None` for file-SD endpoints
    fn flag(&self) -> Option<&'static str> {
        match self {
            EndpointType::Regular => None,
            EndpointType::Group => Some("--endpoint-group"),
            EndpointType::GroupStrict => Some("--endpoint-group-strict"),
            EndpointType::Strict => Some("--endpoint-strict"),
        }
    }
}

impl fmt::Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A StoreAPI backend discovered from a Service.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub service_name: String,
    pub namespace: String,
    pub port: i32,
    pub endpoint_type: EndpointType,
}

impl Endpoint {
    /// Address resolved by the querier's DNS provider
    pub fn address(&self) -> String {
        format!(
            "dns+{}.{}.svc.cluster.local:{}",
            self.service_name, self.namespace, self.port
        )
    }
}

/// Input of [`build_query`].
#[derive(Clone, Debug, PartialEq)]
pub struct QueryOptions {
    pub options: Options,
    pub endpoints: Vec<Endpoint>,
    pub replica_labels: Vec<String>,
    pub timeout: Duration,
    pub lookback_delta: Duration,
    pub max_concurrent: i32,
}

/// Name of the ConfigMap holding the file-SD targets of querier `name`
pub fn endpoints_config_map_name(name: &str) -> String {
    format!("{name}-endpoints")
}

/// Build the querier objects in apply order.
pub fn build_query(opts: &QueryOptions) -> Result<Vec<ManagedObject>> {
    let base = &opts.options;
    let name = base.name.as_str();
    let labels = standard_labels(NAME, COMPONENT, base);
    let selector = selector_labels(NAME, name);

    // Listing order from the API server isn't stable; sort so repeated
    // passes render identical manifests.
    let mut endpoints = opts.endpoints.clone();
    endpoints.sort();

    let sd_config_map = endpoints_config_map(opts, &endpoints, labels.clone())?;
    let deployment = query_deployment(opts, &endpoints, labels.clone(), selector.clone());
    let service = cluster_service(
        name,
        base,
        labels.clone(),
        selector,
        vec![
            service_port(GRPC_PORT_NAME, GRPC_PORT),
            service_port(HTTP_PORT_NAME, HTTP_PORT),
        ],
    );

    Ok(vec![
        ManagedObject::ServiceAccount(service_account(name, base, labels)),
        ManagedObject::ConfigMap(sd_config_map),
        ManagedObject::Deployment(deployment),
        ManagedObject::Service(service),
    ])
}

fn endpoints_config_map(
    opts: &QueryOptions,
    endpoints: &[Endpoint],
    labels: BTreeMap<String, String>,
) -> Result<ConfigMap> {
    let targets: Vec<String> = endpoints
        .iter()
        .filter(|e| e.endpoint_type == EndpointType::Regular)
        .map(Endpoint::address)
        .collect();
    let sd = serde_json::to_string_pretty(&json!([{ "targets": targets }]))?;

    Ok(ConfigMap {
        metadata: object_meta(
            &endpoints_config_map_name(&opts.options.name),
            &opts.options.namespace,
            labels,
        ),
        data: Some(BTreeMap::from([(SD_FILE_KEY.to_string(), sd)])),
        ..Default::default()
    })
}

fn query_args(opts: &QueryOptions, endpoints: &[Endpoint]) -> Vec<String> {
    let mut args = vec![
        format!("--grpc-address=0.0.0.0:{GRPC_PORT}"),
        format!("--http-address=0.0.0.0:{HTTP_PORT}"),
        "--web.prefix-header=X-Forwarded-Prefix".to_string(),
        format!("--query.timeout={}", opts.timeout),
        format!("--query.lookback-delta={}", opts.lookback_delta),
        format!("--query.max-concurrent={}", opts.max_concurrent),
        "--query.auto-downsampling".to_string(),
        format!("--store.sd-files={SD_MOUNT_PATH}/{SD_FILE_KEY}"),
    ];
    args.extend(
        opts.replica_labels
            .iter()
            .map(|l| format!("--query.replica-label={l}")),
    );
    args.extend(endpoints.iter().filter_map(|e| {
        e.endpoint_type
            .flag()
            .map(|flag| format!("{flag}={}", e.address()))
    }));
    args
}

fn http_probe(path: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::String(HTTP_PORT_NAME.to_string()),
            ..Default::default()
        }),
        period_seconds: Some(10),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn query_deployment(
    opts: &QueryOptions,
    endpoints: &[Endpoint],
    labels: BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
) -> Deployment {
    let base = &opts.options;
    let sd_volume = Volume {
        name: SD_VOLUME_NAME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: endpoints_config_map_name(&base.name),
            ..Default::default()
        }),
        ..Default::default()
    };
    let sd_mount = VolumeMount {
        name: SD_VOLUME_NAME.to_string(),
        mount_path: SD_MOUNT_PATH.to_string(),
        read_only: Some(true),
        ..Default::default()
    };

    let mut container = thanos_container(
        base,
        "query",
        query_args(opts, endpoints),
        vec![
            container_port(GRPC_PORT_NAME, GRPC_PORT),
            container_port(HTTP_PORT_NAME, HTTP_PORT),
        ],
        vec![],
        vec![sd_mount],
    );
    container.liveness_probe = Some(http_probe("/-/healthy"));
    container.readiness_probe = Some(http_probe("/-/ready"));

    Deployment {
        metadata: object_meta(&base.name, &base.namespace, labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(base.replicas),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_unavailable: Some(IntOrString::Int(1)),
                    max_surge: Some(IntOrString::Int(1)),
                }),
            }),
            template: pod_template(base, &base.name, labels, container, vec![sd_volume]),
            ..Default::default()
        }),
        ..Default::default()
    }
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
    use crate::resources::object::ObjectKind;

    fn endpoint(name: &str, endpoint_type: EndpointType) -> Endpoint {
        Endpoint {
            service_name: name.to_string(),
            namespace: "ns-a".to_string(),
            port: 10901,
            endpoint_type,
        }
    }

    fn opts(endpoints: Vec<Endpoint>) -> QueryOptions {
        QueryOptions {
            options: Options {
                name: "q1".to_string(),
                namespace: "ns-a".to_string(),
                replicas: 2,
                ..Default::default()
            }
            .apply_defaults(),
            endpoints,
            replica_labels: vec!["replica".to_string()],
            timeout: Duration::parse("timeout", "15m").unwrap(),
            lookback_delta: Duration::parse("lookback", "5m").unwrap(),
            max_concurrent: 20,
        }
    }

    fn deployment_args(objects: &[ManagedObject]) -> Vec<String> {
        let ManagedObject::Deployment(d) = &objects[2] else {
            panic!("expected a Deployment, got {}", objects[2].kind());
        };
        d.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .args
            .clone()
            .unwrap()
    }

    #[test]
    fn test_object_order() {
        let objects = build_query(&opts(vec![])).unwrap();
        let kinds: Vec<_> = objects.iter().map(ManagedObject::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ObjectKind::ServiceAccount,
                ObjectKind::ConfigMap,
                ObjectKind::Deployment,
                ObjectKind::Service
            ]
        );
        assert_eq!(objects[1].name(), "q1-endpoints");
        assert!(objects.iter().all(|o| o.namespace() == Some("ns-a")));
    }

    #[test]
    fn test_fixed_defaults_rendered() {
        let args = deployment_args(&build_query(&opts(vec![])).unwrap());
        assert!(args.contains(&"--query.timeout=15m".to_string()));
        assert!(args.contains(&"--query.lookback-delta=5m".to_string()));
        assert!(args.contains(&"--query.max-concurrent=20".to_string()));
        assert!(args.contains(&"--query.replica-label=replica".to_string()));
    }

    #[test]
    fn test_endpoints_split_between_flags_and_sd_file() {
        let objects = build_query(&opts(vec![
            endpoint("store-a", EndpointType::Regular),
            endpoint("store-b", EndpointType::Strict),
            endpoint("store-c", EndpointType::Group),
        ]))
        .unwrap();

        let args = deployment_args(&objects);
        assert!(args.contains(
            &"--endpoint-strict=dns+store-b.ns-a.svc.cluster.local:10901".to_string()
        ));
        assert!(args.contains(
            &"--endpoint-group=dns+store-c.ns-a.svc.cluster.local:10901".to_string()
        ));
        assert!(!args.iter().any(|a| a.contains("store-a")));

        let ManagedObject::ConfigMap(cm) = &objects[1] else {
            panic!("expected a ConfigMap");
        };
        let sd: serde_json::Value =
            serde_json::from_str(&cm.data.as_ref().unwrap()[SD_FILE_KEY]).unwrap();
        assert_eq!(
            sd[0]["targets"],
            json!(["dns+store-a.ns-a.svc.cluster.local:10901"])
        );
    }

    #[test]
    fn test_endpoint_order_does_not_change_manifest() {
        let a = build_query(&opts(vec![
            endpoint("store-a", EndpointType::Strict),
            endpoint("store-b", EndpointType::Strict),
        ]))
        .unwrap();
        let b = build_query(&opts(vec![
            endpoint("store-b", EndpointType::Strict),
            endpoint("store-a", EndpointType::Strict),
        ]))
        .unwrap();
        assert_eq!(a, b);
    }
}
