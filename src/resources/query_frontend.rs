//! Query Frontend manifests.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{HTTPGetAction, Probe};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::CacheConfig;
use crate::resources::common::{
    cache_config_source, cluster_service, container_port, env_from_config_map, object_meta,
    pod_template, selector_labels, service_account, service_port, standard_labels,
    thanos_container,
};
use crate::resources::object::ManagedObject;
use crate::resources::options::{Duration, Options};
use crate::resources::query;

/// Value of `app.kubernetes.io/name` on frontend objects
pub const NAME: &str = "thanos-query-frontend";

pub const COMPONENT: &str = "query-frontend";

pub const HTTP_PORT: i32 = 9090;

/// Suffix appended to the ThanosQuery name for frontend objects
pub const NAME_SUFFIX: &str = "-frontend";

const CACHE_CONFIG_ENV: &str = "CACHE_CONFIG";

/// Input of [`build_query_frontend`].
#[derive(Clone, Debug, PartialEq)]
pub struct QueryFrontendOptions {
    pub options: Options,
    /// Service name of the querier the frontend forwards to
    pub downstream: String,
    pub compress_responses: bool,
    pub response_cache: Option<CacheConfig>,
    pub log_queries_longer_than: Option<Duration>,
    pub query_range_split_interval: Option<Duration>,
    pub labels_split_interval: Option<Duration>,
    pub query_range_max_retries: i32,
    pub labels_max_retries: i32,
    pub labels_default_time_range: Option<Duration>,
}

/// Name of the frontend objects for ThanosQuery `name`
pub fn frontend_name(name: &str) -> String {
    format!("{name}{NAME_SUFFIX}")
}

fn cache_config_map_name(name: &str) -> String {
    format!("{name}-cache")
}

/// Build the frontend objects in apply order.
pub fn build_query_frontend(opts: &QueryFrontendOptions) -> Vec<ManagedObject> {
    let base = &opts.options;
    let name = base.name.as_str();
    let labels = standard_labels(NAME, COMPONENT, base);
    let selector = selector_labels(NAME, name);

    let (cache_selector, cache_config_map) = cache_config_source(
        opts.response_cache.as_ref(),
        &cache_config_map_name(name),
        base,
        labels.clone(),
    );

    let mut container = thanos_container(
        base,
        "query-frontend",
        frontend_args(opts),
        vec![container_port(query::HTTP_PORT_NAME, HTTP_PORT)],
        vec![env_from_config_map(CACHE_CONFIG_ENV, cache_selector)],
        vec![],
    );
    container.readiness_probe = Some(Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/-/ready".to_string()),
            port: IntOrString::String(query::HTTP_PORT_NAME.to_string()),
            ..Default::default()
        }),
        period_seconds: Some(10),
        ..Default::default()
    });

    let deployment = frontend_deployment(base, labels.clone(), selector.clone(), container);
    let service = cluster_service(
        name,
        base,
        labels.clone(),
        selector,
        vec![service_port(query::HTTP_PORT_NAME, HTTP_PORT)],
    );

    let mut objects = vec![ManagedObject::ServiceAccount(service_account(
        name, base, labels,
    ))];
    if let Some(cm) = cache_config_map {
        objects.push(ManagedObject::ConfigMap(cm));
    }
    objects.push(ManagedObject::Deployment(deployment));
    objects.push(ManagedObject::Service(service));
    objects
}

fn frontend_args(opts: &QueryFrontendOptions) -> Vec<String> {
    let mut args = vec![
        format!("--http-address=0.0.0.0:{HTTP_PORT}"),
        format!(
            "--query-frontend.downstream-url=http://{}.{}.svc.cluster.local:{}",
            opts.downstream,
            opts.options.namespace,
            query::HTTP_PORT
        ),
        format!("--query-range.response-cache-config=$({CACHE_CONFIG_ENV})"),
        format!("--labels.response-cache-config=$({CACHE_CONFIG_ENV})"),
        format!("--query-range.max-retries-per-request={}", opts.query_range_max_retries),
        format!("--labels.max-retries-per-request={}", opts.labels_max_retries),
    ];
    if opts.compress_responses {
        args.push("--query-frontend.compress-responses".to_string());
    }
    if let Some(d) = &opts.query_range_split_interval {
        args.push(format!("--query-range.split-interval={d}"));
    }
    if let Some(d) = &opts.labels_split_interval {
        args.push(format!("--labels.split-interval={d}"));
    }
    if let Some(d) = &opts.labels_default_time_range {
        args.push(format!("--labels.default-time-range={d}"));
    }
    if let Some(d) = &opts.log_queries_longer_than {
        args.push(format!("--query-frontend.log-queries-longer-than={d}"));
    }
    args
}

fn frontend_deployment(
    base: &Options,
    labels: BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
    container: k8s_openapi::api::core::v1::Container,
) -> Deployment {
    Deployment {
        metadata: object_meta(&base.name, &base.namespace, labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(base.replicas),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: pod_template(base, &base.name, labels, container, vec![]),
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
    use k8s_openapi::api::core::v1::ConfigMapKeySelector;

    fn opts() -> QueryFrontendOptions {
        QueryFrontendOptions {
            options: Options {
                name: frontend_name("q1"),
                namespace: "ns-a".to_string(),
                replicas: 1,
                ..Default::default()
            }
            .apply_defaults(),
            downstream: "q1".to_string(),
            compress_responses: true,
            response_cache: None,
            log_queries_longer_than: None,
            query_range_split_interval: Some(Duration::parse("f", "1h").unwrap()),
            labels_split_interval: None,
            query_range_max_retries: 5,
            labels_max_retries: 5,
            labels_default_time_range: Some(Duration::parse("f", "24h").unwrap()),
        }
    }

    fn args(objects: &[ManagedObject]) -> Vec<String> {
        let Some(ManagedObject::Deployment(d)) = objects
            .iter()
            .find(|o| o.kind() == ObjectKind::Deployment)
        else {
            panic!("no Deployment");
        };
        d.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .args
            .clone()
            .unwrap()
    }

    #[test]
    fn test_in_memory_cache_adds_config_map() {
        let objects = build_query_frontend(&opts());
        assert_eq!(objects.len(), 4);
        assert_eq!(objects[0].name(), "q1-frontend");
        assert_eq!(objects[1].name(), "q1-frontend-cache");
        assert_eq!(objects[1].kind(), ObjectKind::ConfigMap);
    }

    #[test]
    fn test_external_cache_has_no_config_map() {
        let mut o = opts();
        o.response_cache = Some(CacheConfig {
            from_config_map: Some(ConfigMapKeySelector {
                name: "memcached".to_string(),
                key: "config.yaml".to_string(),
                optional: None,
            }),
            ..Default::default()
        });
        let objects = build_query_frontend(&o);
        assert_eq!(objects.len(), 3);
        assert!(objects.iter().all(|o| o.kind() != ObjectKind::ConfigMap));
    }

    #[test]
    fn test_args() {
        let args = args(&build_query_frontend(&opts()));
        assert!(args.contains(
            &"--query-frontend.downstream-url=http://q1.ns-a.svc.cluster.local:10902".to_string()
        ));
        assert!(args.contains(&"--query-frontend.compress-responses".to_string()));
        assert!(args.contains(&"--query-range.split-interval=1h".to_string()));
        assert!(args.contains(&"--labels.default-time-range=24h".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--labels.split-interval")));
        assert!(!args.iter().any(|a| a.contains("log-queries-longer-than")));
    }
}
