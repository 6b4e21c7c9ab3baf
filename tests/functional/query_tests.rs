//! ThanosQuery passes: endpoint discovery feeding the querier objects.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use thanos_operator::client::ObjectKey;
use thanos_operator::controller::query::QUERY_COMPONENT;
use thanos_operator::controller::reconciler::reconcile;
use thanos_operator::crd::{QueryFrontendSpec, ThanosQuery};
use thanos_operator::resources::EndpointType;
use thanos_operator::resources::labels::{
    ENDPOINT_GROUP_LABEL, ENDPOINT_GROUP_STRICT_LABEL, ENDPOINT_STRICT_LABEL,
};
use thanos_operator::resources::object::{ManagedObject, ObjectKind};

use crate::common::fake::FakeCluster;
use crate::common::fixtures::{StoreServiceBuilder, ThanosQueryBuilder};

const NS: &str = "monitoring";

fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NS, name)
}

fn deployment(cluster: &FakeCluster, name: &str) -> Deployment {
    match cluster.object(ObjectKind::Deployment, NS, name) {
        Some(ManagedObject::Deployment(d)) => d,
        other => panic!("expected Deployment {name}, got {other:?}"),
    }
}

fn args(cluster: &FakeCluster, name: &str) -> Vec<String> {
    let d = deployment(cluster, name);
    d.spec.unwrap().template.spec.unwrap().containers[0]
        .args
        .clone()
        .unwrap_or_default()
}

fn sd_targets(cluster: &FakeCluster, name: &str) -> Vec<String> {
    let cm: ConfigMap = match cluster.object(ObjectKind::ConfigMap, NS, &format!("{name}-endpoints")) {
        Some(ManagedObject::ConfigMap(cm)) => cm,
        other => panic!("expected endpoints ConfigMap, got {other:?}"),
    };
    let data = cm.data.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&data["endpoints.json"]).unwrap();
    parsed[0]["targets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_strict_and_regular_endpoints() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    cluster.add_service(
        StoreServiceBuilder::new("store-a")
            .namespace(NS)
            .marker(ENDPOINT_STRICT_LABEL)
            .build(),
    );
    cluster.add_service(StoreServiceBuilder::new("store-b").namespace(NS).build());
    let ctx = cluster.context();

    let outcome = reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();
    assert_eq!(outcome.succeeded, 4);

    for (kind, name) in [
        (ObjectKind::ServiceAccount, "q1"),
        (ObjectKind::ConfigMap, "q1-endpoints"),
        (ObjectKind::Deployment, "q1"),
        (ObjectKind::Service, "q1"),
    ] {
        assert!(cluster.object(kind, NS, name).is_some(), "missing {kind} {name}");
    }

    assert_eq!(
        sd_targets(&cluster, "q1"),
        vec!["dns+store-b.monitoring.svc.cluster.local:10901"]
    );
    assert!(
        args(&cluster, "q1")
            .contains(&"--endpoint-strict=dns+store-a.monitoring.svc.cluster.local:10901".to_string())
    );

    assert_eq!(
        ctx.metrics
            .endpoints_configured(EndpointType::Strict, "q1", NS),
        1
    );
    assert_eq!(
        ctx.metrics
            .endpoints_configured(EndpointType::Regular, "q1", NS),
        1
    );
    assert_eq!(ctx.metrics.reconciliations(QUERY_COMPONENT), 1);
    assert_eq!(ctx.metrics.failures(QUERY_COMPONENT), 0);
}

#[tokio::test]
async fn test_owner_reference_on_every_object() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    let ctx = cluster.context();

    reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    let d = deployment(&cluster, "q1");
    let owners = d.metadata.owner_references.unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "ThanosQuery");
    assert_eq!(owners[0].name, "q1");
    assert_eq!(owners[0].uid, "q1-uid");
    assert_eq!(owners[0].controller, Some(true));
}

#[tokio::test]
async fn test_all_markers_classify_as_strict() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    cluster.add_service(
        StoreServiceBuilder::new("store-a")
            .namespace(NS)
            .marker(ENDPOINT_GROUP_LABEL)
            .marker(ENDPOINT_GROUP_STRICT_LABEL)
            .marker(ENDPOINT_STRICT_LABEL)
            .build(),
    );
    let ctx = cluster.context();

    reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    assert_eq!(
        ctx.metrics
            .endpoints_configured(EndpointType::Strict, "q1", NS),
        1
    );
    assert_eq!(
        ctx.metrics
            .endpoints_configured(EndpointType::GroupStrict, "q1", NS),
        0
    );
    assert!(sd_targets(&cluster, "q1").is_empty());
}

#[tokio::test]
async fn test_group_endpoints_use_group_flags() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    cluster.add_service(
        StoreServiceBuilder::new("group-a")
            .namespace(NS)
            .marker(ENDPOINT_GROUP_LABEL)
            .build(),
    );
    cluster.add_service(
        StoreServiceBuilder::new("group-b")
            .namespace(NS)
            .marker(ENDPOINT_GROUP_STRICT_LABEL)
            .build(),
    );
    let ctx = cluster.context();

    reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    let args = args(&cluster, "q1");
    assert!(args.contains(&"--endpoint-group=dns+group-a.monitoring.svc.cluster.local:10901".to_string()));
    assert!(
        args.contains(&"--endpoint-group-strict=dns+group-b.monitoring.svc.cluster.local:10901".to_string())
    );
}

#[tokio::test]
async fn test_service_without_grpc_port_is_excluded() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    cluster.add_service(
        StoreServiceBuilder::new("store-http")
            .namespace(NS)
            .port_name("http")
            .build(),
    );
    let ctx = cluster.context();

    let outcome = reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    assert_eq!(outcome.succeeded, 4);
    assert!(sd_targets(&cluster, "q1").is_empty());
    for endpoint_type in [
        EndpointType::Regular,
        EndpointType::Group,
        EndpointType::GroupStrict,
        EndpointType::Strict,
    ] {
        assert_eq!(
            ctx.metrics.endpoints_configured(endpoint_type, "q1", NS),
            0
        );
    }
}

#[tokio::test]
async fn test_selector_narrows_endpoints() {
    let cluster = FakeCluster::new();
    cluster.add_query(
        ThanosQueryBuilder::new("q1")
            .namespace(NS)
            .match_label("tenant", "a")
            .build(),
    );
    cluster.add_service(
        StoreServiceBuilder::new("store-a")
            .namespace(NS)
            .label("tenant", "a")
            .build(),
    );
    cluster.add_service(
        StoreServiceBuilder::new("store-b")
            .namespace(NS)
            .label("tenant", "b")
            .build(),
    );
    // Matches the user selector but lacks the StoreAPI labels
    cluster.add_service(
        StoreServiceBuilder::new("not-a-store")
            .namespace(NS)
            .label("tenant", "a")
            .without_label("operator.thanos.io/store-api")
            .build(),
    );
    let ctx = cluster.context();

    reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    assert_eq!(
        sd_targets(&cluster, "q1"),
        vec!["dns+store-a.monitoring.svc.cluster.local:10901"]
    );
}

#[tokio::test]
async fn test_services_in_other_namespaces_are_ignored() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    cluster.add_service(StoreServiceBuilder::new("store-a").namespace("other").build());
    let ctx = cluster.context();

    reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    assert!(sd_targets(&cluster, "q1").is_empty());
    assert_eq!(cluster.events_with_reason("NoEndpointsFound"), 1);
}

#[tokio::test]
async fn test_no_matching_services_warns_and_deploys() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    let ctx = cluster.context();

    let outcome = reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    assert_eq!(outcome.succeeded, 4);
    assert_eq!(cluster.events_with_reason("NoEndpointsFound"), 1);
    let (reference, event) = cluster
        .events()
        .into_iter()
        .find(|(_, e)| e.reason == "NoEndpointsFound")
        .unwrap();
    assert_eq!(reference.name.as_deref(), Some("q1"));
    assert_eq!(event.action, "DiscoverEndpoints");
}

#[tokio::test]
async fn test_service_list_failure_fails_pass() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    cluster.fail_list_services();
    let ctx = cluster.context();

    let result = reconcile::<ThanosQuery>(&key("q1"), &ctx).await;

    assert!(result.is_err());
    assert_eq!(cluster.writes(), 0);
    assert_eq!(ctx.metrics.client_errors(QUERY_COMPONENT), 1);
    assert_eq!(ctx.metrics.failures(QUERY_COMPONENT), 1);
    assert_eq!(cluster.events_with_reason("SyncFailed"), 1);
}

#[tokio::test]
async fn test_new_endpoint_updates_config_and_deployment() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    cluster.add_service(StoreServiceBuilder::new("store-a").namespace(NS).build());
    let ctx = cluster.context();
    reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();
    cluster.reset_counters();

    cluster.add_service(
        StoreServiceBuilder::new("store-b")
            .namespace(NS)
            .marker(ENDPOINT_STRICT_LABEL)
            .build(),
    );
    reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    // The regular target set is unchanged; only the strict flag is new
    assert_eq!(cluster.creates(), 0);
    assert_eq!(cluster.updates(), 1);
    assert!(
        args(&cluster, "q1")
            .contains(&"--endpoint-strict=dns+store-b.monitoring.svc.cluster.local:10901".to_string())
    );
}

#[tokio::test]
async fn test_query_frontend_objects() {
    let cluster = FakeCluster::new();
    cluster.add_query(
        ThanosQueryBuilder::new("q1")
            .namespace(NS)
            .frontend(QueryFrontendSpec::default())
            .build(),
    );
    let ctx = cluster.context();

    let outcome = reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    assert_eq!(outcome.succeeded, 8);
    assert!(cluster.object(ObjectKind::Deployment, NS, "q1-frontend").is_some());
    assert!(cluster.object(ObjectKind::ConfigMap, NS, "q1-frontend-cache").is_some());
    assert_eq!(cluster.events_with_reason("BuildingQueryFrontend"), 1);

    let frontend_args = args(&cluster, "q1-frontend");
    assert!(
        frontend_args
            .iter()
            .any(|a| a.contains("q1.monitoring.svc.cluster.local:10902"))
    );
}

#[tokio::test]
async fn test_resource_labels_reach_children() {
    let cluster = FakeCluster::new();
    cluster.add_query(
        ThanosQueryBuilder::new("q1")
            .namespace(NS)
            .metadata_label("team", "obs")
            .metadata_label("tier", "meta")
            .label("tier", "spec")
            .frontend(QueryFrontendSpec::default())
            .build(),
    );
    let ctx = cluster.context();

    reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    let labels = deployment(&cluster, "q1").metadata.labels.unwrap();
    assert_eq!(labels.get("team").map(String::as_str), Some("obs"));
    assert_eq!(labels.get("tier").map(String::as_str), Some("spec"));

    // The frontend only carries the resource's own labels
    let frontend = deployment(&cluster, "q1-frontend").metadata.labels.unwrap();
    assert_eq!(frontend.get("team").map(String::as_str), Some("obs"));
    assert_eq!(frontend.get("tier").map(String::as_str), Some("meta"));
}
