//! Engine behavior shared by both resource kinds.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use tokio_util::sync::CancellationToken;

use thanos_operator::client::ObjectKey;
use thanos_operator::controller::context::Context;
use thanos_operator::controller::error::Error;
use thanos_operator::controller::query::QUERY_COMPONENT;
use thanos_operator::controller::reconciler::{
    ReconcileOutcome, error_policy, reconcile, reconcile_resource,
};
use thanos_operator::controller::store::STORE_COMPONENT;
use thanos_operator::crd::{ThanosQuery, ThanosStore};
use thanos_operator::health::Metrics;
use thanos_operator::resources::object::{ManagedObject, ObjectKind};

use crate::common::fake::FakeCluster;
use crate::common::fixtures::{StoreServiceBuilder, ThanosQueryBuilder, ThanosStoreBuilder};

const NS: &str = "monitoring";

fn key(name: &str) -> ObjectKey {
    ObjectKey::new(NS, name)
}

#[tokio::test]
async fn test_second_pass_writes_nothing() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    cluster.add_service(StoreServiceBuilder::new("store-a").namespace(NS).build());
    let ctx = cluster.context();

    reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();
    assert_eq!(cluster.creates(), 4);
    cluster.reset_counters();

    let outcome = reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();
    assert_eq!(outcome.succeeded, 4);
    assert_eq!(cluster.writes(), 0);
    assert_eq!(ctx.metrics.reconciliations(QUERY_COMPONENT), 2);
}

#[tokio::test]
async fn test_store_second_pass_writes_nothing() {
    let cluster = FakeCluster::new();
    cluster.add_store(
        ThanosStoreBuilder::new("s1")
            .namespace(NS)
            .shards(3, 2)
            .caching_bucket()
            .build(),
    );
    let ctx = cluster.context();

    reconcile::<ThanosStore>(&key("s1"), &ctx).await.unwrap();
    cluster.reset_counters();
    reconcile::<ThanosStore>(&key("s1"), &ctx).await.unwrap();

    assert_eq!(cluster.writes(), 0);
}

#[tokio::test]
async fn test_drift_is_reverted() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).replicas(2).build());
    let ctx = cluster.context();
    reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    let Some(ManagedObject::Deployment(mut drifted)) =
        cluster.object(ObjectKind::Deployment, NS, "q1")
    else {
        panic!("expected Deployment");
    };
    drifted.spec.as_mut().unwrap().replicas = Some(5);
    cluster.put_object(ManagedObject::Deployment(drifted));
    cluster.reset_counters();

    reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    assert_eq!(cluster.updates(), 1);
    let Some(ManagedObject::Deployment(Deployment { spec, .. })) =
        cluster.object(ObjectKind::Deployment, NS, "q1")
    else {
        panic!("expected Deployment");
    };
    assert_eq!(spec.unwrap().replicas, Some(2));
}

#[tokio::test]
async fn test_paused_resource_is_left_alone() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).paused(true).build());
    let ctx = cluster.context();

    let outcome = reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::default());
    assert_eq!(cluster.writes(), 0);
    assert_eq!(cluster.object_count(), 0);
    let events = cluster.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1.reason, "Paused");
    assert_eq!(events[0].1.type_, EventType::Normal);
}

#[tokio::test]
async fn test_paused_store_is_left_alone() {
    let cluster = FakeCluster::new();
    cluster.add_store(ThanosStoreBuilder::new("s1").namespace(NS).paused(true).build());
    let ctx = cluster.context();

    reconcile::<ThanosStore>(&key("s1"), &ctx).await.unwrap();

    assert_eq!(cluster.writes(), 0);
    assert_eq!(cluster.events_with_reason("Paused"), 1);
}

#[tokio::test]
async fn test_missing_resource_is_not_an_error() {
    let cluster = FakeCluster::new();
    let ctx = cluster.context();

    let outcome = reconcile::<ThanosQuery>(&key("gone"), &ctx).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::default());
    assert!(cluster.events().is_empty());
    assert_eq!(cluster.writes(), 0);
    assert_eq!(ctx.metrics.failures(QUERY_COMPONENT), 0);
}

#[tokio::test]
async fn test_fetch_failure_is_reported() {
    let cluster = FakeCluster::new();
    cluster.add_store(ThanosStoreBuilder::new("s1").namespace(NS).build());
    cluster.fail_fetch(503);
    let ctx = cluster.context();

    let err = reconcile::<ThanosStore>(&key("s1"), &ctx).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(ctx.metrics.client_errors(STORE_COMPONENT), 1);
    assert_eq!(ctx.metrics.failures(STORE_COMPONENT), 1);
    let events = cluster.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1.reason, "GetFailed");
    assert_eq!(events[0].1.type_, EventType::Warning);
    assert_eq!(events[0].0.kind.as_deref(), Some("ThanosStore"));
    assert_eq!(events[0].0.name.as_deref(), Some("s1"));
}

#[tokio::test]
async fn test_one_failed_object_does_not_stop_the_batch() {
    let cluster = FakeCluster::new();
    cluster.add_store(
        ThanosStoreBuilder::new("s1")
            .namespace(NS)
            .caching_bucket()
            .build(),
    );
    cluster.fail_writes_to("s1-caching-bucket");
    let ctx = cluster.context();

    let err = reconcile::<ThanosStore>(&key("s1"), &ctx).await.unwrap_err();

    assert!(err.to_string().contains("1 of 5"), "unexpected error: {err}");
    assert!(matches!(
        err,
        Error::SyncFailed {
            failed: 1,
            total: 5,
            ..
        }
    ));
    assert_eq!(cluster.creates(), 4);
    assert!(cluster.object(ObjectKind::StatefulSet, NS, "s1").is_some());
    assert!(cluster.object(ObjectKind::ConfigMap, NS, "s1-caching-bucket").is_none());
    assert_eq!(ctx.metrics.client_errors(STORE_COMPONENT), 1);
    assert_eq!(ctx.metrics.failures(STORE_COMPONENT), 1);
    // One event names the failed object, one reports the pass
    assert_eq!(cluster.events_with_reason("SyncFailed"), 2);
    assert!(cluster.events().iter().any(|(_, e)| {
        e.note
            .as_deref()
            .is_some_and(|n| n.contains("ConfigMap s1-caching-bucket"))
    }));

    let store = Arc::new(ThanosStoreBuilder::new("s1").namespace(NS).build());
    assert_eq!(
        error_policy(store, &err, Arc::new(ctx)),
        Action::requeue(Duration::from_secs(30))
    );
}

#[tokio::test]
async fn test_one_failed_update_does_not_stop_the_batch() {
    let cluster = FakeCluster::new();
    let mut store = ThanosStoreBuilder::new("s1")
        .namespace(NS)
        .caching_bucket()
        .build();
    cluster.add_store(store.clone());
    let ctx = cluster.context();
    reconcile::<ThanosStore>(&key("s1"), &ctx).await.unwrap();
    cluster.reset_counters();

    // A new label touches every object
    store
        .spec
        .labels
        .insert("team".to_string(), "observability".to_string());
    cluster.add_store(store);
    cluster.fail_writes_to("s1-caching-bucket");

    let err = reconcile::<ThanosStore>(&key("s1"), &ctx).await.unwrap_err();

    assert!(err.to_string().contains("1 of 5"), "unexpected error: {err}");
    assert_eq!(cluster.updates(), 4);
    assert_eq!(cluster.creates(), 0);
    assert_eq!(ctx.metrics.client_errors(STORE_COMPONENT), 1);
    let Some(ManagedObject::StatefulSet(sts)) = cluster.object(ObjectKind::StatefulSet, NS, "s1")
    else {
        panic!("expected StatefulSet");
    };
    assert_eq!(
        sts.metadata.labels.unwrap().get("team").map(String::as_str),
        Some("observability")
    );
}

#[tokio::test]
async fn test_failed_object_converges_on_next_pass() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    cluster.fail_writes_to("q1-endpoints");
    let ctx = cluster.context();
    assert!(reconcile::<ThanosQuery>(&key("q1"), &ctx).await.is_err());
    assert_eq!(cluster.creates(), 3);

    cluster.clear_failures();
    cluster.reset_counters();
    reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap();

    assert_eq!(cluster.creates(), 1);
    assert_eq!(cluster.updates(), 0);
}

#[tokio::test]
async fn test_owner_without_uid_fails_every_object() {
    let cluster = FakeCluster::new();
    cluster.add_query(
        ThanosQueryBuilder::new("q1")
            .namespace(NS)
            .without_uid()
            .build(),
    );
    let ctx = cluster.context();

    let err = reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap_err();

    assert!(matches!(
        err,
        Error::SyncFailed {
            failed: 4,
            total: 4,
            ..
        }
    ));
    assert_eq!(cluster.writes(), 0);
    assert_eq!(ctx.metrics.client_errors(QUERY_COMPONENT), 4);
    assert_eq!(cluster.events_with_reason("SyncFailed"), 5);
}

#[tokio::test]
async fn test_cancellation_stops_between_objects() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    let cancel = CancellationToken::new();
    cluster.cancel_after(2, cancel.clone());
    let ctx = Context::with_cancellation(cluster.clone(), Arc::new(Metrics::new()), cancel);

    let err = reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap_err();

    assert!(matches!(
        err,
        Error::Cancelled {
            applied: 2,
            failed: 0,
            total: 4
        }
    ));
    assert_eq!(cluster.writes(), 2);
    // Nothing already written is rolled back
    assert!(cluster.object(ObjectKind::ServiceAccount, NS, "q1").is_some());
    assert!(cluster.object(ObjectKind::ConfigMap, NS, "q1-endpoints").is_some());
    assert!(cluster.object(ObjectKind::Deployment, NS, "q1").is_none());
}

#[tokio::test]
async fn test_invalid_option_is_not_retried_with_backoff() {
    let cluster = FakeCluster::new();
    cluster.add_store(
        ThanosStoreBuilder::new("s1")
            .namespace(NS)
            .storage_size("lots")
            .build(),
    );
    let ctx = cluster.context();

    let err = reconcile::<ThanosStore>(&key("s1"), &ctx).await.unwrap_err();

    assert!(matches!(err, Error::InvalidOption { .. }));
    assert_eq!(cluster.writes(), 0);
    assert_eq!(cluster.events_with_reason("SyncFailed"), 1);

    let store = Arc::new(ThanosStoreBuilder::new("s1").namespace(NS).build());
    assert_eq!(
        error_policy(store, &err, Arc::new(ctx)),
        Action::requeue(Duration::from_secs(300))
    );
}

#[tokio::test]
async fn test_cancellation_reports_earlier_failures() {
    let cluster = FakeCluster::new();
    cluster.add_query(ThanosQueryBuilder::new("q1").namespace(NS).build());
    cluster.fail_writes_to("q1");
    let cancel = CancellationToken::new();
    // The ServiceAccount "q1" fails, the endpoints ConfigMap lands, then the token fires
    cluster.cancel_after(1, cancel.clone());
    let ctx = Context::with_cancellation(cluster.clone(), Arc::new(Metrics::new()), cancel);

    let err = reconcile::<ThanosQuery>(&key("q1"), &ctx).await.unwrap_err();

    assert!(
        matches!(
            err,
            Error::Cancelled {
                applied: 1,
                failed: 1,
                total: 4
            }
        ),
        "unexpected error: {err}"
    );
    assert_eq!(ctx.metrics.client_errors(QUERY_COMPONENT), 1);
}

#[tokio::test]
async fn test_controller_entry_point_waits_for_changes() {
    let cluster = FakeCluster::new();
    let query = ThanosQueryBuilder::new("q1").namespace(NS).build();
    cluster.add_query(query.clone());
    let ctx = Arc::new(cluster.context());

    let action = reconcile_resource(Arc::new(query), Arc::clone(&ctx))
        .await
        .unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(cluster.creates(), 4);
}
