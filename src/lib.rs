//! thanos-operator library crate
//!
//! This module exports the controllers, CRD definitions, resource generators
//! and the runtime that wires the watches into two kube controllers.

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod resources;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt, stream};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use kube::api::ListParams;
use kube::runtime::controller::{Action, Config as ControllerConfig, Error as ControllerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{
    Controller, Predicate, WatchStreamExt, metadata_watcher, predicates, reflector, watcher,
};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use client::KubeClusterApi;
use controller::context::Context;
use controller::error::{Error, Result};
use controller::reconciler::{error_policy, reconcile_resource};
use controller::watch::{ServiceTracker, route_service};
use crd::{ThanosQuery, ThanosStore};

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all watches.
///
/// - `any_semantic()`: More reliable resource discovery in test environments
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Create a filtered stream for a resource type with standard optimizations.
///
/// This creates a reflector-backed stream that:
/// - Maintains an in-memory cache via reflector
/// - Uses automatic retry with exponential backoff on errors
/// - Passes spec (generation) and label changes, drops status-only updates
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = std::result::Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation::<K>.combine(predicates::labels::<K>));
    (reader, stream)
}

/// ThanosQuery requests raised by StoreAPI Service changes.
///
/// Service events go through a [`ServiceTracker`] and every routed Service is
/// mapped by [`route_service`] to the queriers that select it.
fn service_routes(
    api: Api<Service>,
    watcher_config: WatcherConfig,
    ctx: Arc<Context>,
) -> impl Stream<Item = ObjectRef<ThanosQuery>> + Send + 'static {
    let mut tracker = ServiceTracker::new();
    watcher(api, watcher_config)
        .default_backoff()
        .flat_map(move |event| {
            let routed = match event {
                Ok(event) => tracker.apply(event),
                Err(e) => {
                    warn!(error = %e, "Service watch error");
                    Vec::new()
                }
            };
            stream::iter(routed)
        })
        .then(move |service| {
            let ctx = Arc::clone(&ctx);
            async move { route_service(&service, &ctx).await }
        })
        .flat_map(|keys| {
            stream::iter(
                keys.into_iter()
                    .map(|key| ObjectRef::new(&key.name).within(&key.namespace)),
            )
        })
}

/// Log the outcome of one reconciliation.
async fn log_result<K: Resource>(
    result: std::result::Result<
        (ObjectRef<K>, Action),
        ControllerError<Error, watcher::Error>,
    >,
) {
    match result {
        Ok((obj, _action)) => {
            debug!("Reconciled: {}", obj.name);
        }
        Err(e) => {
            // A child event can still reach a resource that was just deleted
            let is_not_found = match &e {
                ControllerError::ObjectNotFound(_) => true,
                ControllerError::ReconcilerFailed(err, _) => err.is_not_found(),
                _ => false,
            };
            if is_not_found {
                debug!("Object no longer exists (likely deleted): {:?}", e);
            } else {
                error!("Reconciliation error: {:?}", e);
            }
        }
    }
}

/// Check that both CRDs are served before starting any watch.
async fn check_crds(client: &Client, namespace: Option<&str>) -> Result<()> {
    let probe = ListParams::default().limit(1);
    scoped_api::<ThanosQuery>(client.clone(), namespace)
        .list(&probe)
        .await
        .map_err(|e| Error::Setup(format!("ThanosQuery CRD is not available: {e}")))?;
    scoped_api::<ThanosStore>(client.clone(), namespace)
        .list(&probe)
        .await
        .map_err(|e| Error::Setup(format!("ThanosStore CRD is not available: {e}")))?;
    Ok(())
}

/// Run the ThanosQuery and ThanosStore controllers until `shutdown` is cancelled.
///
/// Each controller is triggered by:
/// - spec or label changes of its own resource
/// - changes to owned children, mapped back through controller owner references
///
/// The ThanosQuery controller is also triggered by StoreAPI Service changes,
/// routed to the queriers that select them. Each controller runs at most
/// `config.reconcile_workers` passes at once and one pass per resource.
pub async fn run_controllers(
    client: Client,
    config: &OperatorConfig,
    health_state: Arc<HealthState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let namespace = config.watch_namespace.as_deref();
    info!(
        scope = namespace.unwrap_or("cluster-wide"),
        workers = config.reconcile_workers,
        "Starting ThanosQuery and ThanosStore controllers"
    );

    check_crds(&client, namespace).await?;

    let api = Arc::new(KubeClusterApi::new(client.clone()));
    let ctx = Arc::new(Context::with_cancellation(
        api,
        health_state.metrics.clone(),
        shutdown.clone(),
    ));
    let watcher_config = default_watcher_config();
    let controller_config = ControllerConfig::default().concurrency(config.reconcile_workers);

    // Owned children only need metadata to find their owner
    let (query_reader, query_stream) = create_filtered_stream(
        scoped_api::<ThanosQuery>(client.clone(), namespace),
        watcher_config.clone(),
    );
    let queries = Controller::for_stream(query_stream, query_reader)
        .with_config(controller_config.clone())
        .owns_stream(
            metadata_watcher(scoped_api::<ServiceAccount>(client.clone(), namespace), watcher_config.clone())
                .touched_objects(),
        )
        .owns_stream(
            metadata_watcher(scoped_api::<ConfigMap>(client.clone(), namespace), watcher_config.clone())
                .touched_objects(),
        )
        .owns_stream(
            metadata_watcher(scoped_api::<Service>(client.clone(), namespace), watcher_config.clone())
                .touched_objects(),
        )
        .owns_stream(
            metadata_watcher(scoped_api::<Deployment>(client.clone(), namespace), watcher_config.clone())
                .touched_objects(),
        )
        .reconcile_on(service_routes(
            scoped_api::<Service>(client.clone(), namespace),
            watcher_config.clone(),
            Arc::clone(&ctx),
        ))
        .graceful_shutdown_on(shutdown.clone().cancelled_owned())
        .run(
            reconcile_resource::<ThanosQuery>,
            error_policy::<ThanosQuery>,
            Arc::clone(&ctx),
        )
        .for_each(log_result);

    let (store_reader, store_stream) = create_filtered_stream(
        scoped_api::<ThanosStore>(client.clone(), namespace),
        watcher_config.clone(),
    );
    let stores = Controller::for_stream(store_stream, store_reader)
        .with_config(controller_config)
        .owns_stream(
            metadata_watcher(scoped_api::<ServiceAccount>(client.clone(), namespace), watcher_config.clone())
                .touched_objects(),
        )
        .owns_stream(
            metadata_watcher(scoped_api::<ConfigMap>(client.clone(), namespace), watcher_config.clone())
                .touched_objects(),
        )
        .owns_stream(
            metadata_watcher(scoped_api::<Service>(client.clone(), namespace), watcher_config.clone())
                .touched_objects(),
        )
        .owns_stream(
            metadata_watcher(scoped_api::<StatefulSet>(client.clone(), namespace), watcher_config)
                .touched_objects(),
        )
        .graceful_shutdown_on(shutdown.clone().cancelled_owned())
        .run(
            reconcile_resource::<ThanosStore>,
            error_policy::<ThanosStore>,
            Arc::clone(&ctx),
        )
        .for_each(log_result);

    health_state.set_ready(true).await;
    tokio::join!(queries, stores);
    health_state.set_ready(false).await;

    if !shutdown.is_cancelled() {
        error!("Controller streams ended unexpectedly");
    }
    info!("Controllers stopped");
    Ok(())
}
