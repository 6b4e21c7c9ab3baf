//! Reconciliation engine shared by ThanosQuery and ThanosStore.
//!
//! One pass fetches the resource, honours the pause flag, builds the
//! desired objects and syncs them. Every failure ends in a returned error,
//! a warning event and a counter increment; retries belong to the
//! controller through [`error_policy`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::client::{ClusterApi, ObjectKey};
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::sync::sync_objects;
use crate::resources::object::ManagedObject;

/// A custom resource the engine can reconcile.
#[async_trait]
pub trait Reconcilable:
    Resource<DynamicType = ()> + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// Component name used in metrics and error messages
    const COMPONENT: &'static str;

    async fn fetch(api: &dyn ClusterApi, key: &ObjectKey) -> Result<Self>;

    fn is_paused(&self) -> bool;

    /// Build the ordered desired object set for one pass.
    async fn desired_objects(&self, ctx: &Context) -> Result<Vec<ManagedObject>>;
}

/// Result of a successful pass.
///
/// A pass with any failed object returns [`Error::SyncFailed`] instead, which
/// carries the failure count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub succeeded: usize,
}

/// Entry point for `kube::runtime::Controller::run`.
///
/// The resource is fetched again by key, so each pass acts on the latest
/// revision rather than on the cached copy that triggered it.
pub async fn reconcile_resource<R: Reconcilable>(
    resource: Arc<R>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let key = ObjectKey::new(resource.namespace().unwrap_or_default(), resource.name_any());
    reconcile::<R>(&key, &ctx).await?;
    Ok(Action::await_change())
}

/// Reconcile the resource at `key`.
pub async fn reconcile<R: Reconcilable>(key: &ObjectKey, ctx: &Context) -> Result<ReconcileOutcome> {
    let start_time = Instant::now();
    ctx.metrics.record_reconcile(R::COMPONENT);

    let result = reconcile_once::<R>(key, ctx).await;

    ctx.metrics
        .observe_duration(R::COMPONENT, start_time.elapsed().as_secs_f64());
    result
}

async fn reconcile_once<R: Reconcilable>(
    key: &ObjectKey,
    ctx: &Context,
) -> Result<ReconcileOutcome> {
    debug!(name = %key.name, namespace = %key.namespace, component = R::COMPONENT, "Reconciling");

    let resource = match R::fetch(ctx.api.as_ref(), key).await {
        Ok(resource) => resource,
        Err(e) if e.is_not_found() => {
            // Children are removed by owner-reference garbage collection
            debug!(name = %key.name, namespace = %key.namespace, "Resource not found, nothing to do");
            return Ok(ReconcileOutcome::default());
        }
        Err(e) => {
            warn!(name = %key.name, namespace = %key.namespace, error = %e, "Failed to get resource");
            ctx.metrics.record_client_errors(R::COMPONENT, 1);
            ctx.metrics.record_failure(R::COMPONENT);
            ctx.publish(
                &object_ref_for::<R>(key),
                EventType::Warning,
                "GetFailed",
                "Reconcile",
                Some(format!("Failed to get {} {key}: {e}", R::kind(&()))),
            )
            .await;
            return Err(e);
        }
    };

    if resource.is_paused() {
        info!(name = %key.name, namespace = %key.namespace, "Reconciliation is paused");
        ctx.publish_normal_event(
            &resource,
            "Paused",
            "Reconcile",
            Some("Reconciliation is paused for this resource".to_string()),
        )
        .await;
        return Ok(ReconcileOutcome::default());
    }

    let synced = match resource.desired_objects(ctx).await {
        Ok(objects) => sync_objects(&resource, objects, ctx, R::COMPONENT).await,
        Err(e) => Err(e),
    };

    match synced {
        Ok(succeeded) => {
            debug!(name = %key.name, namespace = %key.namespace, objects = succeeded, "Reconciled");
            Ok(ReconcileOutcome { succeeded })
        }
        Err(e) => {
            warn!(name = %key.name, namespace = %key.namespace, error = %e, "Reconciliation failed");
            ctx.metrics.record_failure(R::COMPONENT);
            ctx.publish_warning_event(&resource, "SyncFailed", "Reconcile", Some(e.to_string()))
                .await;
            Err(e)
        }
    }
}

/// Reference to the resource at `key`, for events about a resource that
/// couldn't be fetched.
fn object_ref_for<R: Reconcilable>(key: &ObjectKey) -> ObjectReference {
    ObjectReference {
        api_version: Some(R::api_version(&()).to_string()),
        kind: Some(R::kind(&()).to_string()),
        name: Some(key.name.clone()),
        namespace: Some(key.namespace.clone()),
        ..Default::default()
    }
}

/// Error policy - decides when a failed pass runs again.
pub fn error_policy<R: Reconcilable>(resource: Arc<R>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = resource.name_any();
    let namespace = resource.namespace().unwrap_or_default();

    if error.is_retryable() {
        warn!(name = %name, namespace = %namespace, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, namespace = %namespace, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}
