//! Applying a desired object set against the cluster.
//!
//! Each object is owned, fetched, merged and written on its own; a failure
//! is counted and the batch moves on. Objects already written are never
//! rolled back.

use std::fmt;

use kube::{Resource, ResourceExt};
use tracing::{debug, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::resources::common::set_controller_reference;
use crate::resources::object::ManagedObject;

/// What the sync protocol did with one object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOperation {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncOperation::Created => "created",
            SyncOperation::Updated => "updated",
            SyncOperation::Unchanged => "unchanged",
        })
    }
}

/// Sync `objects` as children of `owner`.
///
/// Returns the number of objects synced. When any object fails, the client
/// error counter of `component` grows by the failure count and
/// [`Error::SyncFailed`] is returned.
pub async fn sync_objects<K>(
    owner: &K,
    objects: Vec<ManagedObject>,
    ctx: &Context,
    component: &'static str,
) -> Result<usize>
where
    K: Resource<DynamicType = ()>,
{
    let total = objects.len();
    let namespace = owner.namespace().unwrap_or_default();
    let owner_name = owner.name_any();
    let mut applied = 0;
    let mut failed = 0;

    for mut object in objects {
        if ctx.cancel.is_cancelled() {
            if failed > 0 {
                ctx.metrics.record_client_errors(component, failed as u64);
            }
            return Err(Error::Cancelled {
                applied,
                failed,
                total,
            });
        }

        if object.is_namespaced() {
            object.meta_mut().namespace = Some(namespace.clone());
            if let Err(e) = set_controller_reference(owner, &mut object) {
                warn!(
                    name = %owner_name,
                    kind = %object.kind(),
                    object = %object.name(),
                    error = %e,
                    "Failed to set owner reference"
                );
                object_failed(owner, &object, &e, ctx).await;
                failed += 1;
                continue;
            }
        }

        match apply_object(&object, ctx).await {
            Ok(operation) => {
                applied += 1;
                debug!(
                    name = %owner_name,
                    kind = %object.kind(),
                    object = %object.name(),
                    operation = %operation,
                    "Synced object"
                );
            }
            Err(e) => {
                warn!(
                    name = %owner_name,
                    kind = %object.kind(),
                    object = %object.name(),
                    error = %e,
                    "Failed to sync object"
                );
                object_failed(owner, &object, &e, ctx).await;
                failed += 1;
            }
        }
    }

    if failed > 0 {
        ctx.metrics.record_client_errors(component, failed as u64);
        return Err(Error::SyncFailed {
            component,
            failed,
            total,
        });
    }
    Ok(applied)
}

/// Warn on `owner` about the one object that failed.
async fn object_failed<K>(owner: &K, object: &ManagedObject, error: &Error, ctx: &Context)
where
    K: Resource<DynamicType = ()>,
{
    ctx.publish_warning_event(
        owner,
        "SyncFailed",
        "Sync",
        Some(format!(
            "Failed to sync {} {}: {error}",
            object.kind(),
            object.name()
        )),
    )
    .await;
}

/// Create `desired` if absent, update it if it differs, otherwise leave it.
pub async fn apply_object(desired: &ManagedObject, ctx: &Context) -> Result<SyncOperation> {
    let namespace = desired.namespace().unwrap_or_default();
    let observed = ctx
        .api
        .get_object(desired.kind(), namespace, desired.name())
        .await?;

    match observed {
        None => {
            ctx.api.create_object(desired).await?;
            Ok(SyncOperation::Created)
        }
        Some(observed) => match ManagedObject::diff(&observed, desired) {
            Some(merged) => {
                ctx.api.update_object(&merged).await?;
                Ok(SyncOperation::Updated)
            }
            None => Ok(SyncOperation::Unchanged),
        },
    }
}
