//! Shared context for the controllers.
//!
//! The Context struct holds shared state that is passed to every
//! reconciliation pass and to the Service watch.

use std::sync::Arc;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::Resource;
use kube::runtime::events::EventType;
use tokio_util::sync::CancellationToken;

use crate::client::{ClusterApi, ObjectEvent};
use crate::health::Metrics;

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Cluster API
    pub api: Arc<dyn ClusterApi>,
    /// Operator metrics
    pub metrics: Arc<Metrics>,
    /// Cancelled when the operator shuts down
    pub cancel: CancellationToken,
}

impl Context {
    /// Create a new context
    pub fn new(api: Arc<dyn ClusterApi>, metrics: Arc<Metrics>) -> Self {
        Self::with_cancellation(api, metrics, CancellationToken::new())
    }

    pub fn with_cancellation(
        api: Arc<dyn ClusterApi>,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            metrics,
            cancel,
        }
    }

    /// Publish a normal event for a resource
    pub async fn publish_normal_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(&resource.object_ref(&()), EventType::Normal, reason, action, note)
            .await;
    }

    /// Publish a warning event for a resource
    pub async fn publish_warning_event<K>(
        &self,
        resource: &K,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) where
        K: Resource<DynamicType = ()>,
    {
        self.publish(&resource.object_ref(&()), EventType::Warning, reason, action, note)
            .await;
    }

    /// Publish an event against an object reference
    pub async fn publish(
        &self,
        object_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.api
            .publish_event(
                object_ref,
                ObjectEvent {
                    type_,
                    reason: reason.to_string(),
                    action: action.to_string(),
                    note,
                },
            )
            .await;
    }
}
