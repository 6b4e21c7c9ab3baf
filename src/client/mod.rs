//! Cluster API seam used by the controllers.
//!
//! The reconciliation engine, the endpoint discoverer and the Service watch
//! only talk to the cluster through [`ClusterApi`]. [`KubeClusterApi`] is the
//! production implementation; tests substitute an in-memory fake.
//!
//! ## Architecture
//!
//! - `kube_api`: [`ClusterApi`] over `kube::Api` and the event recorder

pub mod kube_api;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Service};
use kube::runtime::events::EventType;

use crate::controller::error::Result;
use crate::controller::selector::Selector;
use crate::crd::{ThanosQuery, ThanosStore};
use crate::resources::object::{ManagedObject, ObjectKind};

pub use kube_api::KubeClusterApi;

/// Namespaced identity of a custom resource instance.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// An event to record against an object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEvent {
    pub type_: EventType,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

/// Cluster operations used by one reconciliation pass.
///
/// Every method is a single API round trip.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a ThanosQuery. A missing object is an error with code 404.
    async fn get_query(&self, key: &ObjectKey) -> Result<ThanosQuery>;

    /// Fetch a ThanosStore. A missing object is an error with code 404.
    async fn get_store(&self, key: &ObjectKey) -> Result<ThanosStore>;

    /// List the ThanosQuery instances of a namespace.
    async fn list_queries(&self, namespace: &str) -> Result<Vec<ThanosQuery>>;

    /// List the Services of a namespace matching `selector`.
    async fn list_services(&self, namespace: &str, selector: &Selector) -> Result<Vec<Service>>;

    /// Fetch a managed object, `None` when it doesn't exist.
    async fn get_object(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedObject>>;

    async fn create_object(&self, object: &ManagedObject) -> Result<()>;

    /// Replace an object. The object carries the observed resourceVersion,
    /// so a concurrent write fails with a conflict.
    async fn update_object(&self, object: &ManagedObject) -> Result<()>;

    /// Record an event. Failures are logged, never returned.
    async fn publish_event(&self, object: &ObjectReference, event: ObjectEvent);
}
