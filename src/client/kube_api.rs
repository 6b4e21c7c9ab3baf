//! [`ClusterApi`] backed by a live API server.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Service, ServiceAccount};
use kube::api::{ListParams, PostParams};
use kube::runtime::events::{Event, Recorder, Reporter};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{ClusterApi, ObjectEvent, ObjectKey};
use crate::controller::error::Result;
use crate::controller::selector::Selector;
use crate::crd::{ThanosQuery, ThanosStore};
use crate::resources::object::{ManagedObject, ObjectKind};

/// Field manager name for the operator
pub const FIELD_MANAGER: &str = "thanos-operator";

/// [`ClusterApi`] over `kube::Api`.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
    reporter: Reporter,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create<K>(&self, namespace: &str, object: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        self.api::<K>(namespace)
            .create(&Self::post_params(), object)
            .await?;
        Ok(())
    }

    async fn replace<K>(&self, namespace: &str, name: &str, object: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        self.api::<K>(namespace)
            .replace(name, &Self::post_params(), object)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_query(&self, key: &ObjectKey) -> Result<ThanosQuery> {
        Ok(self.api::<ThanosQuery>(&key.namespace).get(&key.name).await?)
    }

    async fn get_store(&self, key: &ObjectKey) -> Result<ThanosStore> {
        Ok(self.api::<ThanosStore>(&key.namespace).get(&key.name).await?)
    }

    async fn list_queries(&self, namespace: &str) -> Result<Vec<ThanosQuery>> {
        let list = self
            .api::<ThanosQuery>(namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn list_services(&self, namespace: &str, selector: &Selector) -> Result<Vec<Service>> {
        let params = ListParams::default().labels(&selector.to_string());
        let list = self.api::<Service>(namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn get_object(
        &self,
        kind: ObjectKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ManagedObject>> {
        Ok(match kind {
            ObjectKind::ServiceAccount => self
                .get_opt::<ServiceAccount>(namespace, name)
                .await?
                .map(ManagedObject::ServiceAccount),
            ObjectKind::ConfigMap => self
                .get_opt::<ConfigMap>(namespace, name)
                .await?
                .map(ManagedObject::ConfigMap),
            ObjectKind::Service => self
                .get_opt::<Service>(namespace, name)
                .await?
                .map(ManagedObject::Service),
            ObjectKind::Deployment => self
                .get_opt::<Deployment>(namespace, name)
                .await?
                .map(ManagedObject::Deployment),
            ObjectKind::StatefulSet => self
                .get_opt::<StatefulSet>(namespace, name)
                .await?
                .map(ManagedObject::StatefulSet),
        })
    }

    async fn create_object(&self, object: &ManagedObject) -> Result<()> {
        let ns = object.namespace().unwrap_or_default();
        match object {
            ManagedObject::ServiceAccount(o) => self.create(ns, o).await,
            ManagedObject::ConfigMap(o) => self.create(ns, o).await,
            ManagedObject::Service(o) => self.create(ns, o).await,
            ManagedObject::Deployment(o) => self.create(ns, o).await,
            ManagedObject::StatefulSet(o) => self.create(ns, o).await,
        }
    }

    async fn update_object(&self, object: &ManagedObject) -> Result<()> {
        let ns = object.namespace().unwrap_or_default();
        let name = object.name();
        match object {
            ManagedObject::ServiceAccount(o) => self.replace(ns, name, o).await,
            ManagedObject::ConfigMap(o) => self.replace(ns, name, o).await,
            ManagedObject::Service(o) => self.replace(ns, name, o).await,
            ManagedObject::Deployment(o) => self.replace(ns, name, o).await,
            ManagedObject::StatefulSet(o) => self.replace(ns, name, o).await,
        }
    }

    async fn publish_event(&self, object: &ObjectReference, event: ObjectEvent) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        let reason = event.reason.clone();
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: event.type_,
                    reason: event.reason,
                    note: event.note,
                    action: event.action,
                    secondary: None,
                },
                object,
            )
            .await
        {
            tracing::warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
