//! Typed child objects and the per-kind merge used by the sync protocol.
//!
//! Every object the operator manages is one variant of [`ManagedObject`].
//! [`ManagedObject::diff`] merges a desired object onto the observed one,
//! keeping everything the API server or other controllers own, and returns
//! the object to write, or `None` when the observed object already matches.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde_json::Value;

/// Kind of a managed object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    ServiceAccount,
    ConfigMap,
    Service,
    Deployment,
    StatefulSet,
}

impl ObjectKind {
    /// Kubernetes kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::ServiceAccount => "ServiceAccount",
            ObjectKind::ConfigMap => "ConfigMap",
            ObjectKind::Service => "Service",
            ObjectKind::Deployment => "Deployment",
            ObjectKind::StatefulSet => "StatefulSet",
        }
    }

    /// Group/version of the kind
    pub fn api_version(&self) -> &'static str {
        match self {
            ObjectKind::Deployment | ObjectKind::StatefulSet => "apps/v1",
            _ => "v1",
        }
    }

    /// All managed kinds are namespaced today.
    pub fn is_namespaced(&self) -> bool {
        true
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A child object produced for one reconciliation pass.
#[derive(Clone, Debug, PartialEq)]
pub enum ManagedObject {
    ServiceAccount(ServiceAccount),
    ConfigMap(ConfigMap),
    Service(Service),
    Deployment(Deployment),
    StatefulSet(StatefulSet),
}

impl ManagedObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ManagedObject::ServiceAccount(_) => ObjectKind::ServiceAccount,
            ManagedObject::ConfigMap(_) => ObjectKind::ConfigMap,
            ManagedObject::Service(_) => ObjectKind::Service,
            ManagedObject::Deployment(_) => ObjectKind::Deployment,
            ManagedObject::StatefulSet(_) => ObjectKind::StatefulSet,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedObject::ServiceAccount(o) => &o.metadata,
            ManagedObject::ConfigMap(o) => &o.metadata,
            ManagedObject::Service(o) => &o.metadata,
            ManagedObject::Deployment(o) => &o.metadata,
            ManagedObject::StatefulSet(o) => &o.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::ServiceAccount(o) => &mut o.metadata,
            ManagedObject::ConfigMap(o) => &mut o.metadata,
            ManagedObject::Service(o) => &mut o.metadata,
            ManagedObject::Deployment(o) => &mut o.metadata,
            ManagedObject::StatefulSet(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }

    pub fn is_namespaced(&self) -> bool {
        self.kind().is_namespaced()
    }

    /// Merge `desired` onto `observed` and return the object to write.
    ///
    /// Returns `None` when every field set on the merged object already has
    /// the same value on `observed`, so fields defaulted by the API server
    /// never cause an update.
    pub fn diff(observed: &ManagedObject, desired: &ManagedObject) -> Option<ManagedObject> {
        let merged = match (observed, desired) {
            (ManagedObject::ServiceAccount(o), ManagedObject::ServiceAccount(d)) => {
                ManagedObject::ServiceAccount(merge_service_account(o, d))
            }
            (ManagedObject::ConfigMap(o), ManagedObject::ConfigMap(d)) => {
                ManagedObject::ConfigMap(merge_config_map(o, d))
            }
            (ManagedObject::Service(o), ManagedObject::Service(d)) => {
                ManagedObject::Service(merge_service(o, d))
            }
            (ManagedObject::Deployment(o), ManagedObject::Deployment(d)) => {
                ManagedObject::Deployment(merge_deployment(o, d))
            }
            (ManagedObject::StatefulSet(o), ManagedObject::StatefulSet(d)) => {
                ManagedObject::StatefulSet(merge_statefulset(o, d))
            }
            // Kinds never differ for the same key; write the desired object
            _ => return Some(desired.clone()),
        };

        if is_contained(observed, &merged) {
            None
        } else {
            Some(merged)
        }
    }

    fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            ManagedObject::ServiceAccount(o) => serde_json::to_value(o),
            ManagedObject::ConfigMap(o) => serde_json::to_value(o),
            ManagedObject::Service(o) => serde_json::to_value(o),
            ManagedObject::Deployment(o) => serde_json::to_value(o),
            ManagedObject::StatefulSet(o) => serde_json::to_value(o),
        }
    }
}

fn is_contained(observed: &ManagedObject, merged: &ManagedObject) -> bool {
    match (observed.to_value(), merged.to_value()) {
        (Ok(observed), Ok(merged)) => json_contains(&observed, &merged),
        _ => observed == merged,
    }
}

/// Whether every field set in `subset` has the same value in `superset`.
///
/// Objects are compared key by key, arrays element by element (lengths must
/// match), and `null` in `subset` means "unset".
pub fn json_contains(superset: &Value, subset: &Value) -> bool {
    match (superset, subset) {
        (_, Value::Null) => true,
        (Value::Object(sup), Value::Object(sub)) => sub.iter().all(|(k, v)| match sup.get(k) {
            Some(sv) => json_contains(sv, v),
            None => is_empty_value(v),
        }),
        (Value::Array(sup), Value::Array(sub)) => {
            sup.len() == sub.len() && sup.iter().zip(sub).all(|(a, b)| json_contains(a, b))
        }
        (a, b) => a == b,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(m) => m.values().all(is_empty_value),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn merge_maps(
    observed: Option<&BTreeMap<String, String>>,
    desired: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let mut merged = observed.cloned().unwrap_or_default();
    if let Some(desired) = desired {
        merged.extend(desired.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if merged.is_empty() { None } else { Some(merged) }
}

fn merge_owner_references(
    observed: Option<&Vec<OwnerReference>>,
    desired: Option<&Vec<OwnerReference>>,
) -> Option<Vec<OwnerReference>> {
    let mut merged = observed.cloned().unwrap_or_default();
    for owner in desired.into_iter().flatten() {
        match merged.iter_mut().find(|r| r.uid == owner.uid) {
            Some(existing) => *existing = owner.clone(),
            None => merged.push(owner.clone()),
        }
    }
    if merged.is_empty() { None } else { Some(merged) }
}

/// Observed metadata with desired labels, annotations and owners layered on top.
fn merge_meta(observed: &ObjectMeta, desired: &ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        labels: merge_maps(observed.labels.as_ref(), desired.labels.as_ref()),
        annotations: merge_maps(observed.annotations.as_ref(), desired.annotations.as_ref()),
        owner_references: merge_owner_references(
            observed.owner_references.as_ref(),
            desired.owner_references.as_ref(),
        ),
        ..observed.clone()
    }
}

fn merge_service_account(observed: &ServiceAccount, desired: &ServiceAccount) -> ServiceAccount {
    ServiceAccount {
        metadata: merge_meta(&observed.metadata, &desired.metadata),
        automount_service_account_token: desired
            .automount_service_account_token
            .or(observed.automount_service_account_token),
        ..observed.clone()
    }
}

fn merge_config_map(observed: &ConfigMap, desired: &ConfigMap) -> ConfigMap {
    ConfigMap {
        metadata: merge_meta(&observed.metadata, &desired.metadata),
        data: desired.data.clone(),
        binary_data: desired.binary_data.clone(),
        ..observed.clone()
    }
}

fn merge_service(observed: &Service, desired: &Service) -> Service {
    let spec = match (&observed.spec, &desired.spec) {
        (Some(o), Some(d)) => {
            let mut spec = d.clone();
            spec.cluster_ip = o.cluster_ip.clone();
            spec.cluster_ips = o.cluster_ips.clone();
            spec.ip_families = o.ip_families.clone();
            spec.ip_family_policy = o.ip_family_policy.clone();
            spec.health_check_node_port = o.health_check_node_port;
            if let (Some(ports), Some(observed_ports)) = (spec.ports.as_mut(), o.ports.as_ref()) {
                for port in ports.iter_mut().filter(|p| p.node_port.is_none()) {
                    port.node_port = observed_ports
                        .iter()
                        .find(|op| op.name == port.name)
                        .and_then(|op| op.node_port);
                }
            }
            Some(spec)
        }
        (_, d) => d.clone(),
    };
    Service {
        metadata: merge_meta(&observed.metadata, &desired.metadata),
        spec,
        ..observed.clone()
    }
}

fn merge_deployment(observed: &Deployment, desired: &Deployment) -> Deployment {
    let spec = match (&observed.spec, &desired.spec) {
        (Some(o), Some(d)) => {
            let mut spec = o.clone();
            spec.replicas = d.replicas;
            spec.template = d.template.clone();
            spec.strategy = d.strategy.clone().or_else(|| o.strategy.clone());
            spec.min_ready_seconds = d.min_ready_seconds.or(o.min_ready_seconds);
            spec.revision_history_limit = d.revision_history_limit.or(o.revision_history_limit);
            spec.progress_deadline_seconds =
                d.progress_deadline_seconds.or(o.progress_deadline_seconds);
            Some(spec)
        }
        (_, d) => d.clone(),
    };
    Deployment {
        metadata: merge_meta(&observed.metadata, &desired.metadata),
        spec,
        ..observed.clone()
    }
}

fn merge_statefulset(observed: &StatefulSet, desired: &StatefulSet) -> StatefulSet {
    let spec = match (&observed.spec, &desired.spec) {
        (Some(o), Some(d)) => {
            // selector, serviceName, podManagementPolicy and volumeClaimTemplates are immutable
            let mut spec = o.clone();
            spec.replicas = d.replicas;
            spec.template = d.template.clone();
            spec.update_strategy = d.update_strategy.clone().or_else(|| o.update_strategy.clone());
            spec.min_ready_seconds = d.min_ready_seconds.or(o.min_ready_seconds);
            spec.persistent_volume_claim_retention_policy = d
                .persistent_volume_claim_retention_policy
                .clone()
                .or_else(|| o.persistent_volume_claim_retention_policy.clone());
            Some(spec)
        }
        (_, d) => d.clone(),
    };
    StatefulSet {
        metadata: merge_meta(&observed.metadata, &desired.metadata),
        spec,
        ..observed.clone()
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
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use serde_json::json;

    fn meta(name: &str, labels: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("ns".to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn config_map(name: &str, value: &str) -> ManagedObject {
        ManagedObject::ConfigMap(ConfigMap {
            metadata: meta(name, &[("app", "thanos")]),
            data: Some(BTreeMap::from([("key".to_string(), value.to_string())])),
            ..Default::default()
        })
    }

    #[test]
    fn test_json_contains_ignores_server_defaults() {
        let observed = json!({"spec": {"replicas": 1, "revisionHistoryLimit": 10}});
        let desired = json!({"spec": {"replicas": 1}});
        assert!(json_contains(&observed, &desired));
        assert!(!json_contains(&desired, &observed));
    }

    #[test]
    fn test_json_contains_arrays_must_match_length() {
        let observed = json!({"args": ["a", "b"]});
        assert!(!json_contains(&observed, &json!({"args": ["a"]})));
        assert!(json_contains(&observed, &json!({"args": ["a", "b"]})));
    }

    #[test]
    fn test_diff_identical_is_none() {
        let cm = config_map("cfg", "v1");
        assert!(ManagedObject::diff(&cm, &cm).is_none());
    }

    #[test]
    fn test_diff_changed_data_keeps_server_fields() {
        let mut observed = config_map("cfg", "v1");
        observed.meta_mut().uid = Some("uid-1".to_string());
        observed.meta_mut().resource_version = Some("42".to_string());
        let desired = config_map("cfg", "v2");

        let patched = ManagedObject::diff(&observed, &desired).unwrap();
        assert_eq!(patched.meta().uid.as_deref(), Some("uid-1"));
        assert_eq!(patched.meta().resource_version.as_deref(), Some("42"));
        let ManagedObject::ConfigMap(cm) = patched else {
            panic!("expected ConfigMap");
        };
        assert_eq!(cm.data.unwrap()["key"], "v2");
    }

    #[test]
    fn test_diff_keeps_foreign_labels() {
        let mut observed = config_map("cfg", "v1");
        observed
            .meta_mut()
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("added-by".to_string(), "someone-else".to_string());
        let desired = config_map("cfg", "v1");

        assert!(ManagedObject::diff(&observed, &desired).is_none());
    }

    #[test]
    fn test_diff_service_preserves_cluster_ip() {
        let spec = ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("grpc".to_string()),
                port: 10901,
                ..Default::default()
            }]),
            ..Default::default()
        };
        let desired = ManagedObject::Service(Service {
            metadata: meta("svc", &[]),
            spec: Some(spec.clone()),
            ..Default::default()
        });
        let observed = ManagedObject::Service(Service {
            metadata: meta("svc", &[]),
            spec: Some(ServiceSpec {
                cluster_ip: Some("10.0.0.12".to_string()),
                cluster_ips: Some(vec!["10.0.0.12".to_string()]),
                ..spec
            }),
            ..Default::default()
        });

        assert!(ManagedObject::diff(&observed, &desired).is_none());
    }

    #[test]
    fn test_diff_updates_owner_reference_once() {
        let owner = OwnerReference {
            api_version: "monitoring.thanos.io/v1alpha1".to_string(),
            kind: "ThanosQuery".to_string(),
            name: "q1".to_string(),
            uid: "uid-q1".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        };
        let observed = config_map("cfg", "v1");
        let mut desired = config_map("cfg", "v1");
        desired.meta_mut().owner_references = Some(vec![owner]);

        let patched = ManagedObject::diff(&observed, &desired).unwrap();
        assert_eq!(patched.meta().owner_references.as_ref().unwrap().len(), 1);
        assert!(ManagedObject::diff(&patched, &desired).is_none());
    }
}
