//! Routing Service changes back to the queriers that select them.
//!
//! Service watch events pass through a [`ServiceTracker`] applying the
//! predicate chain (base labels present AND (labels changed OR generation
//! changed)) and then through [`route_service`], which returns the
//! ThanosQuery keys to reconcile.

use std::collections::{BTreeMap, HashMap, HashSet};

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use kube::runtime::watcher;
use tracing::{debug, warn};

use crate::client::ObjectKey;
use crate::controller::context::Context;
use crate::controller::endpoints::{effective_selector, store_api_port};
use crate::controller::query::QUERY_COMPONENT;
use crate::crd::ThanosQuery;
use crate::resources::labels::has_required_store_labels;

/// The parts of an object's metadata the predicates look at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaSnapshot {
    pub labels: BTreeMap<String, String>,
    pub generation: Option<i64>,
}

impl MetaSnapshot {
    pub fn of<K: ResourceExt>(object: &K) -> Self {
        Self {
            labels: object.labels().clone(),
            generation: object.meta().generation,
        }
    }
}

/// A watch event as seen by the predicates: `old` is `None` for objects
/// seen for the first time.
#[derive(Clone, Copy, Debug)]
pub struct WatchEvent<'a> {
    pub old: Option<&'a MetaSnapshot>,
    pub new: &'a MetaSnapshot,
}

/// A boolean filter over watch events.
pub type Predicate = fn(&WatchEvent<'_>) -> bool;

pub fn base_labels_present(event: &WatchEvent<'_>) -> bool {
    has_required_store_labels(Some(&event.new.labels))
}

pub fn labels_changed(event: &WatchEvent<'_>) -> bool {
    event.old.is_none_or(|old| old.labels != event.new.labels)
}

pub fn generation_changed(event: &WatchEvent<'_>) -> bool {
    event
        .old
        .is_none_or(|old| old.generation != event.new.generation)
}

/// All predicates hold
pub fn and<'p>(predicates: &'p [Predicate]) -> impl Fn(&WatchEvent<'_>) -> bool + 'p {
    move |event| predicates.iter().all(|p| p(event))
}

/// Any predicate holds
pub fn or<'p>(predicates: &'p [Predicate]) -> impl Fn(&WatchEvent<'_>) -> bool + 'p {
    move |event| predicates.iter().any(|p| p(event))
}

/// Whether a Service event should reach the router.
pub fn service_trigger(event: &WatchEvent<'_>) -> bool {
    base_labels_present(event) && or(&[labels_changed, generation_changed])(event)
}

/// Remembers the last version of every Service so update events can be
/// compared against it.
///
/// A watch restart re-lists Services with `Init`, `InitApply` and `InitDone`
/// and never reports the ones deleted while the watch was down. Those are
/// found on `InitDone` as the keys not seen since `Init`.
#[derive(Debug, Default)]
pub struct ServiceTracker {
    seen: HashMap<ObjectKey, Service>,
    relisted: Option<HashSet<ObjectKey>>,
}

impl ServiceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one watch event and return the Services whose change should be
    /// routed.
    pub fn apply(&mut self, event: watcher::Event<Service>) -> Vec<Service> {
        match event {
            watcher::Event::Apply(service) => self.routed_if(service, Self::observe),
            watcher::Event::Delete(service) => self.routed_if(service, Self::forget),
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(service) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(service_key(&service));
                }
                self.routed_if(service, Self::observe)
            }
            watcher::Event::InitDone => self.drop_unlisted(),
        }
    }

    fn routed_if(&mut self, service: Service, check: fn(&mut Self, &Service) -> bool) -> Vec<Service> {
        if check(self, &service) {
            vec![service]
        } else {
            Vec::new()
        }
    }

    /// Record `service` and report whether the change should be routed.
    pub fn observe(&mut self, service: &Service) -> bool {
        let key = service_key(service);
        let new = MetaSnapshot::of(service);
        let old = self.seen.get(&key).map(MetaSnapshot::of);
        let trigger = service_trigger(&WatchEvent {
            old: old.as_ref(),
            new: &new,
        });
        self.seen.insert(key, service.clone());
        trigger
    }

    /// Record a deletion. A deleted StoreAPI Service always triggers.
    pub fn forget(&mut self, service: &Service) -> bool {
        self.seen.remove(&service_key(service));
        has_required_store_labels(service.metadata.labels.as_ref())
    }

    /// Forget every Service the last re-list didn't return and route the
    /// StoreAPI ones as deletions.
    fn drop_unlisted(&mut self) -> Vec<Service> {
        let Some(relisted) = self.relisted.take() else {
            return Vec::new();
        };
        let gone: Vec<ObjectKey> = self
            .seen
            .keys()
            .filter(|key| !relisted.contains(*key))
            .cloned()
            .collect();
        let mut routed = Vec::new();
        for key in gone {
            if let Some(service) = self.seen.remove(&key) {
                debug!(service = %key, "Service disappeared during watch restart");
                if has_required_store_labels(service.metadata.labels.as_ref()) {
                    routed.push(service);
                }
            }
        }
        routed
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

fn service_key(service: &Service) -> ObjectKey {
    ObjectKey::new(service.namespace().unwrap_or_default(), service.name_any())
}

/// Keys of the queriers whose effective selector matches `service`.
///
/// A querier whose selector fails to build is logged and skipped.
pub fn select_queries(service: &Service, queries: &[ThanosQuery]) -> Vec<ObjectKey> {
    let labels = service.labels();
    queries
        .iter()
        .filter_map(|query| match effective_selector(query) {
            Ok(selector) => selector.matches(labels).then(|| {
                ObjectKey::new(query.namespace().unwrap_or_default(), query.name_any())
            }),
            Err(e) => {
                warn!(
                    name = %query.name_any(),
                    namespace = ?query.namespace(),
                    error = %e,
                    "Skipping ThanosQuery with invalid store selector"
                );
                None
            }
        })
        .collect()
}

/// Map a changed Service to the ThanosQuery keys to reconcile.
pub async fn route_service(service: &Service, ctx: &Context) -> Vec<ObjectKey> {
    if store_api_port(service).is_none() {
        return Vec::new();
    }

    let namespace = service.namespace().unwrap_or_default();
    let queries = match ctx.api.list_queries(&namespace).await {
        Ok(queries) => queries,
        Err(e) => {
            ctx.metrics.record_client_errors(QUERY_COMPONENT, 1);
            warn!(
                service = %service.name_any(),
                namespace = %namespace,
                error = %e,
                "Failed to list ThanosQuery resources for Service change"
            );
            return Vec::new();
        }
    };

    let requests = select_queries(service, &queries);
    ctx.metrics.record_service_watch(requests.len() as u64);
    debug!(
        service = %service.name_any(),
        namespace = %namespace,
        requests = requests.len(),
        "Routed Service change"
    );
    requests
}
