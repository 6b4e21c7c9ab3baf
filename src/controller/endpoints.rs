//! StoreAPI endpoint discovery for queriers.
//!
//! Lists the Services matching a querier's effective selector, drops those
//! that don't expose a gRPC port and classifies the rest by marker label.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::controller::context::Context;
use crate::controller::error::Result;
use crate::controller::query::QUERY_COMPONENT;
use crate::controller::selector::Selector;
use crate::crd::ThanosQuery;
use crate::resources::labels::{GRPC_PORT_NAME, has_required_store_labels, required_store_service_labels};
use crate::resources::{Endpoint, EndpointType};

/// Marker labels checked top-down; the first present one decides the type.
/// A Service carrying none of them is [`EndpointType::Regular`].
pub const CLASSIFICATION_ORDER: [EndpointType; 3] = [
    EndpointType::Strict,
    EndpointType::GroupStrict,
    EndpointType::Group,
];

/// Classify a Service by its marker labels.
pub fn classify(labels: &BTreeMap<String, String>) -> EndpointType {
    CLASSIFICATION_ORDER
        .into_iter()
        .find(|t| labels.contains_key(t.marker_label()))
        .unwrap_or(EndpointType::Regular)
}

/// Port number of the Service port named `grpc`.
pub fn grpc_port(service: &Service) -> Option<i32> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.name.as_deref() == Some(GRPC_PORT_NAME))
        .map(|p| p.port)
}

/// gRPC port of a Service that satisfies the StoreAPI contract: the
/// required labels and a port named `grpc`.
pub fn store_api_port(service: &Service) -> Option<i32> {
    if !has_required_store_labels(service.metadata.labels.as_ref()) {
        return None;
    }
    grpc_port(service)
}

/// The querier's store selector AND the required StoreAPI labels.
pub fn effective_selector(query: &ThanosQuery) -> Result<Selector> {
    Selector::from_label_selector(
        query.spec.store_label_selector.as_ref(),
        &required_store_service_labels(),
    )
}

/// Discover the StoreAPI endpoints of a querier.
///
/// No matching Service is not an error: a warning event is recorded and the
/// querier starts without backends.
pub async fn discover(query: &ThanosQuery, ctx: &Context) -> Result<Vec<Endpoint>> {
    let name = query.name_any();
    let namespace = query.namespace().unwrap_or_default();
    let selector = effective_selector(query)?;

    let services = match ctx.api.list_services(&namespace, &selector).await {
        Ok(services) => services,
        Err(e) => {
            ctx.metrics.record_client_errors(QUERY_COMPONENT, 1);
            return Err(e);
        }
    };

    if services.is_empty() {
        ctx.publish_warning_event(
            query,
            "NoEndpointsFound",
            "DiscoverEndpoints",
            Some(format!("No StoreAPI services match selector {selector}")),
        )
        .await;
        return Ok(Vec::new());
    }

    let mut endpoints = Vec::with_capacity(services.len());
    for service in &services {
        let service_name = service.name_any();
        let Some(port) = grpc_port(service) else {
            warn!(
                name = %name,
                namespace = %namespace,
                service = %service_name,
                "Service matches store selector but has no grpc port, skipping"
            );
            continue;
        };

        let endpoint_type = classify(service.labels());
        ctx.metrics
            .record_endpoint(endpoint_type, &name, &namespace);
        debug!(
            name = %name,
            service = %service_name,
            endpoint_type = %endpoint_type,
            "Discovered endpoint"
        );
        endpoints.push(Endpoint {
            service_name,
            namespace: service.namespace().unwrap_or_else(|| namespace.clone()),
            port,
            endpoint_type,
        });
    }

    Ok(endpoints)
}
