//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

use crate::resources::EndpointType;

/// Labels for per-component metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ComponentLabels {
    pub component: String,
}

impl ComponentLabels {
    fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
        }
    }
}

impl EncodeLabelSet for ComponentLabels {
    fn encode(&self, mut encoder: LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("component", self.component.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for the configured-endpoints counter
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct EndpointLabels {
    pub endpoint_type: String,
    pub resource: String,
    pub namespace: String,
}

impl EncodeLabelSet for EndpointLabels {
    fn encode(&self, mut encoder: LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("type", self.endpoint_type.as_str()).encode(encoder.encode_label())?;
        ("resource", self.resource.as_str()).encode(encoder.encode_label())?;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Reconciliation passes started
    pub reconciliations_total: Family<ComponentLabels, Counter>,
    /// Reconciliation passes that returned an error
    pub reconciliations_failed_total: Family<ComponentLabels, Counter>,
    /// Failed cluster API calls
    pub client_errors_total: Family<ComponentLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ComponentLabels, Histogram>,
    /// Endpoints handed to queriers, by type
    pub query_endpoints_configured_total: Family<EndpointLabels, Counter>,
    /// Reconciliations requested by Service changes
    pub query_service_watch_reconciliations_total: Counter,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("thanos_operator");

        let reconciliations_total = Family::<ComponentLabels, Counter>::default();
        registry.register(
            "reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliations_failed_total = Family::<ComponentLabels, Counter>::default();
        registry.register(
            "reconciliations_failed",
            "Total number of failed reconciliations",
            reconciliations_failed_total.clone(),
        );

        let client_errors_total = Family::<ComponentLabels, Counter>::default();
        registry.register(
            "client_errors",
            "Total number of failed Kubernetes API calls",
            client_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ComponentLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let query_endpoints_configured_total = Family::<EndpointLabels, Counter>::default();
        registry.register(
            "query_endpoints_configured",
            "Number of StoreAPI endpoints configured on queriers",
            query_endpoints_configured_total.clone(),
        );

        let query_service_watch_reconciliations_total = Counter::default();
        registry.register(
            "query_service_watch_reconciliations",
            "Number of query reconciliations triggered by Service changes",
            query_service_watch_reconciliations_total.clone(),
        );

        Self {
            reconciliations_total,
            reconciliations_failed_total,
            client_errors_total,
            reconcile_duration_seconds,
            query_endpoints_configured_total,
            query_service_watch_reconciliations_total,
            registry,
        }
    }

    /// Record the start of a reconciliation pass
    pub fn record_reconcile(&self, component: &str) {
        self.reconciliations_total
            .get_or_create(&ComponentLabels::new(component))
            .inc();
    }

    /// Record how long a pass took
    pub fn observe_duration(&self, component: &str, duration_secs: f64) {
        self.reconcile_duration_seconds
            .get_or_create(&ComponentLabels::new(component))
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_failure(&self, component: &str) {
        self.reconciliations_failed_total
            .get_or_create(&ComponentLabels::new(component))
            .inc();
    }

    /// Record `count` failed API calls
    pub fn record_client_errors(&self, component: &str, count: u64) {
        self.client_errors_total
            .get_or_create(&ComponentLabels::new(component))
            .inc_by(count);
    }

    /// Record one endpoint configured on a querier
    pub fn record_endpoint(&self, endpoint_type: EndpointType, resource: &str, namespace: &str) {
        let labels = EndpointLabels {
            endpoint_type: endpoint_type.as_str().to_string(),
            resource: resource.to_string(),
            namespace: namespace.to_string(),
        };
        self.query_endpoints_configured_total
            .get_or_create(&labels)
            .inc();
    }

    /// Record reconciliations requested by a Service change
    pub fn record_service_watch(&self, requests: u64) {
        self.query_service_watch_reconciliations_total
            .inc_by(requests);
    }

    pub fn reconciliations(&self, component: &str) -> u64 {
        self.reconciliations_total
            .get_or_create(&ComponentLabels::new(component))
            .get()
    }

    pub fn failures(&self, component: &str) -> u64 {
        self.reconciliations_failed_total
            .get_or_create(&ComponentLabels::new(component))
            .get()
    }

    pub fn client_errors(&self, component: &str) -> u64 {
        self.client_errors_total
            .get_or_create(&ComponentLabels::new(component))
            .get()
    }

    pub fn endpoints_configured(
        &self,
        endpoint_type: EndpointType,
        resource: &str,
        namespace: &str,
    ) -> u64 {
        let labels = EndpointLabels {
            endpoint_type: endpoint_type.as_str().to_string(),
            resource: resource.to_string(),
            namespace: namespace.to_string(),
        };
        self.query_endpoints_configured_total
            .get_or_create(&labels)
            .get()
    }

    pub fn service_watch_reconciliations(&self) -> u64 {
        self.query_service_watch_reconciliations_total.get()
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the controllers are running
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Arc<Metrics>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the controllers are running.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:<port>`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
