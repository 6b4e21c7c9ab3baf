//! Desired state of a ThanosQuery: the querier and its optional frontend.

use async_trait::async_trait;
use kube::ResourceExt;

use crate::client::{ClusterApi, ObjectKey};
use crate::controller::context::Context;
use crate::controller::endpoints::discover;
use crate::controller::error::Result;
use crate::controller::reconciler::Reconcilable;
use crate::crd::{QueryFrontendSpec, ThanosQuery};
use crate::resources::object::ManagedObject;
use crate::resources::options::{Duration, Options};
use crate::resources::query::{QueryOptions, build_query};
use crate::resources::query_frontend::{QueryFrontendOptions, build_query_frontend, frontend_name};
use crate::resources::Endpoint;
use crate::resources::labels::merge_labels;

/// Component name of the query tier
pub const QUERY_COMPONENT: &str = "thanos-query";

/// Querier `--query.timeout`
pub const DEFAULT_QUERY_TIMEOUT: &str = "15m";

/// Querier `--query.lookback-delta`
pub const DEFAULT_LOOKBACK_DELTA: &str = "5m";

/// Querier `--query.max-concurrent`
pub const DEFAULT_MAX_CONCURRENT: i32 = 20;

#[async_trait]
impl Reconcilable for ThanosQuery {
    const COMPONENT: &'static str = QUERY_COMPONENT;

    async fn fetch(api: &dyn ClusterApi, key: &ObjectKey) -> Result<Self> {
        api.get_query(key).await
    }

    fn is_paused(&self) -> bool {
        self.spec.paused.unwrap_or(false)
    }

    async fn desired_objects(&self, ctx: &Context) -> Result<Vec<ManagedObject>> {
        let endpoints = discover(self, ctx).await?;
        let mut objects = build_query(&query_options(self, endpoints)?)?;

        if let Some(frontend) = &self.spec.query_frontend {
            ctx.publish_normal_event(
                self,
                "BuildingQueryFrontend",
                "Reconcile",
                Some("Building query frontend".to_string()),
            )
            .await;
            objects.extend(build_query_frontend(&frontend_options(self, frontend)?));
        }
        Ok(objects)
    }
}

/// Querier options from the spec, the discovered endpoints and the fixed
/// operational defaults.
pub fn query_options(query: &ThanosQuery, endpoints: Vec<Endpoint>) -> Result<QueryOptions> {
    let spec = &query.spec;
    Ok(QueryOptions {
        options: Options {
            name: query.name_any(),
            namespace: query.namespace().unwrap_or_default(),
            replicas: spec.replicas,
            labels: merge_labels(query.labels(), &spec.labels),
            image: spec.common.image.clone(),
            log_level: spec.common.log_level.clone(),
            log_format: spec.common.log_format.clone(),
            resource_requirements: spec.common.resource_requirements.clone(),
            additional: spec.additional.clone(),
        }
        .apply_defaults(),
        endpoints,
        replica_labels: spec.querier_replica_labels.clone(),
        timeout: Duration::parse("queryTimeout", DEFAULT_QUERY_TIMEOUT)?,
        lookback_delta: Duration::parse("lookbackDelta", DEFAULT_LOOKBACK_DELTA)?,
        max_concurrent: DEFAULT_MAX_CONCURRENT,
    })
}

/// Frontend options. The frontend carries the resource's own labels and
/// forwards to the querier Service.
pub fn frontend_options(
    query: &ThanosQuery,
    frontend: &QueryFrontendSpec,
) -> Result<QueryFrontendOptions> {
    let name = query.name_any();
    Ok(QueryFrontendOptions {
        options: Options {
            name: frontend_name(&name),
            namespace: query.namespace().unwrap_or_default(),
            replicas: frontend.replicas,
            labels: query.labels().clone(),
            image: frontend.common.image.clone(),
            log_level: frontend.common.log_level.clone(),
            log_format: frontend.common.log_format.clone(),
            resource_requirements: frontend.common.resource_requirements.clone(),
            additional: frontend.additional.clone(),
        }
        .apply_defaults(),
        downstream: name,
        compress_responses: frontend.compress_responses,
        response_cache: frontend.query_range_response_cache_config.clone(),
        log_queries_longer_than: Duration::parse_optional(
            "logQueriesLongerThan",
            frontend.log_queries_longer_than.as_deref(),
        )?,
        query_range_split_interval: Duration::parse_optional(
            "queryRangeSplitInterval",
            frontend.query_range_split_interval.as_deref(),
        )?,
        labels_split_interval: Duration::parse_optional(
            "labelsSplitInterval",
            frontend.labels_split_interval.as_deref(),
        )?,
        query_range_max_retries: frontend.query_range_max_retries,
        labels_max_retries: frontend.labels_max_retries,
        labels_default_time_range: Duration::parse_optional(
            "labelsDefaultTimeRange",
            frontend.labels_default_time_range.as_deref(),
        )?,
    })
}
