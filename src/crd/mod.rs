//! Custom Resource Definitions (CRDs) for thanos-operator.
//!
//! - `ThanosQuery`: query-serving tier with optional Query Frontend
//! - `ThanosStore`: sharded store gateway tier over object storage

mod common;
mod thanos_query;
mod thanos_store;

pub use common::*;
pub use thanos_query::*;
pub use thanos_store::*;
