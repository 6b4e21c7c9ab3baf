//! Controller module for thanos-operator.
//!
//! Contains the reconciliation engine, endpoint discovery and the Service
//! watch router. Passes are scheduled by `kube::runtime::Controller`.
//!
//! Two resources are reconciled by the same engine:
//! - ThanosQuery (`query`), whose StoreAPI endpoints come from `endpoints`
//! - ThanosStore (`store`)

// Shared modules
pub mod context;
pub mod error;
pub mod reconciler;
pub mod selector;
pub mod sync;

// ThanosQuery controller
pub mod endpoints;
pub mod query;
pub mod watch;

// ThanosStore controller
pub mod store;
