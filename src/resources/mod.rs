//! Resource generation module.
//!
//! Turns normalized options into the ordered list of child objects for
//! each Thanos component.
//!
//! ## Resources Generated
//!
//! | Component | Objects |
//! |-----------|---------|
//! | Querier | ServiceAccount, endpoints ConfigMap, Deployment, Service |
//! | Query Frontend | ServiceAccount, cache ConfigMap, Deployment, Service |
//! | Store Gateway | ServiceAccount, cache ConfigMaps, per-shard Service and StatefulSet |

pub mod common;
pub mod labels;
pub mod object;
pub mod options;
pub mod query;
pub mod query_frontend;
pub mod store;

pub use object::{ManagedObject, ObjectKind};
pub use options::Options;
pub use query::{Endpoint, EndpointType};
