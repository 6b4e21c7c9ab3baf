//! Operator runtime settings read from the environment.

use crate::controller::error::{Error, Result};

/// Default number of concurrent reconciliation passes per resource kind
pub const DEFAULT_RECONCILE_WORKERS: u16 = 4;

/// Default port of the health and metrics server
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Runtime settings of the operator process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Only watch this namespace; all namespaces when `None`
    pub watch_namespace: Option<String>,
    /// Concurrent passes per resource kind
    pub reconcile_workers: u16,
    pub metrics_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            reconcile_workers: DEFAULT_RECONCILE_WORKERS,
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }
}

impl OperatorConfig {
    /// Read `WATCH_NAMESPACE`, `RECONCILE_WORKERS` and `METRICS_PORT`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.watch_namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());

        if let Some(workers) = lookup("RECONCILE_WORKERS") {
            config.reconcile_workers = workers
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|w| *w > 0)
                .ok_or_else(|| {
                    Error::Setup(format!(
                        "RECONCILE_WORKERS must be a positive integer, got {workers:?}"
                    ))
                })?;
        }

        if let Some(port) = lookup("METRICS_PORT") {
            config.metrics_port = port.trim().parse::<u16>().map_err(|_| {
                Error::Setup(format!("METRICS_PORT must be a port number, got {port:?}"))
            })?;
        }

        Ok(config)
    }
}
