//! Normalized options consumed by the manifest builders, and parsers for
//! the string-typed values users put in the CRDs.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;

use crate::controller::error::{Error, Result};
use crate::crd::Additional;

/// Thanos image used when the resource doesn't pin one
pub const DEFAULT_IMAGE: &str = "quay.io/thanos/thanos:v0.37.2";

/// Default `--log.level`
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default `--log.format`
pub const DEFAULT_LOG_FORMAT: &str = "logfmt";

/// Options shared by every Thanos component manifest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Options {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub labels: BTreeMap<String, String>,
    pub image: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub resource_requirements: Option<ResourceRequirements>,
    pub additional: Additional,
}

impl Options {
    /// Fill unset image and log settings with operator defaults.
    pub fn apply_defaults(mut self) -> Self {
        self.image.get_or_insert_with(|| DEFAULT_IMAGE.to_string());
        self.log_level
            .get_or_insert_with(|| DEFAULT_LOG_LEVEL.to_string());
        self.log_format
            .get_or_insert_with(|| DEFAULT_LOG_FORMAT.to_string());
        if self.replicas < 1 {
            self.replicas = 1;
        }
        self
    }

    pub fn image(&self) -> &str {
        self.image.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_format(&self) -> &str {
        self.log_format.as_deref().unwrap_or(DEFAULT_LOG_FORMAT)
    }
}

static DURATION_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(\d+y)?(\d+w)?(\d+d)?(\d+h)?(\d+m)?(\d+s)?(\d+ms)?$").ok()
});

static QUANTITY_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+(\.[0-9]*)?|\.[0-9]+)(Ki|Mi|Gi|Ti|Pi|Ei|n|u|m|k|M|G|T|P|E|[eE][+-]?[0-9]+)?$")
        .ok()
});

fn matches(re: &LazyLock<Option<Regex>>, value: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(value))
}

/// A validated Prometheus-style duration such as `15m` or `1d12h`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Duration(String);

impl Duration {
    /// Parse `value`, naming `field` in the error.
    pub fn parse(field: &str, value: &str) -> Result<Self> {
        if value.is_empty() || value == "0" {
            return Ok(Duration("0s".to_string()));
        }
        if !matches(&DURATION_RE, value) {
            return Err(Error::invalid_option(
                field,
                format!("{value:?} is not a valid duration"),
            ));
        }
        Ok(Duration(value.to_string()))
    }

    /// Parse an optional value; `None` stays `None`.
    pub fn parse_optional(field: &str, value: Option<&str>) -> Result<Option<Self>> {
        value.map(|v| Self::parse(field, v)).transpose()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A store time bound: an RFC 3339 timestamp or a signed duration relative to now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeBound(String);

impl TimeBound {
    pub fn parse(field: &str, value: &str) -> Result<Self> {
        if value.parse::<jiff::Timestamp>().is_ok() {
            return Ok(TimeBound(value.to_string()));
        }
        let unsigned = value.strip_prefix('-').unwrap_or(value);
        if !unsigned.is_empty() && matches(&DURATION_RE, unsigned) {
            return Ok(TimeBound(value.to_string()));
        }
        Err(Error::invalid_option(
            field,
            format!("{value:?} is neither an RFC 3339 time nor a relative duration"),
        ))
    }

    pub fn parse_optional(field: &str, value: Option<&str>) -> Result<Option<Self>> {
        value.map(|v| Self::parse(field, v)).transpose()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parse a Kubernetes resource quantity such as `10Gi`.
pub fn parse_quantity(field: &str, value: &str) -> Result<Quantity> {
    if !matches(&QUANTITY_RE, value) {
        return Err(Error::invalid_option(
            field,
            format!("{value:?} is not a valid quantity"),
        ));
    }
    Ok(Quantity(value.to_string()))
}
