//! Label selectors for StoreAPI discovery.
//!
//! A [`Selector`] is built from an optional user `LabelSelector` and the
//! labels every StoreAPI Service must carry. It is used both to filter
//! Service listings on the API server and to test a single Service when
//! routing watch events back to queriers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use regex::Regex;

use crate::controller::error::{Error, Result};

/// Qualified label key: optional DNS subdomain prefix, then a name.
static KEY_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^([a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*/)?[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$",
    )
    .ok()
});

static VALUE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?)?$").ok());

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

/// One clause of a selector.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Requirement {
    Equals { key: String, value: String },
    In { key: String, values: BTreeSet<String> },
    NotIn { key: String, values: BTreeSet<String> },
    Exists { key: String },
    DoesNotExist { key: String },
}

impl Requirement {
    pub fn key(&self) -> &str {
        match self {
            Requirement::Equals { key, .. }
            | Requirement::In { key, .. }
            | Requirement::NotIn { key, .. }
            | Requirement::Exists { key }
            | Requirement::DoesNotExist { key } => key,
        }
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals { key, value } => labels.get(key) == Some(value),
            Requirement::In { key, values } => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn { key, values } => {
                labels.get(key).is_none_or(|v| !values.contains(v))
            }
            Requirement::Exists { key } => labels.contains_key(key),
            Requirement::DoesNotExist { key } => !labels.contains_key(key),
        }
    }

    fn from_expression(expr: &LabelSelectorRequirement) -> Result<Self> {
        validate_key(&expr.key)?;
        let values: BTreeSet<String> = expr.values.iter().flatten().cloned().collect();
        for value in &values {
            validate_value(&expr.key, value)?;
        }
        let key = expr.key.clone();

        match expr.operator.as_str() {
            "In" | "NotIn" if values.is_empty() => Err(Error::Selector(format!(
                "operator {} on {key:?} requires at least one value",
                expr.operator
            ))),
            "In" => Ok(Requirement::In { key, values }),
            "NotIn" => Ok(Requirement::NotIn { key, values }),
            "Exists" | "DoesNotExist" if !values.is_empty() => Err(Error::Selector(format!(
                "operator {} on {key:?} takes no values",
                expr.operator
            ))),
            "Exists" => Ok(Requirement::Exists { key }),
            "DoesNotExist" => Ok(Requirement::DoesNotExist { key }),
            other => Err(Error::Selector(format!(
                "unknown operator {other:?} on {key:?}"
            ))),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |values: &BTreeSet<String>| values.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Requirement::Equals { key, value } => write!(f, "{key}={value}"),
            Requirement::In { key, values } => write!(f, "{key} in ({})", join(values)),
            Requirement::NotIn { key, values } => write!(f, "{key} notin ({})", join(values)),
            Requirement::Exists { key } => write!(f, "{key}"),
            Requirement::DoesNotExist { key } => write!(f, "!{key}"),
        }
    }
}

/// Conjunction of label requirements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Build the effective selector: the user selector AND `required`.
    ///
    /// Required labels win on key conflict; any user clause on a required
    /// key is replaced by the required equality.
    pub fn from_label_selector(
        selector: Option<&LabelSelector>,
        required: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut requirements = Vec::new();

        if let Some(selector) = selector {
            for (key, value) in selector.match_labels.iter().flatten() {
                validate_key(key)?;
                validate_value(key, value)?;
                if !required.contains_key(key) {
                    requirements.push(Requirement::Equals {
                        key: key.clone(),
                        value: value.clone(),
                    });
                }
            }
            for expr in selector.match_expressions.iter().flatten() {
                let requirement = Requirement::from_expression(expr)?;
                if !required.contains_key(requirement.key()) {
                    requirements.push(requirement);
                }
            }
        }

        for (key, value) in required {
            requirements.push(Requirement::Equals {
                key: key.clone(),
                value: value.clone(),
            });
        }

        requirements.sort();
        requirements.dedup();
        Ok(Self { requirements })
    }

    /// Whether `labels` satisfies every requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }
}

/// Renders the label-selector query string accepted by the API server.
impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

fn validate_key(key: &str) -> Result<()> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    let well_formed = KEY_RE.as_ref().is_some_and(|re| re.is_match(key));
    if !well_formed
        || name.len() > MAX_NAME_LEN
        || prefix.is_some_and(|p| p.len() > MAX_PREFIX_LEN)
    {
        return Err(Error::Selector(format!("invalid label key {key:?}")));
    }
    Ok(())
}

fn validate_value(key: &str, value: &str) -> Result<()> {
    let well_formed = VALUE_RE.as_ref().is_some_and(|re| re.is_match(value));
    if !well_formed || value.len() > MAX_NAME_LEN {
        return Err(Error::Selector(format!(
            "invalid value {value:?} for label {key:?}"
        )));
    }
    Ok(())
}
