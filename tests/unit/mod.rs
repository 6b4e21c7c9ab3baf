// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for thanos-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

mod crd_tests {
    use kube::CustomResourceExt;
    use serde_json::json;
    use thanos_operator::crd::{ShardingStrategyType, ThanosQuery, ThanosStore};

    #[test]
    fn test_query_defaults() {
        let query: ThanosQuery = serde_json::from_value(json!({
            "apiVersion": "monitoring.thanos.io/v1alpha1",
            "kind": "ThanosQuery",
            "metadata": {"name": "q1", "namespace": "ns-a"},
            "spec": {}
        }))
        .unwrap();
        assert_eq!(query.spec.replicas, 1);
        assert!(query.spec.store_label_selector.is_none());
        assert!(query.spec.query_frontend.is_none());
        assert_eq!(query.spec.paused, None);
    }

    #[test]
    fn test_query_frontend_defaults() {
        let query: ThanosQuery = serde_json::from_value(json!({
            "apiVersion": "monitoring.thanos.io/v1alpha1",
            "kind": "ThanosQuery",
            "metadata": {"name": "q1"},
            "spec": {"queryFrontend": {}}
        }))
        .unwrap();
        let frontend = query.spec.query_frontend.unwrap();
        assert_eq!(frontend.replicas, 1);
        assert!(frontend.compress_responses);
        assert!(frontend.query_range_split_interval.is_some());
    }

    #[test]
    fn test_store_defaults() {
        let store: ThanosStore = serde_json::from_value(json!({
            "apiVersion": "monitoring.thanos.io/v1alpha1",
            "kind": "ThanosStore",
            "metadata": {"name": "s1"},
            "spec": {
                "objectStorageConfig": {"name": "objstore"},
                "storageSize": "10Gi"
            }
        }))
        .unwrap();
        assert_eq!(store.spec.object_storage_config.key, "thanos.yaml");
        assert_eq!(store.spec.sharding_strategy.shards, 1);
        assert_eq!(store.spec.sharding_strategy.shard_replicas, 1);
        assert_eq!(
            store.spec.sharding_strategy.type_,
            ShardingStrategyType::Block
        );
        assert_eq!(store.spec.ignore_deletion_marks_delay, "24h");
    }

    #[test]
    fn test_crd_names() {
        let query = ThanosQuery::crd();
        assert_eq!(query.spec.names.plural, "thanosqueries");
        assert_eq!(query.spec.group, "monitoring.thanos.io");
        let store = ThanosStore::crd();
        assert_eq!(store.spec.names.kind, "ThanosStore");
    }
}

mod selector_tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
        LabelSelector, LabelSelectorRequirement,
    };
    use thanos_operator::controller::selector::Selector;
    use thanos_operator::resources::labels::{
        K8S_PART_OF, STORE_API_LABEL, required_store_service_labels,
    };

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_no_user_selector_is_required_labels_only() {
        let selector = Selector::from_label_selector(None, &required_store_service_labels()).unwrap();
        assert_eq!(
            selector.to_string(),
            "app.kubernetes.io/part-of=thanos,operator.thanos.io/store-api=true"
        );
    }

    #[test]
    fn test_required_labels_override_user_clause() {
        let user = LabelSelector {
            match_labels: Some(labels(&[(STORE_API_LABEL, "false"), ("tenant", "a")])),
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: K8S_PART_OF.to_string(),
                operator: "DoesNotExist".to_string(),
                values: None,
            }]),
        };
        let selector =
            Selector::from_label_selector(Some(&user), &required_store_service_labels()).unwrap();

        let store = labels(&[
            (STORE_API_LABEL, "true"),
            (K8S_PART_OF, "thanos"),
            ("tenant", "a"),
        ]);
        assert!(selector.matches(&store));
        assert_eq!(selector.requirements().len(), 3);
    }

    #[test]
    fn test_set_based_expressions() {
        let user = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "tenant".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["a".to_string(), "b".to_string()]),
                },
                LabelSelectorRequirement {
                    key: "tier".to_string(),
                    operator: "NotIn".to_string(),
                    values: Some(vec!["cold".to_string()]),
                },
            ]),
        };
        let selector = Selector::from_label_selector(Some(&user), &BTreeMap::new()).unwrap();
        assert_eq!(selector.to_string(), "tenant in (a,b),tier notin (cold)");
        assert!(selector.matches(&labels(&[("tenant", "b")])));
        assert!(!selector.matches(&labels(&[("tenant", "b"), ("tier", "cold")])));
        assert!(!selector.matches(&labels(&[("tenant", "c")])));
    }

    #[test]
    fn test_invalid_selectors() {
        let bad_operator = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tenant".to_string(),
                operator: "Near".to_string(),
                values: None,
            }]),
        };
        assert!(Selector::from_label_selector(Some(&bad_operator), &BTreeMap::new()).is_err());

        let bad_key = LabelSelector {
            match_labels: Some(labels(&[("not a key", "v")])),
            match_expressions: None,
        };
        assert!(Selector::from_label_selector(Some(&bad_key), &BTreeMap::new()).is_err());
    }
}

mod endpoint_tests {
    use std::collections::BTreeMap;

    use thanos_operator::controller::endpoints::classify;
    use thanos_operator::resources::labels::{
        ENDPOINT_GROUP_LABEL, ENDPOINT_GROUP_STRICT_LABEL, ENDPOINT_STRICT_LABEL,
    };
    use thanos_operator::resources::{Endpoint, EndpointType};

    fn markers(keys: &[&str]) -> BTreeMap<String, String> {
        keys.iter()
            .map(|k| (k.to_string(), String::new()))
            .collect()
    }

    #[test]
    fn test_classification_precedence() {
        assert_eq!(classify(&markers(&[])), EndpointType::Regular);
        assert_eq!(classify(&markers(&[ENDPOINT_GROUP_LABEL])), EndpointType::Group);
        assert_eq!(
            classify(&markers(&[ENDPOINT_GROUP_LABEL, ENDPOINT_GROUP_STRICT_LABEL])),
            EndpointType::GroupStrict
        );
        assert_eq!(
            classify(&markers(&[ENDPOINT_GROUP_STRICT_LABEL, ENDPOINT_STRICT_LABEL])),
            EndpointType::Strict
        );
    }

    #[test]
    fn test_marker_value_is_ignored() {
        let mut labels = markers(&[]);
        labels.insert(ENDPOINT_STRICT_LABEL.to_string(), "false".to_string());
        assert_eq!(classify(&labels), EndpointType::Strict);
    }

    #[test]
    fn test_endpoint_address() {
        let endpoint = Endpoint {
            service_name: "store-0".to_string(),
            namespace: "ns-a".to_string(),
            port: 10901,
            endpoint_type: EndpointType::Regular,
        };
        assert_eq!(
            endpoint.address(),
            "dns+store-0.ns-a.svc.cluster.local:10901"
        );
    }

    #[test]
    fn test_endpoint_type_names() {
        assert_eq!(EndpointType::Regular.to_string(), "regular");
        assert_eq!(EndpointType::Group.to_string(), "group");
        assert_eq!(EndpointType::GroupStrict.to_string(), "group_strict");
        assert_eq!(EndpointType::Strict.to_string(), "strict");
    }
}

mod config_tests {
    use thanos_operator::OperatorConfig;

    #[test]
    fn test_from_lookup() {
        let config = OperatorConfig::from_lookup(|key| match key {
            "WATCH_NAMESPACE" => Some("monitoring".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.watch_namespace.as_deref(), Some("monitoring"));
        assert_eq!(config.reconcile_workers, 4);
    }
}
