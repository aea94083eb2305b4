//! Identity labels and annotations written onto managed objects
//!
//! These keys are a durable contract: other tooling selects and cleans up
//! generated objects with them, so values must never change.

use std::collections::BTreeMap;

/// Prefix shared by every key this operator owns
pub const PREFIX: &str = "scale.openshift.io/";

// Identity labels
/// Name of the ScaleLoadConfig that owns the object
pub const MANAGED_BY_LABEL: &str = "scale.openshift.io/managed-by";
/// Node a generated namespace is associated with (may be empty)
pub const ASSOCIATED_NODE_LABEL: &str = "scale.openshift.io/associated-node";
/// Always [`crate::CREATED_BY`]
pub const CREATED_BY_LABEL: &str = "scale.openshift.io/created-by";
/// Monotonic index assigned to a generated namespace at creation
pub const NAMESPACE_INDEX_LABEL: &str = "scale.openshift.io/namespace-index";
/// Resource kind of a generated object (configmap, secret, route, ...)
pub const RESOURCE_TYPE_LABEL: &str = "scale.openshift.io/resource-type";

/// Standard app name label, `load-app-<i>` on generated objects
pub const APP_NAME_LABEL: &str = "app.kubernetes.io/name";
/// Standard component label (configuration, credentials, frontend, ...)
pub const APP_COMPONENT_LABEL: &str = "app.kubernetes.io/component";

/// Finalizer that routes deletion through namespace cleanup
pub const CLEANUP_FINALIZER: &str = "scale.openshift.io/cleanup";

// Object churn annotations
/// RFC3339 time of the last churn update on an object
pub const LAST_CHURN_ANNOTATION: &str = "scale.openshift.io/last-churn";
/// Random counter stamped by each churn update
pub const CHURN_ITERATION_ANNOTATION: &str = "scale.openshift.io/churn-iteration";

// Node annotation churn
/// Sentinel holding the RFC3339 time of the last node annotation update
pub const LAST_ANNOTATION_UPDATE: &str = "scale.openshift.io/last-annotation-update";
/// Counter stamped when the networking group changed
pub const NETWORKING_ITERATION_ANNOTATION: &str = "scale.openshift.io/networking-churn-iteration";
/// Counter stamped when the machine-config group changed
pub const MACHINE_CONFIG_ITERATION_ANNOTATION: &str =
    "scale.openshift.io/machine-config-churn-iteration";
/// Counter stamped when the cloud/CSI/machine-API group changed
pub const PLATFORM_ITERATION_ANNOTATION: &str = "scale.openshift.io/platform-churn-iteration";
/// Refreshed on every node annotation update
pub const LAST_SEEN_ANNOTATION: &str = "scale.openshift.io/last-seen";
/// Marks a node as touched by the load generator
pub const LOAD_GENERATOR_MANAGED_ANNOTATION: &str = "scale.openshift.io/load-generator-managed";

// Defaults
/// Prefix for generated namespace names when none is configured
pub const DEFAULT_NAMESPACE_PREFIX: &str = "openshift-fake-";
/// Node selector used when the spec selector is empty
pub const DEFAULT_NODE_SELECTOR_KEY: &str = "type";
/// Value paired with [`DEFAULT_NODE_SELECTOR_KEY`]
pub const DEFAULT_NODE_SELECTOR_VALUE: &str = "kwok";

/// Selector matching every object owned by `config_name`
pub fn managed_by(config_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), config_name.to_string())])
}

/// Selector matching objects of one resource type owned by `config_name`
pub fn managed_of_type(config_name: &str, resource_type: &str) -> BTreeMap<String, String> {
    let mut selector = managed_by(config_name);
    selector.insert(RESOURCE_TYPE_LABEL.to_string(), resource_type.to_string());
    selector
}

/// Render an equality selector as a Kubernetes label selector string
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// True when every pair in `selector` is present in `labels`
pub fn matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}
