//! ScaleLoadConfig Custom Resource Definition
//!
//! A ScaleLoadConfig declares how much synthetic load to generate against the
//! cluster, scaled by the number of KWOK nodes matched by its selector. It is
//! cluster-scoped: generated namespaces are cluster-scoped too.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;
use crate::labels::{
    CLEANUP_FINALIZER, DEFAULT_NAMESPACE_PREFIX, DEFAULT_NODE_SELECTOR_KEY,
    DEFAULT_NODE_SELECTOR_VALUE,
};

/// Desired load for a set of KWOK nodes
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "scale.openshift.io",
    version = "v1",
    kind = "ScaleLoadConfig",
    plural = "scaleloadconfigs",
    status = "ScaleLoadConfigStatus",
    namespaced = false,
    printcolumn = r#"{"name":"KWOK Nodes","type":"integer","jsonPath":".status.kwokNodeCount"}"#,
    printcolumn = r#"{"name":"Namespaces","type":"integer","jsonPath":".status.generatedNamespaces"}"#,
    printcolumn = r#"{"name":"Profile","type":"string","jsonPath":".spec.loadProfile.profile"}"#,
    printcolumn = r#"{"name":"Enabled","type":"boolean","jsonPath":".spec.enabled"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ScaleLoadConfigSpec {
    /// Whether load generation is active
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Labels identifying KWOK nodes; empty means `type=kwok`
    #[serde(default = "default_node_selector")]
    pub kwok_node_selector: BTreeMap<String, String>,

    /// Intensity of load generation
    #[serde(default)]
    pub load_profile: LoadProfile,

    /// Generated namespace naming and metadata
    #[serde(default)]
    pub namespace_config: NamespaceConfig,

    /// Node annotation churn
    #[serde(default)]
    pub annotation_churn: AnnotationChurnConfig,

    /// Per-kind object churn inside generated namespaces
    #[serde(default)]
    pub resource_churn: ResourceChurnConfig,

    /// Cleanup behavior on deletion and node removal
    #[serde(default)]
    pub cleanup_config: CleanupConfig,
}

fn default_true() -> bool {
    true
}

fn default_node_selector() -> BTreeMap<String, String> {
    BTreeMap::from([(
        DEFAULT_NODE_SELECTOR_KEY.to_string(),
        DEFAULT_NODE_SELECTOR_VALUE.to_string(),
    )])
}

impl Default for ScaleLoadConfigSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            kwok_node_selector: default_node_selector(),
            load_profile: LoadProfile::default(),
            namespace_config: NamespaceConfig::default(),
            annotation_churn: AnnotationChurnConfig::default(),
            resource_churn: ResourceChurnConfig::default(),
            cleanup_config: CleanupConfig::default(),
        }
    }
}

impl ScaleLoadConfigSpec {
    /// Node selector to list KWOK nodes with, falling back to `type=kwok`
    pub fn node_selector(&self) -> BTreeMap<String, String> {
        if self.kwok_node_selector.is_empty() {
            default_node_selector()
        } else {
            self.kwok_node_selector.clone()
        }
    }

    /// Validate the spec
    ///
    /// Admission is expected to reject these; the controller only logs them.
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.load_profile.validate()
    }
}

impl ScaleLoadConfig {
    /// True when the cleanup finalizer is present
    pub fn has_cleanup_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == CLEANUP_FINALIZER))
    }

    /// Deletion timestamp, if the object is being deleted
    pub fn deletion_time(&self) -> Option<DateTime<Utc>> {
        self.metadata.deletion_timestamp.as_ref().map(|t| t.0)
    }
}

/// Named load presets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfilePreset {
    /// Light load
    Development,
    /// Medium load
    Staging,
    /// Load observed on production clusters
    Production,
    /// Heavy load
    Extreme,
}

impl ProfilePreset {
    /// Parse a profile name; unknown names are treated as production
    pub fn from_name(name: &str) -> Self {
        match name {
            "development" => Self::Development,
            "staging" => Self::Staging,
            "extreme" => Self::Extreme,
            _ => Self::Production,
        }
    }

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
            Self::Extreme => "extreme",
        }
    }
}

/// Overall load characteristics
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadProfile {
    /// development, staging, production or extreme
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Namespace density as a decimal string; overrides the profile ratio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces_per_node: Option<String>,

    /// Total API calls per minute, independent of node count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_call_rate_static: Option<i32>,

    /// API calls per minute per KWOK node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_call_rate_per_node: Option<i32>,

    /// Deprecated: per-node rate, superseded by `apiCallRatePerNode`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_call_rate: Option<i32>,
}

fn default_profile() -> String {
    ProfilePreset::Production.as_str().to_string()
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            namespaces_per_node: None,
            api_call_rate_static: None,
            api_call_rate_per_node: None,
            api_call_rate: None,
        }
    }
}

impl LoadProfile {
    /// Preset selected by `profile`
    pub fn preset(&self) -> ProfilePreset {
        ProfilePreset::from_name(&self.profile)
    }

    /// At most one rate field may be set, and it must be positive
    pub fn validate(&self) -> Result<(), crate::Error> {
        let fields = [
            ("apiCallRateStatic", self.api_call_rate_static),
            ("apiCallRatePerNode", self.api_call_rate_per_node),
            ("apiCallRate", self.api_call_rate),
        ];

        let set = fields.iter().filter(|(_, v)| v.is_some()).count();
        if set > 1 {
            return Err(crate::Error::validation(
                "only one API rate limiting approach can be specified: \
                 apiCallRateStatic, apiCallRatePerNode or apiCallRate",
            ));
        }

        for (name, value) in fields {
            if let Some(v) = value {
                if v <= 0 {
                    return Err(crate::Error::validation(format!(
                        "{name} must be positive, got {v}"
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Generated namespace configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceConfig {
    /// Prefix for generated namespace names
    #[serde(default = "default_namespace_prefix")]
    pub namespace_prefix: String,

    /// Extra labels stamped on generated namespaces
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations stamped on generated namespaces
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Quota created in each generated namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_quota: Option<NamespaceResourceQuota>,
}

fn default_namespace_prefix() -> String {
    DEFAULT_NAMESPACE_PREFIX.to_string()
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: default_namespace_prefix(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            resource_quota: None,
        }
    }
}

impl NamespaceConfig {
    /// Configured prefix, or the default when empty
    pub fn prefix(&self) -> &str {
        if self.namespace_prefix.is_empty() {
            DEFAULT_NAMESPACE_PREFIX
        } else {
            &self.namespace_prefix
        }
    }
}

/// Hard limits for the per-namespace ResourceQuota
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceResourceQuota {
    /// `limits.cpu`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// `limits.memory`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// `requests.storage`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    /// `pods`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods: Option<u32>,
}

/// Node annotation churn configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationChurnConfig {
    /// Whether node annotations are churned at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Churn OVN/networking annotations
    #[serde(default = "default_true")]
    pub networking_annotations: bool,

    /// Churn machine-config-daemon annotations
    #[serde(default = "default_true")]
    pub machine_config_annotations: bool,

    /// Minimum seconds between updates of one node
    #[serde(default = "default_update_interval_min")]
    pub update_interval_min: u32,

    /// Maximum seconds between updates of one node
    #[serde(default = "default_update_interval_max")]
    pub update_interval_max: u32,
}

fn default_update_interval_min() -> u32 {
    60
}

fn default_update_interval_max() -> u32 {
    300
}

impl Default for AnnotationChurnConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            networking_annotations: true,
            machine_config_annotations: true,
            update_interval_min: default_update_interval_min(),
            update_interval_max: default_update_interval_max(),
        }
    }
}

/// Per-kind object churn configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChurnConfig {
    /// ConfigMaps
    #[serde(default)]
    pub config_maps: ResourceTypeConfig,
    /// Secrets
    #[serde(default)]
    pub secrets: ResourceTypeConfig,
    /// Routes (each paired with a Service)
    #[serde(default)]
    pub routes: ResourceTypeConfig,
    /// ImageStreams
    #[serde(default)]
    pub image_streams: ResourceTypeConfig,
    /// BuildConfigs
    #[serde(default)]
    pub build_configs: ResourceTypeConfig,
    /// Events, generated at a rate rather than converged to a count
    #[serde(default)]
    pub events: EventsConfig,
}

/// Convergence and churn settings for one resource kind
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTypeConfig {
    /// Whether this kind is generated
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Objects per selected namespace
    #[serde(default = "default_count")]
    pub count: u32,

    /// Populate only every Nth namespace by index
    #[serde(default = "default_namespace_interval")]
    pub namespace_interval: u32,

    /// Probability (decimal string) that a churned object is deleted and
    /// recreated rather than updated
    #[serde(default = "default_delete_recreate_chance")]
    pub delete_recreate_chance: String,
}

fn default_count() -> u32 {
    1
}

fn default_namespace_interval() -> u32 {
    1
}

fn default_delete_recreate_chance() -> String {
    "0.1".to_string()
}

impl Default for ResourceTypeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: default_count(),
            namespace_interval: default_namespace_interval(),
            delete_recreate_chance: default_delete_recreate_chance(),
        }
    }
}

impl ResourceTypeConfig {
    /// Parsed delete-recreate probability, 0.1 when unparsable or out of range
    pub fn delete_recreate_probability(&self) -> f64 {
        match self.delete_recreate_chance.trim().parse::<f64>() {
            Ok(p) if (0.0..=1.0).contains(&p) => p,
            _ => 0.1,
        }
    }
}

/// Event generation configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventsConfig {
    /// Whether events are generated
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Events per hour generated in each namespace; non-positive means 50
    #[serde(default = "default_events_per_hour")]
    pub events_per_node_per_hour: i32,

    /// Weighted event templates; empty means the built-in table
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_types: Vec<EventTypeConfig>,
}

fn default_events_per_hour() -> i32 {
    50
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            events_per_node_per_hour: default_events_per_hour(),
            event_types: Vec::new(),
        }
    }
}

impl EventsConfig {
    /// Effective hourly rate
    pub fn rate_per_hour(&self) -> u32 {
        if self.events_per_node_per_hour <= 0 {
            default_events_per_hour() as u32
        } else {
            self.events_per_node_per_hour as u32
        }
    }
}

/// One weighted event template
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeConfig {
    /// Normal or Warning
    #[serde(rename = "type")]
    pub type_: String,
    /// Event reason
    pub reason: String,
    /// Message; a `%s` is replaced with the container name
    pub message: String,
    /// Relative selection weight
    pub weight: i32,
}

/// Cleanup configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupConfig {
    /// Remove generated namespaces when the config is deleted
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delete namespaces with a 30s grace period instead of immediately
    #[serde(default = "default_true")]
    pub graceful_deletes: bool,

    /// Seconds after the deletion timestamp before the finalizer is released
    #[serde(default = "default_cleanup_delay")]
    pub cleanup_delay_seconds: u32,

    /// Remove namespaces whose associated node no longer exists
    #[serde(default = "default_true")]
    pub orphan_cleanup: bool,
}

fn default_cleanup_delay() -> u32 {
    60
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            graceful_deletes: true,
            cleanup_delay_seconds: default_cleanup_delay(),
            orphan_cleanup: true,
        }
    }
}

/// Observed state of a ScaleLoadConfig
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleLoadConfigStatus {
    /// Generation of the spec last processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// KWOK nodes matched by the selector
    #[serde(default)]
    pub kwok_node_count: u32,

    /// Generated namespaces owned by this config
    #[serde(default)]
    pub generated_namespaces: u32,

    /// Objects present after the last tick, by kind
    #[serde(default)]
    pub total_resources: ResourceCounts,

    /// Time of the last completed tick
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<DateTime<Utc>>,

    /// Ready, Scaling and Degraded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Rates measured over the last tick
    #[serde(default)]
    pub metrics: LoadGenerationMetrics,
}

impl ScaleLoadConfigStatus {
    /// Find a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// Object counts by kind
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCounts {
    /// ConfigMaps
    #[serde(default)]
    pub config_maps: u32,
    /// Secrets
    #[serde(default)]
    pub secrets: u32,
    /// Routes
    #[serde(default)]
    pub routes: u32,
    /// ImageStreams
    #[serde(default)]
    pub image_streams: u32,
    /// BuildConfigs
    #[serde(default)]
    pub build_configs: u32,
    /// Events created (approximate; the API server expires events)
    #[serde(default)]
    pub events: u32,
}

/// Load generation rates, each a decimal string with two fractional digits
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadGenerationMetrics {
    /// API calls per minute
    pub api_calls_per_minute: String,
    /// Mean tick duration in milliseconds
    pub average_reconcile_time_ms: String,
    /// Failed mutating calls as a percentage of attempted ones
    pub error_rate: String,
    /// Objects created per minute
    pub resource_creation_rate: String,
    /// Objects updated per minute
    pub resource_update_rate: String,
    /// Objects deleted per minute
    pub resource_deletion_rate: String,
}

impl Default for LoadGenerationMetrics {
    fn default() -> Self {
        let zero = || "0.00".to_string();
        Self {
            api_calls_per_minute: zero(),
            average_reconcile_time_ms: zero(),
            error_rate: zero(),
            resource_creation_rate: zero(),
            resource_update_rate: zero(),
            resource_deletion_rate: zero(),
        }
    }
}
