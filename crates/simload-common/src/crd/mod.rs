//! Custom Resource Definitions for simload

mod scale_load_config;
mod types;

pub use scale_load_config::{
    AnnotationChurnConfig, CleanupConfig, EventTypeConfig, EventsConfig, LoadGenerationMetrics,
    LoadProfile, NamespaceConfig, NamespaceResourceQuota, ProfilePreset, ResourceChurnConfig,
    ResourceCounts, ResourceTypeConfig, ScaleLoadConfig, ScaleLoadConfigSpec,
    ScaleLoadConfigStatus,
};
pub use types::{Condition, ConditionStatus};
