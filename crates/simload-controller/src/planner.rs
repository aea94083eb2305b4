//! Target sizes and cadence derived from node count and load profile

use std::time::Duration;

use tracing::warn;

use simload_common::crd::{LoadProfile, ProfilePreset, ResourceTypeConfig};

/// Ratio used when `namespacesPerNode` cannot be parsed
pub const FALLBACK_RATIO: f64 = 0.6;

/// Estimated API calls per target namespace for one tick
pub const CALLS_PER_NAMESPACE: u64 = 5;

const EPSILON: f64 = 1e-9;

/// Default namespaces per node for a preset
pub fn profile_ratio(preset: ProfilePreset) -> f64 {
    match preset {
        ProfilePreset::Development => 0.2,
        ProfilePreset::Staging => 0.4,
        ProfilePreset::Production => 0.6,
        ProfilePreset::Extreme => 1.0,
    }
}

/// Namespaces per node: the explicit ratio if it parses as a non-negative
/// decimal, otherwise the profile default
pub fn namespace_ratio(profile: &LoadProfile) -> f64 {
    let Some(raw) = profile.namespaces_per_node.as_deref() else {
        return profile_ratio(profile.preset());
    };
    match raw.trim().parse::<f64>() {
        Ok(ratio) if ratio.is_finite() && ratio >= 0.0 => ratio,
        _ => {
            warn!(
                namespaces_per_node = raw,
                fallback = FALLBACK_RATIO,
                "Invalid namespacesPerNode, using fallback ratio"
            );
            FALLBACK_RATIO
        }
    }
}

/// `ceil(nodes × ratio)`, treating products within 1e-9 of an integer as
/// that integer
pub fn target_namespaces(nodes: u32, ratio: f64) -> u32 {
    if nodes == 0 || ratio <= 0.0 {
        return 0;
    }
    let product = f64::from(nodes) * ratio;
    let nearest = product.round();
    let target = if (product - nearest).abs() < EPSILON {
        nearest
    } else {
        product.ceil()
    };
    target.min(f64::from(u32::MAX)) as u32
}

/// Wake-up period between ticks for a preset
pub fn reconcile_interval(preset: ProfilePreset) -> Duration {
    match preset {
        ProfilePreset::Development => Duration::from_secs(120),
        ProfilePreset::Staging => Duration::from_secs(90),
        ProfilePreset::Production => Duration::from_secs(60),
        ProfilePreset::Extreme => Duration::from_secs(30),
    }
}

/// Whether a namespace with `index` is populated for a kind with this
/// `interval`. Interval ≤ 1 selects every namespace, as does a missing index.
pub fn selected_by_interval(index: Option<u32>, interval: u32) -> bool {
    match index {
        _ if interval <= 1 => true,
        Some(i) => i % interval == 0,
        None => true,
    }
}

/// Objects of one kind a namespace should hold
pub fn target_objects(config: &ResourceTypeConfig, index: Option<u32>) -> u32 {
    if config.enabled && selected_by_interval(index, config.namespace_interval) {
        config.count
    } else {
        0
    }
}

/// Targets for one tick
#[derive(Clone, Debug, PartialEq)]
pub struct ScalingPlan {
    /// Observed KWOK nodes
    pub nodes: u32,
    /// Namespaces per node in effect
    pub ratio: f64,
    /// Namespace count to converge to
    pub target_namespaces: u32,
    /// Calls charged against the rate budget
    pub estimated_calls: u64,
    /// Time until the next tick
    pub interval: Duration,
}

impl ScalingPlan {
    /// Plan a tick for `nodes` KWOK nodes
    pub fn new(profile: &LoadProfile, nodes: u32) -> Self {
        let ratio = namespace_ratio(profile);
        let target = target_namespaces(nodes, ratio);
        Self {
            nodes,
            ratio,
            target_namespaces: target,
            estimated_calls: CALLS_PER_NAMESPACE * u64::from(target),
            interval: reconcile_interval(profile.preset()),
        }
    }
}
