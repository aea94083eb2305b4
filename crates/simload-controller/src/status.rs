//! ScaleLoadConfig status computation

use chrono::{DateTime, Utc};

use simload_common::crd::{
    Condition, ConditionStatus, LoadGenerationMetrics, ResourceCounts, ScaleLoadConfigStatus,
};

use crate::store::StatsSnapshot;

/// Error rate (percent) above which the config reports Degraded
pub const DEGRADED_ERROR_RATE: f64 = 10.0;

/// Condition types
pub mod conditions {
    /// Load generation is running
    pub const READY: &str = "Ready";
    /// Resources track the node count
    pub const SCALING: &str = "Scaling";
    /// Too many store calls are failing
    pub const DEGRADED: &str = "Degraded";
}

/// What one Active tick observed and did
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    /// KWOK nodes matched by the selector
    pub nodes: u32,
    /// Generated namespaces after convergence
    pub namespaces: u32,
    /// Objects per kind across generated namespaces
    pub totals: ResourceCounts,
    /// Store calls made during the tick
    pub stats: StatsSnapshot,
    /// Minutes since the previous tick (1 on the first)
    pub minutes: f64,
    /// Running mean tick duration
    pub average_reconcile_ms: f64,
}

fn decimal(value: f64) -> String {
    format!("{:.2}", value)
}

fn per_minute(count: u64, minutes: f64) -> String {
    let minutes = if minutes > 0.0 { minutes } else { 1.0 };
    decimal(count as f64 / minutes)
}

/// Rates block for a tick
pub fn metrics(report: &TickReport) -> LoadGenerationMetrics {
    let stats = &report.stats;
    LoadGenerationMetrics {
        api_calls_per_minute: per_minute(stats.api_calls, report.minutes),
        average_reconcile_time_ms: decimal(report.average_reconcile_ms),
        error_rate: decimal(stats.error_rate()),
        resource_creation_rate: per_minute(stats.created, report.minutes),
        resource_update_rate: per_minute(stats.updated, report.minutes),
        resource_deletion_rate: per_minute(stats.deleted, report.minutes),
    }
}

fn previous_conditions(previous: Option<&ScaleLoadConfigStatus>) -> &[Condition] {
    previous.map(|s| s.conditions.as_slice()).unwrap_or(&[])
}

/// Status after an Active tick
pub fn active(
    previous: Option<&ScaleLoadConfigStatus>,
    generation: Option<i64>,
    report: &TickReport,
    now: DateTime<Utc>,
) -> ScaleLoadConfigStatus {
    let prev = previous_conditions(previous);
    let error_rate = report.stats.error_rate();

    let (ready, scaling) = if report.nodes == 0 {
        (
            Condition::at(
                conditions::READY,
                ConditionStatus::False,
                "NoKwokNodes",
                "No KWOK nodes found matching selector",
                now,
            ),
            Condition::at(
                conditions::SCALING,
                ConditionStatus::False,
                "NoScaling",
                "No scaling activities due to zero KWOK nodes",
                now,
            ),
        )
    } else {
        (
            Condition::at(
                conditions::READY,
                ConditionStatus::True,
                "LoadGenerationActive",
                format!(
                    "Successfully generating load for {} KWOK nodes",
                    report.nodes
                ),
                now,
            ),
            Condition::at(
                conditions::SCALING,
                ConditionStatus::True,
                "ResourcesScaling",
                "Resources are scaling with KWOK node count",
                now,
            ),
        )
    };

    let degraded = if error_rate > DEGRADED_ERROR_RATE {
        Condition::at(
            conditions::DEGRADED,
            ConditionStatus::True,
            "HighErrorRate",
            format!("High error rate: {:.1}%", error_rate),
            now,
        )
    } else {
        operating_normally(now)
    };

    ScaleLoadConfigStatus {
        observed_generation: generation,
        kwok_node_count: report.nodes,
        generated_namespaces: report.namespaces,
        total_resources: report.totals.clone(),
        last_reconcile_time: Some(now),
        conditions: vec![
            ready.preserve_transition(prev),
            scaling.preserve_transition(prev),
            degraded.preserve_transition(prev),
        ],
        metrics: metrics(report),
    }
}

/// Status for a disabled config: zero load, Ready=False
pub fn disabled(
    previous: Option<&ScaleLoadConfigStatus>,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> ScaleLoadConfigStatus {
    let prev = previous_conditions(previous);
    ScaleLoadConfigStatus {
        observed_generation: generation,
        kwok_node_count: 0,
        generated_namespaces: 0,
        total_resources: ResourceCounts::default(),
        last_reconcile_time: Some(now),
        conditions: vec![
            Condition::at(
                conditions::READY,
                ConditionStatus::False,
                "LoadGenerationDisabled",
                "Load generation is disabled",
                now,
            )
            .preserve_transition(prev),
            Condition::at(
                conditions::SCALING,
                ConditionStatus::False,
                "LoadGenerationDisabled",
                "Load generation is disabled",
                now,
            )
            .preserve_transition(prev),
            operating_normally(now).preserve_transition(prev),
        ],
        metrics: previous.map(|s| s.metrics.clone()).unwrap_or_default(),
    }
}

fn operating_normally(now: DateTime<Utc>) -> Condition {
    Condition::at(
        conditions::DEGRADED,
        ConditionStatus::False,
        "OperatingNormally",
        "Load generation is operating normally",
        now,
    )
}
