//! Rate-based Event generation
//!
//! Events are not converged to a count. Each tick creates
//! `floor(rate × hours since last tick)` of them per namespace, at most
//! [`MAX_EVENTS_PER_TICK`], and failed creates are not retried.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{DynamicObject, ObjectMeta};

use simload_common::crd::EventTypeConfig;
use simload_common::labels::{managed_of_type, CREATED_BY_LABEL};
use simload_common::{Result, CREATED_BY};

use crate::random::RandomSource;
use crate::store::{to_dynamic, ResourceKind};

/// Upper bound on events created in one namespace per tick
pub const MAX_EVENTS_PER_TICK: u32 = 10;

/// Built-in weighted event table
pub fn default_table() -> Vec<EventTypeConfig> {
    let entry = |type_: &str, reason: &str, message: &str, weight: i32| EventTypeConfig {
        type_: type_.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        weight,
    };
    vec![
        entry("Normal", "Started", "Container started successfully", 30),
        entry("Normal", "Created", "Created container %s", 25),
        entry("Normal", "Pulled", "Successfully pulled image", 20),
        entry("Warning", "FailedMount", "Unable to mount volumes", 10),
        entry("Warning", "FailedScheduling", "Pod scheduling failed", 8),
        entry("Normal", "Scheduled", "Successfully assigned pod", 7),
    ]
}

/// Hours assumed before the first tick
const FIRST_TICK_HOURS: f64 = 1.0 / 60.0;

/// Events due for a namespace given the hours since the last tick.
/// Before the first tick one minute is assumed.
pub fn events_due(rate_per_hour: u32, hours: Option<f64>) -> u32 {
    let hours = match hours {
        Some(h) if h.is_finite() && h >= 0.0 => h,
        _ => FIRST_TICK_HOURS,
    };
    let due = (f64::from(rate_per_hour) * hours).floor();
    due.min(f64::from(MAX_EVENTS_PER_TICK)) as u32
}

/// Pick a template by weight. Non-positive weights never win; a table
/// without any positive weight falls back to [`default_table`].
pub fn pick(configured: &[EventTypeConfig], rng: &mut dyn RandomSource) -> EventTypeConfig {
    let weighted: Vec<&EventTypeConfig> = configured.iter().filter(|e| e.weight > 0).collect();
    if weighted.is_empty() {
        let defaults = default_table();
        let refs: Vec<&EventTypeConfig> = defaults.iter().collect();
        return choose(&refs, rng).clone();
    }
    choose(&weighted, rng).clone()
}

fn choose<'a>(table: &[&'a EventTypeConfig], rng: &mut dyn RandomSource) -> &'a EventTypeConfig {
    let total: u64 = table.iter().map(|e| e.weight as u64).sum();
    let mut roll = rng.below(total);
    for entry in table {
        let weight = entry.weight as u64;
        if roll < weight {
            return entry;
        }
        roll -= weight;
    }
    table[table.len() - 1]
}

/// Event `index` in `namespace`, about a synthetic pod
pub fn build(
    config_name: &str,
    namespace: &str,
    index: u32,
    template: &EventTypeConfig,
    now: DateTime<Utc>,
) -> Result<DynamicObject> {
    let mut labels = managed_of_type(config_name, ResourceKind::Event.label_value());
    labels.insert(CREATED_BY_LABEL.to_string(), CREATED_BY.to_string());

    let event = Event {
        metadata: ObjectMeta {
            name: Some(format!("load-event-{}-{}", index, now.timestamp())),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        involved_object: ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Pod".to_string()),
            name: Some(format!("load-pod-{}", index)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some(template.type_.clone()),
        reason: Some(template.reason.clone()),
        message: Some(template.message.replace("%s", &format!("container-{}", index))),
        source: Some(EventSource {
            component: Some(CREATED_BY.to_string()),
            ..Default::default()
        }),
        count: Some(1),
        first_timestamp: Some(Time(now)),
        last_timestamp: Some(Time(now)),
        ..Default::default()
    };
    to_dynamic(ResourceKind::Event, &event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{ScriptedRandom, SeededRandom};
    use chrono::TimeZone;

    #[test]
    fn due_events_follow_floor_and_cap() {
        assert_eq!(events_due(50, Some(1.0 / 60.0)), 0);
        assert_eq!(events_due(20, Some(0.5)), 10);
        assert_eq!(events_due(10, Some(0.5)), 5);
        assert_eq!(events_due(9, Some(0.5)), 4);
        assert_eq!(events_due(50, Some(10.0)), MAX_EVENTS_PER_TICK);
        assert_eq!(events_due(50, None), 0);
        assert_eq!(events_due(300, None), 5);
        assert_eq!(events_due(6000, None), MAX_EVENTS_PER_TICK);
    }

    #[test]
    fn default_table_weights_sum_to_one_hundred() {
        let total: i32 = default_table().iter().map(|e| e.weight).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn zero_weight_entries_never_win() {
        let table = vec![
            EventTypeConfig {
                type_: "Normal".to_string(),
                reason: "Never".to_string(),
                message: "m".to_string(),
                weight: 0,
            },
            EventTypeConfig {
                type_: "Warning".to_string(),
                reason: "Always".to_string(),
                message: "m".to_string(),
                weight: 3,
            },
        ];
        let mut rng = SeededRandom::from_seed(9);
        for _ in 0..50 {
            assert_eq!(pick(&table, &mut rng).reason, "Always");
        }
    }

    #[test]
    fn table_without_positive_weights_uses_defaults() {
        let table = vec![EventTypeConfig {
            type_: "Normal".to_string(),
            reason: "Negative".to_string(),
            message: "m".to_string(),
            weight: -4,
        }];
        let mut rng = ScriptedRandom::new(0.5);
        let reasons: Vec<String> = default_table().into_iter().map(|e| e.reason).collect();
        assert!(reasons.contains(&pick(&table, &mut rng).reason));
    }

    #[test]
    fn event_message_names_the_container() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let template = &default_table()[1];
        let obj = build("load", "ns-1", 3, template, now).unwrap();
        assert_eq!(
            obj.metadata.name.as_deref(),
            Some(format!("load-event-3-{}", now.timestamp()).as_str())
        );
        assert_eq!(obj.data["message"], "Created container container-3");
        assert_eq!(obj.data["involvedObject"]["name"], "load-pod-3");
        assert_eq!(obj.data["source"]["component"], "sim-operator");
        assert_eq!(obj.data["count"], 1);
    }
}
