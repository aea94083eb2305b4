//! In-memory state for one ScaleLoadConfig
//!
//! Held for the life of the process and rebuilt from scratch after a
//! restart. Nothing here is needed for correctness: targets are always
//! recomputed from the object store.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use simload_common::crd::ResourceCounts;

use crate::namespaces::ManagedNamespace;
use crate::random::RandomSource;
use crate::rate_budget::RateBudget;

/// What the engine last saw in one generated namespace
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamespaceRuntime {
    /// Node recorded in the `associated-node` label
    pub associated_node: String,
    /// Objects per kind after the last pass
    pub counts: ResourceCounts,
    /// Events created in this namespace since it was first seen
    pub events_generated: u32,
    /// End of the last churn pass over this namespace
    pub last_update: Option<DateTime<Utc>>,
}

/// Runtime state for one config
pub struct RuntimeState {
    /// API call budget for the current window
    pub budget: RateBudget,
    /// Completion time of the last Active tick
    pub last_reconcile: Option<DateTime<Utc>>,
    /// Earliest time the next tick may run for an unchanged generation
    pub next_tick_at: Option<DateTime<Utc>>,
    /// `metadata.generation` seen by the last tick
    pub observed_generation: Option<i64>,
    /// Generated namespaces by name
    pub namespaces: BTreeMap<String, NamespaceRuntime>,
    /// Completed Active ticks
    pub reconcile_count: u64,
    /// Summed duration of completed Active ticks
    pub total_reconcile_ms: f64,
    /// Random source for this config
    pub rng: Box<dyn RandomSource>,
}

impl RuntimeState {
    /// Fresh state
    pub fn new(rng: Box<dyn RandomSource>) -> Self {
        Self {
            budget: RateBudget::default(),
            last_reconcile: None,
            next_tick_at: None,
            observed_generation: None,
            namespaces: BTreeMap::new(),
            reconcile_count: 0,
            total_reconcile_ms: 0.0,
            rng,
        }
    }

    /// Time left before a tick is due, or None when one should run now.
    /// A generation change is always due.
    pub fn wait_remaining(
        &self,
        now: DateTime<Utc>,
        generation: Option<i64>,
    ) -> Option<std::time::Duration> {
        if generation != self.observed_generation {
            return None;
        }
        let next = self.next_tick_at?;
        (next - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Hours since the last Active tick, None before the first
    pub fn hours_since_last(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_reconcile
            .map(|last| (now - last).num_milliseconds().max(0) as f64 / 3_600_000.0)
    }

    /// Minutes since the last Active tick, 1 before the first
    pub fn minutes_since_last(&self, now: DateTime<Utc>) -> f64 {
        match self.last_reconcile {
            Some(last) => {
                let minutes = (now - last).num_milliseconds() as f64 / 60_000.0;
                if minutes > 0.0 {
                    minutes
                } else {
                    1.0
                }
            }
            None => 1.0,
        }
    }

    /// Track exactly the namespaces in `live`, keeping what is known about
    /// the ones that survive
    pub fn sync_namespaces(&mut self, live: &[ManagedNamespace]) {
        self.namespaces
            .retain(|name, _| live.iter().any(|ns| &ns.name == name));
        for ns in live {
            self.namespaces
                .entry(ns.name.clone())
                .or_insert_with(|| NamespaceRuntime {
                    associated_node: ns.associated_node.clone(),
                    ..Default::default()
                });
        }
    }

    /// Sum of per-namespace object counts
    pub fn totals(&self) -> ResourceCounts {
        self.namespaces
            .values()
            .fold(ResourceCounts::default(), |mut acc, ns| {
                acc.config_maps += ns.counts.config_maps;
                acc.secrets += ns.counts.secrets;
                acc.routes += ns.counts.routes;
                acc.image_streams += ns.counts.image_streams;
                acc.build_configs += ns.counts.build_configs;
                acc.events += ns.events_generated;
                acc
            })
    }

    /// Record one finished Active tick and return the running mean duration
    pub fn record_tick(
        &mut self,
        now: DateTime<Utc>,
        generation: Option<i64>,
        interval: std::time::Duration,
        elapsed_ms: f64,
    ) -> f64 {
        self.reconcile_count += 1;
        self.total_reconcile_ms += elapsed_ms;
        self.last_reconcile = Some(now);
        self.defer(now, generation, interval);
        self.total_reconcile_ms / self.reconcile_count as f64
    }

    /// Hold off further ticks for `interval` unless the generation changes
    pub fn defer(&mut self, now: DateTime<Utc>, generation: Option<i64>, interval: std::time::Duration) {
        self.observed_generation = generation;
        self.next_tick_at = Duration::from_std(interval).ok().map(|d| now + d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::ScriptedRandom;
    use chrono::TimeZone;

    fn state() -> RuntimeState {
        RuntimeState::new(Box::new(ScriptedRandom::new(0.99)))
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn ns(name: &str, node: &str) -> ManagedNamespace {
        ManagedNamespace {
            name: name.to_string(),
            index: Some(0),
            associated_node: node.to_string(),
            created: None,
            terminating: false,
        }
    }

    #[test]
    fn fresh_state_is_always_due() {
        assert!(state().wait_remaining(t0(), Some(1)).is_none());
    }

    #[test]
    fn deferred_tick_waits_unless_generation_changes() {
        let mut s = state();
        s.record_tick(t0(), Some(1), std::time::Duration::from_secs(60), 5.0);

        let wait = s.wait_remaining(t0() + Duration::seconds(20), Some(1));
        assert_eq!(wait, Some(std::time::Duration::from_secs(40)));
        assert!(s.wait_remaining(t0() + Duration::seconds(60), Some(1)).is_none());
        assert!(s.wait_remaining(t0() + Duration::seconds(20), Some(2)).is_none());
    }

    #[test]
    fn running_mean_of_tick_durations() {
        let mut s = state();
        let interval = std::time::Duration::from_secs(60);
        assert_eq!(s.record_tick(t0(), Some(1), interval, 10.0), 10.0);
        assert_eq!(s.record_tick(t0(), Some(1), interval, 30.0), 20.0);
        assert_eq!(s.reconcile_count, 2);
    }

    #[test]
    fn elapsed_time_helpers() {
        let mut s = state();
        assert_eq!(s.minutes_since_last(t0()), 1.0);
        assert!(s.hours_since_last(t0()).is_none());

        s.last_reconcile = Some(t0());
        assert_eq!(s.minutes_since_last(t0() + Duration::seconds(90)), 1.5);
        assert_eq!(s.hours_since_last(t0() + Duration::minutes(30)), Some(0.5));
    }

    #[test]
    fn sync_drops_vanished_namespaces_and_keeps_counts() {
        let mut s = state();
        s.sync_namespaces(&[ns("a", "n1"), ns("b", "n2")]);
        s.namespaces.get_mut("a").unwrap().counts.config_maps = 3;

        s.sync_namespaces(&[ns("a", "n1"), ns("c", "n3")]);
        assert_eq!(
            s.namespaces.keys().cloned().collect::<Vec<_>>(),
            vec!["a", "c"]
        );
        assert_eq!(s.namespaces["a"].counts.config_maps, 3);
        assert_eq!(s.namespaces["c"].associated_node, "n3");
        assert_eq!(s.totals().config_maps, 3);
    }
}
