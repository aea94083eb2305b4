//! Node annotation churn
//!
//! Simulates the annotation traffic OVN-Kubernetes, the machine-config
//! daemon and cloud integrations generate on real nodes. Each node is
//! updated on its own random schedule, read from the
//! `last-annotation-update` sentinel. Writes are read-modify-write with a
//! bounded retry on conflicts.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use kube::api::DynamicObject;
use tracing::{debug, info, warn};

use simload_common::crd::AnnotationChurnConfig;
use simload_common::labels::{
    LAST_ANNOTATION_UPDATE, LAST_SEEN_ANNOTATION, LOAD_GENERATOR_MANAGED_ANNOTATION,
    MACHINE_CONFIG_ITERATION_ANNOTATION, NETWORKING_ITERATION_ANNOTATION,
    PLATFORM_ITERATION_ANNOTATION,
};
use simload_common::retry::{retry_with_backoff_if, RetryConfig};
use simload_common::StoreError;

use crate::random::RandomSource;
use crate::store::{ObjectStore, ResourceKind};

/// Exclusive upper bound of the group iteration counters
pub const ITERATION_RANGE: u64 = 10_000;

/// Annotation families, toggled and counted separately
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AnnotationGroup {
    /// `k8s.ovn.org/*`
    Networking,
    /// `machineconfiguration.openshift.io/*`
    MachineConfig,
    /// Cloud network, CSI and machine-api annotations
    Platform,
}

impl AnnotationGroup {
    fn iteration_key(&self) -> &'static str {
        match self {
            Self::Networking => NETWORKING_ITERATION_ANNOTATION,
            Self::MachineConfig => MACHINE_CONFIG_ITERATION_ANNOTATION,
            Self::Platform => PLATFORM_ITERATION_ANNOTATION,
        }
    }

    fn enabled(&self, config: &AnnotationChurnConfig) -> bool {
        match self {
            Self::Networking => config.networking_annotations,
            Self::MachineConfig => config.machine_config_annotations,
            Self::Platform => true,
        }
    }
}

/// One churned annotation key
pub struct AnnotationSpec {
    /// Annotation key
    pub key: &'static str,
    /// Family it belongs to
    pub group: AnnotationGroup,
    /// Chance the key changes when its node is updated
    pub probability: f64,
    /// Value generator, given the node name
    pub generate: fn(&str, &mut dyn RandomSource) -> String,
}

const fn spec(
    key: &'static str,
    group: AnnotationGroup,
    probability: f64,
    generate: fn(&str, &mut dyn RandomSource) -> String,
) -> AnnotationSpec {
    AnnotationSpec {
        key,
        group,
        probability,
        generate,
    }
}

use AnnotationGroup::{MachineConfig, Networking, Platform};

/// Every churned annotation, evaluated in order
pub static ANNOTATIONS: &[AnnotationSpec] = &[
    spec("k8s.ovn.org/host-cidrs", Networking, 0.3, |_, r| {
        format!("[\"{}/19\"]", node_ip(r))
    }),
    spec("k8s.ovn.org/l3-gateway-config", Networking, 0.3, |node, r| {
        let ip = node_ip(r);
        serde_json::json!({
            "default": {
                "mode": "shared",
                "bridge-id": "br-ex",
                "interface-id": format!("br-ex_{}", node),
                "mac-address": mac(r),
                "ip-addresses": [format!("{}/19", ip)],
                "ip-address": format!("{}/19", ip),
                "next-hops": ["10.0.0.1"],
                "next-hop": "10.0.0.1",
                "node-port-enable": "true",
                "vlan-id": "0"
            }
        })
        .to_string()
    }),
    spec("k8s.ovn.org/node-chassis-id", Networking, 0.3, |_, r| uuid(r)),
    spec("k8s.ovn.org/node-encap-ips", Networking, 0.3, |_, r| {
        format!("[\"{}\"]", node_ip(r))
    }),
    spec("k8s.ovn.org/node-primary-ifaddr", Networking, 0.3, |_, r| {
        format!("{{\"ipv4\":\"{}/19\"}}", node_ip(r))
    }),
    spec("k8s.ovn.org/node-subnets", Networking, 0.3, |_, r| {
        format!(
            "{{\"default\":[\"10.{}.{}.0/23\"]}}",
            128 + r.below(128),
            r.below(256) & 0xFE
        )
    }),
    spec(
        "k8s.ovn.org/node-transit-switch-port-ifaddr",
        Networking,
        0.3,
        |_, r| format!("{{\"ipv4\":\"100.88.0.{}/16\"}}", r.range(1, 255)),
    ),
    spec("k8s.ovn.org/zone-name", Networking, 0.3, |node, _| node.to_string()),
    spec("k8s.ovn.org/remote-zone-migrated", Networking, 0.3, |node, _| {
        node.to_string()
    }),
    spec("k8s.ovn.org/layer2-topology-version", Networking, 0.3, |_, r| {
        ["2.0", "2.1", "2.2"][r.below(3) as usize].to_string()
    }),
    spec(
        "machineconfiguration.openshift.io/currentConfig",
        MachineConfig,
        0.4,
        |_, r| rendered_config(r),
    ),
    spec(
        "machineconfiguration.openshift.io/desiredConfig",
        MachineConfig,
        0.4,
        |_, r| rendered_config(r),
    ),
    spec(
        "machineconfiguration.openshift.io/desiredDrain",
        MachineConfig,
        0.4,
        |_, r| format!("uncordon-{}", rendered_config(r)),
    ),
    spec(
        "machineconfiguration.openshift.io/lastAppliedDrain",
        MachineConfig,
        0.4,
        |_, r| format!("uncordon-{}", rendered_config(r)),
    ),
    spec(
        "machineconfiguration.openshift.io/state",
        MachineConfig,
        0.4,
        |_, r| ["Done", "Working", "Degraded"][r.below(3) as usize].to_string(),
    ),
    spec(
        "machineconfiguration.openshift.io/reason",
        MachineConfig,
        0.4,
        |_, r| {
            if r.chance(0.8) {
                String::new()
            } else {
                ["Updating", "Rebooting", "ConfigChange"][r.below(3) as usize].to_string()
            }
        },
    ),
    spec(
        "machineconfiguration.openshift.io/lastSyncedControllerConfigResourceVersion",
        MachineConfig,
        0.4,
        |_, r| (2_900_000 + r.below(100_000)).to_string(),
    ),
    spec(
        "machineconfiguration.openshift.io/controlPlaneTopology",
        MachineConfig,
        0.4,
        |_, _| "HighlyAvailable".to_string(),
    ),
    spec(
        "machineconfiguration.openshift.io/lastObservedServerCAAnnotation",
        MachineConfig,
        0.4,
        |_, _| "false".to_string(),
    ),
    spec(
        "machineconfiguration.openshift.io/post-config-action",
        MachineConfig,
        0.4,
        |_, _| String::new(),
    ),
    spec("cloud.network.openshift.io/egress-ipconfig", Platform, 0.2, |_, r| {
        serde_json::json!([{
            "interface": format!("eni-{:012x}", r.below(1 << 48)),
            "ifaddr": { "ipv4": format!("{}/19", node_ip(r)) },
            "capacity": { "ipv4": r.range(10, 30), "ipv6": r.range(10, 30) }
        }])
        .to_string()
    }),
    spec("csi.volume.kubernetes.io/nodeid", Platform, 0.1, |_, r| {
        format!("{{\"ebs.csi.aws.com\":\"i-{:016x}\"}}", r.below(u64::MAX))
    }),
    spec("machine.openshift.io/machine", Platform, 0.05, |node, r| {
        let tail_start = node.len().saturating_sub(6);
        format!(
            "openshift-machine-api/ci-op-{}-worker-us-west-2a-{}",
            r.alnum(6),
            node.get(tail_start..).unwrap_or(node)
        )
    }),
];

fn node_ip(r: &mut dyn RandomSource) -> String {
    format!("10.0.{}.{}", r.below(32), r.range(1, 255))
}

fn mac(r: &mut dyn RandomSource) -> String {
    let bytes = r.bytes(6);
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn uuid(r: &mut dyn RandomSource) -> String {
    let b = r.bytes(16);
    let hex = |range: std::ops::Range<usize>| {
        b[range].iter().map(|x| format!("{:02x}", x)).collect::<String>()
    };
    format!(
        "{}-{}-{}-{}-{}",
        hex(0..4),
        hex(4..6),
        hex(6..8),
        hex(8..10),
        hex(10..16)
    )
}

fn rendered_config(r: &mut dyn RandomSource) -> String {
    format!("rendered-worker-{}", r.alnum(32))
}

/// Whether a node with these annotations is due for an update.
///
/// A missing or unparsable sentinel is always due. Otherwise the node is
/// due once the time since the sentinel exceeds a threshold drawn
/// uniformly from `[min, max]` seconds.
pub fn is_due(
    annotations: &BTreeMap<String, String>,
    config: &AnnotationChurnConfig,
    rng: &mut dyn RandomSource,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = annotations
        .get(LAST_ANNOTATION_UPDATE)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
    else {
        return true;
    };
    let min = u64::from(config.update_interval_min);
    let max = u64::from(config.update_interval_max).max(min);
    let threshold = rng.range(min, max + 1);
    let elapsed = (now - last.with_timezone(&Utc)).num_seconds();
    elapsed > threshold as i64
}

/// Annotations to write on `node` for one update.
///
/// `last-seen` and `load-generator-managed` are always included. A group
/// with at least one changed key also stamps its iteration counter and the
/// shared sentinel.
pub fn plan_diff(
    node: &str,
    config: &AnnotationChurnConfig,
    rng: &mut dyn RandomSource,
    now: DateTime<Utc>,
) -> BTreeMap<String, String> {
    let mut diff = BTreeMap::new();
    let mut changed = BTreeSet::new();

    for spec in ANNOTATIONS.iter().filter(|s| s.group.enabled(config)) {
        if rng.chance(spec.probability) {
            diff.insert(spec.key.to_string(), (spec.generate)(node, rng));
            changed.insert(spec.group);
        }
    }

    let stamp = now.to_rfc3339();
    diff.insert(LOAD_GENERATOR_MANAGED_ANNOTATION.to_string(), "true".to_string());
    diff.insert(LAST_SEEN_ANNOTATION.to_string(), stamp.clone());
    if !changed.is_empty() {
        diff.insert(LAST_ANNOTATION_UPDATE.to_string(), stamp);
        for group in changed {
            diff.insert(
                group.iteration_key().to_string(),
                rng.below(ITERATION_RANGE).to_string(),
            );
        }
    }
    diff
}

/// Result of one annotation pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnnotationOutcome {
    /// Nodes written
    pub updated: u32,
    /// Nodes not yet due
    pub skipped: u32,
    /// Nodes whose write failed after retries
    pub failed: Vec<String>,
}

/// Applies annotation churn across nodes
pub struct AnnotationChurner<'a> {
    store: &'a dyn ObjectStore,
    config: &'a AnnotationChurnConfig,
    retry: &'a RetryConfig,
}

impl<'a> AnnotationChurner<'a> {
    /// Churner writing through `store`, retrying conflicts per `retry`
    pub fn new(
        store: &'a dyn ObjectStore,
        config: &'a AnnotationChurnConfig,
        retry: &'a RetryConfig,
    ) -> Self {
        Self {
            store,
            config,
            retry,
        }
    }

    /// Update every due node. A node that fails is logged and skipped.
    pub async fn run(
        &self,
        nodes: &[DynamicObject],
        rng: &mut dyn RandomSource,
        now: DateTime<Utc>,
    ) -> AnnotationOutcome {
        let mut outcome = AnnotationOutcome::default();
        let empty = BTreeMap::new();

        for node in nodes {
            let Some(name) = node.metadata.name.as_deref() else {
                continue;
            };
            let annotations = node.metadata.annotations.as_ref().unwrap_or(&empty);
            if !is_due(annotations, self.config, rng, now) {
                outcome.skipped += 1;
                continue;
            }

            let diff = plan_diff(name, self.config, rng, now);
            match self.apply(name, &diff).await {
                Ok(()) => outcome.updated += 1,
                Err(e) => {
                    warn!(node = %name, error = %e, "Failed to update node annotations");
                    outcome.failed.push(name.to_string());
                }
            }
        }

        if outcome.updated > 0 || !outcome.failed.is_empty() {
            info!(
                updated = outcome.updated,
                skipped = outcome.skipped,
                failed = outcome.failed.len(),
                "Node annotation churn complete"
            );
        }
        outcome
    }

    /// Merge `diff` onto the latest version of `node`, retrying conflicts
    pub async fn apply(
        &self,
        node: &str,
        diff: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        retry_with_backoff_if(
            self.retry,
            "annotate_node",
            || self.write(node, diff),
            StoreError::is_conflict,
        )
        .await
    }

    async fn write(&self, node: &str, diff: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let mut latest = self.store.get(ResourceKind::Node, None, node).await?;
        latest
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .extend(diff.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.store.update(ResourceKind::Node, &latest).await?;
        debug!(node = %node, keys = diff.len(), "Updated node annotations");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{ScriptedRandom, SeededRandom};
    use crate::store::fake::MemoryStore;
    use crate::store::Verb;
    use chrono::{Duration, TimeZone};
    use std::time::Duration as StdDuration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            initial_delay: StdDuration::from_millis(1),
            max_delay: StdDuration::from_millis(4),
            ..RetryConfig::conflict()
        }
    }

    fn conflict() -> StoreError {
        StoreError::conflict("Node", "kwok-0", "stale resourceVersion")
    }

    fn stamped(at: DateTime<Utc>) -> BTreeMap<String, String> {
        BTreeMap::from([(LAST_ANNOTATION_UPDATE.to_string(), at.to_rfc3339())])
    }

    #[test]
    fn table_probabilities_match_groups() {
        for spec in ANNOTATIONS {
            match spec.group {
                Networking => assert_eq!(spec.probability, 0.3, "{}", spec.key),
                MachineConfig => assert_eq!(spec.probability, 0.4, "{}", spec.key),
                Platform => assert!((0.05..=0.2).contains(&spec.probability), "{}", spec.key),
            }
        }
        assert_eq!(ANNOTATIONS.iter().filter(|s| s.group == Networking).count(), 10);
        assert_eq!(ANNOTATIONS.iter().filter(|s| s.group == Platform).count(), 3);
    }

    #[test]
    fn missing_or_garbled_sentinel_is_due() {
        let config = AnnotationChurnConfig::default();
        let mut rng = SeededRandom::from_seed(3);
        assert!(is_due(&BTreeMap::new(), &config, &mut rng, t0()));
        let garbled =
            BTreeMap::from([(LAST_ANNOTATION_UPDATE.to_string(), "yesterday".to_string())]);
        assert!(is_due(&garbled, &config, &mut rng, t0()));
    }

    #[test]
    fn due_only_within_the_random_window() {
        let config = AnnotationChurnConfig::default();
        let mut rng = SeededRandom::from_seed(3);
        for _ in 0..50 {
            assert!(!is_due(&stamped(t0()), &config, &mut rng, t0() + Duration::seconds(59)));
            assert!(is_due(&stamped(t0()), &config, &mut rng, t0() + Duration::seconds(301)));
        }
    }

    #[test]
    fn threshold_must_be_exceeded() {
        let config = AnnotationChurnConfig {
            update_interval_min: 120,
            update_interval_max: 120,
            ..Default::default()
        };
        let mut rng = SeededRandom::from_seed(5);
        assert!(!is_due(&stamped(t0()), &config, &mut rng, t0() + Duration::seconds(120)));
        assert!(is_due(&stamped(t0()), &config, &mut rng, t0() + Duration::seconds(121)));
    }

    #[test]
    fn thresholds_vary_per_roll() {
        let config = AnnotationChurnConfig::default();
        let mut rng = SeededRandom::from_seed(11);
        let at = t0() + Duration::seconds(180);
        let due = (0..200)
            .filter(|_| is_due(&stamped(t0()), &config, &mut rng, at))
            .count();
        assert!(due > 0 && due < 200);
    }

    #[test]
    fn diff_always_refreshes_tracking_annotations() {
        let config = AnnotationChurnConfig::default();
        // Every probability roll fails
        let diff = plan_diff("kwok-0", &config, &mut ScriptedRandom::new(0.99), t0());
        assert_eq!(diff[LOAD_GENERATOR_MANAGED_ANNOTATION], "true");
        assert_eq!(diff[LAST_SEEN_ANNOTATION], t0().to_rfc3339());
        assert!(!diff.contains_key(LAST_ANNOTATION_UPDATE));
        assert!(!diff.contains_key(NETWORKING_ITERATION_ANNOTATION));
    }

    #[test]
    fn changed_groups_stamp_counters_and_sentinel() {
        let config = AnnotationChurnConfig {
            machine_config_annotations: false,
            ..Default::default()
        };
        // Every probability roll passes
        let diff = plan_diff("kwok-node-abcdef", &config, &mut ScriptedRandom::new(0.0), t0());

        assert_eq!(diff[LAST_ANNOTATION_UPDATE], t0().to_rfc3339());
        assert!(diff.contains_key(NETWORKING_ITERATION_ANNOTATION));
        assert!(diff.contains_key(PLATFORM_ITERATION_ANNOTATION));
        assert!(!diff.contains_key(MACHINE_CONFIG_ITERATION_ANNOTATION));
        assert!(!diff.keys().any(|k| k.starts_with("machineconfiguration.openshift.io/")));

        assert_eq!(diff["k8s.ovn.org/zone-name"], "kwok-node-abcdef");
        assert!(diff["machine.openshift.io/machine"].ends_with("-abcdef"));
        let gateway: serde_json::Value =
            serde_json::from_str(&diff["k8s.ovn.org/l3-gateway-config"]).unwrap();
        assert_eq!(gateway["default"]["mode"], "shared");
    }

    #[tokio::test]
    async fn conflicts_then_success_persist_one_update() {
        let store = MemoryStore::new();
        store.seed_node("kwok-0", &[("type", "kwok")], &[]);
        store.fail(Verb::Update, ResourceKind::Node, 4, conflict());

        let config = AnnotationChurnConfig::default();
        let retry = fast_retry();
        let churner = AnnotationChurner::new(&store, &config, &retry);
        let diff = BTreeMap::from([("example.com/key".to_string(), "v".to_string())]);

        churner.apply("kwok-0", &diff).await.unwrap();
        assert_eq!(store.calls(Verb::Update, ResourceKind::Node), 5);
        assert_eq!(store.successes(Verb::Update, ResourceKind::Node), 1);
        assert_eq!(store.calls(Verb::Get, ResourceKind::Node), 5);

        let node = store.object(ResourceKind::Node, None, "kwok-0").unwrap();
        assert_eq!(node.metadata.annotations.unwrap()["example.com/key"], "v");
    }

    #[tokio::test]
    async fn exhausted_conflicts_fail_only_that_node() {
        let store = MemoryStore::new();
        store.seed_node("kwok-0", &[], &[]);
        store.seed_node("kwok-1", &[], &[]);
        store.fail(Verb::Update, ResourceKind::Node, 5, conflict());

        let config = AnnotationChurnConfig::default();
        let retry = fast_retry();
        let churner = AnnotationChurner::new(&store, &config, &retry);
        let nodes = store
            .list(ResourceKind::Node, None, &BTreeMap::new())
            .await
            .unwrap();

        let outcome = churner.run(&nodes, &mut ScriptedRandom::new(0.99), t0()).await;
        assert_eq!(outcome.failed, vec!["kwok-0".to_string()]);
        assert_eq!(outcome.updated, 1);
        assert_eq!(store.successes(Verb::Update, ResourceKind::Node), 1);

        let node = store.object(ResourceKind::Node, None, "kwok-1").unwrap();
        assert!(node.metadata.annotations.unwrap().contains_key(LAST_SEEN_ANNOTATION));
    }

    #[tokio::test]
    async fn non_conflict_errors_are_not_retried() {
        let store = MemoryStore::new();
        store.seed_node("kwok-0", &[], &[]);
        store.fail(
            Verb::Update,
            ResourceKind::Node,
            1,
            StoreError::api("update", "Node", "forbidden", Some(403)),
        );

        let config = AnnotationChurnConfig::default();
        let retry = fast_retry();
        let churner = AnnotationChurner::new(&store, &config, &retry);
        let result = churner.apply("kwok-0", &BTreeMap::new()).await;

        assert!(result.is_err());
        assert_eq!(store.calls(Verb::Update, ResourceKind::Node), 1);
    }

    #[tokio::test]
    async fn recently_updated_nodes_are_skipped() {
        let store = MemoryStore::new();
        let stamp = t0().to_rfc3339();
        store.seed_node("kwok-0", &[], &[(LAST_ANNOTATION_UPDATE, stamp.as_str())]);

        let config = AnnotationChurnConfig::default();
        let retry = fast_retry();
        let churner = AnnotationChurner::new(&store, &config, &retry);
        let nodes = store
            .list(ResourceKind::Node, None, &BTreeMap::new())
            .await
            .unwrap();

        let outcome = churner
            .run(&nodes, &mut SeededRandom::from_seed(1), t0() + Duration::seconds(10))
            .await;
        assert_eq!(outcome.skipped, 1);
        assert_eq!(store.calls(Verb::Update, ResourceKind::Node), 0);
    }
}
