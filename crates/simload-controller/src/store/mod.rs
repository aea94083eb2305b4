//! Object-store seam
//!
//! The load engine talks to the cluster only through [`ObjectStore`]: typed
//! get/list/create/update/delete over [`DynamicObject`]s, with not-found,
//! already-exists and conflict surfaced as distinct [`StoreError`] variants.
//! [`KubeObjectStore`] is the API server implementation; [`TrackedStore`]
//! wraps any store and tallies calls for status reporting.

mod kubernetes;

#[cfg(test)]
pub mod fake;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use serde::Serialize;

use simload_common::{Error, StoreError};

pub use kubernetes::KubeObjectStore;

/// Kinds the load engine reads or writes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// core/v1 Namespace
    Namespace,
    /// core/v1 Node
    Node,
    /// core/v1 ConfigMap
    ConfigMap,
    /// core/v1 Secret
    Secret,
    /// core/v1 Service
    Service,
    /// route.openshift.io/v1 Route
    Route,
    /// image.openshift.io/v1 ImageStream
    ImageStream,
    /// build.openshift.io/v1 BuildConfig
    BuildConfig,
    /// core/v1 Event
    Event,
    /// core/v1 ResourceQuota
    ResourceQuota,
}

impl ResourceKind {
    /// Kubernetes kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Node => "Node",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::Service => "Service",
            Self::Route => "Route",
            Self::ImageStream => "ImageStream",
            Self::BuildConfig => "BuildConfig",
            Self::Event => "Event",
            Self::ResourceQuota => "ResourceQuota",
        }
    }

    /// Value of the `resource-type` label for objects of this kind
    pub fn label_value(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Node => "node",
            Self::ConfigMap => "configmap",
            Self::Secret => "secret",
            Self::Service => "service",
            Self::Route => "route",
            Self::ImageStream => "imagestream",
            Self::BuildConfig => "buildconfig",
            Self::Event => "event",
            Self::ResourceQuota => "resourcequota",
        }
    }

    /// Whether objects of this kind live in a namespace
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, Self::Namespace | Self::Node)
    }

    /// API discovery information for dynamic clients
    pub fn api_resource(&self) -> ApiResource {
        let (group, version, plural) = match self {
            Self::Namespace => ("", "v1", "namespaces"),
            Self::Node => ("", "v1", "nodes"),
            Self::ConfigMap => ("", "v1", "configmaps"),
            Self::Secret => ("", "v1", "secrets"),
            Self::Service => ("", "v1", "services"),
            Self::Route => ("route.openshift.io", "v1", "routes"),
            Self::ImageStream => ("image.openshift.io", "v1", "imagestreams"),
            Self::BuildConfig => ("build.openshift.io", "v1", "buildconfigs"),
            Self::Event => ("", "v1", "events"),
            Self::ResourceQuota => ("", "v1", "resourcequotas"),
        };
        let api_version = if group.is_empty() {
            version.to_string()
        } else {
            format!("{}/{}", group, version)
        };
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version,
            kind: self.kind().to_string(),
            plural: plural.to_string(),
        }
    }
}

/// Object-store verbs, used for metrics and fault injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verb {
    /// Read one object
    Get,
    /// Read a filtered set of objects
    List,
    /// Create an object
    Create,
    /// Replace an object
    Update,
    /// Delete an object
    Delete,
}

impl Verb {
    /// Lowercase verb name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Whether the verb writes to the store
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

/// Generic object store with optimistic concurrency
///
/// `update` must fail with [`StoreError::Conflict`] when the object's
/// `resourceVersion` is stale.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError>;

    /// List objects whose labels match every pair in `selector`.
    /// A `None` namespace lists across all namespaces.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    /// Create `object` in the namespace named by its metadata
    async fn create(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Replace `object`, checking its `resourceVersion`
    async fn update(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// Delete an object, optionally with a grace period in seconds
    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        grace_period: Option<u32>,
    ) -> Result<(), StoreError>;
}

/// Convert a typed object into the dynamic form the store accepts
pub fn to_dynamic<T: Serialize>(kind: ResourceKind, object: &T) -> Result<DynamicObject, Error> {
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(|e| Error::serialization_for_kind(kind.kind(), e.to_string()))
}

/// Counts of store calls made through a [`TrackedStore`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Every call, reads included
    pub api_calls: u64,
    /// Mutating calls
    pub attempted: u64,
    /// Mutating calls that failed
    pub failed: u64,
    /// Successful creates
    pub created: u64,
    /// Successful updates
    pub updated: u64,
    /// Successful deletes
    pub deleted: u64,
}

impl StatsSnapshot {
    /// Percentage of mutating calls that failed, 0 when none were attempted
    pub fn error_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.failed as f64 / self.attempted as f64 * 100.0
        }
    }
}

#[derive(Default)]
struct OperationStats {
    api_calls: AtomicU64,
    attempted: AtomicU64,
    failed: AtomicU64,
    created: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
}

/// Store wrapper that tallies every call it forwards
///
/// One is created per tick so the counts describe that tick only.
pub struct TrackedStore {
    inner: Arc<dyn ObjectStore>,
    stats: OperationStats,
}

impl TrackedStore {
    /// Wrap `inner` with fresh counters
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            stats: OperationStats::default(),
        }
    }

    /// Current counts
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            api_calls: self.stats.api_calls.load(Ordering::Relaxed),
            attempted: self.stats.attempted.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            created: self.stats.created.load(Ordering::Relaxed),
            updated: self.stats.updated.load(Ordering::Relaxed),
            deleted: self.stats.deleted.load(Ordering::Relaxed),
        }
    }

    fn tally<T>(&self, verb: Verb, result: &Result<T, StoreError>) {
        self.stats.api_calls.fetch_add(1, Ordering::Relaxed);
        if !verb.is_mutating() {
            return;
        }
        self.stats.attempted.fetch_add(1, Ordering::Relaxed);
        let counter = match (verb, result) {
            (_, Err(e)) if is_expected_race(verb, e) => return,
            (_, Err(_)) => &self.stats.failed,
            (Verb::Create, Ok(_)) => &self.stats.created,
            (Verb::Update, Ok(_)) => &self.stats.updated,
            (_, Ok(_)) => &self.stats.deleted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Callers treat these as success, so they do not count toward the error rate
fn is_expected_race(verb: Verb, error: &StoreError) -> bool {
    match verb {
        Verb::Create => error.is_already_exists(),
        Verb::Delete => error.is_not_found(),
        _ => false,
    }
}

#[async_trait]
impl ObjectStore for TrackedStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError> {
        let result = self.inner.get(kind, namespace, name).await;
        self.tally(Verb::Get, &result);
        result
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let result = self.inner.list(kind, namespace, selector).await;
        self.tally(Verb::List, &result);
        result
    }

    async fn create(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let result = self.inner.create(kind, object).await;
        self.tally(Verb::Create, &result);
        result
    }

    async fn update(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let result = self.inner.update(kind, object).await;
        self.tally(Verb::Update, &result);
        result
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        grace_period: Option<u32>,
    ) -> Result<(), StoreError> {
        let result = self.inner.delete(kind, namespace, name, grace_period).await;
        self.tally(Verb::Delete, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::fake::MemoryStore;
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str) -> DynamicObject {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        to_dynamic(ResourceKind::ConfigMap, &cm).unwrap()
    }

    #[test]
    fn openshift_kinds_use_their_api_groups() {
        let route = ResourceKind::Route.api_resource();
        assert_eq!(route.api_version, "route.openshift.io/v1");
        assert_eq!(route.plural, "routes");

        let cm = ResourceKind::ConfigMap.api_resource();
        assert_eq!(cm.api_version, "v1");
        assert_eq!(cm.group, "");
    }

    #[test]
    fn only_namespaces_and_nodes_are_cluster_scoped() {
        assert!(!ResourceKind::Namespace.is_namespaced());
        assert!(!ResourceKind::Node.is_namespaced());
        assert!(ResourceKind::Route.is_namespaced());
        assert!(ResourceKind::Event.is_namespaced());
    }

    #[test]
    fn to_dynamic_keeps_type_meta_and_data() {
        let obj = config_map("a");
        let types = obj.types.as_ref().unwrap();
        assert_eq!(types.kind, "ConfigMap");
        assert_eq!(types.api_version, "v1");
        assert_eq!(obj.metadata.name.as_deref(), Some("a"));
    }

    #[test]
    fn error_rate_is_zero_without_writes() {
        assert_eq!(StatsSnapshot::default().error_rate(), 0.0);
        let stats = StatsSnapshot {
            attempted: 4,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(stats.error_rate(), 25.0);
    }

    #[tokio::test]
    async fn tracked_store_tallies_reads_writes_and_failures() {
        let inner = Arc::new(MemoryStore::new());
        let store = TrackedStore::new(inner.clone());

        store
            .create(ResourceKind::ConfigMap, &config_map("a"))
            .await
            .unwrap();
        let dup = store.create(ResourceKind::ConfigMap, &config_map("a")).await;
        assert!(dup.unwrap_err().is_already_exists());
        store
            .list(ResourceKind::ConfigMap, Some("ns"), &BTreeMap::new())
            .await
            .unwrap();
        store
            .delete(ResourceKind::ConfigMap, Some("ns"), "a", None)
            .await
            .unwrap();

        inner.fail(
            Verb::Update,
            ResourceKind::ConfigMap,
            1,
            StoreError::api("update", "ConfigMap", "boom", Some(500)),
        );
        let update = store.update(ResourceKind::ConfigMap, &config_map("a")).await;
        assert!(update.is_err());

        let stats = store.snapshot();
        assert_eq!(stats.api_calls, 5);
        assert_eq!(stats.attempted, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.updated, 0);
    }

    #[tokio::test]
    async fn swallowed_races_do_not_raise_the_error_rate() {
        let inner = Arc::new(MemoryStore::new());
        let store = TrackedStore::new(inner.clone());

        store
            .create(ResourceKind::ConfigMap, &config_map("a"))
            .await
            .unwrap();
        let dup = store.create(ResourceKind::ConfigMap, &config_map("a")).await;
        assert!(dup.unwrap_err().is_already_exists());
        let gone = store
            .delete(ResourceKind::ConfigMap, Some("ns"), "missing", None)
            .await;
        assert!(gone.unwrap_err().is_not_found());

        let stats = store.snapshot();
        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.error_rate(), 0.0);
    }
}
