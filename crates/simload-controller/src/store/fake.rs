//! In-memory [`ObjectStore`] for tests
//!
//! Behaves like the API server where the load engine cares: resourceVersion
//! conflicts, already-exists on duplicate create, name-ordered lists,
//! namespace deletion cascading to contents. Failures can be injected per
//! verb and kind.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{DynamicObject, ObjectMeta};
use serde_json::json;

use simload_common::labels::matches;
use simload_common::StoreError;

use super::{ObjectStore, ResourceKind, Verb};

type Key = (ResourceKind, String, String);

struct Injected {
    verb: Verb,
    kind: ResourceKind,
    remaining: u32,
    error: StoreError,
}

struct Inner {
    objects: BTreeMap<Key, DynamicObject>,
    version: u64,
    clock: DateTime<Utc>,
    failures: Vec<Injected>,
    calls: BTreeMap<(Verb, ResourceKind), u32>,
    successes: BTreeMap<(Verb, ResourceKind), u32>,
}

/// Object store held entirely in memory
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store whose creation clock starts at 2024-01-01T00:00:00Z
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: BTreeMap::new(),
                version: 0,
                clock: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                failures: Vec::new(),
                calls: BTreeMap::new(),
                successes: BTreeMap::new(),
            }),
        }
    }

    /// Insert an object directly, bypassing fault injection and counters
    pub fn seed(&self, kind: ResourceKind, mut object: DynamicObject) {
        let mut inner = self.inner.lock().unwrap();
        inner.version += 1;
        object.metadata.resource_version = Some(inner.version.to_string());
        if object.metadata.creation_timestamp.is_none() {
            object.metadata.creation_timestamp = Some(Time(inner.clock));
            inner.clock += Duration::seconds(1);
        }
        let key = key_of(kind, &object);
        inner.objects.insert(key, object);
    }

    /// Insert a node with the given labels and annotations
    pub fn seed_node(
        &self,
        name: &str,
        labels: &[(&str, &str)],
        annotations: &[(&str, &str)],
    ) {
        let mut node = DynamicObject::new(name, &ResourceKind::Node.api_resource());
        node.metadata.labels = Some(to_map(labels));
        node.metadata.annotations = Some(to_map(annotations));
        self.seed(ResourceKind::Node, node);
    }

    /// Fail the next `times` calls of `verb` on `kind` with `error`
    pub fn fail(&self, verb: Verb, kind: ResourceKind, times: u32, error: StoreError) {
        self.inner.lock().unwrap().failures.push(Injected {
            verb,
            kind,
            remaining: times,
            error,
        });
    }

    /// Calls made for `verb` on `kind`, failed ones included
    pub fn calls(&self, verb: Verb, kind: ResourceKind) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.calls.get(&(verb, kind)).copied().unwrap_or(0)
    }

    /// Successful calls for `verb` on `kind`
    pub fn successes(&self, verb: Verb, kind: ResourceKind) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner.successes.get(&(verb, kind)).copied().unwrap_or(0)
    }

    /// Successful mutating calls across all kinds
    pub fn writes(&self) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner
            .successes
            .iter()
            .filter(|((verb, _), _)| verb.is_mutating())
            .map(|(_, n)| *n)
            .sum()
    }

    /// Reset call counters
    pub fn reset_counts(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.clear();
        inner.successes.clear();
    }

    /// Names of stored objects of `kind` in `namespace` (all namespaces when None)
    pub fn names(&self, kind: ResourceKind, namespace: Option<&str>) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .keys()
            .filter(|(k, ns, _)| *k == kind && namespace.map_or(true, |n| n == ns))
            .map(|(_, _, name)| name.clone())
            .collect()
    }

    /// Snapshot of one stored object
    pub fn object(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<DynamicObject> {
        let inner = self.inner.lock().unwrap();
        let key = (kind, namespace.unwrap_or_default().to_string(), name.to_string());
        inner.objects.get(&key).cloned()
    }

    fn begin(&self, verb: Verb, kind: ResourceKind) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        *inner.calls.entry((verb, kind)).or_default() += 1;
        if let Some(injected) = inner
            .failures
            .iter_mut()
            .find(|f| f.verb == verb && f.kind == kind && f.remaining > 0)
        {
            injected.remaining -= 1;
            return Err(injected.error.clone());
        }
        Ok(())
    }

    fn succeed<T>(&self, verb: Verb, kind: ResourceKind, value: T) -> Result<T, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        *inner.successes.entry((verb, kind)).or_default() += 1;
        Ok(value)
    }
}

fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn key_of(kind: ResourceKind, object: &DynamicObject) -> Key {
    let namespace = if kind.is_namespaced() {
        object.metadata.namespace.clone().unwrap_or_default()
    } else {
        String::new()
    };
    (
        kind,
        namespace,
        object.metadata.name.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError> {
        self.begin(Verb::Get, kind)?;
        let found = self.object(kind, namespace, name);
        match found {
            Some(obj) => self.succeed(Verb::Get, kind, obj),
            None => Err(StoreError::not_found(kind.kind(), name)),
        }
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        self.begin(Verb::List, kind)?;
        let items: Vec<DynamicObject> = {
            let inner = self.inner.lock().unwrap();
            let empty = BTreeMap::new();
            inner
                .objects
                .iter()
                .filter(|((k, ns, _), _)| *k == kind && namespace.map_or(true, |n| n == ns))
                .filter(|(_, obj)| matches(selector, obj.metadata.labels.as_ref().unwrap_or(&empty)))
                .map(|(_, obj)| obj.clone())
                .collect()
        };
        self.succeed(Verb::List, kind, items)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        self.begin(Verb::Create, kind)?;
        let created = {
            let mut inner = self.inner.lock().unwrap();
            let key = key_of(kind, object);
            if inner.objects.contains_key(&key) {
                return Err(StoreError::already_exists(kind.kind(), key.2));
            }
            inner.version += 1;
            let mut obj = object.clone();
            obj.metadata = ObjectMeta {
                resource_version: Some(inner.version.to_string()),
                creation_timestamp: Some(Time(inner.clock)),
                uid: Some(format!("uid-{}", inner.version)),
                ..obj.metadata
            };
            inner.clock += Duration::seconds(1);
            if kind == ResourceKind::Namespace {
                obj.data["status"] = json!({ "phase": "Active" });
            }
            inner.objects.insert(key, obj.clone());
            obj
        };
        self.succeed(Verb::Create, kind, created)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        self.begin(Verb::Update, kind)?;
        let updated = {
            let mut inner = self.inner.lock().unwrap();
            let key = key_of(kind, object);
            let Some(stored) = inner.objects.get(&key) else {
                return Err(StoreError::not_found(kind.kind(), key.2));
            };
            if let Some(rv) = &object.metadata.resource_version {
                if stored.metadata.resource_version.as_ref() != Some(rv) {
                    return Err(StoreError::conflict(
                        kind.kind(),
                        key.2,
                        "the object has been modified; please apply your changes to the latest version",
                    ));
                }
            }
            let creation = stored.metadata.creation_timestamp.clone();
            inner.version += 1;
            let mut obj = object.clone();
            obj.metadata.resource_version = Some(inner.version.to_string());
            obj.metadata.creation_timestamp = creation;
            inner.objects.insert(key, obj.clone());
            obj
        };
        self.succeed(Verb::Update, kind, updated)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        _grace_period: Option<u32>,
    ) -> Result<(), StoreError> {
        self.begin(Verb::Delete, kind)?;
        {
            let mut inner = self.inner.lock().unwrap();
            let key = (kind, namespace.unwrap_or_default().to_string(), name.to_string());
            if inner.objects.remove(&key).is_none() {
                return Err(StoreError::not_found(kind.kind(), name));
            }
            if kind == ResourceKind::Namespace {
                inner
                    .objects
                    .retain(|(k, ns, _), _| !k.is_namespaced() || ns != name);
            }
        }
        self.succeed(Verb::Delete, kind, ())
    }
}
