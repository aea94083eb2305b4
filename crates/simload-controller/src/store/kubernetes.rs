//! [`ObjectStore`] backed by the Kubernetes API server

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::Client;

use simload_common::labels::selector_string;
use simload_common::metrics;
use simload_common::StoreError;

use super::{ObjectStore, ResourceKind, Verb};

/// Dynamic-client store talking to the API server
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = kind.api_resource();
        match namespace {
            Some(ns) if kind.is_namespaced() => {
                Api::namespaced_with(self.client.clone(), ns, &resource)
            }
            _ => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn observe<T>(
    verb: Verb,
    kind: ResourceKind,
    name: &str,
    started: Instant,
    result: Result<T, kube::Error>,
) -> Result<T, StoreError> {
    metrics::record_api_call(verb.as_str(), kind.kind(), started.elapsed().as_secs_f64());
    result.map_err(|e| StoreError::from_kube(verb.as_str(), kind.kind(), name, e))
}

fn object_name(object: &DynamicObject) -> &str {
    object.metadata.name.as_deref().unwrap_or_default()
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, StoreError> {
        let started = Instant::now();
        let result = self.api(kind, namespace).get(name).await;
        observe(Verb::Get, kind, name, started, result)
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let started = Instant::now();
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector_string(selector));
        }
        let result = self.api(kind, namespace).list(&params).await;
        observe(Verb::List, kind, "", started, result).map(|list| list.items)
    }

    async fn create(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let started = Instant::now();
        let name = object_name(object);
        let result = self
            .api(kind, object.metadata.namespace.as_deref())
            .create(&PostParams::default(), object)
            .await;
        observe(Verb::Create, kind, name, started, result)
    }

    async fn update(
        &self,
        kind: ResourceKind,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let started = Instant::now();
        let name = object_name(object);
        let result = self
            .api(kind, object.metadata.namespace.as_deref())
            .replace(name, &PostParams::default(), object)
            .await;
        observe(Verb::Update, kind, name, started, result)
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        grace_period: Option<u32>,
    ) -> Result<(), StoreError> {
        let started = Instant::now();
        let params = DeleteParams {
            grace_period_seconds: grace_period,
            ..DeleteParams::default()
        };
        let result = self.api(kind, namespace).delete(name, &params).await;
        observe(Verb::Delete, kind, name, started, result).map(|_| ())
    }
}
