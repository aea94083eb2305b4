//! Generated namespace lifecycle
//!
//! Namespaces carry identity labels (`managed-by`, `associated-node`,
//! `created-by`, `namespace-index`). Scale-up appends namespaces with fresh
//! indices; scale-down removes the oldest by creation timestamp.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Namespace, ResourceQuota, ResourceQuotaSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{DynamicObject, ObjectMeta};
use tracing::{debug, info, warn};

use simload_common::crd::{NamespaceConfig, NamespaceResourceQuota};
use simload_common::labels::{
    managed_by, managed_of_type, ASSOCIATED_NODE_LABEL, CREATED_BY_LABEL, MANAGED_BY_LABEL,
    NAMESPACE_INDEX_LABEL,
};
use simload_common::{Result, StoreError, CREATED_BY};

use crate::random::RandomSource;
use crate::store::{to_dynamic, ObjectStore, ResourceKind};

/// Grace period for graceful namespace deletes
pub const GRACEFUL_DELETE_SECONDS: u32 = 30;

/// Name of the quota created in each namespace
pub const QUOTA_NAME: &str = "load-quota";

/// A generated namespace as observed in the store
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedNamespace {
    /// Namespace name
    pub name: String,
    /// `namespace-index` label, if present and numeric
    pub index: Option<u32>,
    /// `associated-node` label, empty when none
    pub associated_node: String,
    /// Creation timestamp
    pub created: Option<DateTime<Utc>>,
    /// Being deleted (deletionTimestamp set or phase Terminating)
    pub terminating: bool,
}

impl ManagedNamespace {
    /// Read identity labels and phase from a namespace object
    pub fn from_object(obj: &DynamicObject) -> Self {
        let label = |key: &str| {
            obj.metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(key))
                .cloned()
        };
        let phase = obj
            .data
            .get("status")
            .and_then(|s| s.get("phase"))
            .and_then(|p| p.as_str());

        Self {
            name: obj.metadata.name.clone().unwrap_or_default(),
            index: label(NAMESPACE_INDEX_LABEL).and_then(|v| v.parse().ok()),
            associated_node: label(ASSOCIATED_NODE_LABEL).unwrap_or_default(),
            created: obj.metadata.creation_timestamp.as_ref().map(|t| t.0),
            terminating: obj.metadata.deletion_timestamp.is_some() || phase == Some("Terminating"),
        }
    }

    /// Non-terminating namespaces accept new objects
    pub fn is_ready(&self) -> bool {
        !self.terminating
    }
}

/// List every namespace managed by `config_name`
pub async fn list_managed(
    store: &dyn ObjectStore,
    config_name: &str,
) -> std::result::Result<Vec<ManagedNamespace>, StoreError> {
    let objects = store
        .list(ResourceKind::Namespace, None, &managed_by(config_name))
        .await?;
    Ok(objects.iter().map(ManagedNamespace::from_object).collect())
}

/// Sort by creation timestamp ascending; unknown timestamps sort first
pub fn sort_oldest_first(namespaces: &mut [ManagedNamespace]) {
    namespaces.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
}

/// Index for the `offset`-th new namespace: past both the live count and
/// the highest live index, so live indices are never reused
pub fn next_index(existing: &[ManagedNamespace], offset: u32) -> u32 {
    let count = existing.len() as u32;
    let after_max = existing
        .iter()
        .filter_map(|ns| ns.index)
        .max()
        .map_or(0, |max| max + 1);
    count.max(after_max) + offset
}

/// Namespaces created and deleted by one convergence pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamespaceChanges {
    /// Created namespace names
    pub created: Vec<String>,
    /// Deleted namespace names
    pub deleted: Vec<String>,
}

impl NamespaceChanges {
    /// True when nothing changed
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }
}

/// Creates and deletes generated namespaces for one config
pub struct NamespaceLifecycle<'a> {
    store: &'a dyn ObjectStore,
    config_name: &'a str,
    config: &'a NamespaceConfig,
    graceful: bool,
}

impl<'a> NamespaceLifecycle<'a> {
    /// Lifecycle for `config_name`
    pub fn new(
        store: &'a dyn ObjectStore,
        config_name: &'a str,
        config: &'a NamespaceConfig,
        graceful: bool,
    ) -> Self {
        Self {
            store,
            config_name,
            config,
            graceful,
        }
    }

    fn grace_period(&self) -> Option<u32> {
        Some(if self.graceful {
            GRACEFUL_DELETE_SECONDS
        } else {
            0
        })
    }

    /// Converge the ready namespaces in `existing` to `target`.
    ///
    /// Terminating namespaces are not counted but keep their indices
    /// reserved. The first failed create or delete aborts the pass.
    pub async fn converge(
        &self,
        existing: &[ManagedNamespace],
        target: u32,
        nodes: &[String],
        rng: &mut dyn RandomSource,
        now: DateTime<Utc>,
    ) -> Result<NamespaceChanges> {
        let mut ready: Vec<ManagedNamespace> =
            existing.iter().filter(|ns| ns.is_ready()).cloned().collect();
        let current = ready.len() as u32;
        let mut changes = NamespaceChanges::default();

        if current < target {
            let missing = target - current;
            info!(
                config = %self.config_name,
                current,
                target,
                "Creating namespaces"
            );
            for offset in 0..missing {
                let index = next_index(existing, offset);
                let name = self.create_one(index, nodes, rng, now).await?;
                changes.created.push(name);
            }
        } else if current > target {
            let excess = (current - target) as usize;
            info!(
                config = %self.config_name,
                current,
                target,
                "Deleting oldest namespaces"
            );
            sort_oldest_first(&mut ready);
            for ns in ready.iter().take(excess) {
                self.store
                    .delete(ResourceKind::Namespace, None, &ns.name, self.grace_period())
                    .await?;
                changes.deleted.push(ns.name.clone());
            }
        }

        Ok(changes)
    }

    async fn create_one(
        &self,
        index: u32,
        nodes: &[String],
        rng: &mut dyn RandomSource,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let node = if nodes.is_empty() {
            String::new()
        } else {
            nodes[rng.below(nodes.len() as u64) as usize].clone()
        };
        let name = format!(
            "{}{}-{}",
            self.config.prefix(),
            rng.alnum(6),
            now.timestamp().rem_euclid(10_000)
        );

        let mut labels = self.config.labels.clone();
        labels.insert(MANAGED_BY_LABEL.to_string(), self.config_name.to_string());
        labels.insert(ASSOCIATED_NODE_LABEL.to_string(), node.clone());
        labels.insert(CREATED_BY_LABEL.to_string(), CREATED_BY.to_string());
        labels.insert(NAMESPACE_INDEX_LABEL.to_string(), index.to_string());

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(labels),
                annotations: (!self.config.annotations.is_empty())
                    .then(|| self.config.annotations.clone()),
                ..Default::default()
            },
            ..Default::default()
        };

        self.store
            .create(
                ResourceKind::Namespace,
                &to_dynamic(ResourceKind::Namespace, &namespace)?,
            )
            .await?;
        debug!(namespace = %name, index, node = %node, "Created namespace");

        if let Some(quota) = &self.config.resource_quota {
            self.create_quota(&name, quota).await?;
        }
        Ok(name)
    }

    async fn create_quota(&self, namespace: &str, quota: &NamespaceResourceQuota) -> Result<()> {
        let mut labels = managed_of_type(self.config_name, ResourceKind::ResourceQuota.label_value());
        labels.insert(CREATED_BY_LABEL.to_string(), CREATED_BY.to_string());

        let object = ResourceQuota {
            metadata: ObjectMeta {
                name: Some(QUOTA_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(ResourceQuotaSpec {
                hard: Some(quota_hard_limits(quota)),
                ..Default::default()
            }),
            ..Default::default()
        };

        match self
            .store
            .create(
                ResourceKind::ResourceQuota,
                &to_dynamic(ResourceKind::ResourceQuota, &object)?,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete ready namespaces whose associated node is no longer observed.
    /// Namespaces without an associated node are kept.
    pub async fn delete_orphans(
        &self,
        existing: &[ManagedNamespace],
        nodes: &BTreeSet<String>,
    ) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for ns in existing.iter().filter(|ns| {
            ns.is_ready() && !ns.associated_node.is_empty() && !nodes.contains(&ns.associated_node)
        }) {
            info!(
                namespace = %ns.name,
                node = %ns.associated_node,
                "Deleting namespace of removed node"
            );
            self.store
                .delete(ResourceKind::Namespace, None, &ns.name, self.grace_period())
                .await?;
            deleted.push(ns.name.clone());
        }
        Ok(deleted)
    }
}

fn quota_hard_limits(quota: &NamespaceResourceQuota) -> BTreeMap<String, Quantity> {
    let mut hard = BTreeMap::new();
    let mut put = |key: &str, value: Option<String>| {
        if let Some(v) = value {
            hard.insert(key.to_string(), Quantity(v));
        }
    };
    put("limits.cpu", quota.cpu.clone());
    put("limits.memory", quota.memory.clone());
    put("requests.storage", quota.storage.clone());
    put("pods", quota.pods.map(|p| p.to_string()));
    hard
}

/// Best-effort removal of every namespace managed by `config_name`.
///
/// Only a failed list is an error; individual delete failures are logged.
/// Returns the number of namespaces deleted.
pub async fn cleanup_all(
    store: &dyn ObjectStore,
    config_name: &str,
    graceful: bool,
) -> std::result::Result<usize, StoreError> {
    let namespaces = list_managed(store, config_name).await?;
    let grace = Some(if graceful { GRACEFUL_DELETE_SECONDS } else { 0 });
    let mut deleted = 0;
    for ns in namespaces.iter().filter(|ns| ns.is_ready()) {
        match store
            .delete(ResourceKind::Namespace, None, &ns.name, grace)
            .await
        {
            Ok(()) => deleted += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(namespace = %ns.name, error = %e, "Failed to delete namespace"),
        }
    }
    info!(config = %config_name, deleted, "Cleaned up generated namespaces");
    Ok(deleted)
}
