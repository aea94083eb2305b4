//! Per-namespace object convergence and churn
//!
//! Each kind is handled independently: list the managed objects of that
//! kind, create or delete toward the target, then give every survivor a
//! small chance of being touched. Object names are positional
//! (`load-config-0`, `load-config-1`, ...) so repeated passes converge on
//! the same set.

pub mod content;
pub mod events;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use kube::api::DynamicObject;
use tracing::{debug, warn};

use simload_common::crd::{ResourceChurnConfig, ResourceCounts, ResourceTypeConfig};
use simload_common::labels::{managed_of_type, CHURN_ITERATION_ANNOTATION, LAST_CHURN_ANNOTATION};
use simload_common::Result;

use crate::namespaces::ManagedNamespace;
use crate::planner::{selected_by_interval, target_objects};
use crate::random::RandomSource;
use crate::store::{ObjectStore, ResourceKind};
use content::Owner;

/// Chance per tick that an existing object is churned
pub const CHURN_PROBABILITY: f64 = 0.1;

/// Exclusive upper bound of the `churn-iteration` annotation value
pub const CHURN_ITERATION_RANGE: u64 = 1000;

/// Kinds converged to a per-namespace count
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChurnKind {
    /// ConfigMaps with multi-format config blobs
    ConfigMap,
    /// Opaque Secrets with credential-shaped values
    Secret,
    /// Routes, each backed by a Service
    Route,
    /// ImageStreams
    ImageStream,
    /// BuildConfigs
    BuildConfig,
}

impl ChurnKind {
    /// Every kind, in processing order
    pub const ALL: [ChurnKind; 5] = [
        Self::ConfigMap,
        Self::Secret,
        Self::Route,
        Self::ImageStream,
        Self::BuildConfig,
    ];

    /// Store kind
    pub fn resource(&self) -> ResourceKind {
        match self {
            Self::ConfigMap => ResourceKind::ConfigMap,
            Self::Secret => ResourceKind::Secret,
            Self::Route => ResourceKind::Route,
            Self::ImageStream => ResourceKind::ImageStream,
            Self::BuildConfig => ResourceKind::BuildConfig,
        }
    }

    fn name_prefix(&self) -> &'static str {
        match self {
            Self::ConfigMap => "load-config-",
            Self::Secret => "load-secret-",
            Self::Route => "load-route-",
            Self::ImageStream => "load-image-",
            Self::BuildConfig => "load-build-",
        }
    }

    /// `app.kubernetes.io/component` value
    pub fn component(&self) -> &'static str {
        match self {
            Self::ConfigMap => "configuration",
            Self::Secret => "credentials",
            Self::Route => "frontend",
            Self::ImageStream => "image",
            Self::BuildConfig => "build",
        }
    }

    /// Name of the object at position `index`
    pub fn object_name(&self, index: u32) -> String {
        format!("{}{}", self.name_prefix(), index)
    }

    /// Position encoded in a generated object name
    pub fn index_of(&self, name: &str) -> Option<u32> {
        name.strip_prefix(self.name_prefix())?.parse().ok()
    }

    /// Settings for this kind
    pub fn config<'a>(&self, churn: &'a ResourceChurnConfig) -> &'a ResourceTypeConfig {
        match self {
            Self::ConfigMap => &churn.config_maps,
            Self::Secret => &churn.secrets,
            Self::Route => &churn.routes,
            Self::ImageStream => &churn.image_streams,
            Self::BuildConfig => &churn.build_configs,
        }
    }

    fn recorded(&self, counts: &ResourceCounts) -> u32 {
        match self {
            Self::ConfigMap => counts.config_maps,
            Self::Secret => counts.secrets,
            Self::Route => counts.routes,
            Self::ImageStream => counts.image_streams,
            Self::BuildConfig => counts.build_configs,
        }
    }

    fn record(&self, counts: &mut ResourceCounts, count: u32) {
        match self {
            Self::ConfigMap => counts.config_maps = count,
            Self::Secret => counts.secrets = count,
            Self::Route => counts.routes = count,
            Self::ImageStream => counts.image_streams = count,
            Self::BuildConfig => counts.build_configs = count,
        }
    }
}

/// Result of converging one kind in one namespace
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KindOutcome {
    /// Objects created
    pub created: u32,
    /// Objects deleted to reach the target
    pub deleted: u32,
    /// Survivors that were updated or recreated
    pub churned: u32,
    /// Objects present after the pass
    pub count: u32,
}

/// Result of one pass over a namespace
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamespaceOutcome {
    /// Objects per kind after the pass; `events` counts events created
    pub counts: ResourceCounts,
    /// Kinds whose convergence failed
    pub failed_kinds: Vec<ChurnKind>,
    /// Event creates that failed
    pub events_failed: u32,
}

/// Converges generated objects for one config
pub struct ChurnEngine<'a> {
    store: &'a dyn ObjectStore,
    config_name: &'a str,
    churn: &'a ResourceChurnConfig,
}

impl<'a> ChurnEngine<'a> {
    /// Engine for `config_name`
    pub fn new(
        store: &'a dyn ObjectStore,
        config_name: &'a str,
        churn: &'a ResourceChurnConfig,
    ) -> Self {
        Self {
            store,
            config_name,
            churn,
        }
    }

    /// Converge every kind in `namespace`, then generate events.
    ///
    /// A failing kind is logged and does not stop the others; its count
    /// stays at the value in `previous`.
    pub async fn converge_namespace(
        &self,
        namespace: &ManagedNamespace,
        previous: &ResourceCounts,
        hours_since_last: Option<f64>,
        rng: &mut dyn RandomSource,
        now: DateTime<Utc>,
    ) -> NamespaceOutcome {
        let mut outcome = NamespaceOutcome::default();

        for kind in ChurnKind::ALL {
            match self.converge_kind(kind, namespace, rng, now).await {
                Ok(result) => kind.record(&mut outcome.counts, result.count),
                Err(e) => {
                    warn!(
                        namespace = %namespace.name,
                        kind = kind.resource().kind(),
                        error = %e,
                        "Resource convergence failed"
                    );
                    kind.record(&mut outcome.counts, kind.recorded(previous));
                    outcome.failed_kinds.push(kind);
                }
            }
        }

        if self.churn.events.enabled {
            let (created, failed) = self
                .generate_events(namespace, hours_since_last, rng, now)
                .await;
            outcome.counts.events = created;
            outcome.events_failed = failed;
        }

        outcome
    }

    /// Converge one kind in `namespace` toward its target count
    pub async fn converge_kind(
        &self,
        kind: ChurnKind,
        namespace: &ManagedNamespace,
        rng: &mut dyn RandomSource,
        now: DateTime<Utc>,
    ) -> Result<KindOutcome> {
        let config = kind.config(self.churn);
        if !config.enabled || !selected_by_interval(namespace.index, config.namespace_interval) {
            return Ok(KindOutcome::default());
        }

        let target = target_objects(config, namespace.index) as usize;
        let owner = Owner {
            config_name: self.config_name,
            namespace,
        };
        let selector = managed_of_type(self.config_name, kind.resource().label_value());
        let mut objects = self
            .store
            .list(kind.resource(), Some(&namespace.name), &selector)
            .await?;

        let mut outcome = KindOutcome::default();

        if objects.len() < target {
            let taken: BTreeSet<String> = objects
                .iter()
                .filter_map(|o| o.metadata.name.clone())
                .collect();
            let mut missing = target - objects.len();
            let mut index = 0u32;
            while missing > 0 {
                if !taken.contains(&kind.object_name(index)) {
                    self.create(kind, owner, index, rng).await?;
                    outcome.created += 1;
                    missing -= 1;
                }
                index += 1;
            }
        } else if objects.len() > target {
            let doomed = objects.split_off(target);
            for obj in doomed.iter().rev() {
                self.delete(kind, namespace, obj).await?;
                outcome.deleted += 1;
            }
        }

        let probability = config.delete_recreate_probability();
        for obj in &objects {
            if !rng.chance(CHURN_PROBABILITY) {
                continue;
            }
            let recreate = rng.chance(probability);
            let result = match kind.index_of(obj.metadata.name.as_deref().unwrap_or_default()) {
                Some(index) if recreate => self.recreate(kind, owner, index, obj, rng).await,
                _ => self.touch(kind, obj, rng, now).await,
            };
            match result {
                Ok(()) => outcome.churned += 1,
                Err(e) => debug!(
                    namespace = %namespace.name,
                    name = obj.metadata.name.as_deref().unwrap_or_default(),
                    error = %e,
                    "Churn update failed"
                ),
            }
        }

        outcome.count = (objects.len() as u32) + outcome.created;
        Ok(outcome)
    }

    async fn create(
        &self,
        kind: ChurnKind,
        owner: Owner<'_>,
        index: u32,
        rng: &mut dyn RandomSource,
    ) -> Result<()> {
        if kind == ChurnKind::Route {
            let service = content::service(owner, index)?;
            match self.store.create(ResourceKind::Service, &service).await {
                Ok(_) => {}
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e.into()),
            }
        }
        let obj = content::build(kind, owner, index, rng)?;
        self.store.create(kind.resource(), &obj).await?;
        Ok(())
    }

    async fn delete(
        &self,
        kind: ChurnKind,
        namespace: &ManagedNamespace,
        obj: &DynamicObject,
    ) -> Result<()> {
        let name = obj.metadata.name.as_deref().unwrap_or_default();
        match self
            .store
            .delete(kind.resource(), Some(&namespace.name), name, None)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        if kind == ChurnKind::Route {
            let service = content::route_target(obj)
                .or_else(|| kind.index_of(name).map(content::service_name));
            if let Some(service) = service {
                match self
                    .store
                    .delete(ResourceKind::Service, Some(&namespace.name), &service, None)
                    .await
                {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    async fn recreate(
        &self,
        kind: ChurnKind,
        owner: Owner<'_>,
        index: u32,
        obj: &DynamicObject,
        rng: &mut dyn RandomSource,
    ) -> Result<()> {
        let name = kind.object_name(index);
        self.store
            .delete(kind.resource(), Some(&owner.namespace.name), &name, None)
            .await?;
        let fresh = content::build(kind, owner, index, rng)?;
        self.store.create(kind.resource(), &fresh).await?;
        debug!(namespace = %owner.namespace.name, name = %name, uid = ?obj.metadata.uid, "Recreated object");
        Ok(())
    }

    async fn touch(
        &self,
        kind: ChurnKind,
        obj: &DynamicObject,
        rng: &mut dyn RandomSource,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut updated = obj.clone();
        let annotations = updated.metadata.annotations.get_or_insert_with(Default::default);
        annotations.insert(LAST_CHURN_ANNOTATION.to_string(), now.to_rfc3339());
        annotations.insert(
            CHURN_ITERATION_ANNOTATION.to_string(),
            rng.below(CHURN_ITERATION_RANGE).to_string(),
        );
        self.store.update(kind.resource(), &updated).await?;
        Ok(())
    }

    async fn generate_events(
        &self,
        namespace: &ManagedNamespace,
        hours_since_last: Option<f64>,
        rng: &mut dyn RandomSource,
        now: DateTime<Utc>,
    ) -> (u32, u32) {
        let due = events::events_due(self.churn.events.rate_per_hour(), hours_since_last);
        let (mut created, mut failed) = (0, 0);
        for index in 0..due {
            let template = events::pick(&self.churn.events.event_types, rng);
            let result = match events::build(self.config_name, &namespace.name, index, &template, now)
            {
                Ok(event) => self
                    .store
                    .create(ResourceKind::Event, &event)
                    .await
                    .map_err(Into::into),
                Err(e) => Err(e),
            };
            match result {
                Ok(_) => created += 1,
                Err(e) => {
                    failed += 1;
                    debug!(namespace = %namespace.name, error = %e, "Event create failed");
                }
            }
        }
        (created, failed)
    }
}
