//! ScaleLoadConfig reconciliation
//!
//! Each reconcile is one tick for one config: fetch it, make sure the
//! cleanup finalizer is in place, then either clean up (deleting), publish
//! an idle status (disabled) or converge load toward the node count
//! (active). Ticks for the same config are serialized by a per-config
//! mutex around its [`RuntimeState`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use simload_common::crd::ScaleLoadConfig;
use simload_common::events::{actions, reasons};
use simload_common::metrics::{self, ReconcileTimer};
use simload_common::retry::RetryConfig;
use simload_common::{Error, EventPublisher, KubeEventPublisher};

use crate::annotations::AnnotationChurner;
use crate::churn::ChurnEngine;
use crate::config_client::{LoadConfigClient, LoadConfigClientImpl};
use crate::namespaces::{cleanup_all, list_managed, NamespaceLifecycle};
use crate::planner::{reconcile_interval, ScalingPlan};
use crate::random::{seeded_factory, RandomFactory};
use crate::rate_budget::effective_rate;
use crate::runtime::RuntimeState;
use crate::status::{self, TickReport};
use crate::store::{KubeObjectStore, ObjectStore, ResourceKind, TrackedStore};

/// Name reported on Kubernetes Events
pub const CONTROLLER_NAME: &str = "sim-operator";

/// Wait after a tick the rate budget denied
pub const RATE_LIMITED_REQUEUE: Duration = Duration::from_secs(60);

/// Poll interval while a deleted config waits out its cleanup delay
pub const CLEANUP_DELAY_REQUEUE: Duration = Duration::from_secs(10);

/// Retry interval for retryable errors and failed cleanup listings
pub const RETRY_REQUEUE: Duration = Duration::from_secs(30);

/// Retry interval for errors that need a spec or permission change
pub const PERMANENT_ERROR_REQUEUE: Duration = Duration::from_secs(300);

/// Shared state for all reconciles
pub struct Context {
    /// ScaleLoadConfig access
    pub configs: Arc<dyn LoadConfigClient>,
    /// Store for generated objects and nodes
    pub store: Arc<dyn ObjectStore>,
    /// Kubernetes Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Random source per config
    pub random: RandomFactory,
    /// Conflict retry policy for node annotation writes
    pub retry: RetryConfig,
    states: DashMap<String, Arc<Mutex<RuntimeState>>>,
}

impl Context {
    /// Context backed by the API server. `seed` makes randomness repeatable.
    pub fn new(client: Client, seed: Option<u64>) -> Self {
        Self {
            configs: Arc::new(LoadConfigClientImpl::new(client.clone())),
            store: Arc::new(KubeObjectStore::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            random: seeded_factory(seed),
            retry: RetryConfig::conflict(),
            states: DashMap::new(),
        }
    }

    /// Create a context for testing with injected collaborators
    #[cfg(test)]
    pub fn for_testing(
        configs: Arc<dyn LoadConfigClient>,
        store: Arc<dyn ObjectStore>,
        random: RandomFactory,
    ) -> Self {
        Self {
            configs,
            store,
            events: Arc::new(simload_common::NoopEventPublisher),
            random,
            retry: RetryConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                ..RetryConfig::conflict()
            },
            states: DashMap::new(),
        }
    }

    fn state(&self, name: &str) -> Arc<Mutex<RuntimeState>> {
        self.states
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RuntimeState::new((self.random)(name)))))
            .clone()
    }

    fn forget(&self, name: &str) {
        self.states.remove(name);
    }

    /// Whether runtime state is held for `name`
    pub fn has_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }
}

fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::Kube { .. } => "kube",
        Error::Store(_) => "store",
        Error::Validation { .. } => "validation",
        Error::Serialization { .. } => "serialization",
        Error::Internal { .. } => "internal",
    }
}

/// Reconcile one ScaleLoadConfig
#[instrument(skip(config, ctx), fields(config = %config.name_any()))]
pub async fn reconcile(config: Arc<ScaleLoadConfig>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = config.name_any();
    let timer = ReconcileTimer::start(name.clone());

    let result = reconcile_config(&name, &ctx, &timer).await;
    match &result {
        Ok(_) => timer.success(),
        Err(e) => timer.error(error_kind(e)),
    }
    result
}

async fn reconcile_config(
    name: &str,
    ctx: &Context,
    timer: &ReconcileTimer,
) -> Result<Action, Error> {
    let Some(config) = ctx.configs.get(name).await? else {
        return Ok(handle_missing(name, ctx).await);
    };

    if !config.has_cleanup_finalizer() {
        if config.deletion_time().is_some() {
            debug!("config is being deleted without our finalizer");
            return Ok(Action::await_change());
        }
        info!("Adding cleanup finalizer");
        ctx.configs.add_finalizer(name).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    if let Some(deleted_at) = config.deletion_time() {
        return handle_deletion(&config, deleted_at, ctx).await;
    }

    if let Err(e) = config.spec.validate() {
        warn!(error = %e, "ScaleLoadConfig spec is invalid, applying rate precedence");
    }

    let state = ctx.state(name);
    let mut state = state.lock().await;

    if !config.spec.enabled {
        return handle_disabled(&config, &mut state, ctx).await;
    }
    run_tick(&config, &mut state, ctx, timer).await
}

/// Config is gone: remove everything it generated and drop its state
async fn handle_missing(name: &str, ctx: &Context) -> Action {
    info!("ScaleLoadConfig not found, removing generated namespaces");
    match cleanup_all(ctx.store.as_ref(), name, true).await {
        Ok(_) => {
            ctx.forget(name);
            Action::await_change()
        }
        Err(e) => {
            warn!(error = %e, "Failed to list generated namespaces for cleanup");
            Action::requeue(RETRY_REQUEUE)
        }
    }
}

async fn handle_deletion(
    config: &ScaleLoadConfig,
    deleted_at: DateTime<Utc>,
    ctx: &Context,
) -> Result<Action, Error> {
    let name = config.name_any();
    let cleanup = &config.spec.cleanup_config;

    if cleanup.enabled {
        cleanup_all(ctx.store.as_ref(), &name, cleanup.graceful_deletes).await?;

        let delay = chrono::Duration::seconds(i64::from(cleanup.cleanup_delay_seconds));
        if Utc::now() < deleted_at + delay {
            debug!(
                delay_seconds = cleanup.cleanup_delay_seconds,
                "Waiting for cleanup delay before releasing finalizer"
            );
            return Ok(Action::requeue(CLEANUP_DELAY_REQUEUE));
        }
    }

    info!("Removing cleanup finalizer");
    ctx.configs.remove_finalizer(&name).await?;
    ctx.forget(&name);
    ctx.events
        .publish(
            &config.object_ref(&()),
            EventType::Normal,
            reasons::CLEANUP_COMPLETED,
            actions::DELETE,
            Some("Generated namespaces removed".to_string()),
        )
        .await;
    Ok(Action::await_change())
}

async fn handle_disabled(
    config: &ScaleLoadConfig,
    state: &mut RuntimeState,
    ctx: &Context,
) -> Result<Action, Error> {
    let name = config.name_any();
    let generation = config.metadata.generation;
    let now = Utc::now();
    if let Some(wait) = state.wait_remaining(now, generation) {
        return Ok(Action::requeue(wait));
    }

    let status = status::disabled(config.status.as_ref(), generation, now);
    ctx.configs.patch_status(&name, &status).await?;
    metrics::set_load_size(&name, 0, 0);

    let interval = reconcile_interval(config.spec.load_profile.preset());
    state.defer(now, generation, interval);
    debug!("Load generation disabled");
    Ok(Action::requeue(interval))
}

async fn run_tick(
    config: &ScaleLoadConfig,
    state: &mut RuntimeState,
    ctx: &Context,
    timer: &ReconcileTimer,
) -> Result<Action, Error> {
    let name = config.name_any();
    let spec = &config.spec;
    let generation = config.metadata.generation;
    let now = Utc::now();

    if let Some(wait) = state.wait_remaining(now, generation) {
        debug!(wait_seconds = wait.as_secs(), "Tick not due yet");
        return Ok(Action::requeue(wait));
    }

    let store = TrackedStore::new(ctx.store.clone());

    let nodes = store
        .list(ResourceKind::Node, None, &spec.node_selector())
        .await?;
    let node_names: Vec<String> = nodes.iter().filter_map(|n| n.metadata.name.clone()).collect();
    let plan = ScalingPlan::new(&spec.load_profile, node_names.len() as u32);

    let (rate, source) = effective_rate(&spec.load_profile, plan.nodes);
    if !state.budget.admit(now, plan.estimated_calls, rate) {
        warn!(
            estimated = plan.estimated_calls,
            used = state.budget.used(),
            rate,
            source = ?source,
            "API call budget exhausted, skipping tick"
        );
        metrics::record_error(&name, "rate_limited");
        ctx.events
            .publish(
                &config.object_ref(&()),
                EventType::Warning,
                reasons::RATE_LIMITED,
                actions::RECONCILE,
                Some(format!(
                    "Estimated {} calls exceed the remaining budget of {} per minute",
                    plan.estimated_calls, rate
                )),
            )
            .await;
        state.defer(now, generation, RATE_LIMITED_REQUEUE);
        return Ok(Action::requeue(RATE_LIMITED_REQUEUE));
    }

    // Namespaces
    let lifecycle = NamespaceLifecycle::new(
        &store,
        &name,
        &spec.namespace_config,
        spec.cleanup_config.graceful_deletes,
    );
    let mut existing = list_managed(&store, &name).await?;
    let mut orphans = Vec::new();
    if spec.cleanup_config.orphan_cleanup {
        let live: BTreeSet<String> = node_names.iter().cloned().collect();
        orphans = lifecycle.delete_orphans(&existing, &live).await?;
        if !orphans.is_empty() {
            existing = list_managed(&store, &name).await?;
        }
    }
    let changes = lifecycle
        .converge(
            &existing,
            plan.target_namespaces,
            &node_names,
            state.rng.as_mut(),
            now,
        )
        .await?;

    if !changes.is_empty() || !orphans.is_empty() {
        ctx.events
            .publish(
                &config.object_ref(&()),
                EventType::Normal,
                reasons::NAMESPACES_SCALED,
                actions::SCALE,
                Some(format!(
                    "Created {}, deleted {} namespaces for {} KWOK nodes (target {})",
                    changes.created.len(),
                    changes.deleted.len() + orphans.len(),
                    plan.nodes,
                    plan.target_namespaces
                )),
            )
            .await;
    }

    let live = if changes.is_empty() {
        existing
    } else {
        list_managed(&store, &name).await?
    };
    let ready: Vec<_> = live.into_iter().filter(|ns| ns.is_ready()).collect();
    state.sync_namespaces(&ready);

    // Objects
    let hours = state.hours_since_last(now);
    let engine = ChurnEngine::new(&store, &name, &spec.resource_churn);
    for ns in &ready {
        let previous = state
            .namespaces
            .get(&ns.name)
            .map(|runtime| runtime.counts.clone())
            .unwrap_or_default();
        let outcome = engine
            .converge_namespace(ns, &previous, hours, state.rng.as_mut(), now)
            .await;
        for kind in &outcome.failed_kinds {
            metrics::record_error(&name, kind.resource().label_value());
        }
        if let Some(runtime) = state.namespaces.get_mut(&ns.name) {
            runtime.events_generated += outcome.counts.events;
            runtime.counts = outcome.counts;
            runtime.last_update = Some(now);
        }
    }

    // Node annotations
    if spec.annotation_churn.enabled {
        let churner = AnnotationChurner::new(&store, &spec.annotation_churn, &ctx.retry);
        let outcome = churner.run(&nodes, state.rng.as_mut(), now).await;
        for _ in &outcome.failed {
            metrics::record_error(&name, "annotation_update");
        }
    }

    // Status
    let finished = Utc::now();
    let minutes = state.minutes_since_last(finished);
    let average = state.record_tick(finished, generation, plan.interval, timer.elapsed_ms());
    let report = TickReport {
        nodes: plan.nodes,
        namespaces: ready.len() as u32,
        totals: state.totals(),
        stats: store.snapshot(),
        minutes,
        average_reconcile_ms: average,
    };
    let status = status::active(config.status.as_ref(), generation, &report, finished);
    if let Err(e) = ctx.configs.patch_status(&name, &status).await {
        state.next_tick_at = None;
        return Err(e);
    }
    metrics::set_load_size(&name, plan.nodes, report.namespaces);

    info!(
        nodes = plan.nodes,
        namespaces = report.namespaces,
        target = plan.target_namespaces,
        api_calls = report.stats.api_calls,
        error_rate = %status.metrics.error_rate,
        "Tick complete"
    );
    Ok(Action::requeue(plan.interval))
}

/// Requeue policy for failed reconciles
///
/// Transient failures retry after 30s. Anything else retries after five
/// minutes; a load generator keeps ticking rather than giving up.
pub fn error_policy(config: Arc<ScaleLoadConfig>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        config = %config.name_any(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(RETRY_REQUEUE)
    } else {
        Action::requeue(PERMANENT_ERROR_REQUEUE)
    }
}
