//! Reconciliation engine.
//!
//! The [`Reconciler`] drives a [`CloudProvider`] through a [`Plan`]:
//!
//! 1. destructive steps (deletes, and the delete half of replacements) run
//!    in reverse dependency order, computed from the dependencies recorded
//!    in state;
//! 2. creates and updates run in dependency waves of the declaration graph.
//!
//! Steps within a wave run concurrently up to the configured parallelism;
//! waves never overlap, so a resource is only touched once everything it
//! depends on has converged. State is saved after every wave, including a
//! wave that failed part way, so the record always matches what exists.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::plan::{ActionKind, AttributeChange, Plan, Planner};
use crate::provider::{CloudProvider, ProviderError, ProviderResult};
use crate::resources::{Resource, ResourceId, ResourceSpec};
use crate::retry::RetryPolicy;
use crate::secrets::{NoLogGuard, NoLogRegistry};
use crate::state::{AppliedState, ResourceRecord, StatePersistence};
use crate::topology::Declaration;

/// Execution knobs of the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerOptions {
    /// Maximum provider operations in flight within one wave.
    pub parallelism: usize,
    /// Upper bound on one resource operation, retries included.
    pub operation_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ReconcilerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            parallelism: config.execution.parallelism.max(1),
            operation_timeout: Duration::from_secs(config.execution.operation_timeout_secs),
            retry: config.retry.clone(),
        }
    }
}

/// Counts of what an apply or destroy did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ApplyStats {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
}

impl ApplyStats {
    /// Total number of resources touched.
    pub fn total(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }
}

impl std::fmt::Display for ApplyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} added, {} changed, {} replaced, {} destroyed",
            self.created, self.updated, self.replaced, self.deleted
        )
    }
}

/// One provider call scheduled by the engine.
enum Step<'a> {
    Create {
        resource: &'a Resource,
        replacing: bool,
    },
    Update {
        resource: &'a Resource,
        record: ResourceRecord,
        changes: &'a [AttributeChange],
    },
    Delete {
        record: ResourceRecord,
        replacing: bool,
    },
}

impl Step<'_> {
    fn id(&self) -> &ResourceId {
        match self {
            Step::Create { resource, .. } | Step::Update { resource, .. } => &resource.id,
            Step::Delete { record, .. } => &record.id,
        }
    }
}

/// What a successful step changed in state.
enum Outcome {
    Recorded { record: ResourceRecord, kind: ActionKind },
    Removed { id: ResourceId, replacing: bool },
}

/// Converges live infrastructure to a declaration.
pub struct Reconciler {
    provider: Arc<dyn CloudProvider>,
    store: Arc<dyn StatePersistence>,
    options: ReconcilerOptions,
    no_log: Arc<NoLogRegistry>,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        store: Arc<dyn StatePersistence>,
        options: ReconcilerOptions,
    ) -> Self {
        Self {
            provider,
            store,
            options,
            no_log: Arc::new(NoLogRegistry::new()),
        }
    }

    /// Share a redaction registry with the caller.
    pub fn with_no_log(mut self, registry: Arc<NoLogRegistry>) -> Self {
        self.no_log = registry;
        self
    }

    pub fn options(&self) -> &ReconcilerOptions {
        &self.options
    }

    /// Load recorded state, starting empty if nothing was saved yet.
    pub fn load_state(&self) -> Result<AppliedState> {
        match self.store.load()? {
            Some(state) => {
                debug!(location = %self.store.location(), serial = state.serial, "loaded state");
                Ok(state)
            }
            None => {
                debug!(location = %self.store.location(), "no state yet");
                Ok(AppliedState::new())
            }
        }
    }

    /// Plan the convergence of `state` to `decl`.
    pub fn plan(&self, decl: &Declaration, state: &AppliedState) -> Result<Plan> {
        Planner::new().plan(decl, state)
    }

    /// Re-read every recorded resource from the provider.
    ///
    /// Records of resources that no longer exist are dropped so the next
    /// plan recreates them; live attributes replace recorded ones so drift
    /// shows up as changes. Returns the ids that disappeared.
    #[instrument(skip_all, fields(provider = self.provider.name(), recorded = state.len()))]
    pub async fn refresh(&self, state: &mut AppliedState) -> Result<Vec<ResourceId>> {
        let records: Vec<ResourceRecord> = state.resources().cloned().collect();
        let reads: Vec<(ResourceRecord, Result<_>)> = stream::iter(records)
            .map(|record| async move {
                let result = self
                    .guarded(&record.id, "read", || self.provider.read(&record))
                    .await;
                (record, result)
            })
            .buffer_unordered(self.options.parallelism)
            .collect()
            .await;

        let mut missing = Vec::new();
        let mut changed = false;
        let mut first_error = None;
        for (record, result) in reads {
            match result {
                Ok(Some(observed)) => {
                    if observed.attributes != record.attributes {
                        debug!(resource = %record.id, "live attributes differ from state");
                        let dependencies = record.dependencies.clone();
                        state.upsert(record.updated(observed.attributes, dependencies));
                        changed = true;
                    }
                }
                Ok(None) => {
                    warn!(resource = %record.id, "resource no longer exists and will be recreated");
                    state.remove(&record.id);
                    missing.push(record.id);
                    changed = true;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if changed {
            state.bump_serial();
            self.store.save(state)?;
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                missing.sort();
                Ok(missing)
            }
        }
    }

    /// Execute `plan`, recording progress in `state`.
    ///
    /// Destructive plans need `confirmed`; resources with deletion
    /// protection are never destroyed.
    #[instrument(skip_all, fields(provider = self.provider.name(), actions = plan.actions.len()))]
    pub async fn apply(
        &self,
        decl: &Declaration,
        plan: &Plan,
        state: &mut AppliedState,
        confirmed: bool,
    ) -> Result<ApplyStats> {
        self.execute(Some(decl), plan, state, confirmed).await
    }

    /// Execute a destroy plan built by [`Planner::plan_destroy`].
    #[instrument(skip_all, fields(provider = self.provider.name(), actions = plan.actions.len()))]
    pub async fn destroy(&self, plan: &Plan, state: &mut AppliedState, confirmed: bool) -> Result<ApplyStats> {
        self.execute(None, plan, state, confirmed).await
    }

    async fn execute(
        &self,
        decl: Option<&Declaration>,
        plan: &Plan,
        state: &mut AppliedState,
        confirmed: bool,
    ) -> Result<ApplyStats> {
        let destructive = plan.destructive_ids();
        if !destructive.is_empty() && !confirmed {
            return Err(Error::DestructiveChangeNotConfirmed(destructive));
        }
        if let Some(id) = plan.protected_ids().into_iter().next() {
            return Err(Error::DeletionProtected(id));
        }

        let mut guard = NoLogGuard::new(self.no_log.clone());
        if let Some(decl) = decl {
            for resource in decl.iter() {
                if let ResourceSpec::DatabaseCluster(cluster) = &resource.spec {
                    guard.protect(cluster.initial_password.expose());
                }
            }
        }

        let mut stats = ApplyStats::default();

        // Phase 1: deletions, dependents first.
        let to_delete: HashSet<&ResourceId> = plan
            .actions
            .iter()
            .filter(|a| a.kind.is_destructive())
            .map(|a| &a.id)
            .collect();
        if !to_delete.is_empty() {
            let mut waves = ResourceGraph::from_state(state).waves()?;
            waves.reverse();
            for wave in waves {
                let steps: Vec<Step<'_>> = wave
                    .iter()
                    .filter(|id| to_delete.contains(id))
                    .filter_map(|id| state.get(id).cloned())
                    .map(|record| {
                        let replacing = plan
                            .action(&record.id)
                            .is_some_and(|a| a.kind == ActionKind::Replace);
                        Step::Delete { record, replacing }
                    })
                    .collect();
                self.run_wave(steps, state, &mut stats).await?;
            }
        }

        // Phase 2: creates and updates, dependencies first.
        if let Some(decl) = decl {
            let waves = ResourceGraph::from_declaration(decl)?.waves()?;
            for wave in waves {
                let mut steps = Vec::new();
                for id in &wave {
                    let Some(action) = plan.action(id) else { continue };
                    let resource = decl
                        .get(id)
                        .ok_or_else(|| Error::Internal(format!("{} planned but not declared", id)))?;
                    match action.kind {
                        ActionKind::Create | ActionKind::Replace => steps.push(Step::Create {
                            resource,
                            replacing: action.kind == ActionKind::Replace,
                        }),
                        ActionKind::Update => {
                            let record = state.get(id).cloned().ok_or_else(|| {
                                Error::Internal(format!("{} planned for update but not recorded", id))
                            })?;
                            steps.push(Step::Update {
                                resource,
                                record,
                                changes: &action.changes,
                            });
                        }
                        ActionKind::Delete => {}
                    }
                }
                self.run_wave(steps, state, &mut stats).await?;
            }
        }

        let outputs: BTreeMap<String, String> = plan
            .outputs
            .entries()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let outputs = if decl.is_some() { outputs } else { BTreeMap::new() };
        if stats.total() > 0 || state.outputs != outputs {
            state.outputs = outputs;
            state.bump_serial();
            self.store.save(state)?;
        }

        drop(guard);
        info!(
            created = stats.created,
            updated = stats.updated,
            replaced = stats.replaced,
            deleted = stats.deleted,
            "apply finished"
        );
        Ok(stats)
    }

    /// Run one wave and fold its successes into `state`.
    async fn run_wave(
        &self,
        steps: Vec<Step<'_>>,
        state: &mut AppliedState,
        stats: &mut ApplyStats,
    ) -> Result<()> {
        if steps.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = steps.iter().map(|s| s.id().to_string()).collect();
        debug!(resources = %ids.join(", "), "running wave");

        let results: Vec<Result<Outcome>> = stream::iter(steps)
            .map(|step| self.run_step(step))
            .buffer_unordered(self.options.parallelism)
            .collect()
            .await;

        let mut first_error = None;
        for result in results {
            match result {
                Ok(Outcome::Recorded { record, kind }) => {
                    match kind {
                        ActionKind::Create => stats.created += 1,
                        ActionKind::Replace => stats.replaced += 1,
                        _ => stats.updated += 1,
                    }
                    state.upsert(record);
                }
                Ok(Outcome::Removed { id, replacing }) => {
                    if !replacing {
                        stats.deleted += 1;
                    }
                    state.remove(&id);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        state.bump_serial();
        self.store.save(state)?;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_step(&self, step: Step<'_>) -> Result<Outcome> {
        match step {
            Step::Create { resource, replacing } => {
                info!(resource = %resource.id, "creating");
                let observed = self
                    .guarded(&resource.id, "create", || self.provider.create(resource))
                    .await?;
                let record = ResourceRecord::new(
                    resource.id.clone(),
                    observed.provider_id,
                    observed.attributes,
                    resource.dependencies(),
                );
                let kind = if replacing { ActionKind::Replace } else { ActionKind::Create };
                Ok(Outcome::Recorded { record, kind })
            }
            Step::Update {
                resource,
                record,
                changes,
            } => {
                info!(resource = %resource.id, changes = changes.len(), "updating in place");
                let observed = self
                    .guarded(&resource.id, "update", || self.provider.update(resource, &record, changes))
                    .await?;
                let record = record.updated(observed.attributes, resource.dependencies());
                Ok(Outcome::Recorded {
                    record,
                    kind: ActionKind::Update,
                })
            }
            Step::Delete { record, replacing } => {
                info!(resource = %record.id, replacing, "deleting");
                self.guarded(&record.id, "delete", || self.provider.delete(&record))
                    .await?;
                Ok(Outcome::Removed {
                    id: record.id,
                    replacing,
                })
            }
        }
    }

    /// Run a provider call with retry, timeout and message redaction.
    async fn guarded<T, F, Fut>(&self, id: &ResourceId, operation: &str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ProviderResult<T>>,
    {
        guarded_call(&self.options, &self.no_log, id, operation, call).await
    }
}

/// Run one provider call with retries, the operation timeout and message
/// redaction, and turn its failure into an [`Error`] naming `id`.
pub(crate) async fn guarded_call<T, F, Fut>(
    options: &ReconcilerOptions,
    no_log: &NoLogRegistry,
    id: &ResourceId,
    operation: &str,
    call: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = ProviderResult<T>>,
{
    let attempt = || async {
        call().await.map_err(|e| ProviderError {
            message: no_log.redact(&e.message),
            ..e
        })
    };
    let retried = options
        .retry
        .execute(attempt, |e: &ProviderError| e.kind.is_retryable());

    match tokio::time::timeout(options.operation_timeout, retried).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::Provider {
            resource: id.clone(),
            operation: operation.to_string(),
            kind: e.kind,
            message: e.message,
        }),
        Err(_) => Err(Error::OperationTimeout {
            resource: id.clone(),
            timeout_secs: options.operation_timeout.as_secs(),
        }),
    }
}
