//! Pull synchronization.
//!
//! A run reads changes from one resource, either incrementally from the last
//! stored sync token or as a full comparison, and applies them to the
//! internal store. Every internal change is then propagated to the other
//! resources of the identity; the source resource is always excluded.

use super::actions::HookChain;
use super::{
    Correlator, EntryAction, EntryResult, MatchingRule, SyncDirection, SyncEntry, SyncProfile,
    SyncSettings, SyncTask, UnmatchingRule,
};
use crate::connector::{Connector, SyncDelta, SyncDeltaType, call_with_timeout};
use crate::context::DomainContext;
use crate::error::{
    PropagationCause, PropagationError, ReconcilerError, ReconcilerResult, SyncActionError,
    SynchronizationEntryError,
};
use crate::identity::{Identity, IdentityPatch};
use crate::locks::IdentityGuard;
use crate::mapping::{Mapping, MappingEngine};
use crate::propagation::{PropagationExecutor, PropagationOperation, TaskResult};
use crate::report::{ProvisioningReport, ReportSnapshot};
use crate::resource::{ExternalResource, ResourceMap};
use crate::schema::SchemaRegistry;
use crate::storage::StorageProvider;
use crate::store::PersistenceStore;
use crate::workflow::WorkflowAdapter;
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashSet};

/// Everything resolved before the first entry of a run.
struct PullRun<'t> {
    task: &'t SyncTask,
    resources: ResourceMap,
    resource: ExternalResource,
    mapping: Mapping,
    schemas: SchemaRegistry,
    hooks: HookChain,
    profile: SyncProfile,
    report: ProvisioningReport,
}

impl PullRun<'_> {
    fn settings(&self) -> &SyncSettings {
        &self.task.settings
    }

    fn source(&self) -> &str {
        &self.resource.name
    }
}

/// Pulls changes from a resource into the internal store.
pub struct SyncEngine<'a, S: StorageProvider> {
    store: &'a PersistenceStore<S>,
    executor: &'a PropagationExecutor,
    workflow: &'a dyn WorkflowAdapter,
}

impl<'a, S: StorageProvider> SyncEngine<'a, S> {
    pub fn new(
        store: &'a PersistenceStore<S>,
        executor: &'a PropagationExecutor,
        workflow: &'a dyn WorkflowAdapter,
    ) -> Self {
        Self {
            store,
            executor,
            workflow,
        }
    }

    /// Run a pull task.
    ///
    /// Configuration problems (unknown resource, missing or invalid mapping,
    /// unregistered connector or action) and a failing change enumeration
    /// abort the run before the first entry. Errors on single entries are
    /// recorded in the report and the run continues.
    pub async fn run(&self, ctx: &DomainContext, task: &SyncTask) -> ReconcilerResult<ReportSnapshot> {
        let run = self.prepare(ctx, task).await?;
        let connector = self.executor.connectors().create(&run.resource.connector)?;

        info!(
            "Starting {} pull '{}' of {} from '{}' in domain '{}'",
            if task.full_reconciliation { "full" } else { "incremental" },
            task.name,
            task.kind,
            task.resource,
            ctx.domain
        );

        let (deltas, latest_token) = if task.full_reconciliation {
            (self.full_deltas(ctx, &run, connector.as_ref()).await?, None)
        } else {
            let token = self.store.sync_token(ctx, &task.resource, task.kind).await?;
            let batch = call_with_timeout(
                run.source(),
                self.executor.timeout_for(&run.resource),
                connector.sync(task.kind, token.as_deref()),
            )
            .await?;
            (batch.deltas, batch.latest_token)
        };

        run.hooks.before_all(ctx, &run.profile).await?;

        let mut results = Vec::with_capacity(deltas.len());
        for delta in deltas {
            results.push(self.process(ctx, &run, delta).await);
        }

        run.hooks.after_all(ctx, &run.profile, &results).await;

        if !run.settings().dry_run {
            if let Some(token) = latest_token {
                self.store
                    .save_sync_token(ctx, &task.resource, task.kind, &token)
                    .await?;
            }
            self.store.flush().await?;
        }

        let snapshot = run.report.finish();
        info!(
            "Pull '{}' from '{}' finished: {}",
            task.name,
            task.resource,
            snapshot.summary()
        );
        Ok(snapshot)
    }

    async fn prepare<'t>(&self, ctx: &DomainContext, task: &'t SyncTask) -> ReconcilerResult<PullRun<'t>> {
        let resources = self.store.resources(ctx).await?;
        let resource = resources
            .get(&task.resource)
            .cloned()
            .ok_or_else(|| ReconcilerError::resource_not_found(&task.resource))?;
        let mapping = resource.mapping(task.kind).cloned().ok_or_else(|| {
            ReconcilerError::configuration(format!(
                "resource '{}' has no {} mapping",
                resource.name, task.kind
            ))
        })?;
        mapping.validate(&resource.name)?;
        let hooks = HookChain::new(self.executor.actions().resolve_sync(&task.settings.actions)?);
        let schemas = self.store.schemas(ctx).await?;

        Ok(PullRun {
            task,
            profile: SyncProfile {
                task: task.name.clone(),
                resource: resource.name.clone(),
                kind: task.kind,
                direction: SyncDirection::Pull,
                dry_run: task.settings.dry_run,
            },
            resources,
            resource,
            mapping,
            schemas,
            hooks,
            report: ProvisioningReport::new(),
        })
    }

    /// Every external object, plus a delete for each linked identity that is
    /// gone from the resource.
    async fn full_deltas(
        &self,
        ctx: &DomainContext,
        run: &PullRun<'_>,
        connector: &dyn Connector,
    ) -> ReconcilerResult<Vec<SyncDelta>> {
        let objects = call_with_timeout(
            run.source(),
            self.executor.timeout_for(&run.resource),
            connector.search(run.task.kind, None),
        )
        .await?;

        let present: HashSet<String> = objects.iter().map(|o| o.uid.clone()).collect();
        let engine = MappingEngine::new(&run.schemas);
        let missing: Vec<String> = self
            .store
            .find_identities(ctx, run.task.kind, |identity| {
                identity.is_linked_to(run.source())
            })
            .await?
            .iter()
            .filter_map(|identity| engine.resolve_account_id(&run.mapping, identity))
            .filter(|account_id| !present.contains(account_id))
            .collect();

        debug!(
            "Full pull from '{}': {} object(s), {} missing",
            run.source(),
            objects.len(),
            missing.len()
        );

        Ok(objects
            .into_iter()
            .map(|object| SyncDelta::create_or_update(object, ""))
            .chain(missing.into_iter().map(|uid| SyncDelta::delete(uid, "")))
            .collect())
    }

    async fn process(&self, ctx: &DomainContext, run: &PullRun<'_>, delta: SyncDelta) -> EntryResult {
        let engine = MappingEngine::new(&run.schemas);
        let pulled = delta
            .object
            .as_ref()
            .map(|object| engine.to_internal_patch(&run.mapping, &object.attributes));

        let mut entry = SyncEntry {
            direction: SyncDirection::Pull,
            resource: run.source().to_string(),
            kind: run.task.kind,
            account_id: delta.uid,
            delta_type: delta.delta_type,
            object: delta.object,
            identity: None,
        };

        let correlator = Correlator::new(self.store, &run.schemas);
        match correlator
            .correlate(ctx, &run.resource, &run.mapping, &entry.account_id, pulled.as_ref())
            .await
        {
            Ok(identity) => entry.identity = identity,
            Err(error) => return self.fail(ctx, run, &entry, None, error).await,
        }

        let Some(action) = classify(&entry, run.settings()) else {
            let result = EntryResult::ignored(&entry, None, "no action configured for entry");
            return self.complete(ctx, run, &entry, result).await;
        };
        debug!(
            "Entry '{}' from '{}' classified as {}",
            entry.account_id,
            run.source(),
            action
        );

        if !run.settings().permits(action) {
            let result = EntryResult::ignored(&entry, Some(action), format!("{} disabled by task", action));
            return self.complete(ctx, run, &entry, result).await;
        }
        if run.settings().dry_run {
            let result = EntryResult::planned(&entry, action);
            record(&run.report, &result);
            return result;
        }

        let mut patch = seed_patch(action, pulled, run.source());
        match run.hooks.before(action, ctx, &run.profile, &entry, &mut patch).await {
            Ok(()) => {}
            Err(SyncActionError::Ignore { reason }) => {
                let result = EntryResult::ignored(&entry, Some(action), reason);
                return self.complete(ctx, run, &entry, result).await;
            }
            Err(error) => return self.fail(ctx, run, &entry, Some(action), error.into()).await,
        }

        match self.apply(ctx, run, &entry, action, patch).await {
            Ok(result) => self.complete(ctx, run, &entry, result).await,
            Err(error) => self.fail(ctx, run, &entry, Some(action), error).await,
        }
    }

    async fn apply(
        &self,
        ctx: &DomainContext,
        run: &PullRun<'_>,
        entry: &SyncEntry,
        action: EntryAction,
        patch: IdentityPatch,
    ) -> ReconcilerResult<EntryResult> {
        match action {
            EntryAction::Provision | EntryAction::Assign => {
                let mut identity = patch.to_identity(run.task.kind, &entry.account_id);
                let _guard = self
                    .store
                    .lock_identity(ctx, identity.kind, &identity.key)
                    .await;
                identity.status = self.workflow.current_status(ctx, &identity).await?;
                let identity = self
                    .store
                    .create_identity(ctx, &run.schemas, identity)
                    .await?;
                self.propagate_elsewhere(ctx, run, &identity, PropagationOperation::Create, patch.password.as_deref())
                    .await;
                Ok(EntryResult::succeeded(&identity.key, entry, action))
            }
            EntryAction::Update | EntryAction::Link | EntryAction::Unlink => {
                let (_guard, mut identity) = lock_matched(self.store, ctx, entry).await?;
                if !patch.apply(&mut identity) {
                    return Ok(EntryResult::ignored(entry, Some(action), "no changes"));
                }
                identity.status = self.workflow.current_status(ctx, &identity).await?;
                let identity = self.store.save_identity(ctx, &run.schemas, identity).await?;
                if action == EntryAction::Update {
                    self.propagate_elsewhere(ctx, run, &identity, PropagationOperation::Update, patch.password.as_deref())
                        .await;
                }
                Ok(EntryResult::succeeded(&identity.key, entry, action))
            }
            EntryAction::Delete => {
                let (_guard, identity) = lock_matched(self.store, ctx, entry).await?;
                self.store
                    .delete_identity(ctx, identity.kind, &identity.key)
                    .await?;
                self.propagate_elsewhere(ctx, run, &identity, PropagationOperation::Delete, None)
                    .await;
                Ok(EntryResult::succeeded(&identity.key, entry, action))
            }
            EntryAction::Deprovision | EntryAction::Unassign => {
                let (_guard, mut identity) = lock_matched(self.store, ctx, entry).await?;
                if patch.apply(&mut identity) {
                    identity = self.store.save_identity(ctx, &run.schemas, identity).await?;
                }
                run_on_source(
                    self.executor,
                    ctx,
                    &run.resource,
                    &run.schemas,
                    &identity,
                    PropagationOperation::Delete,
                )
                .await?;
                Ok(EntryResult::succeeded(&identity.key, entry, action))
            }
        }
    }

    /// Propagate to every resource of the identity except the source.
    async fn propagate_elsewhere(
        &self,
        ctx: &DomainContext,
        run: &PullRun<'_>,
        identity: &Identity,
        operation: PropagationOperation,
        password: Option<&str>,
    ) {
        let excluded = BTreeSet::from([run.source().to_string()]);
        let outcome = self
            .executor
            .propagate(
                ctx,
                &run.resources,
                &run.schemas,
                identity,
                operation,
                &excluded,
                password,
                &run.report,
            )
            .await;
        if !outcome.is_success() {
            warn!(
                "{} of {} '{}' failed on {} resource(s)",
                operation,
                identity.kind,
                identity.key,
                outcome.failures().count()
            );
        }
    }

    async fn complete(
        &self,
        ctx: &DomainContext,
        run: &PullRun<'_>,
        entry: &SyncEntry,
        result: EntryResult,
    ) -> EntryResult {
        record(&run.report, &result);
        run.hooks.after(ctx, &run.profile, entry, &result).await;
        result
    }

    async fn fail(
        &self,
        ctx: &DomainContext,
        run: &PullRun<'_>,
        entry: &SyncEntry,
        action: Option<EntryAction>,
        error: ReconcilerError,
    ) -> EntryResult {
        let error: ReconcilerError = SynchronizationEntryError::new(entry.report_key(), error).into();
        warn!("Pull from '{}': {}", run.source(), error);
        let result = EntryResult::failed(entry, action, error.to_string());
        record(&run.report, &result);
        run.hooks.on_error(ctx, &run.profile, entry, &error).await;
        result
    }
}

/// Action for a pulled entry; `None` when nothing is to be done.
fn classify(entry: &SyncEntry, settings: &SyncSettings) -> Option<EntryAction> {
    match (entry.delta_type, &entry.identity) {
        (SyncDeltaType::Delete, Some(identity)) if identity.is_linked_to(&entry.resource) => {
            Some(EntryAction::Delete)
        }
        (SyncDeltaType::Delete, _) => None,
        (SyncDeltaType::CreateOrUpdate, Some(_)) => match settings.matching_rule {
            MatchingRule::Update => Some(EntryAction::Update),
            MatchingRule::Deprovision => Some(EntryAction::Deprovision),
            MatchingRule::Unassign => Some(EntryAction::Unassign),
            MatchingRule::Link => Some(EntryAction::Link),
            MatchingRule::Unlink => Some(EntryAction::Unlink),
            MatchingRule::Ignore => None,
        },
        (SyncDeltaType::CreateOrUpdate, None) => match settings.unmatching_rule {
            UnmatchingRule::Provision => Some(EntryAction::Provision),
            UnmatchingRule::Assign => Some(EntryAction::Assign),
            UnmatchingRule::Unlink | UnmatchingRule::Ignore => None,
        },
    }
}

/// Patch handed to the `before_*` hook and applied afterwards.
fn seed_patch(action: EntryAction, pulled: Option<IdentityPatch>, source: &str) -> IdentityPatch {
    match action {
        EntryAction::Update | EntryAction::Provision => pulled.unwrap_or_default(),
        EntryAction::Assign => pulled.unwrap_or_default().with_resource(source),
        EntryAction::Link => IdentityPatch::new().with_resource(source),
        EntryAction::Unlink | EntryAction::Unassign => IdentityPatch::new().without_resource(source),
        EntryAction::Delete | EntryAction::Deprovision => IdentityPatch::new(),
    }
}

/// Execute one operation on `resource` only, whether or not the identity is
/// still linked to it. The task result is returned instead of reported.
pub(super) async fn run_on_source(
    executor: &PropagationExecutor,
    ctx: &DomainContext,
    resource: &ExternalResource,
    schemas: &SchemaRegistry,
    identity: &Identity,
    operation: PropagationOperation,
) -> ReconcilerResult<TaskResult> {
    let mut target = identity.clone();
    target.resources = BTreeSet::from([resource.name.clone()]);
    let only = ResourceMap::from([(resource.name.clone(), resource.clone())]);

    let outcome = executor
        .propagate(
            ctx,
            &only,
            schemas,
            &target,
            operation,
            &BTreeSet::new(),
            None,
            &ProvisioningReport::new(),
        )
        .await;
    let Some(result) = outcome.results.into_iter().next() else {
        return Err(PropagationError::new(
            &resource.name,
            PropagationCause::Configuration {
                message: format!("nothing to {} for '{}'", operation, identity.key),
            },
        )
        .into());
    };
    if result.status.is_failure() {
        return Err(PropagationError::new(
            &resource.name,
            PropagationCause::Task {
                message: result.message.unwrap_or_default(),
            },
        )
        .into());
    }
    Ok(result)
}

/// Lock the correlated identity and read it again from the store.
///
/// Whatever was written since correlation is seen by the caller; the guard
/// keeps other writers out until it is dropped.
pub(super) async fn lock_matched<S: StorageProvider>(
    store: &PersistenceStore<S>,
    ctx: &DomainContext,
    entry: &SyncEntry,
) -> ReconcilerResult<(IdentityGuard, Identity)> {
    let correlated = entry.identity.as_ref().ok_or_else(|| {
        ReconcilerError::configuration(format!(
            "entry '{}' on '{}' has no correlated identity",
            entry.account_id, entry.resource
        ))
    })?;
    let guard = store
        .lock_identity(ctx, correlated.kind, &correlated.key)
        .await;
    let identity = store
        .find_identity(ctx, correlated.kind, &correlated.key)
        .await?
        .ok_or_else(|| ReconcilerError::identity_not_found(correlated.kind, &correlated.key))?;
    Ok((guard, identity))
}

pub(super) fn record(report: &ProvisioningReport, result: &EntryResult) {
    report.report_operation(
        &result.identity_key,
        &result.resource,
        result.operation,
        result.status,
        result.message.clone(),
    );
}
