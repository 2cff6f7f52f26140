//! Push synchronization.
//!
//! Reconciles internal identities onto one resource: each identity is looked
//! up on the resource by account id and the task's matching or unmatching
//! rule decides what happens on either side.

use super::actions::HookChain;
use super::engine::{lock_matched, record, run_on_source};
use super::{
    Correlator, EntryAction, EntryResult, MatchingRule, PushTask, SyncDirection, SyncEntry,
    SyncProfile, SyncSettings, UnmatchingRule,
};
use crate::connector::{Connector, SyncDeltaType, call_with_timeout};
use crate::context::DomainContext;
use crate::error::{ReconcilerError, ReconcilerResult, SyncActionError, SynchronizationEntryError};
use crate::identity::{Identity, IdentityPatch};
use crate::mapping::{Mapping, MappingEngine};
use crate::propagation::{PropagationExecutor, PropagationOperation, TaskStatus};
use crate::report::{ProvisioningReport, ReportSnapshot};
use crate::resource::ExternalResource;
use crate::schema::SchemaRegistry;
use crate::storage::StorageProvider;
use crate::store::PersistenceStore;
use crate::workflow::WorkflowAdapter;
use log::{debug, info, warn};
use std::sync::Arc;

struct PushRun<'t> {
    task: &'t PushTask,
    resource: ExternalResource,
    mapping: Mapping,
    schemas: SchemaRegistry,
    hooks: HookChain,
    profile: SyncProfile,
    report: ProvisioningReport,
    connector: Arc<dyn Connector>,
}

impl PushRun<'_> {
    fn settings(&self) -> &SyncSettings {
        &self.task.settings
    }

    fn source(&self) -> &str {
        &self.resource.name
    }
}

/// Pushes internal identities onto a resource.
pub struct PushEngine<'a, S: StorageProvider> {
    store: &'a PersistenceStore<S>,
    executor: &'a PropagationExecutor,
    workflow: &'a dyn WorkflowAdapter,
}

impl<'a, S: StorageProvider> PushEngine<'a, S> {
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

    pub async fn run(&self, ctx: &DomainContext, task: &PushTask) -> ReconcilerResult<ReportSnapshot> {
        let run = self.prepare(ctx, task).await?;
        info!(
            "Starting push '{}' of {} to '{}' in domain '{}'",
            task.name, task.kind, task.resource, ctx.domain
        );

        let identities = self
            .store
            .find_identities(ctx, task.kind, |identity| {
                (task.include_unlinked || identity.is_linked_to(&task.resource))
                    && task.filter.as_ref().is_none_or(|filter| filter.matches(identity))
            })
            .await?;
        debug!("Push '{}' selected {} identities", task.name, identities.len());

        run.hooks.before_all(ctx, &run.profile).await?;

        let mut results = Vec::with_capacity(identities.len());
        for identity in identities {
            results.push(self.process(ctx, &run, identity).await);
        }

        run.hooks.after_all(ctx, &run.profile, &results).await;
        if !run.settings().dry_run {
            self.store.flush().await?;
        }

        let snapshot = run.report.finish();
        info!(
            "Push '{}' to '{}' finished: {}",
            task.name,
            task.resource,
            snapshot.summary()
        );
        Ok(snapshot)
    }

    async fn prepare<'t>(&self, ctx: &DomainContext, task: &'t PushTask) -> ReconcilerResult<PushRun<'t>> {
        let resource = self
            .store
            .find_resource(ctx, &task.resource)
            .await?
            .ok_or_else(|| ReconcilerError::resource_not_found(&task.resource))?;
        let mapping = resource.mapping(task.kind).cloned().ok_or_else(|| {
            ReconcilerError::configuration(format!(
                "resource '{}' has no {} mapping",
                resource.name, task.kind
            ))
        })?;
        mapping.validate(&resource.name)?;
        let hooks = HookChain::new(self.executor.actions().resolve_sync(&task.settings.actions)?);
        let connector = self.executor.connectors().create(&resource.connector)?;

        Ok(PushRun {
            task,
            profile: SyncProfile {
                task: task.name.clone(),
                resource: resource.name.clone(),
                kind: task.kind,
                direction: SyncDirection::Push,
                dry_run: task.settings.dry_run,
            },
            schemas: self.store.schemas(ctx).await?,
            resource,
            mapping,
            hooks,
            report: ProvisioningReport::new(),
            connector,
        })
    }

    async fn process(&self, ctx: &DomainContext, run: &PushRun<'_>, identity: Identity) -> EntryResult {
        let engine = MappingEngine::new(&run.schemas);
        let mut entry = SyncEntry {
            direction: SyncDirection::Push,
            resource: run.source().to_string(),
            kind: run.task.kind,
            account_id: engine
                .resolve_account_id(&run.mapping, &identity)
                .unwrap_or_default(),
            delta_type: SyncDeltaType::CreateOrUpdate,
            object: None,
            identity: Some(identity),
        };
        if entry.account_id.is_empty() {
            let error = ReconcilerError::configuration(format!(
                "cannot resolve account id on '{}'",
                run.source()
            ));
            return self.fail(ctx, run, &entry, None, error).await;
        }

        let correlator = Correlator::new(self.store, &run.schemas);
        let lookup = call_with_timeout(
            run.source(),
            self.executor.timeout_for(&run.resource),
            correlator.correlate_external(
                run.connector.as_ref(),
                run.task.kind,
                &run.mapping,
                &entry.account_id,
            ),
        )
        .await;
        match lookup {
            Ok(object) => entry.object = object,
            Err(error) => return self.fail(ctx, run, &entry, None, error).await,
        }

        let Some(action) = classify(&entry, run.settings()) else {
            let result = EntryResult::ignored(&entry, None, "no action configured for entry");
            return self.complete(ctx, run, &entry, result).await;
        };
        debug!(
            "Identity '{}' on '{}' classified as {}",
            entry.report_key(),
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

        let mut patch = seed_patch(action, run.source());
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
        run: &PushRun<'_>,
        entry: &SyncEntry,
        action: EntryAction,
        patch: IdentityPatch,
    ) -> ReconcilerResult<EntryResult> {
        let (_guard, mut identity) = lock_matched(self.store, ctx, entry).await?;
        let key = identity.key.clone();

        let operation = match action {
            EntryAction::Update => Some(PropagationOperation::Update),
            EntryAction::Provision | EntryAction::Assign => Some(PropagationOperation::Create),
            EntryAction::Deprovision | EntryAction::Unassign | EntryAction::Delete => {
                Some(PropagationOperation::Delete)
            }
            EntryAction::Link | EntryAction::Unlink => None,
        };

        let changed = patch.apply(&mut identity);
        if operation.is_none() && !changed {
            return Ok(EntryResult::ignored(entry, Some(action), "no changes"));
        }

        // links change only once the resource accepted the operation
        let submitted = match operation {
            Some(operation) => {
                run_on_source(
                    self.executor,
                    ctx,
                    &run.resource,
                    &run.schemas,
                    &identity,
                    operation,
                )
                .await?
                .status
                    == TaskStatus::Submitted
            }
            None => false,
        };

        let persist = matches!(
            action,
            EntryAction::Assign | EntryAction::Unassign | EntryAction::Link | EntryAction::Unlink
        );
        if persist && changed {
            identity.status = self.workflow.current_status(ctx, &identity).await?;
            self.store.save_identity(ctx, &run.schemas, identity).await?;
        }

        let outcome = EntryResult::succeeded(key, entry, action);
        Ok(if submitted {
            outcome.with_message("submitted, awaiting confirmation")
        } else {
            outcome
        })
    }

    async fn complete(
        &self,
        ctx: &DomainContext,
        run: &PushRun<'_>,
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
        run: &PushRun<'_>,
        entry: &SyncEntry,
        action: Option<EntryAction>,
        error: ReconcilerError,
    ) -> EntryResult {
        let error: ReconcilerError = SynchronizationEntryError::new(entry.report_key(), error).into();
        warn!("Push to '{}': {}", run.source(), error);
        let result = EntryResult::failed(entry, action, error.to_string());
        record(&run.report, &result);
        run.hooks.on_error(ctx, &run.profile, entry, &error).await;
        result
    }
}

fn classify(entry: &SyncEntry, settings: &SyncSettings) -> Option<EntryAction> {
    let linked = entry
        .identity
        .as_ref()
        .is_some_and(|identity| identity.is_linked_to(&entry.resource));
    if entry.object.is_some() {
        match settings.matching_rule {
            MatchingRule::Update => Some(EntryAction::Update),
            MatchingRule::Deprovision => Some(EntryAction::Deprovision),
            MatchingRule::Unassign => Some(EntryAction::Unassign),
            MatchingRule::Link => Some(EntryAction::Link),
            MatchingRule::Unlink => Some(EntryAction::Unlink),
            MatchingRule::Ignore => None,
        }
    } else {
        match settings.unmatching_rule {
            UnmatchingRule::Provision => Some(EntryAction::Provision),
            UnmatchingRule::Assign => Some(EntryAction::Assign),
            UnmatchingRule::Unlink if linked => Some(EntryAction::Unlink),
            UnmatchingRule::Unlink | UnmatchingRule::Ignore => None,
        }
    }
}

fn seed_patch(action: EntryAction, resource: &str) -> IdentityPatch {
    match action {
        EntryAction::Link | EntryAction::Assign => IdentityPatch::new().with_resource(resource),
        EntryAction::Unlink | EntryAction::Unassign => IdentityPatch::new().without_resource(resource),
        _ => IdentityPatch::new(),
    }
}
