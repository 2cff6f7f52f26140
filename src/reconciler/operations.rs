//! Reconciler operations.
//!
//! Identity changes made through the reconciler are validated, stored and
//! then propagated to every resource the identity is assigned to. Each change
//! holds the identity's store lock from the read to the end of propagation.
//! Runs (propagation, pull, push) return the frozen report and hand it to the
//! configured sinks.

use super::core::Reconciler;
use crate::connector::call_with_timeout;
use crate::context::DomainContext;
use crate::error::{ReconcilerError, ReconcilerResult};
use crate::identity::{Identity, IdentityKind, IdentityPatch, password_digest};
use crate::mapping::MappingEngine;
use crate::propagation::{PropagationOperation, TaskExecution};
use crate::report::{ProvisioningReport, ReportSnapshot};
use crate::resource::{ExternalResource, ResourceMap};
use crate::scheduler::{JobAction, Scheduler};
use crate::schema::{SchemaDefinition, SchemaRegistry};
use crate::storage::StorageProvider;
use crate::sync::{PushEngine, PushTask, SyncEngine, SyncTask};
use futures::FutureExt;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Work a scheduled job performs in each domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    Synchronization(SyncTask),
    Push(PushTask),
    Propagation {
        kind: IdentityKind,
        key: String,
        operation: PropagationOperation,
    },
}

impl JobKind {
    fn trigger_name(&self) -> String {
        match self {
            Self::Synchronization(task) => format!("pull:{}", task.resource),
            Self::Push(task) => format!("push:{}", task.resource),
            Self::Propagation { kind, key, operation } => {
                format!("propagate:{}:{}:{}", operation, kind, key)
            }
        }
    }
}

impl<S: StorageProvider> Reconciler<S> {
    /// Validate and store an external resource.
    ///
    /// Unregistered connector types or propagation actions, mapping
    /// violations and names not matching the configured pattern are rejected
    /// before anything is written.
    pub async fn save_resource(
        &self,
        ctx: &DomainContext,
        resource: &ExternalResource,
    ) -> ReconcilerResult<()> {
        resource.validate(
            &self.name_pattern,
            self.executor.connectors(),
            self.executor.actions(),
        )?;
        self.store.save_resource(ctx, resource).await?;
        info!("Saved resource '{}' in domain '{}'", resource.name, ctx.domain);
        Ok(())
    }

    pub async fn delete_resource(&self, ctx: &DomainContext, name: &str) -> ReconcilerResult<bool> {
        self.store.delete_resource(ctx, name).await
    }

    /// Store a schema after checking it fits the existing ones.
    pub async fn save_schema(
        &self,
        ctx: &DomainContext,
        definition: SchemaDefinition,
    ) -> ReconcilerResult<()> {
        let mut registry = self.store.schemas(ctx).await?;
        registry.add(definition.clone())?;
        self.store.save_schema(ctx, &definition).await
    }

    /// Create an identity and provision it to its resources.
    pub async fn create_identity(
        &self,
        ctx: &DomainContext,
        mut identity: Identity,
        password: Option<&str>,
    ) -> ReconcilerResult<(Identity, ReportSnapshot)> {
        let _guard = self
            .store
            .lock_identity(ctx, identity.kind, &identity.key)
            .await;
        if let Some(password) = password {
            identity.password_digest = Some(password_digest(password));
        }
        identity.status = self.workflow.current_status(ctx, &identity).await?;

        let schemas = self.store.schemas(ctx).await?;
        let identity = self.store.create_identity(ctx, &schemas, identity).await?;
        let resources = self.store.resources(ctx).await?;

        let report = ProvisioningReport::new();
        self.executor
            .propagate(
                ctx,
                &resources,
                &schemas,
                &identity,
                PropagationOperation::Create,
                &BTreeSet::new(),
                password,
                &report,
            )
            .await;
        Ok((identity, self.finish(report)))
    }

    /// Apply a patch and propagate the result.
    ///
    /// Resources removed by the patch receive a delete; every resource still
    /// assigned receives an update.
    pub async fn update_identity(
        &self,
        ctx: &DomainContext,
        kind: IdentityKind,
        key: &str,
        patch: IdentityPatch,
    ) -> ReconcilerResult<(Identity, ReportSnapshot)> {
        let _guard = self.store.lock_identity(ctx, kind, key).await;
        let mut identity = self
            .store
            .find_identity(ctx, kind, key)
            .await?
            .ok_or_else(|| ReconcilerError::identity_not_found(kind, key))?;
        let unassigned: BTreeSet<String> = patch
            .resources_to_remove
            .intersection(&identity.resources)
            .cloned()
            .collect();

        let report = ProvisioningReport::new();
        if !patch.apply(&mut identity) {
            debug!("Patch leaves {} '{}' unchanged", kind, key);
            return Ok((identity, self.finish(report)));
        }
        identity.status = self.workflow.current_status(ctx, &identity).await?;

        let schemas = self.store.schemas(ctx).await?;
        let identity = self.store.save_identity(ctx, &schemas, identity).await?;
        let resources = self.store.resources(ctx).await?;

        if !unassigned.is_empty() {
            let mut removed = identity.clone();
            removed.resources = unassigned;
            self.executor
                .propagate(
                    ctx,
                    &resources,
                    &schemas,
                    &removed,
                    PropagationOperation::Delete,
                    &BTreeSet::new(),
                    None,
                    &report,
                )
                .await;
        }
        self.executor
            .propagate(
                ctx,
                &resources,
                &schemas,
                &identity,
                PropagationOperation::Update,
                &BTreeSet::new(),
                patch.password.as_deref(),
                &report,
            )
            .await;
        Ok((identity, self.finish(report)))
    }

    /// Delete an identity and deprovision it from its resources.
    pub async fn delete_identity(
        &self,
        ctx: &DomainContext,
        kind: IdentityKind,
        key: &str,
    ) -> ReconcilerResult<ReportSnapshot> {
        let _guard = self.store.lock_identity(ctx, kind, key).await;
        let identity = self
            .store
            .find_identity(ctx, kind, key)
            .await?
            .ok_or_else(|| ReconcilerError::identity_not_found(kind, key))?;
        self.store.delete_identity(ctx, kind, key).await?;

        let schemas = self.store.schemas(ctx).await?;
        let resources = self.store.resources(ctx).await?;
        let report = ProvisioningReport::new();
        self.executor
            .propagate(
                ctx,
                &resources,
                &schemas,
                &identity,
                PropagationOperation::Delete,
                &BTreeSet::new(),
                None,
                &report,
            )
            .await;
        Ok(self.finish(report))
    }

    /// Propagate the stored state of an identity to its resources, except
    /// those in `excluded`.
    pub async fn propagate(
        &self,
        ctx: &DomainContext,
        kind: IdentityKind,
        key: &str,
        operation: PropagationOperation,
        excluded: &BTreeSet<String>,
    ) -> ReconcilerResult<ReportSnapshot> {
        let _guard = self.store.lock_identity(ctx, kind, key).await;
        let identity = self
            .store
            .find_identity(ctx, kind, key)
            .await?
            .ok_or_else(|| ReconcilerError::identity_not_found(kind, key))?;
        let schemas = self.store.schemas(ctx).await?;
        let resources = self.store.resources(ctx).await?;

        let report = ProvisioningReport::new();
        self.executor
            .propagate(ctx, &resources, &schemas, &identity, operation, excluded, None, &report)
            .await;
        Ok(self.finish(report))
    }

    pub async fn run_synchronization(
        &self,
        ctx: &DomainContext,
        task: &SyncTask,
    ) -> ReconcilerResult<ReportSnapshot> {
        let snapshot = SyncEngine::new(&self.store, &self.executor, self.workflow.as_ref())
            .run(ctx, task)
            .await?;
        self.publish(&snapshot);
        Ok(snapshot)
    }

    pub async fn run_push(&self, ctx: &DomainContext, task: &PushTask) -> ReconcilerResult<ReportSnapshot> {
        let snapshot = PushEngine::new(&self.store, &self.executor, self.workflow.as_ref())
            .run(ctx, task)
            .await?;
        self.publish(&snapshot);
        Ok(snapshot)
    }

    /// Complete a two-phase task with the resource's answer.
    pub async fn confirm_task(
        &self,
        task_id: &str,
        result: Result<(), String>,
    ) -> ReconcilerResult<TaskExecution> {
        self.executor.confirm(task_id, result).await
    }

    /// Fail two-phase submissions left unconfirmed past the configured max
    /// age. Also runs at the start of every propagation batch.
    pub async fn expire_submissions(&self) -> Vec<TaskExecution> {
        self.executor.expire_submissions().await
    }

    /// Read virtual attributes from their resources into
    /// `identity.virtual_attrs`. Values are never stored.
    ///
    /// Attributes whose resource is unknown or unreachable are left out with
    /// a warning. Returns how many attributes were resolved.
    pub async fn resolve_virtual_attributes(
        &self,
        ctx: &DomainContext,
        identity: &mut Identity,
    ) -> ReconcilerResult<usize> {
        let schemas = self.store.schemas(ctx).await?;
        let resources = self.store.resources(ctx).await?;
        let mut resolved = 0;

        for schema in schemas.virtual_schemas(identity.kind) {
            match self
                .read_virtual(&resources, &schemas, identity, &schema.resource, &schema.external_attribute)
                .await
            {
                Ok(Some(values)) => {
                    identity.virtual_attrs.insert(schema.name.clone(), values);
                    resolved += 1;
                }
                Ok(None) => {}
                Err(e) => warn!(
                    "Cannot resolve virtual attribute '{}' of '{}': {}",
                    schema.name, identity.key, e
                ),
            }
        }
        Ok(resolved)
    }

    async fn read_virtual(
        &self,
        resources: &ResourceMap,
        schemas: &SchemaRegistry,
        identity: &Identity,
        resource: &str,
        attribute: &str,
    ) -> ReconcilerResult<Option<Vec<String>>> {
        let resource = resources
            .get(resource)
            .ok_or_else(|| ReconcilerError::resource_not_found(resource))?;
        let Some(account_id) = resource
            .mapping(identity.kind)
            .and_then(|mapping| MappingEngine::new(schemas).resolve_account_id(mapping, identity))
        else {
            return Ok(None);
        };
        let connector = self.executor.connectors().create(&resource.connector)?;
        let object = call_with_timeout(
            &resource.name,
            self.executor.timeout_for(resource),
            connector.get(identity.kind, &account_id),
        )
        .await?;
        Ok(object.and_then(|object| object.attributes.get(attribute).cloned()))
    }

    /// Run a job once in every domain, one domain after the other.
    ///
    /// A failure in one domain does not stop the others; all failures are
    /// returned together.
    pub async fn run_job(&self, job: &JobKind, domains: &[DomainContext]) -> ReconcilerResult<()> {
        let mut failures = Vec::new();
        for domain in domains {
            let ctx = domain.child();
            let result = match job {
                JobKind::Synchronization(task) => self.run_synchronization(&ctx, task).await.map(drop),
                JobKind::Push(task) => self.run_push(&ctx, task).await.map(drop),
                JobKind::Propagation {
                    kind,
                    key,
                    operation,
                } => self
                    .propagate(&ctx, *kind, key, *operation, &BTreeSet::new())
                    .await
                    .map(drop),
            };
            if let Err(e) = result {
                warn!("Job {} failed in domain '{}': {}", job.trigger_name(), ctx.domain, e);
                failures.push(format!("{}: {}", ctx.domain, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ReconcilerError::JobFailed {
                job: job.trigger_name(),
                message: failures.join("; "),
            })
        }
    }

    fn finish(&self, report: ProvisioningReport) -> ReportSnapshot {
        let snapshot = report.finish();
        self.publish(&snapshot);
        snapshot
    }
}

impl<S: StorageProvider + 'static> Reconciler<S> {
    /// Register `job` with the scheduler, running over `domains` every
    /// `every`. Returns the job id.
    pub fn schedule(
        self: &Arc<Self>,
        scheduler: &Scheduler,
        name: impl Into<String>,
        job: JobKind,
        domains: Vec<DomainContext>,
        every: Duration,
    ) -> String {
        let trigger_name = job.trigger_name();
        let reconciler = Arc::clone(self);
        let action: JobAction = Arc::new(move || {
            let reconciler = Arc::clone(&reconciler);
            let job = job.clone();
            let domains = domains.clone();
            async move { reconciler.run_job(&job, &domains).await }.boxed()
        });
        scheduler.schedule(name, trigger_name, every, action)
    }
}
