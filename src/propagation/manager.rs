//! Builds propagation tasks for an identity change.

use super::{PropagationOperation, PropagationTask};
use crate::context::DomainContext;
use crate::identity::Identity;
use crate::mapping::MappingEngine;
use crate::resource::{ExternalResource, ResourceMap};
use crate::schema::SchemaRegistry;
use crate::workflow::enabled_for_status;
use log::{debug, warn};
use std::collections::BTreeSet;

/// Computes the tasks an identity change requires. Pure: no I/O.
#[derive(Debug, Clone, Copy)]
pub struct PropagationManager<'a> {
    resources: &'a ResourceMap,
    schemas: &'a SchemaRegistry,
}

impl<'a> PropagationManager<'a> {
    pub fn new(resources: &'a ResourceMap, schemas: &'a SchemaRegistry) -> Self {
        Self { resources, schemas }
    }

    /// One task per resource assigned to `identity` and not in `excluded`.
    ///
    /// Resources without a mapping for the identity's kind, or whose mapping
    /// has nothing to push, produce no task. Priority resources come first by
    /// ascending priority then name; the rest follow by name.
    pub fn build_tasks(
        &self,
        ctx: &DomainContext,
        identity: &Identity,
        operation: PropagationOperation,
        excluded: &BTreeSet<String>,
        password: Option<&str>,
    ) -> Vec<PropagationTask> {
        let engine = MappingEngine::new(self.schemas);
        let enabled = enabled_for_status(identity.status.as_deref());

        let mut targets: Vec<&ExternalResource> = identity
            .resources
            .iter()
            .filter(|name| !excluded.contains(*name))
            .filter_map(|name| {
                let resource = self.resources.get(name);
                if resource.is_none() {
                    warn!("{} '{}' is assigned to unknown resource '{}'", identity.kind, identity.key, name);
                }
                resource
            })
            .collect();
        targets.sort_by(|a, b| {
            match (a.propagation_priority, b.propagation_priority) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
            .then_with(|| a.name.cmp(&b.name))
        });

        let mut tasks = Vec::with_capacity(targets.len());
        for resource in targets {
            let Some(mapping) = resource.mapping(identity.kind) else {
                debug!("No {} mapping on '{}', nothing to propagate", identity.kind, resource.name);
                continue;
            };
            if !mapping.has_push_items() {
                continue;
            }
            let Some(account_id) = engine.resolve_account_id(mapping, identity) else {
                warn!(
                    "Cannot resolve account id of {} '{}' on '{}', skipping",
                    identity.kind, identity.key, resource.name
                );
                continue;
            };

            let attributes = match operation {
                PropagationOperation::Delete => Default::default(),
                _ => engine.to_external_attributes(mapping, identity, password),
            };

            let mut task = PropagationTask::new(
                ctx.domain(),
                identity.kind,
                &identity.key,
                operation,
                &resource.name,
                account_id,
            )
            .with_attributes(attributes)
            .with_mode(resource.propagation_mode)
            .with_priority(resource.propagation_priority);
            if operation != PropagationOperation::Delete {
                task.enabled = enabled;
                task.password = password.map(str::to_string);
            }
            tasks.push(task);
        }

        debug!(
            "Built {} {} task(s) for {} '{}'",
            tasks.len(),
            operation,
            identity.kind,
            identity.key
        );
        tasks
    }
}
