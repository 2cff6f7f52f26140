//! Hooks around the execution of a propagation task.

use super::{PropagationTask, TaskExecution};
use crate::context::DomainContext;
use crate::error::ReconcilerResult;
use async_trait::async_trait;

/// Custom logic run around every task of a resource.
///
/// Resources name their actions; names are resolved through the
/// [`ActionRegistry`](crate::actions::ActionRegistry) when the resource is
/// saved and again when the task runs.
///
/// Actions run while the identity is locked for writing. Changing the same
/// identity through the reconciler from inside an action waits forever.
#[async_trait]
pub trait PropagationActions: Send + Sync {
    /// Runs before the connector call; may rewrite the task.
    ///
    /// An error fails the task without contacting the resource.
    async fn before(&self, _ctx: &DomainContext, _task: &mut PropagationTask) -> ReconcilerResult<()> {
        Ok(())
    }

    /// Runs after the connector call, whatever its outcome.
    async fn after(&self, _ctx: &DomainContext, _task: &PropagationTask, _execution: &TaskExecution) {}
}

/// Adds fixed attribute values to every task.
///
/// Handy for resources that require constant attributes such as an object
/// class or an organizational unit.
#[derive(Debug, Clone, Default)]
pub struct DefaultValuesAction {
    values: Vec<(String, String)>,
}

impl DefaultValuesAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.push((attribute.into(), value.into()));
        self
    }
}

#[async_trait]
impl PropagationActions for DefaultValuesAction {
    async fn before(&self, _ctx: &DomainContext, task: &mut PropagationTask) -> ReconcilerResult<()> {
        if task.operation == super::PropagationOperation::Delete {
            return Ok(());
        }
        for (attribute, value) in &self.values {
            task.attributes
                .entry(attribute.clone())
                .or_insert_with(|| vec![value.clone()]);
        }
        Ok(())
    }
}
