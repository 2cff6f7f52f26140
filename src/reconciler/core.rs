//! Core reconciler structure.

use crate::config::ReconcilerConfig;
use crate::connector::ConnInstance;
use crate::propagation::{ExecutionLog, PropagationExecutor};
use crate::report::{ReportSink, ReportSnapshot};
use crate::resource::ExternalResource;
use crate::storage::StorageProvider;
use crate::store::PersistenceStore;
use crate::workflow::WorkflowAdapter;
use regex::Regex;
use std::sync::Arc;

/// Identity reconciliation engine.
///
/// Every operation takes an explicit
/// [`DomainContext`](crate::context::DomainContext); nothing is shared between
/// domains except configuration and registries. Built with
/// [`ReconcilerBuilder`](super::ReconcilerBuilder).
pub struct Reconciler<S: StorageProvider> {
    pub(super) config: ReconcilerConfig,
    pub(super) name_pattern: Regex,
    pub(super) store: PersistenceStore<S>,
    pub(super) executor: PropagationExecutor,
    pub(super) workflow: Arc<dyn WorkflowAdapter>,
    pub(super) sinks: Vec<Arc<dyn ReportSink>>,
}

impl<S: StorageProvider> Reconciler<S> {
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn store(&self) -> &PersistenceStore<S> {
        &self.store
    }

    pub fn executor(&self) -> &PropagationExecutor {
        &self.executor
    }

    /// Append-only log of every task execution.
    pub fn execution_log(&self) -> &ExecutionLog {
        self.executor.execution_log()
    }

    /// A resource carrying the configured default propagation mode.
    pub fn new_resource(&self, name: impl Into<String>, connector: ConnInstance) -> ExternalResource {
        ExternalResource::new(name, connector).with_mode(self.config.default_propagation_mode)
    }

    /// Hand a finished report to every sink.
    pub(super) fn publish(&self, snapshot: &ReportSnapshot) {
        for sink in &self.sinks {
            sink.consume(snapshot);
        }
    }
}
