//! Builder for [`Reconciler`] instances.

use super::core::Reconciler;
use crate::actions::ActionRegistry;
use crate::config::ReconcilerConfig;
use crate::connector::ConnectorRegistry;
use crate::error::ReconcilerResult;
use crate::propagation::PropagationExecutor;
use crate::report::ReportSink;
use crate::storage::StorageProvider;
use crate::store::PersistenceStore;
use crate::workflow::{DefaultWorkflow, WorkflowAdapter};
use std::sync::Arc;

/// Fluent setup of a reconciler.
///
/// ```rust
/// use idm_reconciler::ReconcilerBuilder;
/// use idm_reconciler::config::ReconcilerConfig;
/// use idm_reconciler::connector::{ConnectorRegistry, MemoryConnector};
/// use idm_reconciler::storage::InMemoryStorage;
/// use std::sync::Arc;
///
/// let mut connectors = ConnectorRegistry::new();
/// connectors.register_instance("memory", Arc::new(MemoryConnector::new("ldap")));
///
/// let reconciler = ReconcilerBuilder::new(InMemoryStorage::new())
///     .with_config(ReconcilerConfig::default().with_max_concurrency(4))
///     .with_connectors(connectors)
///     .build()
///     .unwrap();
/// assert_eq!(reconciler.config().max_concurrency, 4);
/// ```
pub struct ReconcilerBuilder<S> {
    storage: S,
    config: ReconcilerConfig,
    connectors: ConnectorRegistry,
    actions: ActionRegistry,
    workflow: Arc<dyn WorkflowAdapter>,
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl<S: StorageProvider> ReconcilerBuilder<S> {
    /// Start from the default configuration, empty registries and the
    /// default workflow.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            config: ReconcilerConfig::default(),
            connectors: ConnectorRegistry::new(),
            actions: ActionRegistry::new(),
            workflow: Arc::new(DefaultWorkflow),
            sinks: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_connectors(mut self, connectors: ConnectorRegistry) -> Self {
        self.connectors = connectors;
        self
    }

    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_workflow(mut self, workflow: Arc<dyn WorkflowAdapter>) -> Self {
        self.workflow = workflow;
        self
    }

    /// Add a sink receiving the report of every run.
    pub fn with_report_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Validate the configuration and build the reconciler.
    pub fn build(self) -> ReconcilerResult<Reconciler<S>> {
        self.config.validate()?;
        let name_pattern = self.config.name_regex()?;
        let executor = PropagationExecutor::new(self.connectors, self.actions)
            .with_default_timeout(self.config.default_timeout())
            .with_max_concurrency(self.config.max_concurrency)
            .with_log_capacity(self.config.execution_log_capacity)
            .with_submission_max_age(self.config.submission_max_age());

        Ok(Reconciler {
            config: self.config,
            name_pattern,
            store: PersistenceStore::new(self.storage),
            executor,
            workflow: self.workflow,
            sinks: self.sinks,
        })
    }
}
