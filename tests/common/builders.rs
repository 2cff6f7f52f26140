//! Fluent setup of a reconciler wired to in-memory resources.

use super::TestEnv;
use idm_reconciler::actions::ActionRegistry;
use idm_reconciler::connector::{ConnInstance, ConnectorRegistry, MemoryConnector};
use idm_reconciler::propagation::PropagationActions;
use idm_reconciler::report::MemoryReportSink;
use idm_reconciler::storage::InMemoryStorage;
use idm_reconciler::sync::SyncActions;
use idm_reconciler::workflow::WorkflowAdapter;
use idm_reconciler::{DomainContext, ExternalResource, Mapping, ReconcilerBuilder, ReconcilerConfig};
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a [`TestEnv`]. Every resource gets its own [`MemoryConnector`]
/// registered under the resource name.
pub struct EnvBuilder {
    config: ReconcilerConfig,
    resources: Vec<ExternalResource>,
    actions: ActionRegistry,
    workflow: Option<Arc<dyn WorkflowAdapter>>,
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self {
            config: ReconcilerConfig::default(),
            resources: Vec::new(),
            actions: ActionRegistry::new(),
            workflow: None,
        }
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a resource with a user mapping.
    pub fn with_resource(self, name: &str, mapping: Mapping) -> Self {
        self.with_resource_def(ExternalResource::new(name, ConnInstance::new(name)).with_mapping(mapping))
    }

    /// Add a fully configured resource; its connector type must be its name.
    pub fn with_resource_def(mut self, resource: ExternalResource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_propagation_action(mut self, name: &str, action: Arc<dyn PropagationActions>) -> Self {
        self.actions.register_propagation(name, action);
        self
    }

    pub fn with_sync_action(mut self, name: &str, action: Arc<dyn SyncActions>) -> Self {
        self.actions.register_sync(name, action);
        self
    }

    pub fn with_workflow(mut self, workflow: Arc<dyn WorkflowAdapter>) -> Self {
        self.workflow = Some(workflow);
        self
    }

    pub async fn build(self) -> TestEnv {
        super::init_logging();
        let mut connectors = ConnectorRegistry::new();
        let mut memory = HashMap::new();
        for resource in &self.resources {
            let connector = Arc::new(MemoryConnector::new(&resource.name));
            connectors.register_instance(&resource.connector.connector_type, connector.clone());
            memory.insert(resource.name.clone(), connector);
        }

        let sink = Arc::new(MemoryReportSink::new());
        let mut builder = ReconcilerBuilder::new(InMemoryStorage::new())
            .with_config(self.config)
            .with_connectors(connectors)
            .with_actions(self.actions)
            .with_report_sink(sink.clone());
        if let Some(workflow) = self.workflow {
            builder = builder.with_workflow(workflow);
        }
        let reconciler = Arc::new(builder.build().expect("valid test configuration"));

        let ctx = DomainContext::master();
        for resource in &self.resources {
            reconciler
                .save_resource(&ctx, resource)
                .await
                .expect("valid test resource");
        }

        TestEnv {
            reconciler,
            connectors: memory,
            sink,
            ctx,
        }
    }
}
