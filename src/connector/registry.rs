//! Registry mapping connector type names to constructors.

use super::{ConnInstance, Connector};
use crate::error::{ReconcilerError, ReconcilerResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a connector for a resource's [`ConnInstance`].
pub type ConnectorFactory =
    Arc<dyn Fn(&ConnInstance) -> ReconcilerResult<Arc<dyn Connector>> + Send + Sync>;

/// Explicit table of available connector implementations.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    factories: HashMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under a connector type name.
    pub fn register<F>(&mut self, connector_type: impl Into<String>, factory: F)
    where
        F: Fn(&ConnInstance) -> ReconcilerResult<Arc<dyn Connector>> + Send + Sync + 'static,
    {
        self.factories
            .insert(connector_type.into(), Arc::new(factory));
    }

    /// Register one shared instance returned for every configuration.
    pub fn register_instance(
        &mut self,
        connector_type: impl Into<String>,
        connector: Arc<dyn Connector>,
    ) {
        self.register(connector_type, move |_| Ok(connector.clone()));
    }

    pub fn contains(&self, connector_type: &str) -> bool {
        self.factories.contains_key(connector_type)
    }

    /// Build the connector for a configuration.
    ///
    /// Unknown connector types are a configuration error.
    pub fn create(&self, instance: &ConnInstance) -> ReconcilerResult<Arc<dyn Connector>> {
        let factory = self
            .factories
            .get(&instance.connector_type)
            .ok_or_else(|| {
                ReconcilerError::configuration(format!(
                    "connector type '{}' is not registered",
                    instance.connector_type
                ))
            })?;
        factory(instance)
    }

    pub fn connector_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(|k| k.as_str()).collect();
        types.sort();
        types
    }
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("connector_types", &self.connector_types())
            .finish()
    }
}
