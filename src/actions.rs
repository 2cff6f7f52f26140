//! Registry of named propagation and synchronization actions.
//!
//! Resources and sync tasks refer to actions by name. Names are resolved
//! here before any work starts, so a typo fails fast with a configuration
//! error instead of silently skipping a hook.

use crate::error::{ReconcilerError, ReconcilerResult};
use crate::propagation::PropagationActions;
use crate::sync::SyncActions;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A resolved action together with the name it was registered under.
pub type Named<T> = (String, Arc<T>);

#[derive(Clone, Default)]
pub struct ActionRegistry {
    propagation: HashMap<String, Arc<dyn PropagationActions>>,
    sync: HashMap<String, Arc<dyn SyncActions>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_propagation(
        &mut self,
        name: impl Into<String>,
        action: Arc<dyn PropagationActions>,
    ) {
        self.propagation.insert(name.into(), action);
    }

    pub fn register_sync(&mut self, name: impl Into<String>, action: Arc<dyn SyncActions>) {
        self.sync.insert(name.into(), action);
    }

    pub fn contains_propagation(&self, name: &str) -> bool {
        self.propagation.contains_key(name)
    }

    pub fn contains_sync(&self, name: &str) -> bool {
        self.sync.contains_key(name)
    }

    /// Resolve propagation actions in the given order.
    pub fn resolve_propagation(
        &self,
        names: &[String],
    ) -> ReconcilerResult<Vec<Named<dyn PropagationActions>>> {
        names
            .iter()
            .map(|name| {
                self.propagation
                    .get(name)
                    .map(|action| (name.clone(), action.clone()))
                    .ok_or_else(|| unknown("propagation", name))
            })
            .collect()
    }

    /// Resolve synchronization actions in the given order.
    pub fn resolve_sync(&self, names: &[String]) -> ReconcilerResult<Vec<Named<dyn SyncActions>>> {
        names
            .iter()
            .map(|name| {
                self.sync
                    .get(name)
                    .map(|action| (name.clone(), action.clone()))
                    .ok_or_else(|| unknown("sync", name))
            })
            .collect()
    }
}

fn unknown(family: &str, name: &str) -> ReconcilerError {
    ReconcilerError::configuration(format!("{} action '{}' is not registered", family, name))
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut propagation: Vec<&String> = self.propagation.keys().collect();
        let mut sync: Vec<&String> = self.sync.keys().collect();
        propagation.sort();
        sync.sort();
        f.debug_struct("ActionRegistry")
            .field("propagation", &propagation)
            .field("sync", &sync)
            .finish()
    }
}
