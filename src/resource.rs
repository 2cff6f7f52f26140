//! External resource definitions.
//!
//! An [`ExternalResource`] ties a connector configuration to the user and role
//! mappings used on that resource, together with its propagation settings.
//! Resources are validated once, when saved.

use crate::actions::ActionRegistry;
use crate::connector::{ConnInstance, ConnectorRegistry};
use crate::error::{ReconcilerError, ReconcilerResult};
use crate::identity::IdentityKind;
use crate::mapping::Mapping;
use crate::propagation::PropagationMode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resources of a domain by name.
pub type ResourceMap = BTreeMap<String, ExternalResource>;

/// Internal plain attributes whose values identify the owner of an external
/// object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub attributes: Vec<String>,
}

impl CorrelationRule {
    pub fn new<I, T>(attributes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }
}

/// An external system identities are provisioned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalResource {
    pub name: String,
    pub connector: ConnInstance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_mapping: Option<Mapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_mapping: Option<Mapping>,
    /// Names of registered propagation actions, run in order
    #[serde(default)]
    pub propagation_actions: Vec<String>,
    /// Priority resources are propagated first, sequentially
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation_priority: Option<u32>,
    #[serde(default)]
    pub propagation_mode: PropagationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_correlation: Option<CorrelationRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_correlation: Option<CorrelationRule>,
}

impl ExternalResource {
    pub fn new(name: impl Into<String>, connector: ConnInstance) -> Self {
        Self {
            name: name.into(),
            connector,
            user_mapping: None,
            role_mapping: None,
            propagation_actions: Vec::new(),
            propagation_priority: None,
            propagation_mode: PropagationMode::OnePhase,
            user_correlation: None,
            role_correlation: None,
        }
    }

    /// Set the mapping for the kind the mapping declares.
    pub fn with_mapping(mut self, mapping: Mapping) -> Self {
        match mapping.kind {
            IdentityKind::User => self.user_mapping = Some(mapping),
            IdentityKind::Role => self.role_mapping = Some(mapping),
        }
        self
    }

    pub fn with_action(mut self, name: impl Into<String>) -> Self {
        self.propagation_actions.push(name.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.propagation_priority = Some(priority);
        self
    }

    pub fn with_mode(mut self, mode: PropagationMode) -> Self {
        self.propagation_mode = mode;
        self
    }

    pub fn with_correlation(mut self, kind: IdentityKind, rule: CorrelationRule) -> Self {
        match kind {
            IdentityKind::User => self.user_correlation = Some(rule),
            IdentityKind::Role => self.role_correlation = Some(rule),
        }
        self
    }

    pub fn mapping(&self, kind: IdentityKind) -> Option<&Mapping> {
        match kind {
            IdentityKind::User => self.user_mapping.as_ref(),
            IdentityKind::Role => self.role_mapping.as_ref(),
        }
    }

    pub fn correlation(&self, kind: IdentityKind) -> Option<&CorrelationRule> {
        match kind {
            IdentityKind::User => self.user_correlation.as_ref(),
            IdentityKind::Role => self.role_correlation.as_ref(),
        }
    }

    /// Check every save-time invariant.
    ///
    /// Mapping problems are reported together in one
    /// [`InvalidMappingError`](crate::error::InvalidMappingError) per mapping.
    pub fn validate(
        &self,
        name_pattern: &Regex,
        connectors: &ConnectorRegistry,
        actions: &ActionRegistry,
    ) -> ReconcilerResult<()> {
        if !name_pattern.is_match(&self.name) {
            return Err(ReconcilerError::configuration(format!(
                "resource name '{}' does not match '{}'",
                self.name,
                name_pattern.as_str()
            )));
        }

        if !connectors.contains(&self.connector.connector_type) {
            return Err(ReconcilerError::configuration(format!(
                "resource '{}' uses unregistered connector type '{}'",
                self.name, self.connector.connector_type
            )));
        }

        if let Some(unknown) = self
            .propagation_actions
            .iter()
            .find(|name| !actions.contains_propagation(name))
        {
            return Err(ReconcilerError::configuration(format!(
                "resource '{}' references unregistered propagation action '{}'",
                self.name, unknown
            )));
        }

        for kind in [IdentityKind::User, IdentityKind::Role] {
            let Some(mapping) = self.mapping(kind) else {
                continue;
            };
            if mapping.kind != kind {
                return Err(ReconcilerError::configuration(format!(
                    "resource '{}' holds a {} mapping in its {} slot",
                    self.name, mapping.kind, kind
                )));
            }
            mapping.validate(&self.name)?;

            if self
                .correlation(kind)
                .is_some_and(|rule| rule.attributes.is_empty())
            {
                return Err(ReconcilerError::configuration(format!(
                    "resource '{}' has an empty {} correlation rule",
                    self.name, kind
                )));
            }
        }

        Ok(())
    }
}
