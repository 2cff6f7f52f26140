//! Connector abstraction over external resources.
//!
//! A connector performs the remote operations for one configured resource
//! (LDAP directory, database table, web service). Connectors are built from a
//! [`ConnInstance`] through the [`ConnectorRegistry`], which replaces any
//! class-name based lookup with an explicit name → constructor table.
//!
//! All operations are async and object-class aware through [`IdentityKind`].

pub mod memory;
pub mod registry;

pub use memory::MemoryConnector;
pub use registry::{ConnectorFactory, ConnectorRegistry};

use crate::error::{ConnectorError, ConnectorResult};
use crate::identity::IdentityKind;
use crate::mapping::ExternalAttributes;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// Reserved attribute carrying the enabled/disabled status of an account.
pub const ENABLE_ATTRIBUTE: &str = "__ENABLE__";

/// Connector configuration referenced by an external resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnInstance {
    /// Registry name of the connector implementation
    pub connector_type: String,
    /// Implementation-specific settings (host, base DN, table, ...)
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
    /// Per-call timeout; falls back to the reconciler default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ConnInstance {
    pub fn new(connector_type: impl Into<String>) -> Self {
        Self {
            connector_type: connector_type.into(),
            configuration: BTreeMap::new(),
            timeout_secs: None,
        }
    }

    pub fn with_setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Operations a connector supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorCapabilities {
    pub search: bool,
    pub sync: bool,
    pub create: bool,
    pub update: bool,
    pub delete: bool,
}

impl ConnectorCapabilities {
    pub fn all() -> Self {
        Self {
            search: true,
            sync: true,
            create: true,
            update: true,
            delete: true,
        }
    }

    pub fn read_only() -> Self {
        Self {
            search: true,
            sync: true,
            create: false,
            update: false,
            delete: false,
        }
    }
}

impl Default for ConnectorCapabilities {
    fn default() -> Self {
        Self::all()
    }
}

/// An object held by an external resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorObject {
    /// Account id of the object on the resource
    pub uid: String,
    #[serde(default)]
    pub attributes: ExternalAttributes,
}

impl ConnectorObject {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            attributes: ExternalAttributes::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), vec![value.into()]);
        self
    }

    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }
}

/// Search filter understood by every connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// Attribute has the given value; `__UID__` matches the account id
    Equals { attribute: String, value: String },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
}

impl Filter {
    /// Reserved attribute name addressing the account id.
    pub const UID: &'static str = "__UID__";

    pub fn equals(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn uid(value: impl Into<String>) -> Self {
        Self::equals(Self::UID, value)
    }

    /// Evaluate against an object (used by connectors without native filtering).
    pub fn matches(&self, object: &ConnectorObject) -> bool {
        match self {
            Filter::Equals { attribute, value } => {
                if attribute == Self::UID {
                    &object.uid == value
                } else {
                    object
                        .attributes
                        .get(attribute)
                        .is_some_and(|values| values.iter().any(|v| v == value))
                }
            }
            Filter::And { filters } => filters.iter().all(|f| f.matches(object)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(object)),
        }
    }
}

/// Kind of change reported by [`Connector::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDeltaType {
    CreateOrUpdate,
    Delete,
}

/// One change on an external resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDelta {
    pub delta_type: SyncDeltaType,
    pub uid: String,
    /// Current state of the object; absent for deletions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ConnectorObject>,
    /// Token to resume after this delta
    pub token: String,
}

impl SyncDelta {
    pub fn create_or_update(object: ConnectorObject, token: impl Into<String>) -> Self {
        Self {
            delta_type: SyncDeltaType::CreateOrUpdate,
            uid: object.uid.clone(),
            object: Some(object),
            token: token.into(),
        }
    }

    pub fn delete(uid: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            delta_type: SyncDeltaType::Delete,
            uid: uid.into(),
            object: None,
            token: token.into(),
        }
    }
}

/// Deltas returned by one [`Connector::sync`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncBatch {
    pub deltas: Vec<SyncDelta>,
    /// Token to pass on the next call
    pub latest_token: Option<String>,
}

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Display name of this connector instance.
    fn display_name(&self) -> &str;

    /// Operations this instance supports.
    fn capabilities(&self) -> ConnectorCapabilities;

    /// Search objects of a kind, optionally filtered.
    async fn search(
        &self,
        kind: IdentityKind,
        filter: Option<&Filter>,
    ) -> ConnectorResult<Vec<ConnectorObject>>;

    /// Create an object, returning its account id.
    async fn create(
        &self,
        kind: IdentityKind,
        account_id: &str,
        attributes: &ExternalAttributes,
    ) -> ConnectorResult<String>;

    /// Replace the given attributes of an object, returning its account id.
    async fn update(
        &self,
        kind: IdentityKind,
        account_id: &str,
        attributes: &ExternalAttributes,
    ) -> ConnectorResult<String>;

    /// Delete an object.
    async fn delete(&self, kind: IdentityKind, account_id: &str) -> ConnectorResult<()>;

    /// Changes since `token`; all known changes when `token` is `None`.
    async fn sync(&self, kind: IdentityKind, token: Option<&str>) -> ConnectorResult<SyncBatch>;

    /// Fetch a single object by account id.
    async fn get(
        &self,
        kind: IdentityKind,
        account_id: &str,
    ) -> ConnectorResult<Option<ConnectorObject>> {
        let filter = Filter::uid(account_id);
        Ok(self.search(kind, Some(&filter)).await?.into_iter().next())
    }
}

/// Bound a connector call; an elapsed timeout becomes [`ConnectorError::Timeout`].
pub async fn call_with_timeout<T, E>(
    resource: &str,
    timeout: Duration,
    call: impl Future<Output = Result<T, E>>,
) -> Result<T, E>
where
    E: From<ConnectorError>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| {
            Err(ConnectorError::Timeout {
                resource: resource.to_string(),
                timeout,
            }
            .into())
        })
}
