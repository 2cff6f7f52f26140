//! In-memory connector.
//!
//! Keeps objects per identity kind in a map and records every change in a
//! change log, so that `sync` can serve deltas from an integer token. Failure
//! and latency can be injected to exercise error paths and timeouts.

use super::{
    Connector, ConnectorCapabilities, ConnectorObject, Filter, SyncBatch, SyncDelta,
    SyncDeltaType,
};
use crate::error::{ConnectorError, ConnectorResult};
use crate::identity::IdentityKind;
use crate::mapping::ExternalAttributes;
use async_trait::async_trait;
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::sync::RwLock;

/// A write call received by a [`MemoryConnector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub kind: IdentityKind,
    pub account_id: String,
    pub attributes: ExternalAttributes,
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<IdentityKind, BTreeMap<String, ExternalAttributes>>,
    changes: Vec<(IdentityKind, SyncDelta)>,
    sequence: u64,
    failing: BTreeSet<String>,
    unavailable: bool,
    latency: Option<Duration>,
    calls: Vec<RecordedCall>,
}

impl MemoryState {
    fn record_change(&mut self, kind: IdentityKind, delta_type: SyncDeltaType, uid: &str) {
        self.sequence += 1;
        let token = self.sequence.to_string();
        let delta = match delta_type {
            SyncDeltaType::CreateOrUpdate => {
                let attributes = self
                    .objects
                    .get(&kind)
                    .and_then(|objects| objects.get(uid))
                    .cloned()
                    .unwrap_or_default();
                SyncDelta::create_or_update(
                    ConnectorObject {
                        uid: uid.to_string(),
                        attributes,
                    },
                    token,
                )
            }
            SyncDeltaType::Delete => SyncDelta::delete(uid, token),
        };
        self.changes.push((kind, delta));
    }
}

/// Connector backed by process memory.
pub struct MemoryConnector {
    name: String,
    capabilities: ConnectorCapabilities,
    state: RwLock<MemoryState>,
}

impl MemoryConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: ConnectorCapabilities::all(),
            state: RwLock::new(MemoryState::default()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ConnectorCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Create or replace an object as if changed directly on the resource.
    pub async fn put_external(&self, kind: IdentityKind, object: ConnectorObject) {
        let mut state = self.state.write().await;
        state
            .objects
            .entry(kind)
            .or_default()
            .insert(object.uid.clone(), object.attributes);
        state.record_change(kind, SyncDeltaType::CreateOrUpdate, &object.uid);
    }

    /// Remove an object as if deleted directly on the resource.
    pub async fn remove_external(&self, kind: IdentityKind, uid: &str) {
        let mut state = self.state.write().await;
        let removed = state
            .objects
            .get_mut(&kind)
            .and_then(|objects| objects.remove(uid))
            .is_some();
        if removed {
            state.record_change(kind, SyncDeltaType::Delete, uid);
        }
    }

    /// Make every write for `account_id` fail.
    pub async fn fail_on(&self, account_id: impl Into<String>) {
        self.state.write().await.failing.insert(account_id.into());
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.write().await;
        state.failing.clear();
        state.unavailable = false;
    }

    /// Make every call fail as if the resource were down.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Delay every call by `latency`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.write().await.latency = latency;
    }

    pub async fn object(&self, kind: IdentityKind, uid: &str) -> Option<ExternalAttributes> {
        self.state
            .read()
            .await
            .objects
            .get(&kind)
            .and_then(|objects| objects.get(uid))
            .cloned()
    }

    pub async fn object_count(&self, kind: IdentityKind) -> usize {
        self.state
            .read()
            .await
            .objects
            .get(&kind)
            .map_or(0, |objects| objects.len())
    }

    /// Write calls received so far, in order.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.read().await.calls.clone()
    }

    /// Latest change token.
    pub async fn current_token(&self) -> String {
        self.state.read().await.sequence.to_string()
    }

    async fn enter(&self, account_id: Option<&str>) -> ConnectorResult<()> {
        let (latency, unavailable, failing) = {
            let state = self.state.read().await;
            (
                state.latency,
                state.unavailable,
                account_id.is_some_and(|id| state.failing.contains(id)),
            )
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if unavailable {
            return Err(ConnectorError::Unavailable {
                resource: self.name.clone(),
                message: "resource is offline".to_string(),
            });
        }
        if failing {
            return Err(ConnectorError::Remote {
                message: format!(
                    "resource '{}' rejected '{}'",
                    self.name,
                    account_id.unwrap_or_default()
                ),
            });
        }
        Ok(())
    }

    fn require(&self, supported: bool, capability: &str) -> ConnectorResult<()> {
        if supported {
            Ok(())
        } else {
            Err(ConnectorError::Unsupported {
                connector: self.name.clone(),
                capability: capability.to_string(),
            })
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ConnectorCapabilities {
        self.capabilities
    }

    async fn search(
        &self,
        kind: IdentityKind,
        filter: Option<&Filter>,
    ) -> ConnectorResult<Vec<ConnectorObject>> {
        self.require(self.capabilities.search, "search")?;
        self.enter(None).await?;

        let state = self.state.read().await;
        let objects = state
            .objects
            .get(&kind)
            .into_iter()
            .flatten()
            .map(|(uid, attributes)| ConnectorObject {
                uid: uid.clone(),
                attributes: attributes.clone(),
            })
            .filter(|object| filter.is_none_or(|f| f.matches(object)))
            .collect::<Vec<_>>();
        trace!("{}: search {} returned {} objects", self.name, kind, objects.len());
        Ok(objects)
    }

    async fn create(
        &self,
        kind: IdentityKind,
        account_id: &str,
        attributes: &ExternalAttributes,
    ) -> ConnectorResult<String> {
        self.require(self.capabilities.create, "create")?;
        self.enter(Some(account_id)).await?;

        let mut state = self.state.write().await;
        state.calls.push(RecordedCall {
            method: "create",
            kind,
            account_id: account_id.to_string(),
            attributes: attributes.clone(),
        });
        let objects = state.objects.entry(kind).or_default();
        if objects.contains_key(account_id) {
            return Err(ConnectorError::ObjectAlreadyExists {
                account_id: account_id.to_string(),
            });
        }
        objects.insert(account_id.to_string(), attributes.clone());
        state.record_change(kind, SyncDeltaType::CreateOrUpdate, account_id);
        debug!("{}: created {} '{}'", self.name, kind, account_id);
        Ok(account_id.to_string())
    }

    async fn update(
        &self,
        kind: IdentityKind,
        account_id: &str,
        attributes: &ExternalAttributes,
    ) -> ConnectorResult<String> {
        self.require(self.capabilities.update, "update")?;
        self.enter(Some(account_id)).await?;

        let mut state = self.state.write().await;
        state.calls.push(RecordedCall {
            method: "update",
            kind,
            account_id: account_id.to_string(),
            attributes: attributes.clone(),
        });
        let existing = state
            .objects
            .get_mut(&kind)
            .and_then(|objects| objects.get_mut(account_id))
            .ok_or_else(|| ConnectorError::ObjectNotFound {
                account_id: account_id.to_string(),
            })?;
        for (name, values) in attributes {
            existing.insert(name.clone(), values.clone());
        }
        state.record_change(kind, SyncDeltaType::CreateOrUpdate, account_id);
        debug!("{}: updated {} '{}'", self.name, kind, account_id);
        Ok(account_id.to_string())
    }

    async fn delete(&self, kind: IdentityKind, account_id: &str) -> ConnectorResult<()> {
        self.require(self.capabilities.delete, "delete")?;
        self.enter(Some(account_id)).await?;

        let mut state = self.state.write().await;
        state.calls.push(RecordedCall {
            method: "delete",
            kind,
            account_id: account_id.to_string(),
            attributes: ExternalAttributes::new(),
        });
        let removed = state
            .objects
            .get_mut(&kind)
            .and_then(|objects| objects.remove(account_id))
            .is_some();
        if !removed {
            return Err(ConnectorError::ObjectNotFound {
                account_id: account_id.to_string(),
            });
        }
        state.record_change(kind, SyncDeltaType::Delete, account_id);
        debug!("{}: deleted {} '{}'", self.name, kind, account_id);
        Ok(())
    }

    async fn sync(&self, kind: IdentityKind, token: Option<&str>) -> ConnectorResult<SyncBatch> {
        self.require(self.capabilities.sync, "sync")?;
        self.enter(None).await?;

        let since = match token {
            Some(token) => token.parse::<u64>().map_err(|_| ConnectorError::Remote {
                message: format!("invalid sync token '{}'", token),
            })?,
            None => 0,
        };

        let state = self.state.read().await;
        let deltas = state
            .changes
            .iter()
            .filter(|(delta_kind, delta)| {
                *delta_kind == kind && delta.token.parse::<u64>().is_ok_and(|seq| seq > since)
            })
            .map(|(_, delta)| delta.clone())
            .collect::<Vec<_>>();

        Ok(SyncBatch {
            deltas,
            latest_token: Some(state.sequence.to_string()),
        })
    }
}
