//! Workflow collaborator.
//!
//! The reconciler does not run approval flows itself; it only asks the
//! workflow for the current status of an identity and maps that status to the
//! enabled flag pushed to resources.

use crate::context::DomainContext;
use crate::error::ReconcilerResult;
use crate::identity::{Identity, IdentityKind};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_SUSPENDED: &str = "suspended";

/// Source of identity statuses.
#[async_trait]
pub trait WorkflowAdapter: Send + Sync {
    /// Current status of an identity; `None` when the workflow has no opinion.
    async fn current_status(
        &self,
        ctx: &DomainContext,
        identity: &Identity,
    ) -> ReconcilerResult<Option<String>>;
}

/// Enabled flag for a status: `active` enables, `suspended` disables.
pub fn enabled_for_status(status: Option<&str>) -> Option<bool> {
    match status {
        Some(STATUS_ACTIVE) => Some(true),
        Some(STATUS_SUSPENDED) => Some(false),
        _ => None,
    }
}

/// Workflow without approval steps: keeps the stored status, new identities
/// start `active`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultWorkflow;

#[async_trait]
impl WorkflowAdapter for DefaultWorkflow {
    async fn current_status(
        &self,
        _ctx: &DomainContext,
        identity: &Identity,
    ) -> ReconcilerResult<Option<String>> {
        Ok(Some(
            identity
                .status
                .clone()
                .unwrap_or_else(|| STATUS_ACTIVE.to_string()),
        ))
    }
}

/// Workflow with statuses set explicitly per identity.
#[derive(Debug, Default)]
pub struct StaticWorkflow {
    statuses: RwLock<HashMap<(String, IdentityKind, String), String>>,
}

impl StaticWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_status(
        &self,
        ctx: &DomainContext,
        kind: IdentityKind,
        key: impl Into<String>,
        status: impl Into<String>,
    ) {
        self.statuses
            .write()
            .await
            .insert((ctx.domain.clone(), kind, key.into()), status.into());
    }
}

#[async_trait]
impl WorkflowAdapter for StaticWorkflow {
    async fn current_status(
        &self,
        ctx: &DomainContext,
        identity: &Identity,
    ) -> ReconcilerResult<Option<String>> {
        Ok(self
            .statuses
            .read()
            .await
            .get(&(ctx.domain.clone(), identity.kind, identity.key.clone()))
            .cloned())
    }
}
