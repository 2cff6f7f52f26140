//! Hooks invoked during pull and push runs.
//!
//! Every method has a no-op default, so an implementation only overrides the
//! stages it cares about. For each entry exactly one `before_*` hook runs,
//! selected by the entry's [`EntryAction`]; it may rewrite the patch applied
//! to the entry or stop the entry by returning a [`SyncActionError`].
//!
//! Sequence per run: `before_all`, then per entry one `before_*`, the
//! mutation, `after` (or `on_error`), and finally `after_all`.

use super::{EntryAction, EntryResult, SyncEntry, SyncProfile};
use crate::actions::Named;
use crate::context::DomainContext;
use crate::error::{ReconcilerError, SyncActionResult};
use crate::identity::IdentityPatch;
use async_trait::async_trait;

#[async_trait]
pub trait SyncActions: Send + Sync {
    async fn before_all(&self, _ctx: &DomainContext, _profile: &SyncProfile) -> SyncActionResult {
        Ok(())
    }

    async fn before_update(
        &self,
        _ctx: &DomainContext,
        _profile: &SyncProfile,
        _entry: &SyncEntry,
        _patch: &mut IdentityPatch,
    ) -> SyncActionResult {
        Ok(())
    }

    async fn before_delete(
        &self,
        _ctx: &DomainContext,
        _profile: &SyncProfile,
        _entry: &SyncEntry,
        _patch: &mut IdentityPatch,
    ) -> SyncActionResult {
        Ok(())
    }

    async fn before_assign(
        &self,
        _ctx: &DomainContext,
        _profile: &SyncProfile,
        _entry: &SyncEntry,
        _patch: &mut IdentityPatch,
    ) -> SyncActionResult {
        Ok(())
    }

    async fn before_provision(
        &self,
        _ctx: &DomainContext,
        _profile: &SyncProfile,
        _entry: &SyncEntry,
        _patch: &mut IdentityPatch,
    ) -> SyncActionResult {
        Ok(())
    }

    async fn before_link(
        &self,
        _ctx: &DomainContext,
        _profile: &SyncProfile,
        _entry: &SyncEntry,
        _patch: &mut IdentityPatch,
    ) -> SyncActionResult {
        Ok(())
    }

    async fn before_unassign(
        &self,
        _ctx: &DomainContext,
        _profile: &SyncProfile,
        _entry: &SyncEntry,
        _patch: &mut IdentityPatch,
    ) -> SyncActionResult {
        Ok(())
    }

    async fn before_deprovision(
        &self,
        _ctx: &DomainContext,
        _profile: &SyncProfile,
        _entry: &SyncEntry,
        _patch: &mut IdentityPatch,
    ) -> SyncActionResult {
        Ok(())
    }

    async fn before_unlink(
        &self,
        _ctx: &DomainContext,
        _profile: &SyncProfile,
        _entry: &SyncEntry,
        _patch: &mut IdentityPatch,
    ) -> SyncActionResult {
        Ok(())
    }

    /// Runs after every entry that did not fail.
    async fn after(
        &self,
        _ctx: &DomainContext,
        _profile: &SyncProfile,
        _entry: &SyncEntry,
        _result: &EntryResult,
    ) {
    }

    /// Runs instead of `after` when the entry failed.
    async fn on_error(
        &self,
        _ctx: &DomainContext,
        _profile: &SyncProfile,
        _entry: &SyncEntry,
        _error: &ReconcilerError,
    ) {
    }

    async fn after_all(&self, _ctx: &DomainContext, _profile: &SyncProfile, _results: &[EntryResult]) {}
}

/// The resolved hooks of one run, called in registration order.
pub(crate) struct HookChain {
    actions: Vec<Named<dyn SyncActions>>,
}

impl HookChain {
    pub(crate) fn new(actions: Vec<Named<dyn SyncActions>>) -> Self {
        Self { actions }
    }

    pub(crate) async fn before_all(&self, ctx: &DomainContext, profile: &SyncProfile) -> SyncActionResult {
        for (_, action) in &self.actions {
            action.before_all(ctx, profile).await?;
        }
        Ok(())
    }

    /// Run the `before_*` hook matching `action` on every registered action.
    pub(crate) async fn before(
        &self,
        action: EntryAction,
        ctx: &DomainContext,
        profile: &SyncProfile,
        entry: &SyncEntry,
        patch: &mut IdentityPatch,
    ) -> SyncActionResult {
        for (_, hooks) in &self.actions {
            match action {
                EntryAction::Update => hooks.before_update(ctx, profile, entry, patch).await?,
                EntryAction::Delete => hooks.before_delete(ctx, profile, entry, patch).await?,
                EntryAction::Assign => hooks.before_assign(ctx, profile, entry, patch).await?,
                EntryAction::Provision => hooks.before_provision(ctx, profile, entry, patch).await?,
                EntryAction::Link => hooks.before_link(ctx, profile, entry, patch).await?,
                EntryAction::Unassign => hooks.before_unassign(ctx, profile, entry, patch).await?,
                EntryAction::Deprovision => {
                    hooks.before_deprovision(ctx, profile, entry, patch).await?
                }
                EntryAction::Unlink => hooks.before_unlink(ctx, profile, entry, patch).await?,
            }
        }
        Ok(())
    }

    pub(crate) async fn after(
        &self,
        ctx: &DomainContext,
        profile: &SyncProfile,
        entry: &SyncEntry,
        result: &EntryResult,
    ) {
        for (_, action) in &self.actions {
            action.after(ctx, profile, entry, result).await;
        }
    }

    pub(crate) async fn on_error(
        &self,
        ctx: &DomainContext,
        profile: &SyncProfile,
        entry: &SyncEntry,
        error: &ReconcilerError,
    ) {
        for (_, action) in &self.actions {
            action.on_error(ctx, profile, entry, error).await;
        }
    }

    pub(crate) async fn after_all(
        &self,
        ctx: &DomainContext,
        profile: &SyncProfile,
        results: &[EntryResult],
    ) {
        for (_, action) in &self.actions {
            action.after_all(ctx, profile, results).await;
        }
    }
}
