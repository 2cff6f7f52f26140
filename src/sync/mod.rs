//! Synchronization between external resources and the internal store.
//!
//! - [`engine`]: pull; applies external changes internally and propagates
//!   them to the other resources
//! - [`push`]: push; reconciles internal identities onto one resource
//! - [`correlation`]: matching external objects with internal identities
//! - [`actions`]: hooks invoked at each stage of a run

pub mod actions;
pub mod correlation;
pub mod engine;
pub mod push;

pub use actions::SyncActions;
pub use correlation::Correlator;
pub use engine::SyncEngine;
pub use push::PushEngine;

use crate::connector::{ConnectorObject, SyncDeltaType};
use crate::identity::{Identity, IdentityKind};
use crate::report::{ReportOperation, ReportStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What to do with an external object that correlates to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchingRule {
    /// Bring the other side up to date
    #[default]
    Update,
    /// Remove the account on the resource, keep the link
    Deprovision,
    /// Remove the account on the resource and the link
    Unassign,
    /// Link only
    Link,
    /// Unlink only
    Unlink,
    Ignore,
}

/// What to do with an object that correlates to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnmatchingRule {
    /// Create the counterpart without linking
    Provision,
    /// Create the counterpart and link
    #[default]
    Assign,
    /// Push only: drop a stale link
    Unlink,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncDirection {
    Pull,
    Push,
}

/// Classification of one entry; selects the `before_*` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryAction {
    Update,
    Delete,
    Assign,
    Provision,
    Link,
    Unassign,
    Deprovision,
    Unlink,
}

impl EntryAction {
    /// Operation reported for the entry.
    pub fn operation(&self) -> ReportOperation {
        match self {
            Self::Assign | Self::Provision => ReportOperation::Create,
            Self::Update | Self::Link | Self::Unlink => ReportOperation::Update,
            Self::Delete | Self::Unassign | Self::Deprovision => ReportOperation::Delete,
        }
    }
}

impl fmt::Display for EntryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Common switches of pull and push tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    #[serde(default = "enabled")]
    pub perform_create: bool,
    #[serde(default = "enabled")]
    pub perform_update: bool,
    #[serde(default = "enabled")]
    pub perform_delete: bool,
    /// Classify and report without changing anything
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub matching_rule: MatchingRule,
    #[serde(default)]
    pub unmatching_rule: UnmatchingRule,
    /// Names of registered sync actions, run in order
    #[serde(default)]
    pub actions: Vec<String>,
}

fn enabled() -> bool {
    true
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            perform_create: true,
            perform_update: true,
            perform_delete: true,
            dry_run: false,
            matching_rule: MatchingRule::default(),
            unmatching_rule: UnmatchingRule::default(),
            actions: Vec::new(),
        }
    }
}

impl SyncSettings {
    /// Whether the flags allow an action to mutate anything.
    pub fn permits(&self, action: EntryAction) -> bool {
        match action {
            EntryAction::Assign | EntryAction::Provision => self.perform_create,
            EntryAction::Update | EntryAction::Link | EntryAction::Unlink => self.perform_update,
            EntryAction::Delete | EntryAction::Unassign | EntryAction::Deprovision => {
                self.perform_delete
            }
        }
    }
}

/// Pull from one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
    pub name: String,
    pub resource: String,
    pub kind: IdentityKind,
    /// Compare everything instead of reading changes since the last token
    #[serde(default)]
    pub full_reconciliation: bool,
    #[serde(default, flatten)]
    pub settings: SyncSettings,
}

impl SyncTask {
    pub fn new(name: impl Into<String>, resource: impl Into<String>, kind: IdentityKind) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            kind,
            full_reconciliation: false,
            settings: SyncSettings::default(),
        }
    }

    pub fn full_reconciliation(mut self) -> Self {
        self.full_reconciliation = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.settings.dry_run = true;
        self
    }

    pub fn with_matching_rule(mut self, rule: MatchingRule) -> Self {
        self.settings.matching_rule = rule;
        self
    }

    pub fn with_unmatching_rule(mut self, rule: UnmatchingRule) -> Self {
        self.settings.unmatching_rule = rule;
        self
    }

    pub fn with_action(mut self, name: impl Into<String>) -> Self {
        self.settings.actions.push(name.into());
        self
    }
}

/// Internal plain attribute equality used to narrow a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub attribute: String,
    pub value: String,
}

impl AttributeFilter {
    pub fn matches(&self, identity: &Identity) -> bool {
        identity
            .attr(&self.attribute)
            .is_some_and(|values| values.iter().any(|v| v == &self.value))
    }
}

/// Push internal identities to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushTask {
    pub name: String,
    pub resource: String,
    pub kind: IdentityKind,
    /// Also consider identities not linked to the resource
    #[serde(default)]
    pub include_unlinked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<AttributeFilter>,
    #[serde(default, flatten)]
    pub settings: SyncSettings,
}

impl PushTask {
    pub fn new(name: impl Into<String>, resource: impl Into<String>, kind: IdentityKind) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            kind,
            include_unlinked: false,
            filter: None,
            settings: SyncSettings::default(),
        }
    }

    pub fn include_unlinked(mut self) -> Self {
        self.include_unlinked = true;
        self
    }

    pub fn with_filter(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter = Some(AttributeFilter {
            attribute: attribute.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_matching_rule(mut self, rule: MatchingRule) -> Self {
        self.settings.matching_rule = rule;
        self
    }

    pub fn with_unmatching_rule(mut self, rule: UnmatchingRule) -> Self {
        self.settings.unmatching_rule = rule;
        self
    }

    pub fn with_action(mut self, name: impl Into<String>) -> Self {
        self.settings.actions.push(name.into());
        self
    }
}

/// Run-level information handed to hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProfile {
    pub task: String,
    pub resource: String,
    pub kind: IdentityKind,
    pub direction: SyncDirection,
    pub dry_run: bool,
}

/// One unit of work within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEntry {
    pub direction: SyncDirection,
    pub resource: String,
    pub kind: IdentityKind,
    /// Account id on the resource
    pub account_id: String,
    pub delta_type: SyncDeltaType,
    /// External state, when known
    pub object: Option<ConnectorObject>,
    /// Correlated internal identity, when any
    pub identity: Option<Identity>,
}

impl SyncEntry {
    /// Key used in reports: the identity key when matched, else the account id.
    pub fn report_key(&self) -> &str {
        self.identity
            .as_ref()
            .map_or(self.account_id.as_str(), |identity| identity.key.as_str())
    }
}

/// Outcome of one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryResult {
    pub identity_key: String,
    pub resource: String,
    pub action: Option<EntryAction>,
    pub operation: ReportOperation,
    pub status: ReportStatus,
    pub message: Option<String>,
}

impl EntryResult {
    pub fn succeeded(identity_key: impl Into<String>, entry: &SyncEntry, action: EntryAction) -> Self {
        Self {
            identity_key: identity_key.into(),
            resource: entry.resource.clone(),
            action: Some(action),
            operation: action.operation(),
            status: ReportStatus::Success,
            message: None,
        }
    }

    pub fn failed(entry: &SyncEntry, action: Option<EntryAction>, message: impl Into<String>) -> Self {
        Self {
            identity_key: entry.report_key().to_string(),
            resource: entry.resource.clone(),
            action,
            operation: action.map_or(ReportOperation::None, |a| a.operation()),
            status: ReportStatus::Failure,
            message: Some(message.into()),
        }
    }

    /// Dry-run outcome: what would have happened.
    pub fn planned(entry: &SyncEntry, action: EntryAction) -> Self {
        Self {
            message: Some("dry run".to_string()),
            ..Self::succeeded(entry.report_key(), entry, action)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn ignored(entry: &SyncEntry, action: Option<EntryAction>, reason: impl Into<String>) -> Self {
        Self {
            identity_key: entry.report_key().to_string(),
            resource: entry.resource.clone(),
            action,
            operation: ReportOperation::None,
            status: ReportStatus::Ignored,
            message: Some(reason.into()),
        }
    }
}
