//! Provisioning reports.
//!
//! A [`ProvisioningReport`] collects one entry per identity and resource
//! touched by a run. It is append-only while the run is in progress and is
//! frozen into a [`ReportSnapshot`] by [`ProvisioningReport::finish`].
//! Snapshots are handed to every configured [`ReportSink`].

use crate::propagation::{PropagationOperation, TaskResult, TaskStatus};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Operation recorded for a report entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportOperation {
    Create,
    Update,
    Delete,
    None,
}

impl From<PropagationOperation> for ReportOperation {
    fn from(operation: PropagationOperation) -> Self {
        match operation {
            PropagationOperation::Create => Self::Create,
            PropagationOperation::Update => Self::Update,
            PropagationOperation::Delete => Self::Delete,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportStatus {
    Success,
    Failure,
    Ignored,
}

impl From<TaskStatus> for ReportStatus {
    fn from(status: TaskStatus) -> Self {
        if status.is_failure() {
            Self::Failure
        } else {
            Self::Success
        }
    }
}

/// Outcome for one identity on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub identity_key: String,
    pub resource: String,
    pub operation: ReportOperation,
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Receives per-task propagation outcomes.
pub trait Reporter: Send + Sync {
    /// Record the final or submitted state of a task.
    fn report_task(&self, result: &TaskResult);

    /// A priority resource failed; the remaining resources still run.
    fn on_primary_resource_failure(&self, _result: &TaskResult) {}
}

#[derive(Debug, Default)]
struct ReportState {
    entries: Vec<ReportEntry>,
    primary_failures: Vec<String>,
}

/// Thread-safe, append-only report of a run.
#[derive(Debug)]
pub struct ProvisioningReport {
    run_id: String,
    started_at: DateTime<Utc>,
    state: Mutex<ReportState>,
}

impl Default for ProvisioningReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisioningReport {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            state: Mutex::new(ReportState::default()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Record an outcome without a specific operation.
    pub fn report(
        &self,
        identity_key: impl Into<String>,
        resource: impl Into<String>,
        status: ReportStatus,
        message: Option<String>,
    ) {
        self.report_operation(identity_key, resource, ReportOperation::None, status, message);
    }

    pub fn report_operation(
        &self,
        identity_key: impl Into<String>,
        resource: impl Into<String>,
        operation: ReportOperation,
        status: ReportStatus,
        message: Option<String>,
    ) {
        let entry = ReportEntry {
            identity_key: identity_key.into(),
            resource: resource.into(),
            operation,
            status,
            message,
            timestamp: Utc::now(),
        };
        self.lock().entries.push(entry);
    }

    /// Last recorded status per identity and resource.
    pub fn statuses(&self) -> BTreeMap<(String, String), ReportStatus> {
        self.lock()
            .entries
            .iter()
            .map(|e| ((e.identity_key.clone(), e.resource.clone()), e.status))
            .collect()
    }

    /// Entries recorded so far.
    pub fn entries(&self) -> Vec<ReportEntry> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze the report.
    pub fn finish(self) -> ReportSnapshot {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        ReportSnapshot {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            entries: state.entries,
            primary_failures: state.primary_failures,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Reporter for ProvisioningReport {
    fn report_task(&self, result: &TaskResult) {
        let message = match (result.status, &result.message) {
            (TaskStatus::Submitted, None) => Some("submitted, awaiting confirmation".to_string()),
            (_, message) => message.clone(),
        };
        self.report_operation(
            result.identity_key.clone(),
            result.resource.clone(),
            result.operation.into(),
            result.status.into(),
            message,
        );
    }

    fn on_primary_resource_failure(&self, result: &TaskResult) {
        warn!(
            "Priority resource '{}' failed for '{}': {}",
            result.resource,
            result.identity_key,
            result.message.as_deref().unwrap_or("unknown error")
        );
        self.lock().primary_failures.push(result.resource.clone());
    }
}

/// Immutable result of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSnapshot {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: Vec<ReportEntry>,
    /// Priority resources that failed during the run
    #[serde(default)]
    pub primary_failures: Vec<String>,
}

impl ReportSnapshot {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for entry in &self.entries {
            match entry.status {
                ReportStatus::Success => summary.succeeded += 1,
                ReportStatus::Failure => summary.failed += 1,
                ReportStatus::Ignored => summary.ignored += 1,
            }
        }
        summary
    }

    /// Entries for one resource.
    pub fn for_resource<'a>(&'a self, resource: &'a str) -> impl Iterator<Item = &'a ReportEntry> {
        self.entries.iter().filter(move |e| e.resource == resource)
    }

    /// Latest entry for an identity on a resource.
    pub fn find(&self, identity_key: &str, resource: &str) -> Option<&ReportEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.identity_key == identity_key && e.resource == resource)
    }
}

/// Entry counts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub ignored: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.ignored
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} ignored",
            self.succeeded, self.failed, self.ignored
        )
    }
}

/// Consumer of finished reports.
pub trait ReportSink: Send + Sync {
    fn consume(&self, snapshot: &ReportSnapshot);
}

/// Logs the summary and every failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn consume(&self, snapshot: &ReportSnapshot) {
        info!("Run {} finished: {}", snapshot.run_id, snapshot.summary());
        for entry in snapshot
            .entries
            .iter()
            .filter(|e| e.status == ReportStatus::Failure)
        {
            warn!(
                "  {} on '{}' ({:?}): {}",
                entry.identity_key,
                entry.resource,
                entry.operation,
                entry.message.as_deref().unwrap_or("")
            );
        }
    }
}

/// Keeps every snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    snapshots: Mutex<Vec<ReportSnapshot>>,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<ReportSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<ReportSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl ReportSink for MemoryReportSink {
    fn consume(&self, snapshot: &ReportSnapshot) {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot.clone());
    }
}
