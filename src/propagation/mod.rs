//! Outbound propagation of identity changes to external resources.
//!
//! The [`PropagationManager`] turns an identity change into one
//! [`PropagationTask`] per mapped resource; the [`PropagationExecutor`] runs
//! them through connectors, isolating failures per resource and recording each
//! attempt in the [`ExecutionLog`].

pub mod actions;
pub mod executor;
pub mod manager;

pub use actions::PropagationActions;
pub use executor::{PropagationExecutor, PropagationOutcome, TaskResult};
pub use manager::PropagationManager;

use crate::identity::IdentityKind;
use crate::mapping::ExternalAttributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Remote operation carried by a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropagationOperation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for PropagationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// Whether a task completes on the connector call or on later confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropagationMode {
    #[default]
    OnePhase,
    TwoPhases,
}

/// Task lifecycle.
///
/// One-phase: `Pending -> Success | Failure`.
/// Two-phase: `Pending -> Submitted -> Confirmed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Submitted,
    Success,
    Failure,
    Confirmed,
    Failed,
}

impl TaskStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending | Self::Submitted)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One resource-level operation to perform for an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagationTask {
    pub id: String,
    pub domain: String,
    pub kind: IdentityKind,
    pub identity_key: String,
    pub operation: PropagationOperation,
    pub resource: String,
    pub account_id: String,
    #[serde(default)]
    pub attributes: ExternalAttributes,
    /// Enable/disable request derived from the workflow status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Clear-text password; never serialized
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(default)]
    pub mode: PropagationMode,
    /// Set for resources that must succeed before the others run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
}

impl PropagationTask {
    pub fn new(
        domain: impl Into<String>,
        kind: IdentityKind,
        identity_key: impl Into<String>,
        operation: PropagationOperation,
        resource: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            domain: domain.into(),
            kind,
            identity_key: identity_key.into(),
            operation,
            resource: resource.into(),
            account_id: account_id.into(),
            attributes: ExternalAttributes::new(),
            enabled: None,
            password: None,
            mode: PropagationMode::OnePhase,
            priority: None,
        }
    }

    pub fn with_attributes(mut self, attributes: ExternalAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_mode(mut self, mode: PropagationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_priority(mut self, priority: Option<u32>) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_priority(&self) -> bool {
        self.priority.is_some()
    }
}

/// One recorded attempt at executing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    pub task_id: String,
    pub resource: String,
    pub identity_key: String,
    pub operation: PropagationOperation,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Bounded log of task executions.
///
/// Once `capacity` entries are held, each append evicts the oldest one.
/// [`ExecutionLog::drain`] hands the retained entries to the caller.
#[derive(Debug, Clone)]
pub struct ExecutionLog {
    entries: Arc<Mutex<VecDeque<TaskExecution>>>,
    capacity: usize,
}

impl Default for ExecutionLog {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl ExecutionLog {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, execution: TaskExecution) {
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(execution);
    }

    /// Executions of one task, oldest first.
    pub fn for_task(&self, task_id: &str) -> Vec<TaskExecution> {
        self.lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> Vec<TaskExecution> {
        self.lock().iter().cloned().collect()
    }

    /// Remove and return every retained execution, oldest first.
    pub fn drain(&self) -> Vec<TaskExecution> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TaskExecution>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
