//! Error types for reconciliation and propagation.
//!
//! Errors fall in two families. Configuration errors ([`InvalidMappingError`],
//! [`ReconcilerError::Configuration`]) are fatal and surface immediately to the
//! caller. Per-resource and per-entry errors ([`PropagationError`],
//! [`SynchronizationEntryError`], [`ConnectorError`]) are caught by the engines
//! and recorded in the provisioning report instead of aborting a run.

use crate::identity::IdentityKind;
use crate::storage::StorageError;
use std::time::Duration;

/// Main error type for reconciler operations.
#[derive(Debug, thiserror::Error)]
pub enum ReconcilerError {
    /// Mapping violates its structural invariants
    #[error("Invalid mapping: {0}")]
    InvalidMapping(#[from] InvalidMappingError),

    /// Fatal configuration problem discovered before processing starts
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A single propagation task failed
    #[error("Propagation error: {0}")]
    Propagation(#[from] PropagationError),

    /// A single synchronization entry failed
    #[error("Synchronization entry error: {0}")]
    SynchronizationEntry(#[from] SynchronizationEntryError),

    /// Connector call failed
    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// Attribute values do not conform to their schema
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Persistence store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Identity not found
    #[error("Identity not found: {kind} with key {key}")]
    IdentityNotFound { kind: IdentityKind, key: String },

    /// External resource not found
    #[error("External resource not found: {name}")]
    ResourceNotFound { name: String },

    /// Scheduler job not found
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: String },

    /// A scheduled job failed in at least one domain
    #[error("Job '{job}' failed: {message}")]
    JobFailed { job: String, message: String },

    /// Two-phase confirmation for an unknown or already final task
    #[error("No submitted task awaiting confirmation: {task_id}")]
    UnknownSubmission { task_id: String },

    /// A synchronization action hook rejected an entry
    #[error("Sync action error: {0}")]
    SyncAction(#[from] SyncActionError),
}

/// A mapping failed validation.
///
/// Validation is exhaustive: `violations` lists every problem found, not just
/// the first one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mapping for {kind} on resource '{resource}' has {} violation(s): {}", .violations.len(), join_violations(.violations))]
pub struct InvalidMappingError {
    pub resource: String,
    pub kind: IdentityKind,
    pub violations: Vec<MappingViolation>,
}

impl InvalidMappingError {
    /// Check whether a given violation was reported.
    pub fn contains(&self, violation: &MappingViolation) -> bool {
        self.violations.contains(violation)
    }
}

fn join_violations(violations: &[MappingViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single structural problem in a mapping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingViolation {
    #[error("no item is flagged as account id")]
    MissingAccountId,

    #[error("{count} items are flagged as account id, exactly one is required")]
    MultipleAccountIds { count: usize },

    #[error("{count} items are flagged as password, at most one is allowed")]
    MultiplePasswords { count: usize },

    #[error("item #{index} has a blank external attribute name")]
    BlankExternalName { index: usize },

    #[error("item #{index} has a blank internal attribute name")]
    BlankInternalName { index: usize },
}

/// A propagation task failed on one resource.
#[derive(Debug, thiserror::Error)]
#[error("Propagation to resource '{resource}' failed: {cause}")]
pub struct PropagationError {
    pub resource: String,
    #[source]
    pub cause: PropagationCause,
}

impl PropagationError {
    pub fn new(resource: impl Into<String>, cause: impl Into<PropagationCause>) -> Self {
        Self {
            resource: resource.into(),
            cause: cause.into(),
        }
    }
}

/// Why a propagation task failed.
#[derive(Debug, thiserror::Error)]
pub enum PropagationCause {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// A propagation action rejected the task
    #[error("action '{action}' failed: {message}")]
    Action { action: String, message: String },

    /// The remote side reported failure during two-phase confirmation
    #[error("confirmation failed: {message}")]
    Confirmation { message: String },

    /// Resource, connector or action could not be resolved
    #[error("{message}")]
    Configuration { message: String },

    /// The executor recorded the task as failed
    #[error("task failed: {message}")]
    Task { message: String },
}

/// A synchronization entry could not be processed.
#[derive(Debug, thiserror::Error)]
#[error("Entry '{identity_key}' failed: {cause}")]
pub struct SynchronizationEntryError {
    pub identity_key: String,
    #[source]
    pub cause: Box<ReconcilerError>,
}

impl SynchronizationEntryError {
    pub fn new(identity_key: impl Into<String>, cause: impl Into<ReconcilerError>) -> Self {
        Self {
            identity_key: identity_key.into(),
            cause: Box::new(cause.into()),
        }
    }
}

/// Errors raised by connectors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    /// Target system cannot be reached (transient)
    #[error("Resource '{resource}' unavailable: {message}")]
    Unavailable { resource: String, message: String },

    /// Connector call did not complete within the configured timeout
    #[error("Call to resource '{resource}' timed out after {timeout:?}")]
    Timeout { resource: String, timeout: Duration },

    /// Connector does not support the requested capability
    #[error("Connector '{connector}' does not support {capability}")]
    Unsupported {
        connector: String,
        capability: String,
    },

    /// Object not found on the target system
    #[error("Object '{account_id}' not found")]
    ObjectNotFound { account_id: String },

    /// Object already exists on the target system
    #[error("Object '{account_id}' already exists")]
    ObjectAlreadyExists { account_id: String },

    /// Target system rejected the operation
    #[error("Remote error: {message}")]
    Remote { message: String },
}

impl ConnectorError {
    /// Whether the failure is transient and may succeed on replay.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }
}

/// Attribute validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Mandatory attribute is missing
    #[error("Required attribute '{attribute}' is missing")]
    MissingRequiredAttribute { attribute: String },

    /// Value cannot be parsed as the declared type
    #[error("Attribute '{attribute}' has invalid value '{value}', expected {expected}")]
    InvalidValue {
        attribute: String,
        value: String,
        expected: String,
    },

    /// Single-valued attribute has several values
    #[error("Attribute '{attribute}' must be single-valued")]
    ExpectedSingleValue { attribute: String },

    /// Unique attribute value already taken by another identity
    #[error("Attribute '{attribute}' value '{value}' is already used by '{owner}'")]
    UniquenessViolation {
        attribute: String,
        value: String,
        owner: String,
    },

    /// Attribute has no schema
    #[error("Unknown attribute '{attribute}' for {kind}")]
    UnknownAttribute { attribute: String, kind: IdentityKind },

    /// Value does not match the schema's validator pattern
    #[error("Attribute '{attribute}' value '{value}' does not match '{pattern}'")]
    PatternMismatch {
        attribute: String,
        value: String,
        pattern: String,
    },

    /// General validation error with custom message
    #[error("Validation failed: {message}")]
    Custom { message: String },
}

// Convenience methods for creating common errors
impl ReconcilerError {
    /// Create a fatal configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an identity not found error
    pub fn identity_not_found(kind: IdentityKind, key: impl Into<String>) -> Self {
        Self::IdentityNotFound {
            kind,
            key: key.into(),
        }
    }

    /// Create a resource not found error
    pub fn resource_not_found(name: impl Into<String>) -> Self {
        Self::ResourceNotFound { name: name.into() }
    }

    /// Whether this error must abort a run rather than be recorded per entry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::InvalidMapping(_) | Self::ResourceNotFound { .. }
        )
    }
}

impl ValidationError {
    /// Create a missing required attribute error
    pub fn missing_required(attribute: impl Into<String>) -> Self {
        Self::MissingRequiredAttribute {
            attribute: attribute.into(),
        }
    }

    /// Create a custom validation error
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom {
            message: message.into(),
        }
    }
}

// Result type aliases for convenience
pub type ReconcilerResult<T> = Result<T, ReconcilerError>;
pub type ConnectorResult<T> = Result<T, ConnectorError>;
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Outcome of a `before_*` synchronization hook that stops an entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncActionError {
    /// Skip the entry; reported as ignored
    #[error("entry ignored: {reason}")]
    Ignore { reason: String },

    /// Abort the entry; reported as a failure
    #[error("{message}")]
    Failed { message: String },
}

impl SyncActionError {
    pub fn ignore(reason: impl Into<String>) -> Self {
        Self::Ignore {
            reason: reason.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

pub type SyncActionResult = Result<(), SyncActionError>;
