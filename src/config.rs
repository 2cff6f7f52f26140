//! Reconciler configuration.
//!
//! [`ReconcilerConfig`] holds the process-wide settings of a reconciler:
//! connector timeout, propagation fan-out, the naming rule for external
//! resources and the propagation mode new resources start with. It also
//! bounds how much execution history is retained. It can be built in code
//! with the `with_*` methods or loaded from JSON.
//!
//! ```rust
//! use idm_reconciler::config::ReconcilerConfig;
//!
//! let config = ReconcilerConfig::from_json(r#"{"maxConcurrency": 4}"#).unwrap();
//! assert_eq!(config.max_concurrency, 4);
//! assert_eq!(config.default_timeout_secs, 30);
//! ```

use crate::error::{ReconcilerError, ReconcilerResult};
use crate::propagation::PropagationMode;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default pattern for external resource names.
pub const DEFAULT_RESOURCE_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcilerConfig {
    /// Timeout applied to connector calls of resources that set none.
    pub default_timeout_secs: u64,

    /// Upper bound on concurrent connector calls within one propagation batch.
    pub max_concurrency: usize,

    /// Regular expression every external resource name must match.
    pub resource_name_pattern: String,

    /// Propagation mode of resources created through
    /// [`Reconciler::new_resource`](crate::reconciler::Reconciler::new_resource).
    pub default_propagation_mode: PropagationMode,

    /// Number of task executions kept in the execution log.
    pub execution_log_capacity: usize,

    /// Seconds a two-phase submission may wait for its confirmation before it
    /// is failed.
    pub submission_max_age_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 30,
            max_concurrency: 8,
            resource_name_pattern: DEFAULT_RESOURCE_NAME_PATTERN.to_string(),
            default_propagation_mode: PropagationMode::OnePhase,
            execution_log_capacity: 10_000,
            submission_max_age_secs: 24 * 60 * 60,
        }
    }
}

impl ReconcilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> ReconcilerResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_resource_name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.resource_name_pattern = pattern.into();
        self
    }

    pub fn with_default_propagation_mode(mut self, mode: PropagationMode) -> Self {
        self.default_propagation_mode = mode;
        self
    }

    pub fn with_execution_log_capacity(mut self, capacity: usize) -> Self {
        self.execution_log_capacity = capacity;
        self
    }

    pub fn with_submission_max_age(mut self, max_age: Duration) -> Self {
        self.submission_max_age_secs = max_age.as_secs();
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn submission_max_age(&self) -> Duration {
        Duration::from_secs(self.submission_max_age_secs)
    }

    /// Compile the resource name pattern.
    pub fn name_regex(&self) -> ReconcilerResult<Regex> {
        Regex::new(&self.resource_name_pattern).map_err(|e| {
            ReconcilerError::configuration(format!(
                "invalid resource name pattern '{}': {}",
                self.resource_name_pattern, e
            ))
        })
    }

    /// Validate the configuration.
    ///
    /// Timeout, concurrency, log capacity and submission age must be
    /// positive and the name pattern must compile.
    pub fn validate(&self) -> ReconcilerResult<()> {
        if self.default_timeout_secs == 0 {
            return Err(ReconcilerError::configuration(
                "default timeout must be at least one second",
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ReconcilerError::configuration(
                "max concurrency must be at least 1",
            ));
        }
        if self.execution_log_capacity == 0 {
            return Err(ReconcilerError::configuration(
                "execution log capacity must be at least 1",
            ));
        }
        if self.submission_max_age_secs == 0 {
            return Err(ReconcilerError::configuration(
                "submission max age must be at least one second",
            ));
        }
        self.name_regex().map(drop)
    }
}
