//! Explicit execution context for reconciler operations.
//!
//! Every core call receives a [`DomainContext`] naming the domain (tenant) it
//! operates on and the credentials it acts with. Nothing is read from ambient
//! or thread-local state, so domains can be processed sequentially or in
//! parallel without interfering.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default domain name used by single-domain deployments.
pub const MASTER_DOMAIN: &str = "Master";

/// Credentials a run acts with inside a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub principal: String,
    #[serde(default)]
    pub entitlements: Vec<String>,
}

impl Credentials {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            entitlements: Vec::new(),
        }
    }

    /// Credentials used by scheduled jobs.
    pub fn system() -> Self {
        Self::new("admin")
    }

    pub fn with_entitlement(mut self, entitlement: impl Into<String>) -> Self {
        self.entitlements.push(entitlement.into());
        self
    }
}

/// Domain-scoped context passed to every engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainContext {
    /// Domain (tenant) whose data the call reads and writes
    pub domain: String,
    /// Who the call acts as
    pub credentials: Credentials,
    /// Unique identifier for log correlation
    pub request_id: String,
}

impl DomainContext {
    /// Create a context with a generated request ID.
    pub fn new(domain: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            domain: domain.into(),
            credentials,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Context for the default domain acting with system credentials.
    pub fn master() -> Self {
        Self::new(MASTER_DOMAIN, Credentials::system())
    }

    /// Replace the request ID.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Derive a context for a nested operation in the same domain.
    pub fn child(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            credentials: self.credentials.clone(),
            request_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn principal(&self) -> &str {
        &self.credentials.principal
    }
}

impl Default for DomainContext {
    fn default() -> Self {
        Self::master()
    }
}
