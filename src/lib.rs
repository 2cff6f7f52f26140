//! Identity reconciliation engine for Rust.
//!
//! Keeps users and roles held in an internal store consistent with the
//! external systems they are provisioned to, through pluggable connectors.
//!
//! # Core Components
//!
//! - [`Reconciler`] - Entry point for identity changes, pull and push runs
//! - [`PropagationExecutor`] - Per-resource task execution with failure isolation
//! - [`StorageProvider`] - Trait for implementing storage backends
//! - [`Connector`] - Trait for implementing external resource connectors
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use idm_reconciler::{DomainContext, Identity, IdentityKind, ReconcilerBuilder};
//! use idm_reconciler::connector::{ConnectorRegistry, MemoryConnector};
//! use idm_reconciler::storage::InMemoryStorage;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut connectors = ConnectorRegistry::new();
//! connectors.register_instance("memory", Arc::new(MemoryConnector::new("ldap")));
//! let reconciler = ReconcilerBuilder::new(InMemoryStorage::new())
//!     .with_connectors(connectors)
//!     .build()?;
//!
//! let ctx = DomainContext::master();
//! let identity = Identity::new(IdentityKind::User, "alice").with_attr("email", "alice@example.org");
//! let (_alice, report) = reconciler.create_identity(&ctx, identity, Some("s3cret")).await?;
//! println!("{} propagation(s) failed", report.summary().failed);
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod config;
pub mod connector;
pub mod context;
pub mod error;
pub mod identity;
pub mod locks;
pub mod mapping;
pub mod propagation;
pub mod reconciler;
pub mod report;
pub mod resource;
pub mod scheduler;
pub mod schema;
pub mod storage;
pub mod store;
pub mod sync;
pub mod workflow;

// Re-export commonly used types for convenience
pub use config::ReconcilerConfig;
pub use connector::{ConnInstance, Connector, ConnectorRegistry};
pub use context::{Credentials, DomainContext};
pub use error::{
    ConnectorError, ConnectorResult, PropagationError, ReconcilerError, ReconcilerResult,
    ValidationError,
};
pub use identity::{Identity, IdentityKind, IdentityPatch};
pub use mapping::{Mapping, MappingItem, MappingPurpose};
pub use propagation::{PropagationExecutor, PropagationMode, PropagationOperation};
pub use reconciler::{JobKind, Reconciler, ReconcilerBuilder};
pub use report::{ProvisioningReport, ReportSnapshot, ReportStatus};
pub use resource::ExternalResource;
pub use scheduler::Scheduler;
pub use storage::StorageProvider;
pub use sync::{PushTask, SyncTask};
