//! Common test utilities for reconciler integration testing.
//!
//! Provides the [`TestEnv`] harness, builders, fixtures and assertion
//! macros shared by the integration tests.

use idm_reconciler::connector::MemoryConnector;
use idm_reconciler::report::MemoryReportSink;
use idm_reconciler::storage::InMemoryStorage;
use idm_reconciler::{DomainContext, Identity, IdentityKind, Reconciler};
use std::collections::HashMap;
use std::sync::Arc;

pub mod builders;
pub mod fixtures;

/// Custom assertion macro for specific error messages
#[macro_export]
macro_rules! assert_error_message_contains {
    ($result:expr, $substring:expr) => {
        match $result {
            Err(err) => assert!(
                err.to_string().contains($substring),
                "Error message '{}' does not contain '{}'",
                err.to_string(),
                $substring
            ),
            Ok(_) => panic!("Expected error containing '{}', but the call succeeded", $substring),
        }
    };
}

/// Custom assertion macro for specific error variants
#[macro_export]
macro_rules! assert_error_variant {
    ($result:expr, $variant:pat) => {
        match $result {
            Err($variant) => {}
            Err(other) => panic!("Expected {}, got error: {}", stringify!($variant), other),
            Ok(_) => panic!("Expected {}, but the call succeeded", stringify!($variant)),
        }
    };
}

/// Route `log` output through the test harness; `RUST_LOG=debug` shows it.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A reconciler over in-memory storage and in-memory resources.
pub struct TestEnv {
    pub reconciler: Arc<Reconciler<InMemoryStorage>>,
    pub connectors: HashMap<String, Arc<MemoryConnector>>,
    pub sink: Arc<MemoryReportSink>,
    pub ctx: DomainContext,
}

impl TestEnv {
    /// Connector behind a resource.
    pub fn connector(&self, resource: &str) -> Arc<MemoryConnector> {
        self.connectors
            .get(resource)
            .cloned()
            .unwrap_or_else(|| panic!("no connector for resource '{}'", resource))
    }

    pub async fn identity(&self, key: &str) -> Option<Identity> {
        self.reconciler
            .store()
            .find_identity(&self.ctx, IdentityKind::User, key)
            .await
            .expect("store read")
    }

    pub async fn user_count(&self) -> usize {
        self.reconciler
            .store()
            .count_identities(&self.ctx, IdentityKind::User)
            .await
            .expect("store count")
    }
}
