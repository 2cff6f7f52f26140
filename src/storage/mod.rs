//! Storage abstraction layer for reconciler entities.
//!
//! The `StorageProvider` trait defines pure JSON key/value operations,
//! partitioned by domain. Identity, mapping and propagation semantics live
//! above it in [`crate::store::PersistenceStore`].
//!
//! # Architecture
//!
//! The storage layer is responsible for:
//! - PUT/GET/DELETE operations on JSON data
//! - Domain isolation and data organization
//! - Basic querying by attribute path
//! - Flushing buffered writes
//!
//! The storage layer is NOT responsible for:
//! - Schema validation or uniqueness rules
//! - Deciding between create and update
//! - Resource assignment bookkeeping
//!
//! # Example Usage
//!
//! ```rust
//! use idm_reconciler::storage::{StorageProvider, StorageKey, InMemoryStorage};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = InMemoryStorage::new();
//!
//! let key = StorageKey::new("master", "User", "jdoe");
//! storage.put(key.clone(), json!({"key": "jdoe"})).await?;
//!
//! let retrieved = storage.get(key.clone()).await?;
//! assert!(retrieved.is_some());
//!
//! assert!(storage.delete(key).await?);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod in_memory;

pub use errors::StorageError;
pub use in_memory::InMemoryStorage;

use serde_json::Value;
use std::fmt;
use std::future::Future;

/// A hierarchical key for identifying entries in storage.
///
/// Entries are organized as: `domain` → `entity` → `key`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey {
    domain: String,
    entity: String,
    key: String,
}

impl StorageKey {
    /// Create a new storage key.
    pub fn new(
        domain: impl Into<String>,
        entity: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            entity: entity.into(),
            key: key.into(),
        }
    }

    /// Get the domain.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Get the entity type.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Get the entry key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Create a prefix for listing entries of an entity type within a domain.
    pub fn prefix(domain: impl Into<String>, entity: impl Into<String>) -> StoragePrefix {
        StoragePrefix {
            domain: domain.into(),
            entity: entity.into(),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.entity, self.key)
    }
}

/// A prefix for querying entries by domain and entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePrefix {
    domain: String,
    entity: String,
}

impl StoragePrefix {
    /// Get the domain.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Get the entity type.
    pub fn entity(&self) -> &str {
        &self.entity
    }
}

impl fmt::Display for StoragePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.entity)
    }
}

/// Core trait for storage providers that handle pure data persistence.
///
/// # Design Principles
///
/// - **PUT/GET/DELETE Model**: create and update are both PUT
/// - **Domain Isolation**: every operation is scoped through a [`StorageKey`]
/// - **Async First**: all operations return futures
pub trait StorageProvider: Send + Sync {
    /// The error type returned by storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Store data at the specified key and return the stored data.
    ///
    /// An existing entry under the same key is replaced.
    fn put(
        &self,
        key: StorageKey,
        data: Value,
    ) -> impl Future<Output = Result<Value, Self::Error>> + Send;

    /// Retrieve data by key; `None` if absent.
    fn get(
        &self,
        key: StorageKey,
    ) -> impl Future<Output = Result<Option<Value>, Self::Error>> + Send;

    /// Delete data by key; `true` if the entry existed.
    fn delete(&self, key: StorageKey) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// List entries matching a prefix with pagination.
    ///
    /// Results are ordered by key. An `offset` past the end or a `limit` of 0
    /// yields an empty vector.
    fn list(
        &self,
        prefix: StoragePrefix,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<(StorageKey, Value)>, Self::Error>> + Send;

    /// Find entries whose attribute at a dot-separated JSON path equals `value`.
    ///
    /// Array elements are addressed by index (`plain_attrs.email.0`).
    fn find_by_attribute(
        &self,
        prefix: StoragePrefix,
        attribute: &str,
        value: &str,
    ) -> impl Future<Output = Result<Vec<(StorageKey, Value)>, Self::Error>> + Send;

    /// Check if an entry exists.
    fn exists(&self, key: StorageKey) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Count the entries matching a prefix.
    fn count(
        &self,
        prefix: StoragePrefix,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send;

    /// Make buffered writes durable.
    ///
    /// Backends without write buffering keep the default no-op.
    fn flush(&self) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async { Ok(()) }
    }
}
