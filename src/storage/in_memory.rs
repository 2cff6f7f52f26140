//! In-memory storage implementation.
//!
//! Thread-safe `StorageProvider` backed by nested HashMaps behind a tokio
//! RwLock. Intended for tests, demos and embedded deployments where
//! persistence is not required.
//!
//! # Performance Characteristics
//!
//! * PUT/GET/DELETE: O(1) average case
//! * LIST with pagination: O(n log n) in the entries of a prefix (sorted keys)
//! * FIND_BY_ATTRIBUTE: O(n) with JSON path traversal

use crate::storage::{StorageError, StorageKey, StoragePrefix, StorageProvider};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory storage implementation.
///
/// Structure: `domain` → `entity` → `key` → `data`
#[derive(Clone)]
pub struct InMemoryStorage {
    data: Arc<RwLock<HashMap<String, HashMap<String, HashMap<String, Value>>>>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage instance.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Extract a nested attribute value from JSON data using dot notation.
    fn extract_attribute_value(data: &Value, attribute_path: &str) -> Option<String> {
        let mut current = data;

        for part in attribute_path.split('.') {
            if let Ok(index) = part.parse::<usize>() {
                current = current.get(index)?;
            } else {
                current = current.get(part)?;
            }
        }

        match current {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageProvider for InMemoryStorage {
    type Error = StorageError;

    async fn put(&self, key: StorageKey, data: Value) -> Result<Value, Self::Error> {
        let mut data_guard = self.data.write().await;

        data_guard
            .entry(key.domain().to_string())
            .or_default()
            .entry(key.entity().to_string())
            .or_default()
            .insert(key.key().to_string(), data.clone());

        Ok(data)
    }

    async fn get(&self, key: StorageKey) -> Result<Option<Value>, Self::Error> {
        let data_guard = self.data.read().await;

        let result = data_guard
            .get(key.domain())
            .and_then(|domain_data| domain_data.get(key.entity()))
            .and_then(|entity_data| entity_data.get(key.key()))
            .cloned();

        Ok(result)
    }

    async fn delete(&self, key: StorageKey) -> Result<bool, Self::Error> {
        let mut data_guard = self.data.write().await;

        let existed = data_guard
            .get_mut(key.domain())
            .and_then(|domain_data| domain_data.get_mut(key.entity()))
            .map(|entity_data| entity_data.remove(key.key()).is_some())
            .unwrap_or(false);

        Ok(existed)
    }

    async fn list(
        &self,
        prefix: StoragePrefix,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<(StorageKey, Value)>, Self::Error> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let data_guard = self.data.read().await;

        let entity_data = match data_guard
            .get(prefix.domain())
            .and_then(|domain_data| domain_data.get(prefix.entity()))
        {
            Some(data) => data,
            None => return Ok(Vec::new()),
        };

        let mut keys: Vec<_> = entity_data.keys().collect();
        keys.sort();

        let results = keys
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|key| {
                entity_data.get(key).map(|data| {
                    (
                        StorageKey::new(prefix.domain(), prefix.entity(), key),
                        data.clone(),
                    )
                })
            })
            .collect();

        Ok(results)
    }

    async fn find_by_attribute(
        &self,
        prefix: StoragePrefix,
        attribute: &str,
        value: &str,
    ) -> Result<Vec<(StorageKey, Value)>, Self::Error> {
        let data_guard = self.data.read().await;

        let entity_data = match data_guard
            .get(prefix.domain())
            .and_then(|domain_data| domain_data.get(prefix.entity()))
        {
            Some(data) => data,
            None => return Ok(Vec::new()),
        };

        let mut results: Vec<(StorageKey, Value)> = entity_data
            .iter()
            .filter(|(_, data)| {
                Self::extract_attribute_value(data, attribute).as_deref() == Some(value)
            })
            .map(|(key, data)| {
                (
                    StorageKey::new(prefix.domain(), prefix.entity(), key),
                    data.clone(),
                )
            })
            .collect();

        results.sort_by(|a, b| a.0.key().cmp(b.0.key()));

        Ok(results)
    }

    async fn exists(&self, key: StorageKey) -> Result<bool, Self::Error> {
        Ok(self.get(key).await?.is_some())
    }

    async fn count(&self, prefix: StoragePrefix) -> Result<usize, Self::Error> {
        let data_guard = self.data.read().await;

        let count = data_guard
            .get(prefix.domain())
            .and_then(|domain_data| domain_data.get(prefix.entity()))
            .map(|entity_data| entity_data.len())
            .unwrap_or(0);

        Ok(count)
    }
}
