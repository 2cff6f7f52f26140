//! Storage-specific error types for pure data operations.
//!
//! These errors describe persistence failures only. They carry no knowledge of
//! identities, mappings or propagation semantics.

use std::fmt;

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// The entry already exists when it shouldn't.
    AlreadyExists {
        domain: String,
        entity: String,
        key: String,
    },

    /// A record could not be turned into JSON for its entity.
    Serialization {
        message: String,
        entity: Option<String>,
    },

    /// Failure reported by the backend.
    Internal {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::AlreadyExists {
                domain,
                entity,
                key,
            } => write!(f, "Entry already exists: {}/{}/{}", domain, entity, key),
            StorageError::Serialization { message, entity } => {
                if let Some(entity) = entity {
                    write!(f, "Serialization error: {} (entity: {})", message, entity)
                } else {
                    write!(f, "Serialization error: {}", message)
                }
            }
            StorageError::Internal { message, .. } => {
                write!(f, "Internal storage error: {}", message)
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Internal { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl StorageError {
    pub fn already_exists(
        domain: impl Into<String>,
        entity: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::AlreadyExists {
            domain: domain.into(),
            entity: entity.into(),
            key: key.into(),
        }
    }

    pub fn serialization(message: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
            entity: Some(entity.into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }
}
