//! Typed persistence facade over a [`StorageProvider`].
//!
//! Identities, external resources, schemas and sync tokens are stored as JSON
//! under `domain/entity/key`. Identity writes are validated against the
//! domain's schemas, including uniqueness of `unique` attributes among
//! identities of the same kind.
//!
//! Read-modify-write of one identity must happen under
//! [`PersistenceStore::lock_identity`]; clones of a store share its locks.

use crate::context::DomainContext;
use crate::error::{ReconcilerError, ReconcilerResult, ValidationError};
use crate::identity::{Identity, IdentityKind};
use crate::locks::{IdentityGuard, IdentityLocks, identity_lock_key};
use crate::resource::{ExternalResource, ResourceMap};
use crate::schema::{SchemaDefinition, SchemaRegistry};
use crate::storage::{StorageError, StorageKey, StoragePrefix, StorageProvider};
use log::{debug, trace, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

const RESOURCE_ENTITY: &str = "ExternalResource";
const SCHEMA_ENTITY: &str = "Schema";
const SYNC_TOKEN_ENTITY: &str = "SyncToken";

/// Domain-partitioned store of reconciler records.
#[derive(Debug, Clone)]
pub struct PersistenceStore<S: StorageProvider> {
    storage: S,
    locks: IdentityLocks,
}

impl<S: StorageProvider> PersistenceStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            locks: IdentityLocks::new(),
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Serialize writers of one identity until the guard is dropped.
    ///
    /// Not reentrant: holding the guard while locking the same identity
    /// again waits forever.
    pub async fn lock_identity(
        &self,
        ctx: &DomainContext,
        kind: IdentityKind,
        key: &str,
    ) -> IdentityGuard {
        trace!("Locking {} '{}' in domain '{}'", kind, key, ctx.domain);
        self.locks
            .lock(identity_lock_key(ctx.domain(), kind, key))
            .await
    }

    /// Look up an identity by key.
    pub async fn find_identity(
        &self,
        ctx: &DomainContext,
        kind: IdentityKind,
        key: &str,
    ) -> ReconcilerResult<Option<Identity>> {
        trace!("Finding {} '{}' in domain '{}'", kind, key, ctx.domain);
        self.get(StorageKey::new(ctx.domain(), kind.as_str(), key))
            .await
    }

    /// All identities of a kind accepted by `predicate`, ordered by key.
    pub async fn find_identities<F>(
        &self,
        ctx: &DomainContext,
        kind: IdentityKind,
        predicate: F,
    ) -> ReconcilerResult<Vec<Identity>>
    where
        F: Fn(&Identity) -> bool,
    {
        let entries = self
            .list(StorageKey::prefix(ctx.domain(), kind.as_str()))
            .await?;
        let mut identities = Vec::with_capacity(entries.len());
        for (key, data) in entries {
            match serde_json::from_value::<Identity>(data) {
                Ok(identity) if predicate(&identity) => identities.push(identity),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable identity {}: {}", key, e),
            }
        }
        Ok(identities)
    }

    pub async fn count_identities(
        &self,
        ctx: &DomainContext,
        kind: IdentityKind,
    ) -> ReconcilerResult<usize> {
        self.storage
            .count(StorageKey::prefix(ctx.domain(), kind.as_str()))
            .await
            .map_err(|e| storage_error("count", e))
    }

    /// Create an identity; fails if the key is taken.
    pub async fn create_identity(
        &self,
        ctx: &DomainContext,
        schemas: &SchemaRegistry,
        identity: Identity,
    ) -> ReconcilerResult<Identity> {
        let key = StorageKey::new(ctx.domain(), identity.kind.as_str(), &identity.key);
        if self
            .storage
            .exists(key.clone())
            .await
            .map_err(|e| storage_error("exists", e))?
        {
            return Err(StorageError::already_exists(
                key.domain(),
                key.entity(),
                key.key(),
            )
            .into());
        }
        self.save_identity(ctx, schemas, identity).await
    }

    /// Create or replace an identity after validating it.
    pub async fn save_identity(
        &self,
        ctx: &DomainContext,
        schemas: &SchemaRegistry,
        identity: Identity,
    ) -> ReconcilerResult<Identity> {
        schemas.validate_identity(&identity)?;
        self.check_uniqueness(ctx, schemas, &identity).await?;

        debug!(
            "Saving {} '{}' in domain '{}' (request: '{}')",
            identity.kind, identity.key, ctx.domain, ctx.request_id
        );
        let key = StorageKey::new(ctx.domain(), identity.kind.as_str(), &identity.key);
        self.put(key, &identity).await?;
        Ok(identity)
    }

    /// Delete an identity; `true` if it existed.
    pub async fn delete_identity(
        &self,
        ctx: &DomainContext,
        kind: IdentityKind,
        key: &str,
    ) -> ReconcilerResult<bool> {
        debug!("Deleting {} '{}' in domain '{}'", kind, key, ctx.domain);
        self.storage
            .delete(StorageKey::new(ctx.domain(), kind.as_str(), key))
            .await
            .map_err(|e| storage_error("delete", e))
    }

    async fn check_uniqueness(
        &self,
        ctx: &DomainContext,
        schemas: &SchemaRegistry,
        identity: &Identity,
    ) -> ReconcilerResult<()> {
        for schema in schemas.plain_schemas(identity.kind).filter(|s| s.unique) {
            let Some(value) = identity.attr(&schema.name).and_then(|values| values.first())
            else {
                continue;
            };
            let owners = self
                .storage
                .find_by_attribute(
                    StorageKey::prefix(ctx.domain(), identity.kind.as_str()),
                    &format!("plain_attrs.{}.0", schema.name),
                    value,
                )
                .await
                .map_err(|e| storage_error("find", e))?;
            if let Some((owner, _)) = owners.iter().find(|(key, _)| key.key() != identity.key) {
                return Err(ValidationError::UniquenessViolation {
                    attribute: schema.name.clone(),
                    value: value.to_string(),
                    owner: owner.key().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub async fn save_resource(
        &self,
        ctx: &DomainContext,
        resource: &ExternalResource,
    ) -> ReconcilerResult<()> {
        debug!("Saving resource '{}' in domain '{}'", resource.name, ctx.domain);
        self.put(
            StorageKey::new(ctx.domain(), RESOURCE_ENTITY, &resource.name),
            resource,
        )
        .await
    }

    pub async fn find_resource(
        &self,
        ctx: &DomainContext,
        name: &str,
    ) -> ReconcilerResult<Option<ExternalResource>> {
        self.get(StorageKey::new(ctx.domain(), RESOURCE_ENTITY, name))
            .await
    }

    /// Every resource of the domain by name.
    pub async fn resources(&self, ctx: &DomainContext) -> ReconcilerResult<ResourceMap> {
        let entries = self
            .list(StorageKey::prefix(ctx.domain(), RESOURCE_ENTITY))
            .await?;
        entries
            .into_iter()
            .map(|(_, data)| -> ReconcilerResult<(String, ExternalResource)> {
                let resource: ExternalResource = serde_json::from_value(data)?;
                Ok((resource.name.clone(), resource))
            })
            .collect()
    }

    pub async fn delete_resource(&self, ctx: &DomainContext, name: &str) -> ReconcilerResult<bool> {
        self.storage
            .delete(StorageKey::new(ctx.domain(), RESOURCE_ENTITY, name))
            .await
            .map_err(|e| storage_error("delete", e))
    }

    pub async fn save_schema(
        &self,
        ctx: &DomainContext,
        definition: &SchemaDefinition,
    ) -> ReconcilerResult<()> {
        self.put(
            StorageKey::new(ctx.domain(), SCHEMA_ENTITY, definition.storage_key()),
            definition,
        )
        .await
    }

    /// Schema registry built from the domain's stored definitions.
    pub async fn schemas(&self, ctx: &DomainContext) -> ReconcilerResult<SchemaRegistry> {
        let entries = self
            .list(StorageKey::prefix(ctx.domain(), SCHEMA_ENTITY))
            .await?;
        let definitions = entries
            .into_iter()
            .map(|(_, data)| serde_json::from_value::<SchemaDefinition>(data))
            .collect::<Result<Vec<_>, _>>()?;
        SchemaRegistry::from_definitions(definitions)
    }

    pub async fn sync_token(
        &self,
        ctx: &DomainContext,
        resource: &str,
        kind: IdentityKind,
    ) -> ReconcilerResult<Option<String>> {
        self.get(StorageKey::new(
            ctx.domain(),
            SYNC_TOKEN_ENTITY,
            token_key(resource, kind),
        ))
        .await
    }

    pub async fn save_sync_token(
        &self,
        ctx: &DomainContext,
        resource: &str,
        kind: IdentityKind,
        token: &str,
    ) -> ReconcilerResult<()> {
        trace!("Storing sync token '{}' for {} on '{}'", token, kind, resource);
        self.put(
            StorageKey::new(ctx.domain(), SYNC_TOKEN_ENTITY, token_key(resource, kind)),
            &token,
        )
        .await
    }

    /// Forget the token so the next incremental run starts from scratch.
    pub async fn clear_sync_token(
        &self,
        ctx: &DomainContext,
        resource: &str,
        kind: IdentityKind,
    ) -> ReconcilerResult<bool> {
        self.storage
            .delete(StorageKey::new(
                ctx.domain(),
                SYNC_TOKEN_ENTITY,
                token_key(resource, kind),
            ))
            .await
            .map_err(|e| storage_error("delete", e))
    }

    pub async fn flush(&self) -> ReconcilerResult<()> {
        self.storage
            .flush()
            .await
            .map_err(|e| storage_error("flush", e))
    }

    async fn get<T: DeserializeOwned>(&self, key: StorageKey) -> ReconcilerResult<Option<T>> {
        let data = self
            .storage
            .get(key)
            .await
            .map_err(|e| storage_error("get", e))?;
        Ok(data.map(serde_json::from_value).transpose()?)
    }

    async fn put<T: Serialize + ?Sized>(&self, key: StorageKey, value: &T) -> ReconcilerResult<()> {
        let entity = key.entity().to_string();
        let data = serde_json::to_value(value).map_err(|e| {
            ReconcilerError::from(StorageError::serialization(
                format!("Failed to serialize: {}", e),
                entity,
            ))
        })?;
        self.storage
            .put(key, data)
            .await
            .map_err(|e| storage_error("put", e))?;
        Ok(())
    }

    async fn list(&self, prefix: StoragePrefix) -> ReconcilerResult<Vec<(StorageKey, Value)>> {
        self.storage
            .list(prefix, 0, usize::MAX)
            .await
            .map_err(|e| storage_error("list", e))
    }
}

fn token_key(resource: &str, kind: IdentityKind) -> String {
    format!("{}:{}", resource, kind)
}

fn storage_error(operation: &str, error: impl std::fmt::Display) -> ReconcilerError {
    StorageError::internal(format!("Storage error during {}: {}", operation, error)).into()
}
