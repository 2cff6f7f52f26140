//! Correlation of external objects with internal identities.
//!
//! An external object belongs to the identity that is already linked to the
//! resource with the same account id. Failing that, the resource's correlation
//! rule (or, by default, the account-id item's internal attribute) is matched
//! against the values pulled from the object.

use crate::connector::{Connector, ConnectorObject, Filter};
use crate::context::DomainContext;
use crate::error::ReconcilerResult;
use crate::identity::{Identity, IdentityKind, IdentityPatch};
use crate::mapping::{InternalAttributeKind, Mapping, MappingEngine};
use crate::resource::ExternalResource;
use crate::schema::SchemaRegistry;
use crate::storage::StorageProvider;
use crate::store::PersistenceStore;
use log::warn;

/// What the correlator matches on.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Criteria {
    Key(String),
    Attributes(Vec<(String, String)>),
}

pub struct Correlator<'a, S: StorageProvider> {
    store: &'a PersistenceStore<S>,
    schemas: &'a SchemaRegistry,
}

impl<'a, S: StorageProvider> Correlator<'a, S> {
    pub fn new(store: &'a PersistenceStore<S>, schemas: &'a SchemaRegistry) -> Self {
        Self { store, schemas }
    }

    /// Identity owning the external object `account_id` on `resource`.
    ///
    /// `patch` carries the pulled values; without it only linked identities
    /// are considered.
    pub async fn correlate(
        &self,
        ctx: &DomainContext,
        resource: &ExternalResource,
        mapping: &Mapping,
        account_id: &str,
        patch: Option<&IdentityPatch>,
    ) -> ReconcilerResult<Option<Identity>> {
        let kind = mapping.kind;
        let engine = MappingEngine::new(self.schemas);

        let linked = self
            .store
            .find_identities(ctx, kind, |identity| {
                identity.is_linked_to(&resource.name)
                    && engine.resolve_account_id(mapping, identity).as_deref() == Some(account_id)
            })
            .await?;
        if let Some(identity) = linked.into_iter().next() {
            return Ok(Some(identity));
        }

        let Some(patch) = patch else {
            return Ok(None);
        };
        let Some(criteria) = criteria(resource, mapping, account_id, patch) else {
            return Ok(None);
        };

        match criteria {
            Criteria::Key(key) => self.store.find_identity(ctx, kind, &key).await,
            Criteria::Attributes(pairs) => {
                let mut matches = self
                    .store
                    .find_identities(ctx, kind, |identity| {
                        pairs.iter().all(|(attribute, value)| {
                            identity.first_value(attribute) == Some(value.as_str())
                        })
                    })
                    .await?;
                if matches.len() > 1 {
                    warn!(
                        "{} {} identities correlate with '{}' on '{}', using '{}'",
                        matches.len(),
                        kind,
                        account_id,
                        resource.name,
                        matches[0].key
                    );
                }
                Ok((!matches.is_empty()).then(|| matches.swap_remove(0)))
            }
        }
    }

    /// External object owned by `identity` on a resource, looked up by account id.
    pub async fn correlate_external(
        &self,
        connector: &dyn Connector,
        kind: IdentityKind,
        mapping: &Mapping,
        account_id: &str,
    ) -> ReconcilerResult<Option<ConnectorObject>> {
        let mut filters = vec![Filter::uid(account_id)];
        if let Some(attribute) = mapping.account_id_attribute() {
            filters.push(Filter::equals(attribute, account_id));
        }
        let filter = Filter::Or { filters };
        Ok(connector
            .search(kind, Some(&filter))
            .await?
            .into_iter()
            .next())
    }
}

fn criteria(
    resource: &ExternalResource,
    mapping: &Mapping,
    account_id: &str,
    patch: &IdentityPatch,
) -> Option<Criteria> {
    let attributes = match resource.correlation(mapping.kind) {
        Some(rule) => rule.attributes.clone(),
        None => {
            let item = mapping.account_id_item()?;
            if item.int_kind == InternalAttributeKind::Key {
                return Some(Criteria::Key(
                    patch.key.clone().unwrap_or_else(|| account_id.to_string()),
                ));
            }
            vec![item.int_attr_name.clone()]
        }
    };

    attributes
        .into_iter()
        .map(|attribute| {
            let value = patch.plain_attrs.get(&attribute)?.first()?.clone();
            Some((attribute, value))
        })
        .collect::<Option<Vec<_>>>()
        .filter(|pairs| !pairs.is_empty())
        .map(Criteria::Attributes)
}
