//! Mapping between internal attributes and external resource attributes.
//!
//! A [`Mapping`] belongs to one resource and one identity kind. The
//! [`MappingEngine`] resolves account ids, builds the attribute set pushed to
//! a resource and turns attributes pulled from a resource into an
//! [`IdentityPatch`].
//!
//! Structural validation runs when a resource is saved, not on every
//! propagation, and collects every violation before returning.

use crate::error::{InvalidMappingError, MappingViolation};
use crate::identity::{Identity, IdentityKind, IdentityPatch};
use crate::schema::SchemaRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute name to values, as seen by a connector.
pub type ExternalAttributes = BTreeMap<String, Vec<String>>;

/// Direction(s) a mapping item is used in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum MappingPurpose {
    /// Internal to external only
    Push,
    /// External to internal only
    Pull,
    #[default]
    Both,
    /// Declared but unused
    None,
}

impl MappingPurpose {
    pub fn includes_push(&self) -> bool {
        matches!(self, MappingPurpose::Push | MappingPurpose::Both)
    }

    pub fn includes_pull(&self) -> bool {
        matches!(self, MappingPurpose::Pull | MappingPurpose::Both)
    }
}

/// Where the internal side of a mapping item reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum InternalAttributeKind {
    #[default]
    Plain,
    Derived,
    Virtual,
    /// The identity key
    Key,
    /// The clear-text password of the current change
    Password,
}

/// One mapped attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingItem {
    pub ext_attr_name: String,
    pub int_attr_name: String,
    #[serde(default)]
    pub int_kind: InternalAttributeKind,
    #[serde(default)]
    pub purpose: MappingPurpose,
    #[serde(default)]
    pub account_id: bool,
    #[serde(default)]
    pub password: bool,
}

impl MappingItem {
    pub fn new(
        ext_attr_name: impl Into<String>,
        int_attr_name: impl Into<String>,
        purpose: MappingPurpose,
    ) -> Self {
        Self {
            ext_attr_name: ext_attr_name.into(),
            int_attr_name: int_attr_name.into(),
            int_kind: InternalAttributeKind::Plain,
            purpose,
            account_id: false,
            password: false,
        }
    }

    /// Flag this item as the account id.
    pub fn account_id(mut self) -> Self {
        self.account_id = true;
        self
    }

    /// Flag this item as the password item.
    pub fn password(mut self) -> Self {
        self.password = true;
        self.int_kind = InternalAttributeKind::Password;
        self
    }

    pub fn with_kind(mut self, kind: InternalAttributeKind) -> Self {
        self.int_kind = kind;
        self
    }

    fn is_password(&self) -> bool {
        self.password || self.int_kind == InternalAttributeKind::Password
    }
}

/// Ordered mapping items for one identity kind on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub kind: IdentityKind,
    #[serde(default)]
    pub items: Vec<MappingItem>,
}

impl Mapping {
    pub fn new(kind: IdentityKind) -> Self {
        Self {
            kind,
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, item: MappingItem) -> Self {
        self.items.push(item);
        self
    }

    /// Check structural invariants, reporting every violation.
    pub fn validate(&self, resource: &str) -> Result<(), InvalidMappingError> {
        let mut violations = Vec::new();

        match self.items.iter().filter(|i| i.account_id).count() {
            0 => violations.push(MappingViolation::MissingAccountId),
            1 => {}
            count => violations.push(MappingViolation::MultipleAccountIds { count }),
        }

        let passwords = self.items.iter().filter(|i| i.is_password()).count();
        if passwords > 1 {
            violations.push(MappingViolation::MultiplePasswords { count: passwords });
        }

        for (index, item) in self.items.iter().enumerate() {
            if item.ext_attr_name.trim().is_empty() {
                violations.push(MappingViolation::BlankExternalName { index });
            }
            if item.int_attr_name.trim().is_empty() {
                violations.push(MappingViolation::BlankInternalName { index });
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(InvalidMappingError {
                resource: resource.to_string(),
                kind: self.kind,
                violations,
            })
        }
    }

    pub fn account_id_item(&self) -> Option<&MappingItem> {
        self.items.iter().find(|i| i.account_id)
    }

    pub fn password_item(&self) -> Option<&MappingItem> {
        self.items.iter().find(|i| i.is_password())
    }

    pub fn push_items(&self) -> impl Iterator<Item = &MappingItem> {
        self.items.iter().filter(|i| i.purpose.includes_push())
    }

    pub fn pull_items(&self) -> impl Iterator<Item = &MappingItem> {
        self.items.iter().filter(|i| i.purpose.includes_pull())
    }

    pub fn has_push_items(&self) -> bool {
        self.push_items().next().is_some()
    }

    /// The external attribute carrying the account id.
    pub fn account_id_attribute(&self) -> Option<&str> {
        self.account_id_item().map(|i| i.ext_attr_name.as_str())
    }
}

/// Translates identities to and from resource attribute sets.
#[derive(Debug, Clone, Copy)]
pub struct MappingEngine<'a> {
    schemas: &'a SchemaRegistry,
}

impl<'a> MappingEngine<'a> {
    pub fn new(schemas: &'a SchemaRegistry) -> Self {
        Self { schemas }
    }

    /// Account id of the identity on the resource this mapping belongs to.
    pub fn resolve_account_id(&self, mapping: &Mapping, identity: &Identity) -> Option<String> {
        let item = mapping.account_id_item()?;
        self.internal_values(item, identity, None)
            .and_then(|values| values.into_iter().find(|v| !v.is_empty()))
    }

    /// Attribute set to push for an identity.
    ///
    /// Only push-purpose items contribute. The password item is filled from
    /// `password` and left out when no password is part of the change.
    pub fn to_external_attributes(
        &self,
        mapping: &Mapping,
        identity: &Identity,
        password: Option<&str>,
    ) -> ExternalAttributes {
        mapping
            .push_items()
            .filter_map(|item| {
                self.internal_values(item, identity, password)
                    .filter(|values| !values.is_empty())
                    .map(|values| (item.ext_attr_name.clone(), values))
            })
            .collect()
    }

    /// Identity patch from attributes read on a resource.
    ///
    /// Derived and virtual items are read-only on the internal side and are
    /// skipped.
    pub fn to_internal_patch(
        &self,
        mapping: &Mapping,
        external: &ExternalAttributes,
    ) -> IdentityPatch {
        let mut patch = IdentityPatch::new();

        for item in mapping.pull_items() {
            let Some(values) = external.get(&item.ext_attr_name) else {
                continue;
            };
            if item.is_password() {
                patch.password = values.first().cloned();
                continue;
            }
            match item.int_kind {
                InternalAttributeKind::Key => patch.key = values.first().cloned(),
                InternalAttributeKind::Plain => {
                    patch
                        .plain_attrs
                        .insert(item.int_attr_name.clone(), values.clone());
                }
                InternalAttributeKind::Derived
                | InternalAttributeKind::Virtual
                | InternalAttributeKind::Password => {}
            }
        }

        patch
    }

    fn internal_values(
        &self,
        item: &MappingItem,
        identity: &Identity,
        password: Option<&str>,
    ) -> Option<Vec<String>> {
        if item.is_password() {
            return password.map(|p| vec![p.to_string()]);
        }
        match item.int_kind {
            InternalAttributeKind::Key => Some(vec![identity.key.clone()]),
            InternalAttributeKind::Plain => identity.attr(&item.int_attr_name).map(|v| v.to_vec()),
            InternalAttributeKind::Derived => self
                .schemas
                .derive(identity, &item.int_attr_name)
                .map(|value| vec![value]),
            InternalAttributeKind::Virtual => identity.virtual_attrs.get(&item.int_attr_name).cloned(),
            InternalAttributeKind::Password => None,
        }
    }
}
