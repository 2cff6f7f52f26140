//! Identity records and patches.
//!
//! Users and roles share one flat record tagged with an [`IdentityKind`].
//! Plain attribute values are kept as strings; their types are enforced by
//! the schema registry. Derived attributes are computed on demand and virtual
//! attributes are resolved live, so neither is persisted.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Kind of identity an operation or mapping applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdentityKind {
    User,
    Role,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::User => "User",
            IdentityKind::Role => "Role",
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user or role held by the internal store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub key: String,
    pub kind: IdentityKind,
    #[serde(default)]
    pub plain_attrs: BTreeMap<String, Vec<String>>,
    /// Values fetched from external resources; never persisted
    #[serde(skip)]
    pub virtual_attrs: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Names of the external resources this identity is provisioned to
    #[serde(default)]
    pub resources: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_digest: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Identity {
    /// Create an empty identity.
    pub fn new(kind: IdentityKind, key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            kind,
            plain_attrs: BTreeMap::new(),
            virtual_attrs: BTreeMap::new(),
            status: None,
            resources: BTreeSet::new(),
            password_digest: None,
            created_at: now,
            last_modified: now,
        }
    }

    /// Set a single-valued plain attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.plain_attrs.insert(name.into(), vec![value.into()]);
        self
    }

    /// Set a multi-valued plain attribute.
    pub fn with_values(mut self, name: impl Into<String>, values: Vec<String>) -> Self {
        self.plain_attrs.insert(name.into(), values);
        self
    }

    /// Assign an external resource.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.insert(resource.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password_digest = Some(password_digest(password));
        self
    }

    /// Values of a plain attribute.
    pub fn attr(&self, name: &str) -> Option<&[String]> {
        self.plain_attrs.get(name).map(|v| v.as_slice())
    }

    /// First value of a plain attribute, falling back to virtual values.
    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.plain_attrs
            .get(name)
            .or_else(|| self.virtual_attrs.get(name))
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }

    /// Whether the identity is provisioned to the given resource.
    pub fn is_linked_to(&self, resource: &str) -> bool {
        self.resources.contains(resource)
    }

    /// Check a clear-text password against the stored digest.
    pub fn password_matches(&self, password: &str) -> bool {
        self.password_digest
            .as_deref()
            .is_some_and(|digest| digest == password_digest(password))
    }
}

/// SHA-256 digest of a clear-text password, base64 encoded.
pub fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Changes to apply to an identity.
///
/// Attribute values in `plain_attrs` replace the current values wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub plain_attrs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub removed_attrs: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub resources_to_add: BTreeSet<String>,
    #[serde(default)]
    pub resources_to_remove: BTreeSet<String>,
}

impl IdentityPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.plain_attrs.insert(name.into(), vec![value.into()]);
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources_to_add.insert(resource.into());
        self
    }

    pub fn without_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources_to_remove.insert(resource.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_none()
            && self.plain_attrs.is_empty()
            && self.removed_attrs.is_empty()
            && self.password.is_none()
            && self.resources_to_add.is_empty()
            && self.resources_to_remove.is_empty()
    }

    /// Apply the patch, returning whether anything actually changed.
    ///
    /// The key is never rewritten on an existing identity; it only seeds
    /// identities built with [`IdentityPatch::to_identity`].
    pub fn apply(&self, identity: &mut Identity) -> bool {
        let mut changed = false;

        for (name, values) in &self.plain_attrs {
            if identity.plain_attrs.get(name) != Some(values) {
                identity.plain_attrs.insert(name.clone(), values.clone());
                changed = true;
            }
        }
        for name in &self.removed_attrs {
            changed |= identity.plain_attrs.remove(name).is_some();
        }
        if let Some(password) = &self.password {
            let digest = password_digest(password);
            if identity.password_digest.as_deref() != Some(digest.as_str()) {
                identity.password_digest = Some(digest);
                changed = true;
            }
        }
        for resource in &self.resources_to_add {
            changed |= identity.resources.insert(resource.clone());
        }
        for resource in &self.resources_to_remove {
            changed |= identity.resources.remove(resource);
        }

        if changed {
            identity.last_modified = Utc::now();
        }
        changed
    }

    /// Build a fresh identity from this patch.
    pub fn to_identity(&self, kind: IdentityKind, fallback_key: &str) -> Identity {
        let key = self.key.clone().unwrap_or_else(|| fallback_key.to_string());
        let mut identity = Identity::new(kind, key);
        self.apply(&mut identity);
        identity
    }
}
