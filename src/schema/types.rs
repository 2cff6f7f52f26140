//! Core schema type definitions.
//!
//! Plain schemas describe stored attributes, derived schemas compute values
//! from plain attributes, virtual schemas read values live from a resource.

use crate::identity::IdentityKind;
use serde::{Deserialize, Serialize};

/// Value types a plain attribute may declare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum AttributeType {
    #[default]
    String,
    Long,
    Double,
    Boolean,
    /// RFC 3339 timestamp
    Date,
    /// One of the schema's `enum_values`
    Enum,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Long => "long",
            AttributeType::Double => "double",
            AttributeType::Boolean => "boolean",
            AttributeType::Date => "date",
            AttributeType::Enum => "enum",
        }
    }
}

/// Definition of a stored attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlainSchema {
    pub name: String,
    pub kind: IdentityKind,
    #[serde(rename = "type", default)]
    pub value_type: AttributeType,
    #[serde(default)]
    pub multi_valued: bool,
    /// Values must be unique among identities of the same kind
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub enum_values: Vec<String>,
    /// Regular expression every value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
}

impl PlainSchema {
    pub fn new(kind: IdentityKind, name: impl Into<String>, value_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            kind,
            value_type,
            multi_valued: false,
            unique: false,
            mandatory: false,
            enum_values: Vec::new(),
            validator: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn multi_valued(mut self) -> Self {
        self.multi_valued = true;
        self
    }

    pub fn with_enum_values(mut self, values: Vec<String>) -> Self {
        self.enum_values = values;
        self
    }

    pub fn with_validator(mut self, pattern: impl Into<String>) -> Self {
        self.validator = Some(pattern.into());
        self
    }
}

/// Attribute computed from plain attributes, e.g. `"{firstname} {surname}"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DerivedSchema {
    pub name: String,
    pub kind: IdentityKind,
    pub expression: String,
}

impl DerivedSchema {
    pub fn new(kind: IdentityKind, name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            expression: expression.into(),
        }
    }
}

/// Attribute read live from an external resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualSchema {
    pub name: String,
    pub kind: IdentityKind,
    pub resource: String,
    pub external_attribute: String,
}

/// Any schema definition, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "schemaType", rename_all = "camelCase")]
pub enum SchemaDefinition {
    Plain(PlainSchema),
    Derived(DerivedSchema),
    Virtual(VirtualSchema),
}

impl SchemaDefinition {
    pub fn name(&self) -> &str {
        match self {
            SchemaDefinition::Plain(s) => &s.name,
            SchemaDefinition::Derived(s) => &s.name,
            SchemaDefinition::Virtual(s) => &s.name,
        }
    }

    pub fn kind(&self) -> IdentityKind {
        match self {
            SchemaDefinition::Plain(s) => s.kind,
            SchemaDefinition::Derived(s) => s.kind,
            SchemaDefinition::Virtual(s) => s.kind,
        }
    }

    /// Storage key, unique per kind and name.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.kind(), self.name())
    }
}
