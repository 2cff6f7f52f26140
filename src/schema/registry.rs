//! Schema registry holding the plain, derived and virtual schemas of a domain.

use super::derived::DerivedExpression;
use super::types::{DerivedSchema, PlainSchema, SchemaDefinition, VirtualSchema};
use crate::error::{ReconcilerError, ReconcilerResult};
use crate::identity::{Identity, IdentityKind};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

/// Registry of attribute schemas with validation and derivation services.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    plain: HashMap<IdentityKind, BTreeMap<String, PlainSchema>>,
    derived: HashMap<IdentityKind, BTreeMap<String, (DerivedSchema, DerivedExpression)>>,
    virtuals: HashMap<IdentityKind, BTreeMap<String, VirtualSchema>>,
    validators: HashMap<(IdentityKind, String), Regex>,
}

impl SchemaRegistry {
    /// Create an empty registry. Attributes of a kind without registered
    /// plain schemas are accepted without type checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from persisted definitions.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = SchemaDefinition>,
    ) -> ReconcilerResult<Self> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.add(definition)?;
        }
        Ok(registry)
    }

    /// Register any schema definition.
    pub fn add(&mut self, definition: SchemaDefinition) -> ReconcilerResult<()> {
        match definition {
            SchemaDefinition::Plain(schema) => self.add_plain(schema),
            SchemaDefinition::Derived(schema) => self.add_derived(schema),
            SchemaDefinition::Virtual(schema) => {
                self.add_virtual(schema);
                Ok(())
            }
        }
    }

    /// Register a plain schema, compiling its validator pattern.
    pub fn add_plain(&mut self, schema: PlainSchema) -> ReconcilerResult<()> {
        if let Some(pattern) = &schema.validator {
            let regex = Regex::new(pattern).map_err(|e| {
                ReconcilerError::configuration(format!(
                    "invalid validator for schema '{}': {}",
                    schema.name, e
                ))
            })?;
            self.validators
                .insert((schema.kind, schema.name.clone()), regex);
        }
        self.plain
            .entry(schema.kind)
            .or_default()
            .insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Register a derived schema, parsing its expression.
    pub fn add_derived(&mut self, schema: DerivedSchema) -> ReconcilerResult<()> {
        let expression = DerivedExpression::parse(&schema.expression).map_err(|e| {
            ReconcilerError::configuration(format!(
                "invalid expression for derived schema '{}': {}",
                schema.name, e
            ))
        })?;
        self.derived
            .entry(schema.kind)
            .or_default()
            .insert(schema.name.clone(), (schema, expression));
        Ok(())
    }

    pub fn add_virtual(&mut self, schema: VirtualSchema) {
        self.virtuals
            .entry(schema.kind)
            .or_default()
            .insert(schema.name.clone(), schema);
    }

    pub fn plain_schema(&self, kind: IdentityKind, name: &str) -> Option<&PlainSchema> {
        self.plain.get(&kind).and_then(|schemas| schemas.get(name))
    }

    pub fn plain_schemas(&self, kind: IdentityKind) -> impl Iterator<Item = &PlainSchema> {
        self.plain.get(&kind).into_iter().flat_map(|s| s.values())
    }

    pub fn derived_schema(&self, kind: IdentityKind, name: &str) -> Option<&DerivedSchema> {
        self.derived
            .get(&kind)
            .and_then(|schemas| schemas.get(name))
            .map(|(schema, _)| schema)
    }

    pub fn virtual_schema(&self, kind: IdentityKind, name: &str) -> Option<&VirtualSchema> {
        self.virtuals.get(&kind).and_then(|schemas| schemas.get(name))
    }

    pub fn virtual_schemas(&self, kind: IdentityKind) -> impl Iterator<Item = &VirtualSchema> {
        self.virtuals.get(&kind).into_iter().flat_map(|s| s.values())
    }

    /// Whether plain attributes of this kind are type-checked.
    pub fn is_strict(&self, kind: IdentityKind) -> bool {
        self.plain.get(&kind).is_some_and(|s| !s.is_empty())
    }

    pub(super) fn validator(&self, kind: IdentityKind, name: &str) -> Option<&Regex> {
        self.validators.get(&(kind, name.to_string()))
    }

    /// Compute a derived attribute for an identity.
    pub fn derive(&self, identity: &Identity, name: &str) -> Option<String> {
        self.derived
            .get(&identity.kind)
            .and_then(|schemas| schemas.get(name))
            .and_then(|(_, expression)| expression.evaluate(identity))
    }

    /// Compute every derived attribute defined for the identity's kind.
    pub fn derive_all(&self, identity: &Identity) -> BTreeMap<String, String> {
        self.derived
            .get(&identity.kind)
            .into_iter()
            .flat_map(|schemas| schemas.iter())
            .filter_map(|(name, (_, expression))| {
                expression
                    .evaluate(identity)
                    .map(|value| (name.clone(), value))
            })
            .collect()
    }
}
