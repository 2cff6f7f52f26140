//! Attribute validation against plain schemas.
//!
//! Uniqueness needs the persistence store and is checked there; everything
//! that can be decided from a single identity lives here.

use super::registry::SchemaRegistry;
use super::types::{AttributeType, PlainSchema};
use crate::error::{ValidationError, ValidationResult};
use crate::identity::Identity;
use chrono::DateTime;

impl SchemaRegistry {
    /// Validate every plain attribute of an identity.
    pub fn validate_identity(&self, identity: &Identity) -> ValidationResult<()> {
        if !self.is_strict(identity.kind) {
            return Ok(());
        }

        for schema in self.plain_schemas(identity.kind) {
            if schema.mandatory
                && identity
                    .attr(&schema.name)
                    .is_none_or(|values| values.iter().all(|v| v.is_empty()))
            {
                return Err(ValidationError::missing_required(&schema.name));
            }
        }

        for (name, values) in &identity.plain_attrs {
            let schema = self.plain_schema(identity.kind, name).ok_or_else(|| {
                ValidationError::UnknownAttribute {
                    attribute: name.clone(),
                    kind: identity.kind,
                }
            })?;
            self.validate_values(schema, values)?;
        }

        Ok(())
    }

    /// Validate the values of one attribute.
    pub fn validate_values(&self, schema: &PlainSchema, values: &[String]) -> ValidationResult<()> {
        if values.len() > 1 && (!schema.multi_valued || schema.unique) {
            return Err(ValidationError::ExpectedSingleValue {
                attribute: schema.name.clone(),
            });
        }

        for value in values {
            validate_type(schema, value)?;
            if let Some(regex) = self.validator(schema.kind, &schema.name) {
                if !regex.is_match(value) {
                    return Err(ValidationError::PatternMismatch {
                        attribute: schema.name.clone(),
                        value: value.clone(),
                        pattern: regex.as_str().to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn validate_type(schema: &PlainSchema, value: &str) -> ValidationResult<()> {
    let valid = match schema.value_type {
        AttributeType::String => true,
        AttributeType::Long => value.parse::<i64>().is_ok(),
        AttributeType::Double => value.parse::<f64>().is_ok(),
        AttributeType::Boolean => matches!(value, "true" | "false"),
        AttributeType::Date => DateTime::parse_from_rfc3339(value).is_ok(),
        AttributeType::Enum => schema.enum_values.iter().any(|allowed| allowed == value),
    };

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidValue {
            attribute: schema.name.clone(),
            value: value.to_string(),
            expected: schema.value_type.as_str().to_string(),
        })
    }
}
