//! Attribute schemas for identities.
//!
//! - [`types`]: plain, derived and virtual schema definitions
//! - [`registry`]: per-domain registry with derivation support
//! - [`validation`]: type, cardinality and pattern checks
//! - [`derived`]: template expressions for derived attributes

pub mod derived;
pub mod registry;
pub mod types;
pub mod validation;

pub use derived::DerivedExpression;
pub use registry::SchemaRegistry;
pub use types::{AttributeType, DerivedSchema, PlainSchema, SchemaDefinition, VirtualSchema};
