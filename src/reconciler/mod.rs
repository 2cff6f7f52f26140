//! Reconciler facade.
//!
//! Wires the persistence store, the connector and action registries, the
//! propagation executor and the workflow collaborator together.
//!
//! # Module Organization
//!
//! * [`builder`] - Fluent construction and configuration validation
//! * [`core`] - The [`Reconciler`] struct and its accessors
//! * [`operations`] - Resource, identity, synchronization and job operations

pub mod builder;
pub mod core;
pub mod operations;

pub use builder::ReconcilerBuilder;
pub use core::Reconciler;
pub use operations::JobKind;
