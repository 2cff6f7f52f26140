//! Integration scenarios, one module per engine.

pub mod mapping;
pub mod propagation;
pub mod property_tests;
pub mod push;
pub mod scheduler;
pub mod synchronization;
