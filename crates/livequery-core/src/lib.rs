//! livequery core - change log, schema catalog and dependency resolution.
//!
//! This crate holds the parts of the realtime subsystem that do not depend on
//! a network transport:
//!
//! - [`changelog`] persists committed mutations with sequence numbers
//! - [`catalog`] describes resources and their relations
//! - [`resolver`] turns a topic into the set of resources that invalidate it

pub mod catalog;
pub mod changelog;
pub mod error;
pub mod resolver;

pub use catalog::{RelationDescriptor, RelationKind, Relations, ResourceSchema, SchemaRegistry};
pub use changelog::ChangeLog;
pub use error::Error;
pub use resolver::{DependencyResolver, DependencySet, DEFAULT_MAX_DEPTH};

/// Re-export protocol types.
pub use livequery_proto as proto;
