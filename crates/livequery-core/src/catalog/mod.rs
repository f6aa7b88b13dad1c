//! Schema catalog for livequery.
//!
//! The catalog holds the relation model the dependency resolver walks. It is
//! built once at startup and shared as an immutable snapshot.

mod registry;
mod relation;
mod resource;

pub use registry::SchemaRegistry;
pub use relation::{RelationDescriptor, RelationKind};
pub use resource::{Relations, ResourceSchema};
