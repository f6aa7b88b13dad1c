//! Resource schemas.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::RelationDescriptor;

/// Anything that exposes relation definitions by name.
pub trait Relations {
    /// All relations keyed by name.
    fn relations(&self) -> &BTreeMap<String, RelationDescriptor>;

    /// Look up one relation.
    fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations().get(name)
    }
}

/// Schema of a collection or global, reduced to what dependency resolution needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSchema {
    /// Resource name.
    #[serde(default)]
    pub name: String,
    /// Relations keyed by name.
    #[serde(default)]
    pub relations: BTreeMap<String, RelationDescriptor>,
}

impl ResourceSchema {
    /// Create a resource with no relations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relations: BTreeMap::new(),
        }
    }

    /// Add a relation.
    pub fn with_relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.insert(relation.name.clone(), relation);
        self
    }

    /// Add a belongs-to relation.
    pub fn belongs_to(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.with_relation(RelationDescriptor::belongs_to(name, target))
    }

    /// Add a has-many relation.
    pub fn has_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.with_relation(RelationDescriptor::has_many(name, target))
    }

    /// Add a many-to-many relation.
    pub fn many_to_many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        junction: impl Into<String>,
    ) -> Self {
        self.with_relation(RelationDescriptor::many_to_many(name, target, junction))
    }
}

impl Relations for ResourceSchema {
    fn relations(&self) -> &BTreeMap<String, RelationDescriptor> {
        &self.relations
    }
}
