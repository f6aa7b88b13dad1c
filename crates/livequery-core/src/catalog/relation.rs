//! Relation definitions between resources.

use serde::{Deserialize, Serialize};

/// Kind of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    /// Foreign key on this resource pointing at the target.
    BelongsTo,
    /// Foreign key on the target pointing back at this resource.
    HasMany,
    /// Rows linked through a junction resource.
    ManyToMany,
}

/// A relation from one resource to a target collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDescriptor {
    /// Relation name as used in `with` trees.
    #[serde(default)]
    pub name: String,
    /// Target collection.
    pub target_resource: String,
    /// Relation kind.
    pub kind: RelationKind,
    /// Junction collection for many-to-many relations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub junction_resource: Option<String>,
}

impl RelationDescriptor {
    /// Create a belongs-to relation.
    pub fn belongs_to(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_resource: target.into(),
            kind: RelationKind::BelongsTo,
            junction_resource: None,
        }
    }

    /// Create a has-many relation.
    pub fn has_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_resource: target.into(),
            kind: RelationKind::HasMany,
            junction_resource: None,
        }
    }

    /// Create a many-to-many relation through a junction collection.
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        junction: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target_resource: target.into(),
            kind: RelationKind::ManyToMany,
            junction_resource: Some(junction.into()),
        }
    }

    /// Check if this is a many-to-many relation.
    pub fn is_many_to_many(&self) -> bool {
        self.kind == RelationKind::ManyToMany
    }
}
