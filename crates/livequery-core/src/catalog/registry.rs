//! Schema registry for collections and globals.

use std::collections::HashMap;
use std::path::Path;

use livequery_proto::ResourceType;
use serde::{Deserialize, Serialize};

use super::{RelationKind, ResourceSchema};
use crate::error::Error;

/// Immutable snapshot of every resource's relation definitions.
///
/// Collections and globals live in separate namespaces: a global may share
/// its name with a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    #[serde(default)]
    collections: HashMap<String, ResourceSchema>,
    #[serde(default)]
    globals: HashMap<String, ResourceSchema>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collection.
    pub fn with_collection(mut self, schema: ResourceSchema) -> Self {
        self.collections.insert(schema.name.clone(), schema);
        self
    }

    /// Register a global.
    pub fn with_global(mut self, schema: ResourceSchema) -> Self {
        self.globals.insert(schema.name.clone(), schema);
        self
    }

    /// Look up a collection schema.
    pub fn collection(&self, name: &str) -> Option<&ResourceSchema> {
        self.collections.get(name)
    }

    /// Look up a global schema.
    pub fn global(&self, name: &str) -> Option<&ResourceSchema> {
        self.globals.get(name)
    }

    /// Look up a resource of the given kind.
    pub fn resource(&self, kind: ResourceType, name: &str) -> Option<&ResourceSchema> {
        match kind {
            ResourceType::Collection => self.collection(name),
            ResourceType::Global => self.global(name),
        }
    }

    /// Number of registered collections.
    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }

    /// Number of registered globals.
    pub fn global_count(&self) -> usize {
        self.globals.len()
    }

    /// Parse a registry from JSON.
    ///
    /// ```json
    /// {
    ///   "collections": {
    ///     "articles": {
    ///       "relations": {
    ///         "author": { "targetResource": "users", "kind": "belongsTo" },
    ///         "categories": {
    ///           "targetResource": "categories",
    ///           "kind": "manyToMany",
    ///           "junctionResource": "article_categories"
    ///         }
    ///       }
    ///     }
    ///   },
    ///   "globals": {}
    /// }
    /// ```
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let mut registry: SchemaRegistry = serde_json::from_str(json)
            .map_err(|e| Error::InvalidSchema(e.to_string()))?;
        registry.normalize();
        registry.validate()?;
        Ok(registry)
    }

    /// Load a registry from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Fill in names omitted in JSON from their map keys.
    fn normalize(&mut self) {
        for map in [&mut self.collections, &mut self.globals] {
            for (name, schema) in map.iter_mut() {
                schema.name = name.clone();
                for (relation_name, relation) in schema.relations.iter_mut() {
                    relation.name = relation_name.clone();
                }
            }
        }
    }

    /// Check relation definitions for consistency.
    pub fn validate(&self) -> Result<(), Error> {
        for schema in self.collections.values().chain(self.globals.values()) {
            for relation in schema.relations.values() {
                match (relation.kind, &relation.junction_resource) {
                    (RelationKind::ManyToMany, None) => {
                        return Err(Error::InvalidSchema(format!(
                            "many-to-many relation `{}.{}` has no junction resource",
                            schema.name, relation.name
                        )));
                    }
                    (RelationKind::BelongsTo | RelationKind::HasMany, Some(junction)) => {
                        return Err(Error::InvalidSchema(format!(
                            "relation `{}.{}` is not many-to-many but names junction `{}`",
                            schema.name, relation.name, junction
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
