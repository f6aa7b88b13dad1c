//! Dependency resolution for topics.
//!
//! Maps a base resource plus its `with` tree to every resource whose mutation
//! can change the query result. The walk follows the caller's `with` tree, not
//! the schema graph, so relation cycles (`comments -> article -> comments`)
//! terminate on their own: the request tree is finite. The depth cap only
//! guards against absurdly deep requests.

use std::collections::BTreeSet;
use std::sync::Arc;

use livequery_proto::{ResourceType, Topic, WithTree};

use crate::catalog::{Relations, SchemaRegistry};
use crate::error::Error;

/// Default maximum nesting of `with` trees.
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Resources a topic depends on, split by registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    /// Collections whose mutation invalidates the topic.
    pub collections: BTreeSet<String>,
    /// Globals whose mutation invalidates the topic.
    pub globals: BTreeSet<String>,
}

impl DependencySet {
    /// Whether a change to the given resource invalidates the topic.
    pub fn contains(&self, resource_type: ResourceType, resource: &str) -> bool {
        match resource_type {
            ResourceType::Collection => self.collections.contains(resource),
            ResourceType::Global => self.globals.contains(resource),
        }
    }

    /// All resource names regardless of registry.
    pub fn resources(&self) -> BTreeSet<String> {
        self.collections.union(&self.globals).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.collections.len() + self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.globals.is_empty()
    }
}

/// Pure resolver over a schema registry snapshot.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    registry: Arc<SchemaRegistry>,
    max_depth: usize,
}

impl DependencyResolver {
    /// Create a resolver over a registry snapshot.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Override the nesting cap.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Registry this resolver reads.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Resolve the dependencies of a topic.
    pub fn resolve_topic(&self, topic: &Topic) -> Result<DependencySet, Error> {
        self.resolve(topic.resource_type, &topic.resource, &topic.params.with)
    }

    /// Resolve the dependencies of `base` queried with the given `with` tree.
    ///
    /// Relation targets are always collections. For a global base the global
    /// itself lands in `globals` and everything reachable in `collections`.
    pub fn resolve(
        &self,
        resource_type: ResourceType,
        base: &str,
        with: &WithTree,
    ) -> Result<DependencySet, Error> {
        let schema = self
            .registry
            .resource(resource_type, base)
            .ok_or_else(|| Error::UnknownResource {
                kind: resource_type,
                resource: base.to_string(),
            })?;

        let mut deps = DependencySet::default();
        match resource_type {
            ResourceType::Collection => deps.collections.insert(base.to_string()),
            ResourceType::Global => deps.globals.insert(base.to_string()),
        };

        self.walk(base, schema, with, 1, &mut deps)?;
        Ok(deps)
    }

    fn walk(
        &self,
        resource: &str,
        schema: &impl Relations,
        with: &WithTree,
        depth: usize,
        deps: &mut DependencySet,
    ) -> Result<(), Error> {
        if with.is_empty() {
            return Ok(());
        }
        if depth > self.max_depth {
            return Err(Error::DepthExceeded {
                max_depth: self.max_depth,
            });
        }

        for (name, entry) in with.iter().filter(|(_, e)| e.is_included()) {
            let relation = schema
                .relation(name)
                .ok_or_else(|| Error::UnknownRelation {
                    resource: resource.to_string(),
                    relation: name.clone(),
                })?;

            deps.collections.insert(relation.target_resource.clone());
            if let Some(junction) = &relation.junction_resource {
                deps.collections.insert(junction.clone());
            }

            if let Some(nested) = entry.nested() {
                let target = self
                    .registry
                    .collection(&relation.target_resource)
                    .ok_or_else(|| Error::UnknownResource {
                        kind: ResourceType::Collection,
                        resource: relation.target_resource.clone(),
                    })?;
                self.walk(&relation.target_resource, target, nested, depth + 1, deps)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResourceSchema;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn blog_registry() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::new()
                .with_collection(
                    ResourceSchema::new("articles")
                        .has_many("comments", "comments")
                        .belongs_to("author", "authors")
                        .many_to_many("categories", "categories", "article_categories"),
                )
                .with_collection(
                    ResourceSchema::new("comments")
                        .belongs_to("author", "authors")
                        .belongs_to("article", "articles"),
                )
                .with_collection(ResourceSchema::new("authors").has_many("articles", "articles"))
                .with_collection(ResourceSchema::new("categories"))
                .with_collection(ResourceSchema::new("article_categories"))
                .with_global(ResourceSchema::new("homepage").has_many("featured", "articles")),
        )
    }

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn tree(value: serde_json::Value) -> WithTree {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_base_only() {
        let resolver = DependencyResolver::new(blog_registry());
        let deps = resolver
            .resolve(ResourceType::Collection, "articles", &WithTree::new())
            .unwrap();
        assert_eq!(deps.collections, names(&["articles"]));
        assert!(deps.globals.is_empty());
    }

    #[test]
    fn test_nested_has_many_and_belongs_to() {
        let resolver = DependencyResolver::new(blog_registry());
        let with = tree(json!({"comments": {"with": {"author": true}}}));
        let deps = resolver
            .resolve(ResourceType::Collection, "articles", &with)
            .unwrap();
        assert_eq!(deps.resources(), names(&["articles", "comments", "authors"]));
    }

    #[test]
    fn test_many_to_many_includes_junction() {
        let resolver = DependencyResolver::new(blog_registry());
        let with = tree(json!({"categories": true}));
        let deps = resolver
            .resolve(ResourceType::Collection, "articles", &with)
            .unwrap();
        assert_eq!(
            deps.resources(),
            names(&["articles", "categories", "article_categories"])
        );
    }

    #[test]
    fn test_cyclic_schema_follows_request_tree() {
        let resolver = DependencyResolver::new(blog_registry());
        let with = tree(json!({
            "comments": {"with": {"article": {"with": {"comments": {"with": {"author": true}}}}}}
        }));
        let deps = resolver
            .resolve(ResourceType::Collection, "articles", &with)
            .unwrap();
        assert_eq!(deps.resources(), names(&["articles", "comments", "authors"]));
    }

    #[test]
    fn test_unknown_relation_is_an_error() {
        let resolver = DependencyResolver::new(blog_registry());
        let with = tree(json!({"comments": {"with": {"likes": true}}}));
        let err = resolver
            .resolve(ResourceType::Collection, "articles", &with)
            .unwrap_err();
        match err {
            Error::UnknownRelation { resource, relation } => {
                assert_eq!(resource, "comments");
                assert_eq!(relation, "likes");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_base_resource() {
        let resolver = DependencyResolver::new(blog_registry());
        let err = resolver
            .resolve(ResourceType::Global, "articles", &WithTree::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownResource {
                kind: ResourceType::Global,
                ..
            }
        ));
    }

    #[test]
    fn test_excluded_relation_is_skipped() {
        let resolver = DependencyResolver::new(blog_registry());
        let with = tree(json!({"comments": false, "author": true}));
        let deps = resolver
            .resolve(ResourceType::Collection, "articles", &with)
            .unwrap();
        assert_eq!(deps.resources(), names(&["articles", "authors"]));
    }

    #[test]
    fn test_global_splits_dependency_sets() {
        let resolver = DependencyResolver::new(blog_registry());
        let with = tree(json!({"featured": {"with": {"author": true}}}));
        let deps = resolver
            .resolve(ResourceType::Global, "homepage", &with)
            .unwrap();
        assert_eq!(deps.globals, names(&["homepage"]));
        assert_eq!(deps.collections, names(&["articles", "authors"]));
        assert!(deps.contains(ResourceType::Global, "homepage"));
        assert!(!deps.contains(ResourceType::Collection, "homepage"));
    }

    #[test]
    fn test_depth_cap() {
        let resolver = DependencyResolver::new(blog_registry()).with_max_depth(2);
        let with = tree(json!({
            "comments": {"with": {"article": {"with": {"author": true}}}}
        }));
        assert!(matches!(
            resolver.resolve(ResourceType::Collection, "articles", &with),
            Err(Error::DepthExceeded { max_depth: 2 })
        ));

        let shallow = tree(json!({"comments": {"with": {"author": true}}}));
        assert!(resolver
            .resolve(ResourceType::Collection, "articles", &shallow)
            .is_ok());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let resolver = DependencyResolver::new(blog_registry());
        let topic = Topic::collection("articles")
            .include("categories")
            .include_nested("comments", WithTree::new().include("author"));
        let first = resolver.resolve_topic(&topic).unwrap();
        for _ in 0..10 {
            assert_eq!(resolver.resolve_topic(&topic).unwrap(), first);
        }
    }
}
