//! Topic identity.
//!
//! A topic is the canonical identity of a logical subscription. Two queries
//! with structurally equal parameters produce byte-identical topic keys, which
//! is what lets many subscribers share one stream connection. A topic knows
//! which resource is queried and with which shape, never which rows matched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical;
use crate::change::ResourceType;
use crate::error::Error;

/// How a topic stream delivers changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Push `{sequence}` only; the consumer re-fetches.
    #[default]
    Signal,
    /// Re-execute the query server-side and push `{sequence, data}`.
    Snapshot,
}

impl DeliveryMode {
    /// Whether this is the default signal mode.
    pub fn is_signal(&self) -> bool {
        *self == DeliveryMode::Signal
    }
}

/// Relation-inclusion tree keyed by relation name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WithTree(BTreeMap<String, WithEntry>);

impl WithTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Include a relation without nesting.
    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.0.insert(relation.into(), WithEntry::Flag(true));
        self
    }

    /// Include a relation with a nested inclusion tree.
    pub fn include_nested(mut self, relation: impl Into<String>, with: WithTree) -> Self {
        self.0.insert(
            relation.into(),
            WithEntry::Nested(NestedWith {
                with,
                options: Map::new(),
            }),
        );
        self
    }

    /// Insert an arbitrary entry.
    pub fn insert(&mut self, relation: impl Into<String>, entry: WithEntry) {
        self.0.insert(relation.into(), entry);
    }

    /// Iterate entries in relation-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &WithEntry)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// One relation entry of a [`WithTree`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WithEntry {
    /// `true` includes the relation, `false` leaves it out.
    Flag(bool),
    /// Include with nested options.
    Nested(NestedWith),
}

impl WithEntry {
    /// Whether the relation is included at all.
    pub fn is_included(&self) -> bool {
        !matches!(self, WithEntry::Flag(false))
    }

    /// Nested inclusion tree, if any.
    pub fn nested(&self) -> Option<&WithTree> {
        match self {
            WithEntry::Nested(nested) if !nested.with.is_empty() => Some(&nested.with),
            _ => None,
        }
    }
}

/// Options of a nested relation entry.
///
/// Only `with` matters for dependency resolution; filters, limits and column
/// selections are kept in `options` because they are still part of the
/// topic's identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NestedWith {
    #[serde(default, skip_serializing_if = "WithTree::is_empty")]
    pub with: WithTree,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

/// Query-shape parameters of a topic, serialized into the topic key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicParams {
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "WithTree::is_empty")]
    pub with: WithTree,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "DeliveryMode::is_signal")]
    pub mode: DeliveryMode,
}

/// A logical subscription target.
#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    /// Kind of the base resource.
    pub resource_type: ResourceType,
    /// Base resource being queried.
    pub resource: String,
    /// Query shape.
    pub params: TopicParams,
}

impl Topic {
    /// Create a topic for a base resource with default parameters.
    pub fn new(resource_type: ResourceType, resource: impl Into<String>) -> Self {
        Self {
            resource_type,
            resource: resource.into(),
            params: TopicParams::default(),
        }
    }

    /// Topic over a collection.
    pub fn collection(name: impl Into<String>) -> Self {
        Self::new(ResourceType::Collection, name)
    }

    /// Topic over a global.
    pub fn global(name: impl Into<String>) -> Self {
        Self::new(ResourceType::Global, name)
    }

    /// Set the `where` filter.
    pub fn with_where(mut self, filter: Value) -> Self {
        self.params.filter = Some(filter);
        self
    }

    /// Replace the relation-inclusion tree.
    pub fn with_tree(mut self, with: WithTree) -> Self {
        self.params.with = with;
        self
    }

    /// Include a relation without nesting.
    pub fn include(mut self, relation: impl Into<String>) -> Self {
        self.params.with = std::mem::take(&mut self.params.with).include(relation);
        self
    }

    /// Include a relation with a nested tree.
    pub fn include_nested(mut self, relation: impl Into<String>, with: WithTree) -> Self {
        self.params.with = std::mem::take(&mut self.params.with).include_nested(relation, with);
        self
    }

    /// Set the ordering.
    pub fn with_order_by(mut self, order_by: Value) -> Self {
        self.params.order_by = Some(order_by);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.params.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.params.offset = Some(offset);
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.params.locale = Some(locale.into());
        self
    }

    /// Select the delivery mode.
    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.params.mode = mode;
        self
    }

    /// Delivery mode of this topic.
    pub fn mode(&self) -> DeliveryMode {
        self.params.mode
    }

    /// Locale the topic is scoped to, `None` when locale-agnostic.
    pub fn locale(&self) -> Option<&str> {
        self.params.locale.as_deref()
    }

    /// Canonical query string of the parameters.
    pub fn query_string(&self) -> String {
        match serde_json::to_value(&self.params) {
            Ok(value) => canonical::canonical_query(&value),
            // TopicParams only holds JSON-representable data
            Err(_) => String::new(),
        }
    }

    /// Canonical topic key: `{resource_type}/{resource}[?{query}]`.
    pub fn key(&self) -> String {
        let query = self.query_string();
        let resource = urlencoding::encode(&self.resource);
        if query.is_empty() {
            format!("{}/{}", self.resource_type, resource)
        } else {
            format!("{}/{}?{}", self.resource_type, resource, query)
        }
    }

    /// Parse a topic from its path parts and canonical query string.
    pub fn from_query(
        resource_type: ResourceType,
        resource: impl Into<String>,
        query: &str,
    ) -> Result<Self, Error> {
        let value = canonical::unflatten(query)?;
        let params = serde_json::from_value(value)
            .map_err(|e| Error::MalformedTopic(e.to_string()))?;
        Ok(Self {
            resource_type,
            resource: resource.into(),
            params,
        })
    }

    /// Parse a topic key produced by [`Topic::key`].
    pub fn from_key(key: &str) -> Result<Self, Error> {
        let (path, query) = key.split_once('?').unwrap_or((key, ""));
        let (resource_type, resource) = path
            .split_once('/')
            .ok_or_else(|| Error::MalformedTopic(format!("missing resource in `{key}`")))?;
        let resource = urlencoding::decode(resource)
            .map_err(|e| Error::MalformedTopic(e.to_string()))?;
        Self::from_query(resource_type.parse()?, resource.into_owned(), query)
    }
}
