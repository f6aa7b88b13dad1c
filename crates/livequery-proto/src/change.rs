//! Change records describing committed mutations.

use std::fmt;
use std::str::FromStr;

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::error::Error;

/// Kind of resource a change or topic refers to.
///
/// Collections and globals share one change log but are resolved from
/// different schema registries.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// A collection of rows.
    Collection,
    /// A singleton document.
    Global,
}

impl ResourceType {
    /// Name used in topic keys and URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Collection => "collection",
            ResourceType::Global => "global",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collection" | "collections" => Ok(ResourceType::Collection),
            "global" | "globals" => Ok(ResourceType::Global),
            other => Err(Error::InvalidResourceType(other.to_string())),
        }
    }
}

/// Mutation kind recorded in the change log.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
    BulkUpdate,
    BulkDelete,
}

impl ChangeOperation {
    /// Name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Create => "create",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
            ChangeOperation::BulkUpdate => "bulk_update",
            ChangeOperation::BulkDelete => "bulk_delete",
        }
    }

    /// Whether the operation touches more than one row.
    pub fn is_bulk(&self) -> bool {
        matches!(self, ChangeOperation::BulkUpdate | ChangeOperation::BulkDelete)
    }
}

/// A change submitted by the CRUD engine after a committed mutation.
///
/// The log assigns `id`, `sequence` and `created_at` when it persists the
/// change and returns a [`ChangeRecord`].
#[derive(Debug, Clone, PartialEq, SerdeSerialize, SerdeDeserialize)]
pub struct NewChange {
    /// Kind of the mutated resource.
    pub resource_type: ResourceType,
    /// Logical resource name (collection or global slug).
    pub resource: String,
    /// Mutation kind.
    pub operation: ChangeOperation,
    /// Affected row, `None` for bulk and global operations.
    #[serde(default)]
    pub record_id: Option<String>,
    /// Locale the mutation was scoped to, if any.
    #[serde(default)]
    pub locale: Option<String>,
    /// Small opaque metadata blob. Consumers re-fetch instead of reading rows from here.
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl NewChange {
    /// Create a change with explicit fields.
    pub fn new(
        resource_type: ResourceType,
        resource: impl Into<String>,
        operation: ChangeOperation,
        record_id: Option<String>,
    ) -> Self {
        Self {
            resource_type,
            resource: resource.into(),
            operation,
            record_id,
            locale: None,
            payload: Vec::new(),
        }
    }

    /// A row was created in a collection.
    pub fn create(collection: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self::new(
            ResourceType::Collection,
            collection,
            ChangeOperation::Create,
            Some(record_id.into()),
        )
    }

    /// A row was updated in a collection.
    pub fn update(collection: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self::new(
            ResourceType::Collection,
            collection,
            ChangeOperation::Update,
            Some(record_id.into()),
        )
    }

    /// A row was deleted from a collection.
    pub fn delete(collection: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self::new(
            ResourceType::Collection,
            collection,
            ChangeOperation::Delete,
            Some(record_id.into()),
        )
    }

    /// Many rows of a collection were updated.
    pub fn bulk_update(collection: impl Into<String>) -> Self {
        Self::new(
            ResourceType::Collection,
            collection,
            ChangeOperation::BulkUpdate,
            None,
        )
    }

    /// Many rows of a collection were deleted.
    pub fn bulk_delete(collection: impl Into<String>) -> Self {
        Self::new(
            ResourceType::Collection,
            collection,
            ChangeOperation::BulkDelete,
            None,
        )
    }

    /// A global document was updated.
    pub fn global_update(global: impl Into<String>) -> Self {
        Self::new(ResourceType::Global, global, ChangeOperation::Update, None)
    }

    /// Scope the change to a locale.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Attach a metadata payload.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// One persisted row of the change log.
///
/// Records are append-only: the log never updates or deletes a record except
/// through explicit retention truncation.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct ChangeRecord {
    /// Opaque unique identifier.
    pub id: [u8; 16],
    /// Monotonically increasing sequence number assigned at append time.
    pub sequence: u64,
    /// Kind of the mutated resource.
    pub resource_type: ResourceType,
    /// Logical resource name.
    pub resource: String,
    /// Mutation kind.
    pub operation: ChangeOperation,
    /// Affected row, `None` for bulk and global operations.
    pub record_id: Option<String>,
    /// Locale the mutation was scoped to, if any.
    pub locale: Option<String>,
    /// Small opaque metadata blob.
    pub payload: Vec<u8>,
    /// Timestamp in microseconds since epoch.
    pub created_at: u64,
}

impl ChangeRecord {
    /// Build a record from a submitted change. The log fills in the sequence.
    pub fn from_new(change: NewChange, sequence: u64) -> Self {
        Self {
            id: generate_change_id(),
            sequence,
            resource_type: change.resource_type,
            resource: change.resource,
            operation: change.operation,
            record_id: change.record_id,
            locale: change.locale,
            payload: change.payload,
            created_at: current_timestamp(),
        }
    }

    /// Hex rendering of the record id.
    pub fn id_hex(&self) -> String {
        hex::encode(self.id)
    }
}

/// Generate a unique change id (UUID v4 layout).
pub fn generate_change_id() -> [u8; 16] {
    use std::sync::atomic::{AtomicU64, Ordering};

    // Disambiguates ids minted within the same nanosecond
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);

    let mut id = [0u8; 16];
    id[..8].copy_from_slice(&now.to_le_bytes());
    id[8..16].copy_from_slice(&counter.to_le_bytes());

    id[6] = (id[6] & 0x0f) | 0x40;
    id[8] = (id[8] & 0x3f) | 0x80;

    id
}

/// Current timestamp in microseconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_parse() {
        assert_eq!(
            "collection".parse::<ResourceType>().unwrap(),
            ResourceType::Collection
        );
        assert_eq!("globals".parse::<ResourceType>().unwrap(), ResourceType::Global);
        assert!(matches!(
            "table".parse::<ResourceType>(),
            Err(Error::InvalidResourceType(_))
        ));
    }

    #[test]
    fn test_new_change_constructors() {
        let change = NewChange::update("posts", "p1").with_locale("en");
        assert_eq!(change.resource_type, ResourceType::Collection);
        assert_eq!(change.operation, ChangeOperation::Update);
        assert_eq!(change.record_id.as_deref(), Some("p1"));
        assert_eq!(change.locale.as_deref(), Some("en"));

        let bulk = NewChange::bulk_delete("posts");
        assert!(bulk.operation.is_bulk());
        assert!(bulk.record_id.is_none());

        let global = NewChange::global_update("settings");
        assert_eq!(global.resource_type, ResourceType::Global);
    }

    #[test]
    fn test_change_ids_are_unique() {
        let a = generate_change_id();
        let b = generate_change_id();
        assert_ne!(a, b);
        assert_eq!(a[6] & 0xf0, 0x40);
    }

    #[test]
    fn test_operation_wire_names() {
        let json = serde_json::to_string(&ChangeOperation::BulkUpdate).unwrap();
        assert_eq!(json, "\"bulk_update\"");
        assert_eq!(ChangeOperation::BulkUpdate.as_str(), "bulk_update");

        let change: NewChange = serde_json::from_str(
            r#"{"resource_type":"collection","resource":"posts","operation":"delete","record_id":"p9"}"#,
        )
        .unwrap();
        assert_eq!(change.operation, ChangeOperation::Delete);
        assert!(change.payload.is_empty());
    }
}
