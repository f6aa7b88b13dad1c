//! JSON request and response types for the HTTP surface.

use livequery_proto::{ChangeOperation, ChangeRecord, NewChange, ResourceType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Change submitted by the CRUD engine to `POST /changes`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChangeJson {
    pub resource_type: ResourceType,
    pub resource: String,
    pub operation: ChangeOperation,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    /// Opaque metadata, stored as its JSON encoding.
    #[serde(default)]
    pub payload: Option<Value>,
}

impl From<NewChangeJson> for NewChange {
    fn from(json: NewChangeJson) -> Self {
        let payload = json
            .payload
            .map(|value| value.to_string().into_bytes())
            .unwrap_or_default();

        NewChange {
            resource_type: json.resource_type,
            resource: json.resource,
            operation: json.operation,
            record_id: json.record_id,
            locale: json.locale,
            payload,
        }
    }
}

/// Persisted change record in JSON-friendly format.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecordJson {
    /// Record id as hex.
    pub id: String,
    pub sequence: u64,
    pub resource_type: ResourceType,
    pub resource: String,
    pub operation: ChangeOperation,
    pub record_id: Option<String>,
    pub locale: Option<String>,
    /// Payload decoded as JSON, or a hex string when it is not JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Microseconds since the Unix epoch.
    pub created_at: u64,
}

impl From<&ChangeRecord> for ChangeRecordJson {
    fn from(record: &ChangeRecord) -> Self {
        let payload = if record.payload.is_empty() {
            None
        } else {
            Some(
                serde_json::from_slice(&record.payload)
                    .unwrap_or_else(|_| Value::String(hex::encode(&record.payload))),
            )
        };

        Self {
            id: record.id_hex(),
            sequence: record.sequence,
            resource_type: record.resource_type,
            resource: record.resource.clone(),
            operation: record.operation,
            record_id: record.record_id.clone(),
            locale: record.locale.clone(),
            payload,
            created_at: record.created_at,
        }
    }
}

/// Response of `GET /changes`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesResponse {
    pub changes: Vec<ChangeRecordJson>,
    /// Sequence to pass as `from_sequence` for the next page.
    pub next_sequence: u64,
    /// Whether more records exist past this page.
    pub has_more: bool,
    pub current_sequence: u64,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Highest sequence in the change log.
    pub sequence: u64,
    /// Topics with at least one live stream.
    pub topics: usize,
    /// Open stream listeners.
    pub listeners: usize,
    /// Whether snapshot mode is available.
    pub snapshots: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_change_from_json() {
        let json: NewChangeJson = serde_json::from_value(json!({
            "resourceType": "collection",
            "resource": "posts",
            "operation": "bulk_update",
            "locale": "en",
            "payload": {"fields": ["title"]}
        }))
        .unwrap();

        let change = NewChange::from(json);
        assert_eq!(change.operation, ChangeOperation::BulkUpdate);
        assert!(change.record_id.is_none());
        assert_eq!(change.locale.as_deref(), Some("en"));
        assert_eq!(change.payload, br#"{"fields":["title"]}"#.to_vec());
    }

    #[test]
    fn test_record_json_payload_rendering() {
        let json_payload = ChangeRecord::from_new(
            NewChange::update("posts", "p1").with_payload(br#"{"a":1}"#.to_vec()),
            7,
        );
        let rendered = ChangeRecordJson::from(&json_payload);
        assert_eq!(rendered.sequence, 7);
        assert_eq!(rendered.id.len(), 32);
        assert_eq!(rendered.payload, Some(json!({"a": 1})));

        let binary = ChangeRecord::from_new(
            NewChange::update("posts", "p1").with_payload(vec![0xff, 0x00]),
            8,
        );
        assert_eq!(ChangeRecordJson::from(&binary).payload, Some(json!("ff00")));

        let empty = ChangeRecord::from_new(NewChange::delete("posts", "p1"), 9);
        let value = serde_json::to_value(ChangeRecordJson::from(&empty)).unwrap();
        assert!(value.get("payload").is_none());
        assert_eq!(value["recordId"], json!("p1"));
        assert_eq!(value["resourceType"], json!("collection"));
    }
}
