//! Events pushed over a topic stream.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Named event types on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A change touched one of the topic's dependencies.
    Signal,
    /// The recomputed query result.
    Snapshot,
}

impl EventKind {
    /// Event name used on the stream.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Signal => "signal",
            EventKind::Snapshot => "snapshot",
        }
    }

    /// Parse an event name. Control and keep-alive names are not event kinds.
    pub fn from_name(name: &str) -> Result<Self, Error> {
        match name {
            "signal" => Ok(EventKind::Signal),
            "snapshot" => Ok(EventKind::Snapshot),
            other => Err(Error::UnknownEvent(other.to_string())),
        }
    }
}

/// Payload of one stream event: `{sequence, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Change-log sequence the event was produced for.
    pub sequence: u64,
    /// Recomputed result in snapshot mode. A `null` result is `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
}

/// A field that is present is `Some`, even when it holds `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl StreamEvent {
    /// A bare invalidation signal.
    pub fn signal(sequence: u64) -> Self {
        Self {
            sequence,
            data: None,
        }
    }

    /// A recomputed snapshot.
    pub fn snapshot(sequence: u64, data: Value) -> Self {
        Self {
            sequence,
            data: Some(data),
        }
    }

    /// Which named event carries this payload.
    pub fn kind(&self) -> EventKind {
        if self.data.is_some() {
            EventKind::Snapshot
        } else {
            EventKind::Signal
        }
    }

    /// Encode the payload as one line of JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a payload received under the given event name.
    pub fn from_wire(name: &str, data: &str) -> Result<Self, Error> {
        let kind = EventKind::from_name(name)?;
        let event: StreamEvent = serde_json::from_str(data)?;
        match (kind, event.data.is_some()) {
            (EventKind::Snapshot, false) => Err(Error::UnknownEvent(
                "snapshot event without data".to_string(),
            )),
            _ => Ok(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signal_wire_format() {
        let event = StreamEvent::signal(42);
        assert_eq!(event.kind(), EventKind::Signal);
        assert_eq!(event.to_json().unwrap(), r#"{"sequence":42}"#);
    }

    #[test]
    fn test_from_wire() {
        let event = StreamEvent::from_wire("snapshot", r#"{"sequence":7,"data":[{"id":"p1"}]}"#)
            .unwrap();
        assert_eq!(event, StreamEvent::snapshot(7, json!([{"id": "p1"}])));

        assert!(StreamEvent::from_wire("snapshot", r#"{"sequence":7}"#).is_err());
        assert_eq!(
            StreamEvent::from_wire("signal", r#"{"sequence":8}"#).unwrap(),
            StreamEvent::signal(8)
        );
        assert!(matches!(
            StreamEvent::from_wire("ping", "{}"),
            Err(Error::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_null_snapshot_survives_the_wire() {
        let event = StreamEvent::snapshot(3, Value::Null);
        assert_eq!(event.kind(), EventKind::Snapshot);

        let json = event.to_json().unwrap();
        assert_eq!(json, r#"{"sequence":3,"data":null}"#);
        let decoded = StreamEvent::from_wire("snapshot", &json).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(decoded.kind(), EventKind::Snapshot);
    }
}
