//! Domain events and the envelopes they travel in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::EventSourcingError;

/// Metadata key carrying the aggregate identifier.
pub const AGGREGATE_ID: &str = "_aggregate_id";
/// Metadata key carrying the aggregate type name.
pub const AGGREGATE_TYPE: &str = "_aggregate_type";
/// Metadata key carrying the aggregate version.
pub const AGGREGATE_VERSION: &str = "_aggregate_version";
/// Metadata key the storage adapters set to a message's stream position on read.
pub const POSITION: &str = "_position";

/// A domain event raised by application code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    event_type: String,
    payload: Map<String, Value>,
    metadata: Map<String, Value>,
}

impl Event {
    /// Creates an event of the given runtime type.
    #[must_use]
    pub fn create_with_type(
        event_type: impl Into<String>,
        payload: Map<String, Value>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            metadata,
        }
    }

    /// Creates an event from JSON values, which must both be objects.
    ///
    /// # Errors
    ///
    /// Returns `EventSourcingError::InvalidArgument` if `payload` or `metadata`
    /// is not a JSON object.
    pub fn from_json(
        event_type: impl Into<String>,
        payload: Value,
        metadata: Value,
    ) -> Result<Self, EventSourcingError> {
        let Value::Object(payload) = payload else {
            return Err(EventSourcingError::InvalidArgument(
                "event payload must be a JSON object".into(),
            ));
        };
        let Value::Object(metadata) = metadata else {
            return Err(EventSourcingError::InvalidArgument(
                "event metadata must be a JSON object".into(),
            ));
        };
        Ok(Self::create_with_type(event_type, payload, metadata))
    }

    /// Returns the runtime event type name.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Returns the event payload.
    #[must_use]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Returns the event metadata.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }
}

impl From<StoredMessage> for Event {
    fn from(message: StoredMessage) -> Self {
        Self {
            event_type: message.resolved_type,
            payload: message.payload,
            metadata: message.metadata,
        }
    }
}

/// A message on its way into a stream, already carrying its wire name.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    /// Unique message identifier.
    pub id: Uuid,
    /// Name the message is persisted under.
    pub message_name: String,
    /// Timestamp of message creation.
    pub created_at: DateTime<Utc>,
    /// Serialized event payload.
    pub payload: Map<String, Value>,
    /// Event metadata.
    pub metadata: Map<String, Value>,
}

impl PendingMessage {
    /// Looks up a metadata entry as a string, rendering numbers as text.
    #[must_use]
    pub fn metadata_text(&self, key: &str) -> Option<String> {
        metadata_text(&self.metadata, key)
    }
}

/// A message read back from a stream.
///
/// `resolved_type` is always a runtime type name: it is resolved exactly once,
/// by the [`MessageFactory`](crate::mapper::MessageFactory) that built it.
/// Messages cannot be deserialized around the factory:
///
/// ```compile_fail
/// let message: eventline_core::event::StoredMessage =
///     serde_json::from_str(r#"{"resolved_type":"TicketRegistered"}"#).unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    id: Uuid,
    created_at: DateTime<Utc>,
    payload: Map<String, Value>,
    metadata: Map<String, Value>,
    resolved_type: String,
}

impl StoredMessage {
    pub(crate) fn new(
        id: Uuid,
        created_at: DateTime<Utc>,
        payload: Map<String, Value>,
        metadata: Map<String, Value>,
        resolved_type: String,
    ) -> Self {
        Self {
            id,
            created_at,
            payload,
            metadata,
            resolved_type,
        }
    }

    /// Returns the message identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Returns the metadata.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Returns the runtime event type this message resolved to.
    #[must_use]
    pub fn resolved_type(&self) -> &str {
        &self.resolved_type
    }

    /// Returns the stream position, if the message was read from a stream.
    #[must_use]
    pub fn position(&self) -> Option<i64> {
        self.metadata.get(POSITION).and_then(Value::as_i64)
    }

    /// Returns the aggregate identifier from metadata.
    #[must_use]
    pub fn aggregate_id(&self) -> Option<String> {
        metadata_text(&self.metadata, AGGREGATE_ID)
    }

    /// Returns the aggregate type from metadata.
    #[must_use]
    pub fn aggregate_type(&self) -> Option<String> {
        metadata_text(&self.metadata, AGGREGATE_TYPE)
    }

    /// Returns the aggregate version from metadata.
    #[must_use]
    pub fn aggregate_version(&self) -> Option<i64> {
        self.metadata.get(AGGREGATE_VERSION).and_then(Value::as_i64)
    }
}

fn metadata_text(metadata: &Map<String, Value>, key: &str) -> Option<String> {
    match metadata.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_from_json_rejects_non_object_payload() {
        let result = Event::from_json("TicketRegistered", json!([1, 2]), json!({}));
        assert!(matches!(
            result,
            Err(EventSourcingError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_from_json_keeps_payload_and_metadata() {
        let event = Event::from_json(
            "TicketRegistered",
            json!({"ticketId": 1}),
            json!({AGGREGATE_ID: 1}),
        )
        .unwrap();

        assert_eq!(event.event_type(), "TicketRegistered");
        assert_eq!(event.payload()["ticketId"], json!(1));
        assert_eq!(event.metadata()[AGGREGATE_ID], json!(1));
    }

    #[test]
    fn test_stored_message_reads_well_known_metadata() {
        let metadata = json!({
            AGGREGATE_ID: 7,
            AGGREGATE_TYPE: "Ticket",
            AGGREGATE_VERSION: 3,
            POSITION: 12,
        });
        let message = StoredMessage::new(
            Uuid::new_v4(),
            Utc::now(),
            Map::new(),
            metadata.as_object().cloned().unwrap(),
            "TicketRegistered".into(),
        );

        assert_eq!(message.position(), Some(12));
        assert_eq!(message.aggregate_id().as_deref(), Some("7"));
        assert_eq!(message.aggregate_type().as_deref(), Some("Ticket"));
        assert_eq!(message.aggregate_version(), Some(3));
    }

    #[test]
    fn test_stored_message_converts_back_into_event() {
        let message = StoredMessage::new(
            Uuid::new_v4(),
            Utc::now(),
            json!({"ticketId": 1}).as_object().cloned().unwrap(),
            Map::new(),
            "TicketRegistered".into(),
        );

        let event = Event::from(message);

        assert_eq!(event.event_type(), "TicketRegistered");
        assert_eq!(event.payload()["ticketId"], json!(1));
    }
}
