//! Two-way mapping between wire names and runtime event types.
//!
//! The mapper is built once at startup and shared. Names or types without an
//! explicit alias pass through unchanged, so new event types round-trip
//! through storage without registering anything.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::EventSourcingError;
use crate::event::{Event, StoredMessage};

/// Marker type for "structured data, no specific event type". Never aliased.
pub const UNTYPED_ARRAY: &str = "array";

/// Builds typed messages from the raw fields a storage backend reads.
pub trait MessageFactory: Send + Sync + std::fmt::Debug {
    /// Builds a message from its wire name and raw stored fields.
    ///
    /// `message_data` must carry `uuid`, `created_at`, `payload` and
    /// `metadata`.
    ///
    /// # Errors
    ///
    /// Returns `EventSourcingError::MalformedEnvelope` if a required field is
    /// missing or has the wrong shape.
    fn create_message_from_array(
        &self,
        message_name: &str,
        message_data: &Map<String, Value>,
    ) -> Result<StoredMessage, EventSourcingError>;
}

/// Name/type alias table.
#[derive(Debug, Clone, Default)]
pub struct EventNameMapper {
    event_type_to_name: HashMap<String, String>,
    name_to_event_type: HashMap<String, String>,
}

impl EventNameMapper {
    /// Creates a mapper from explicit tables.
    #[must_use]
    pub fn new(
        event_type_to_name: HashMap<String, String>,
        name_to_event_type: HashMap<String, String>,
    ) -> Self {
        Self {
            event_type_to_name,
            name_to_event_type,
        }
    }

    /// Creates a mapper with no aliases; every name maps to itself.
    #[must_use]
    pub fn create_empty() -> Self {
        Self::default()
    }

    /// Registers `event_type` to be persisted as `name`, in both directions.
    #[must_use]
    pub fn with_alias(mut self, event_type: impl Into<String>, name: impl Into<String>) -> Self {
        let event_type = event_type.into();
        let name = name.into();
        self.event_type_to_name
            .insert(event_type.clone(), name.clone());
        self.name_to_event_type.insert(name, event_type);
        self
    }

    /// Resolves a wire name to the runtime event type.
    #[must_use]
    pub fn map_name_to_event_type<'a>(&'a self, name: &'a str) -> &'a str {
        if name == UNTYPED_ARRAY {
            return UNTYPED_ARRAY;
        }
        self.lookup_name(name)
    }

    /// Resolves the wire name an event is persisted under.
    #[must_use]
    pub fn map_event_to_name<'a>(&'a self, event: &'a Event) -> &'a str {
        let event_type = event.event_type();
        self.event_type_to_name
            .get(event_type)
            .map_or(event_type, String::as_str)
    }

    fn lookup_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.name_to_event_type
            .get(name)
            .map_or(name, String::as_str)
    }
}

impl MessageFactory for EventNameMapper {
    fn create_message_from_array(
        &self,
        message_name: &str,
        message_data: &Map<String, Value>,
    ) -> Result<StoredMessage, EventSourcingError> {
        let malformed = |field| EventSourcingError::MalformedEnvelope {
            message_name: message_name.to_owned(),
            field,
        };

        let id = message_data
            .get("uuid")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| malformed("uuid"))?;
        let created_at = message_data
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .ok_or_else(|| malformed("created_at"))?;
        let payload = message_data
            .get("payload")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| malformed("payload"))?;
        let metadata = message_data
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| malformed("metadata"))?;

        let resolved_type = self.lookup_name(message_name).to_owned();

        Ok(StoredMessage::new(
            id,
            created_at,
            payload,
            metadata,
            resolved_type,
        ))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ticket_mapper() -> EventNameMapper {
        EventNameMapper::create_empty().with_alias("TicketRegistered", "ticketWasRegistered")
    }

    fn message_data() -> Map<String, Value> {
        json!({
            "uuid": "7c4a8d09-ca37-4c6b-9d1a-3b1c3e3f2a10",
            "created_at": "2026-01-15T10:00:00Z",
            "payload": {"ticketId": 1},
            "metadata": {"_aggregate_id": 1},
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn event(event_type: &str) -> Event {
        Event::create_with_type(event_type, Map::new(), Map::new())
    }

    #[test]
    fn test_registered_alias_is_invertible() {
        let mapper = ticket_mapper();

        assert_eq!(
            mapper.map_event_to_name(&event("TicketRegistered")),
            "ticketWasRegistered"
        );
        assert_eq!(
            mapper.map_name_to_event_type("ticketWasRegistered"),
            "TicketRegistered"
        );
    }

    #[test]
    fn test_unregistered_names_pass_through() {
        let mapper = ticket_mapper();

        assert_eq!(mapper.map_name_to_event_type("TicketClosed"), "TicketClosed");
        assert_eq!(mapper.map_event_to_name(&event("TicketClosed")), "TicketClosed");
    }

    #[test]
    fn test_empty_mapper_is_identity() {
        let mapper = EventNameMapper::create_empty();

        assert_eq!(
            mapper.map_name_to_event_type("ticketWasRegistered"),
            "ticketWasRegistered"
        );
        assert_eq!(
            mapper.map_event_to_name(&event("TicketRegistered")),
            "TicketRegistered"
        );
    }

    #[test]
    fn test_untyped_sentinel_is_never_aliased() {
        let mapper = EventNameMapper::create_empty().with_alias("SomethingElse", UNTYPED_ARRAY);

        assert_eq!(mapper.map_name_to_event_type(UNTYPED_ARRAY), UNTYPED_ARRAY);
    }

    #[test]
    fn test_explicit_tables_are_used_as_given() {
        let mapper = EventNameMapper::new(
            HashMap::from([("OrderPlaced".to_owned(), "order.placed".to_owned())]),
            HashMap::from([("order.placed".to_owned(), "OrderPlaced".to_owned())]),
        );

        assert_eq!(mapper.map_name_to_event_type("order.placed"), "OrderPlaced");
        assert_eq!(mapper.map_event_to_name(&event("OrderPlaced")), "order.placed");
    }

    #[test]
    fn test_create_message_resolves_alias() {
        let message = ticket_mapper()
            .create_message_from_array("ticketWasRegistered", &message_data())
            .unwrap();

        assert_eq!(message.resolved_type(), "TicketRegistered");
        assert_eq!(
            message.id(),
            Uuid::parse_str("7c4a8d09-ca37-4c6b-9d1a-3b1c3e3f2a10").unwrap()
        );
        assert_eq!(message.created_at().to_rfc3339(), "2026-01-15T10:00:00+00:00");
        assert_eq!(message.payload()["ticketId"], json!(1));
        assert_eq!(message.metadata()["_aggregate_id"], json!(1));
    }

    #[test]
    fn test_create_message_falls_back_to_wire_name() {
        let message = ticket_mapper()
            .create_message_from_array("ticketWasClosed", &message_data())
            .unwrap();

        assert_eq!(message.resolved_type(), "ticketWasClosed");
    }

    #[test]
    fn test_create_message_without_created_at_is_malformed() {
        let mut data = message_data();
        data.remove("created_at");

        let result = ticket_mapper().create_message_from_array("ticketWasRegistered", &data);

        match result {
            Err(EventSourcingError::MalformedEnvelope {
                message_name,
                field,
            }) => {
                assert_eq!(message_name, "ticketWasRegistered");
                assert_eq!(field, "created_at");
            }
            other => panic!("expected MalformedEnvelope, got {other:?}"),
        }
    }

    #[test]
    fn test_create_message_with_invalid_uuid_is_malformed() {
        let mut data = message_data();
        data.insert("uuid".into(), json!("not-a-uuid"));

        let result = ticket_mapper().create_message_from_array("ticketWasRegistered", &data);

        assert!(matches!(
            result,
            Err(EventSourcingError::MalformedEnvelope { field: "uuid", .. })
        ));
    }

    #[test]
    fn test_create_message_with_non_object_payload_is_malformed() {
        let mut data = message_data();
        data.insert("payload".into(), json!("oops"));

        let result = ticket_mapper().create_message_from_array("ticketWasRegistered", &data);

        assert!(matches!(
            result,
            Err(EventSourcingError::MalformedEnvelope {
                field: "payload",
                ..
            })
        ));
    }
}
