//! Row decoding and driver error mapping shared by the SQL adapters.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use eventline_core::config::PersistenceStrategy;
use eventline_core::error::EventSourcingError;
use eventline_core::event::{POSITION, PendingMessage, StoredMessage};
use eventline_core::mapper::MessageFactory;
use eventline_core::projection::{ProjectionRecord, StreamPositions};
use eventline_core::store::StreamName;

/// SQLSTATE codes for a missing table.
const UNDEFINED_TABLE: [&str; 2] = ["42P01", "42S02"];
/// SQLSTATE for an invalid regular expression (`PostgreSQL`).
const INVALID_REGEX: &str = "2201B";

/// One message row, with JSON columns read as text.
pub(crate) struct EventRow {
    pub(crate) no: i64,
    pub(crate) event_id: String,
    pub(crate) event_name: String,
    pub(crate) payload: String,
    pub(crate) metadata: String,
    pub(crate) created_at: DateTime<Utc>,
}

impl EventRow {
    /// Builds the message through `factory`, adding the row number as the
    /// `_position` metadata entry.
    pub(crate) fn into_message(
        self,
        factory: &dyn MessageFactory,
    ) -> Result<StoredMessage, EventSourcingError> {
        let mut metadata = parse_json(&self.metadata)?;
        if let Value::Object(map) = &mut metadata {
            map.insert(POSITION.to_owned(), Value::from(self.no));
        }
        let mut data = Map::new();
        data.insert("uuid".into(), Value::String(self.event_id));
        data.insert(
            "created_at".into(),
            Value::String(self.created_at.to_rfc3339()),
        );
        data.insert("payload".into(), parse_json(&self.payload)?);
        data.insert("metadata".into(), metadata);
        factory.create_message_from_array(&self.event_name, &data)
    }
}

pub(crate) fn parse_json(text: &str) -> Result<Value, EventSourcingError> {
    serde_json::from_str(text).map_err(|e| EventSourcingError::BackendOperationFailed(e.to_string()))
}

pub(crate) fn to_json_text(value: &impl serde::Serialize) -> Result<String, EventSourcingError> {
    serde_json::to_string(value).map_err(|e| EventSourcingError::BackendOperationFailed(e.to_string()))
}

/// Rejects messages lacking the aggregate metadata `strategy` indexes.
///
/// Only `MySQL` needs this: its indexed columns are generated `NOT NULL`.
/// `PostgreSQL` expression indexes and `MariaDB` nullable columns treat
/// missing keys as distinct nulls.
pub(crate) fn check_aggregate_metadata(
    strategy: PersistenceStrategy,
    messages: &[PendingMessage],
) -> Result<(), EventSourcingError> {
    for message in messages {
        if let Some(key) = strategy
            .aggregate_metadata_keys()
            .iter()
            .copied()
            .find(|key| message.metadata_text(key).is_none())
        {
            return Err(EventSourcingError::MissingAggregateMetadata {
                message_name: message.message_name.clone(),
                key,
            });
        }
    }
    Ok(())
}

/// Category of a stream: the part before the first `-`.
pub(crate) fn category(stream: &StreamName) -> Option<String> {
    stream.category().map(str::to_owned)
}

/// Decodes a projections row.
pub(crate) fn projection_record(
    position: &str,
    state: &str,
    status: &str,
) -> Result<ProjectionRecord, EventSourcingError> {
    let positions: StreamPositions = serde_json::from_str(position)
        .map_err(|e| EventSourcingError::BackendOperationFailed(e.to_string()))?;
    Ok(ProjectionRecord {
        status: status.parse()?,
        positions,
        state: parse_json(state)?,
    })
}

/// Converts a page bound for binding.
pub(crate) fn bound(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Any driver error, unclassified.
pub(crate) fn backend(error: &sqlx::Error) -> EventSourcingError {
    EventSourcingError::BackendOperationFailed(error.to_string())
}

fn is_undefined_table(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db)
        if db.code().is_some_and(|code| UNDEFINED_TABLE.contains(&code.as_ref())))
}

/// Maps an error of a read against `stream`'s table.
pub(crate) fn read_error(stream: &StreamName, error: &sqlx::Error) -> EventSourcingError {
    if is_undefined_table(error) {
        EventSourcingError::StreamNotFound(stream.to_string())
    } else {
        backend(error)
    }
}

/// Maps an error of an insert into `stream`'s table.
pub(crate) fn append_error(stream: &StreamName, error: &sqlx::Error) -> EventSourcingError {
    match error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            EventSourcingError::ConcurrencyConflict {
                stream: stream.to_string(),
                detail: db.message().to_owned(),
            }
        }
        _ => read_error(stream, error),
    }
}

/// Maps an error of registering `stream` in the registry table.
pub(crate) fn create_error(stream: &StreamName, error: &sqlx::Error) -> EventSourcingError {
    match error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            EventSourcingError::StreamExists(stream.to_string())
        }
        _ => backend(error),
    }
}

/// Maps an error of a projection name regex query.
pub(crate) fn regex_error(regex: &str, error: &sqlx::Error) -> EventSourcingError {
    match error {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(INVALID_REGEX) => {
            EventSourcingError::InvalidArgument(format!("invalid regex `{regex}`: {}", db.message()))
        }
        _ => backend(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use eventline_core::event::{AGGREGATE_ID, AGGREGATE_TYPE, AGGREGATE_VERSION};
    use eventline_core::mapper::EventNameMapper;
    use serde_json::json;
    use uuid::Uuid;

    fn pending(metadata: Value) -> PendingMessage {
        let Value::Object(metadata) = metadata else {
            panic!("metadata must be an object");
        };
        PendingMessage {
            id: Uuid::new_v4(),
            message_name: "ticketWasRegistered".into(),
            created_at: Utc::now(),
            payload: Map::new(),
            metadata,
        }
    }

    #[test]
    fn test_row_becomes_message_with_position() {
        let mapper = EventNameMapper::create_empty()
            .with_alias("TicketRegistered", "ticketWasRegistered");
        let row = EventRow {
            no: 7,
            event_id: Uuid::nil().to_string(),
            event_name: "ticketWasRegistered".into(),
            payload: r#"{"ticketId":1}"#.into(),
            metadata: "{}".into(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        };

        let message = row.into_message(&mapper).unwrap();

        assert_eq!(message.resolved_type(), "TicketRegistered");
        assert_eq!(message.position(), Some(7));
        assert_eq!(message.payload().get("ticketId"), Some(&json!(1)));
    }

    #[test]
    fn test_single_stream_requires_all_aggregate_keys() {
        let messages = [pending(json!({AGGREGATE_ID: "t-1", AGGREGATE_VERSION: 1}))];

        let result = check_aggregate_metadata(PersistenceStrategy::SingleStream, &messages);

        assert!(matches!(
            result,
            Err(EventSourcingError::MissingAggregateMetadata { key, .. }) if key == AGGREGATE_TYPE
        ));
    }

    #[test]
    fn test_aggregate_stream_requires_only_version() {
        let messages = [pending(json!({AGGREGATE_VERSION: 3}))];

        assert!(check_aggregate_metadata(PersistenceStrategy::AggregateStream, &messages).is_ok());
    }

    #[test]
    fn test_simple_requires_nothing() {
        let messages = [pending(json!({}))];

        assert!(check_aggregate_metadata(PersistenceStrategy::Simple, &messages).is_ok());
    }

    #[test]
    fn test_projection_record_decodes_row() {
        let record = projection_record(r#"{"tickets":4}"#, r#"{"count":4}"#, "running").unwrap();

        assert_eq!(record.positions.get("tickets"), Some(&4));
        assert_eq!(record.state, json!({"count": 4}));
        assert_eq!(record.status.as_str(), "running");
    }

    #[test]
    fn test_non_database_errors_are_backend_failures() {
        let stream = StreamName::new("tickets");

        let error = append_error(&stream, &sqlx::Error::PoolTimedOut);

        assert!(matches!(error, EventSourcingError::BackendOperationFailed(_)));
    }
}
