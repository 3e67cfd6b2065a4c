//! Test event stores: in-memory `EventStore` implementations for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventline_core::error::EventSourcingError;
use eventline_core::event::{POSITION, PendingMessage, StoredMessage};
use eventline_core::mapper::{EventNameMapper, MessageFactory};
use eventline_core::store::{EventStore, StreamName};
use serde_json::{Map, Value, json};

/// An event store that keeps streams in memory and records every append.
///
/// Messages are read back through the configured `MessageFactory`, the same
/// way the SQL adapters do it, so name resolution is exercised end to end.
#[derive(Debug)]
pub struct InMemoryEventStore {
    message_factory: Arc<dyn MessageFactory>,
    streams: Mutex<HashMap<StreamName, Vec<PendingMessage>>>,
    appended: Mutex<Vec<(StreamName, Vec<PendingMessage>)>>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(Arc::new(EventNameMapper::create_empty()))
    }
}

impl InMemoryEventStore {
    /// Create an empty store that builds messages with `message_factory`.
    #[must_use]
    pub fn new(message_factory: Arc<dyn MessageFactory>) -> Self {
        Self {
            message_factory,
            streams: Mutex::new(HashMap::new()),
            appended: Mutex::new(Vec::new()),
        }
    }

    /// Returns a snapshot of every `create`/`append_to` batch, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn appended_messages(&self) -> Vec<(StreamName, Vec<PendingMessage>)> {
        self.appended.lock().unwrap().clone()
    }

    fn record(&self, stream: &StreamName, messages: &[PendingMessage]) {
        self.appended
            .lock()
            .unwrap()
            .push((stream.clone(), messages.to_vec()));
    }

    fn to_stored(
        &self,
        position: i64,
        message: &PendingMessage,
    ) -> Result<StoredMessage, EventSourcingError> {
        let mut metadata = message.metadata.clone();
        metadata.insert(POSITION.to_owned(), json!(position));
        let mut data = Map::new();
        data.insert("uuid".into(), Value::String(message.id.to_string()));
        data.insert(
            "created_at".into(),
            Value::String(message.created_at.to_rfc3339()),
        );
        data.insert("payload".into(), Value::Object(message.payload.clone()));
        data.insert("metadata".into(), Value::Object(metadata));
        self.message_factory
            .create_message_from_array(&message.message_name, &data)
    }

    fn positioned(
        &self,
        stream: &StreamName,
    ) -> Result<Vec<(i64, PendingMessage)>, EventSourcingError> {
        let streams = self.streams.lock().unwrap();
        let messages = streams
            .get(stream)
            .ok_or_else(|| EventSourcingError::StreamNotFound(stream.to_string()))?;
        Ok(messages
            .iter()
            .cloned()
            .zip(1_i64..)
            .map(|(message, position)| (position, message))
            .collect())
    }

    fn build(
        &self,
        selected: impl Iterator<Item = (i64, PendingMessage)>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        selected
            .map(|(position, message)| self.to_stored(position, &message))
            .collect()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn create(
        &self,
        stream: &StreamName,
        messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError> {
        {
            let mut streams = self.streams.lock().unwrap();
            if streams.contains_key(stream) {
                return Err(EventSourcingError::StreamExists(stream.to_string()));
            }
            streams.insert(stream.clone(), messages.to_vec());
        }
        self.record(stream, messages);
        Ok(())
    }

    async fn append_to(
        &self,
        stream: &StreamName,
        messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError> {
        {
            let mut streams = self.streams.lock().unwrap();
            let existing = streams
                .get_mut(stream)
                .ok_or_else(|| EventSourcingError::StreamNotFound(stream.to_string()))?;
            existing.extend_from_slice(messages);
        }
        self.record(stream, messages);
        Ok(())
    }

    async fn load(
        &self,
        stream: &StreamName,
        from_number: i64,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        let positioned = self.positioned(stream)?;
        let selected = positioned
            .into_iter()
            .filter(|(position, _)| *position >= from_number)
            .take(count.unwrap_or(usize::MAX));
        self.build(selected)
    }

    async fn load_reverse(
        &self,
        stream: &StreamName,
        from_number: Option<i64>,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        let positioned = self.positioned(stream)?;
        let upper = from_number.unwrap_or(i64::MAX);
        let selected = positioned
            .into_iter()
            .rev()
            .filter(|(position, _)| *position <= upper)
            .take(count.unwrap_or(usize::MAX));
        self.build(selected)
    }

    async fn has_stream(&self, stream: &StreamName) -> Result<bool, EventSourcingError> {
        Ok(self.streams.lock().unwrap().contains_key(stream))
    }

    async fn delete(&self, stream: &StreamName) -> Result<(), EventSourcingError> {
        self.streams
            .lock()
            .unwrap()
            .remove(stream)
            .map(|_| ())
            .ok_or_else(|| EventSourcingError::StreamNotFound(stream.to_string()))
    }
}

/// An event store that always returns a backend error. Useful for testing
/// error propagation.
#[derive(Debug)]
pub struct FailingEventStore;

fn connection_refused() -> EventSourcingError {
    EventSourcingError::BackendOperationFailed("connection refused".into())
}

#[async_trait]
impl EventStore for FailingEventStore {
    async fn create(
        &self,
        _stream: &StreamName,
        _messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError> {
        Err(connection_refused())
    }

    async fn append_to(
        &self,
        _stream: &StreamName,
        _messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError> {
        Err(connection_refused())
    }

    async fn load(
        &self,
        _stream: &StreamName,
        _from_number: i64,
        _count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        Err(connection_refused())
    }

    async fn load_reverse(
        &self,
        _stream: &StreamName,
        _from_number: Option<i64>,
        _count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        Err(connection_refused())
    }

    async fn has_stream(&self, _stream: &StreamName) -> Result<bool, EventSourcingError> {
        Err(connection_refused())
    }

    async fn delete(&self, _stream: &StreamName) -> Result<(), EventSourcingError> {
        Err(connection_refused())
    }
}
