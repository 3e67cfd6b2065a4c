//! Event store abstraction and the name-mapping front that sits on it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::EventSourcingError;
use crate::event::{Event, PendingMessage, StoredMessage};
use crate::mapper::EventNameMapper;

/// Name of an ordered, append-only stream of events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamName(String);

impl StreamName {
    /// Wraps a stream name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the category: the part before the first `-`, if there is one.
    #[must_use]
    pub fn category(&self) -> Option<&str> {
        self.0.split_once('-').map(|(category, _)| category)
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StreamName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Append-only storage of messages grouped into named streams.
///
/// Positions start at 1 and increase by one per appended message.
#[async_trait]
pub trait EventStore: Send + Sync + fmt::Debug {
    /// Creates a stream holding the given initial messages.
    async fn create(
        &self,
        stream: &StreamName,
        messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError>;

    /// Appends messages to an existing stream.
    async fn append_to(
        &self,
        stream: &StreamName,
        messages: &[PendingMessage],
    ) -> Result<(), EventSourcingError>;

    /// Reads up to `count` messages with position `>= from_number`, oldest first.
    async fn load(
        &self,
        stream: &StreamName,
        from_number: i64,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError>;

    /// Reads up to `count` messages with position `<= from_number`, newest
    /// first. `None` starts from the end of the stream.
    async fn load_reverse(
        &self,
        stream: &StreamName,
        from_number: Option<i64>,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError>;

    /// Whether the stream exists.
    async fn has_stream(&self, stream: &StreamName) -> Result<bool, EventSourcingError>;

    /// Deletes the stream and all of its messages.
    async fn delete(&self, stream: &StreamName) -> Result<(), EventSourcingError>;
}

/// Writes domain events under their wire names and reads them back as typed
/// messages.
#[derive(Debug, Clone)]
pub struct MappedEventStore {
    event_store: Arc<dyn EventStore>,
    mapper: Arc<EventNameMapper>,
    clock: Arc<dyn Clock>,
}

impl MappedEventStore {
    /// Creates a new `MappedEventStore`.
    #[must_use]
    pub fn new(
        event_store: Arc<dyn EventStore>,
        mapper: Arc<EventNameMapper>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            event_store,
            mapper,
            clock,
        }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.event_store
    }

    /// Returns the name mapper.
    #[must_use]
    pub fn mapper(&self) -> &EventNameMapper {
        &self.mapper
    }

    /// Appends events, creating the stream on first use.
    ///
    /// # Errors
    ///
    /// Propagates any error of the wrapped store unchanged.
    pub async fn append_to(
        &self,
        stream: &StreamName,
        events: &[Event],
    ) -> Result<(), EventSourcingError> {
        let messages: Vec<PendingMessage> = events.iter().map(|e| self.to_pending(e)).collect();

        if self.event_store.has_stream(stream).await? {
            return self.event_store.append_to(stream, &messages).await;
        }

        match self.event_store.create(stream, &messages).await {
            // Another writer created the stream between the check and the create.
            Err(EventSourcingError::StreamExists(_)) => {
                self.event_store.append_to(stream, &messages).await
            }
            result => result,
        }
    }

    /// Reads messages from a stream, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates any error of the wrapped store unchanged.
    pub async fn load(
        &self,
        stream: &StreamName,
        from_number: i64,
        count: Option<usize>,
    ) -> Result<Vec<StoredMessage>, EventSourcingError> {
        self.event_store.load(stream, from_number, count).await
    }

    /// Reads a whole stream back as domain events.
    ///
    /// # Errors
    ///
    /// Propagates any error of the wrapped store unchanged.
    pub async fn load_events(&self, stream: &StreamName) -> Result<Vec<Event>, EventSourcingError> {
        let messages = self.event_store.load(stream, 1, None).await?;
        Ok(messages.into_iter().map(Event::from).collect())
    }

    /// Whether the stream exists.
    ///
    /// # Errors
    ///
    /// Propagates any error of the wrapped store unchanged.
    pub async fn has_stream(&self, stream: &StreamName) -> Result<bool, EventSourcingError> {
        self.event_store.has_stream(stream).await
    }

    /// Deletes a stream.
    ///
    /// # Errors
    ///
    /// Propagates any error of the wrapped store unchanged.
    pub async fn delete(&self, stream: &StreamName) -> Result<(), EventSourcingError> {
        self.event_store.delete(stream).await
    }

    fn to_pending(&self, event: &Event) -> PendingMessage {
        PendingMessage {
            id: Uuid::new_v4(),
            message_name: self.mapper.map_event_to_name(event).to_owned(),
            created_at: self.clock.now(),
            payload: event.payload().clone(),
            metadata: event.metadata().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_is_prefix_before_dash() {
        assert_eq!(StreamName::new("ticket-42").category(), Some("ticket"));
        assert_eq!(StreamName::new("tickets").category(), None);
    }
}
